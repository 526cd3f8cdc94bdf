mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{bearer, make_router, make_state, test_config};

fn submit_body(prompt: &str, deps: Vec<String>) -> Value {
    json!({
        "tasks": [{
            "type": "code",
            "prompt": prompt,
            "context": {
                "branch": "main",
                "files": ["src/lib.rs"],
                "dependencies": deps
            }
        }]
    })
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", bearer())
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", bearer())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let app = make_router(make_state(test_config()));
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "mock");
    assert_eq!(body["queueDepth"], 0);
}

#[tokio::test]
async fn task_routes_require_credentials() {
    let app = make_router(make_state(test_config()));
    let resp = app
        .oneshot(Request::builder().uri("/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn submit_then_fetch_round_trips() {
    let state = make_state(test_config());
    let app = make_router(state.clone());

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("add login", vec![])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let task_ids = body["taskIds"].as_array().unwrap();
    assert_eq!(task_ids.len(), 1);
    assert_eq!(body["estimatedCostCents"], 100);

    let id = task_ids[0].as_str().unwrap();
    let resp = app
        .clone()
        .oneshot(get(&format!("/tasks/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["task"]["status"], "pending");
    assert!(body["result"].is_null());

    // And it shows up in the listing.
    let resp = app.oneshot(get("/tasks?status=pending")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_batch_is_a_validation_error() {
    let app = make_router(make_state(test_config()));
    let resp = app
        .oneshot(post("/tasks", &json!({"tasks": []})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_json(resp).await;
    assert_eq!(body["error"], "validation failed");
    assert_eq!(body["details"][0]["field"], "tasks");
}

#[tokio::test]
async fn dependencies_are_accepted_and_unknown_ids_read_as_unmet() {
    let state = make_state(test_config());
    let app = make_router(state.clone());

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("a", vec![])))
        .await
        .unwrap();
    let a_id = body_json(resp).await["taskIds"][0]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("b", vec![a_id.clone()])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Ids are minted server-side, so a client cannot close a cycle; a
    // dependency on an id the store has never seen lands as unmet.
    let ghost = uuid::Uuid::new_v4().to_string();
    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("c", vec![ghost])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let app = make_router(make_state(test_config()));
    let resp = app
        .oneshot(get(&format!("/tasks/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_flips_status_and_rejects_double_cancel() {
    let state = make_state(test_config());
    let app = make_router(state.clone());

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("x", vec![])))
        .await
        .unwrap();
    let id = body_json(resp).await["taskIds"][0]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .clone()
        .oneshot(post(&format!("/tasks/{id}/cancel"), &json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "cancelled");

    let resp = app
        .oneshot(post(&format!("/tasks/{id}/cancel"), &json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn budget_endpoint_reports_state_and_projection() {
    let app = make_router(make_state(test_config()));
    let resp = app.oneshot(get("/budget")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["state"]["daily_used_cents"], 0);
    assert_eq!(body["state"]["paused"], false);
    assert_eq!(body["projectedDailyCents"], 0);
    assert_eq!(body["config"]["daily_limit_cents"], 10_000);
}

#[tokio::test]
async fn paused_budget_refuses_submissions() {
    let mut config = test_config();
    config.budget.daily_limit_cents = 100;
    let state = make_state(config);
    let app = make_router(state.clone());

    // Drive the guard over the cap directly.
    let result = swarm_core::types::TaskResult {
        task_id: uuid::Uuid::new_v4(),
        agent_id: "swarm-agent-aaaaaaaa".into(),
        status: swarm_core::types::ResultStatus::Success,
        outputs: vec![],
        summary: None,
        reports: None,
        usage: swarm_core::types::TokenUsage::default(),
        duration_ms: 1,
        cost_cents: 100,
        base_commit: None,
        result_commit: None,
        conflicts: None,
        error: None,
    };
    state.budget.record_result(&result).await.unwrap();

    let resp = app
        .oneshot(post("/tasks", &submit_body("refused", vec![])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "budget paused");
}

#[tokio::test]
async fn reset_routes_clear_counters_and_unpause() {
    let mut config = test_config();
    config.budget.daily_limit_cents = 100;
    let state = make_state(config);
    let app = make_router(state.clone());

    // Exhaust the daily budget so submissions are refused.
    let result = swarm_core::types::TaskResult {
        task_id: uuid::Uuid::new_v4(),
        agent_id: "swarm-agent-aaaaaaaa".into(),
        status: swarm_core::types::ResultStatus::Success,
        outputs: vec![],
        summary: None,
        reports: None,
        usage: swarm_core::types::TokenUsage::default(),
        duration_ms: 1,
        cost_cents: 100,
        base_commit: None,
        result_commit: None,
        conflicts: None,
        error: None,
    };
    state.budget.record_result(&result).await.unwrap();
    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("refused", vec![])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // The external scheduler's midnight reset goes through the API.
    let resp = app
        .clone()
        .oneshot(post("/budget/reset-daily", &json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["daily_used_cents"], 0);
    assert_eq!(body["paused"], false);
    // Weekly survives the daily reset.
    assert_eq!(body["weekly_used_cents"], 100);

    // Submissions flow again.
    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("accepted", vec![])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Sunday's weekly reset, idempotent like the daily one.
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(post("/budget/reset-weekly", &json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["weekly_used_cents"], 0);
    }
}

#[tokio::test]
async fn reset_routes_require_credentials() {
    let app = make_router(make_state(test_config()));
    let req = Request::builder()
        .method("POST")
        .uri("/budget/reset-daily")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agents_endpoint_returns_rollups() {
    let state = make_state(test_config());
    let app = make_router(state.clone());

    let mut agent = swarm_core::types::Agent::new("swarm-agent-aaaaaaaa");
    agent.status = swarm_core::types::AgentStatus::Running;
    agent.cost_cents = 42;
    state.store.set_agent(&agent).await.unwrap();

    let resp = app.oneshot(get("/agents")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["rollups"]["total"], 1);
    assert_eq!(body["rollups"]["running"], 1);
    assert_eq!(body["rollups"]["totalCostCents"], 42);
}

#[tokio::test]
async fn execute_rejects_blocked_tasks() {
    let state = make_state(test_config());
    let app = make_router(state.clone());

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("a", vec![])))
        .await
        .unwrap();
    let a_id = body_json(resp).await["taskIds"][0]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .clone()
        .oneshot(post("/tasks", &submit_body("b", vec![a_id])))
        .await
        .unwrap();
    let b_id = body_json(resp).await["taskIds"][0]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .oneshot(post(&format!("/execute/{b_id}"), &json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("unmet dependencies"));
}
