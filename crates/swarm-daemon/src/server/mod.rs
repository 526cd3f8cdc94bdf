//! HTTP + WebSocket request boundary.
//!
//! `/health` and the notification channel are open; every `/tasks`,
//! `/agents`, `/budget`, and `/execute` route sits behind the auth
//! layer (signed bearer token or `sk_swarm_` API key).

mod agents;
mod budget;
mod execute;
mod health;
pub mod state;
mod tasks;
mod websocket;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use swarm_bridge::auth::{AuthLayer, TokenVerifier};

pub use state::ApiState;

/// Build the full API router.
pub fn api_router(
    state: Arc<ApiState>,
    verifier: TokenVerifier,
    pinned_api_key: Option<String>,
    allowed_origins: Vec<String>,
) -> Router {
    let protected = Router::new()
        .route("/tasks", post(tasks::submit_tasks).get(tasks::list_tasks))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/agents", get(agents::list_agents))
        .route("/budget", get(budget::get_budget))
        .route("/budget/reset-daily", post(budget::reset_daily))
        .route("/budget/reset-weekly", post(budget::reset_weekly))
        .route("/execute/batch", post(execute::execute_batch))
        .route("/execute/{task_id}", post(execute::execute_task))
        .layer(AuthLayer::new(verifier, pinned_api_key));

    Router::new()
        .route("/health", get(health::health))
        .route("/ws", get(websocket::ws_handler))
        .merge(protected)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::predicate(
                    move |origin: &axum::http::HeaderValue,
                          _request_parts: &axum::http::request::Parts| {
                        if let Ok(origin_str) = origin.to_str() {
                            if origin_str.starts_with("http://localhost")
                                || origin_str.starts_with("http://127.0.0.1")
                            {
                                return true;
                            }
                            allowed_origins.iter().any(|allowed| origin_str == allowed)
                        } else {
                            false
                        }
                    },
                ))
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ]),
        )
        .with_state(state)
}
