use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use super::{Result, StateStore, StoreError, TaskFilter};
use crate::types::{Agent, BudgetState, Task, TaskResult};

/// TTLs per entity class (seconds). Budget keys are persistent.
const TASK_TTL_SECS: i64 = 7 * 86_400;
const RESULT_TTL_SECS: i64 = 7 * 86_400;
const AGENT_TTL_SECS: i64 = 86_400;
const EDGE_TTL_SECS: i64 = 7 * 86_400;

const TASKS_INDEX: &str = "tasks:index";
const AGENTS_INDEX: &str = "agents:index";

fn backend(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Durable SQLite-backed key-value store.
///
/// Keys follow the persisted layout `task:<id>`, `result:<id>`,
/// `agent:<id>`, `budget:*`, `dep:forward:<id>`, `dep:reverse:<id>`, with
/// timestamp-ranked indexes for ordered listing. Expiry is lazy on read;
/// [`purge_expired`](DurableStore::purge_expired) sweeps the rest.
pub struct DurableStore {
    conn: Connection,
}

impl DurableStore {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA temp_store=MEMORY;

                    CREATE TABLE IF NOT EXISTS kv (
                        key        TEXT PRIMARY KEY,
                        value      TEXT NOT NULL,
                        expires_at INTEGER
                    );

                    CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);

                    CREATE TABLE IF NOT EXISTS ranked_index (
                        name   TEXT NOT NULL,
                        member TEXT NOT NULL,
                        rank   INTEGER NOT NULL,
                        PRIMARY KEY (name, member)
                    );

                    CREATE INDEX IF NOT EXISTS idx_ranked_name_rank
                        ON ranked_index(name, rank);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    // -----------------------------------------------------------------------
    // KV helpers
    // -----------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned + Send + 'static>(
        &self,
        key: String,
    ) -> Result<Option<T>> {
        let now = now_secs();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value FROM kv
                     WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                )?;
                let mut rows = stmt.query((key, now))?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, String>(0)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(backend)?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(
        &self,
        key: String,
        value: &T,
        ttl_secs: Option<i64>,
    ) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let expires_at = ttl_secs.map(|ttl| now_secs() + ttl);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at",
                    (key, text, expires_at),
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn delete_key(&self, key: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM kv WHERE key = ?1", (key,))?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn index_add(&self, name: &'static str, member: String, rank: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ranked_index (name, member, rank) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name, member) DO NOTHING",
                    (name, member, rank),
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn index_remove(&self, name: &'static str, member: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM ranked_index WHERE name = ?1 AND member = ?2",
                    (name, member),
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    /// Delete every expired row and any index member whose entity row is
    /// gone. Called periodically by the daemon.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = now_secs();
        self.conn
            .call(move |conn| {
                let purged = conn.execute(
                    "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    (now,),
                )?;
                conn.execute(
                    "DELETE FROM ranked_index WHERE name = ?1
                       AND NOT EXISTS (SELECT 1 FROM kv WHERE key = 'task:' || member)",
                    (TASKS_INDEX,),
                )?;
                conn.execute(
                    "DELETE FROM ranked_index WHERE name = ?1
                       AND NOT EXISTS (SELECT 1 FROM kv WHERE key = 'agent:' || member)",
                    (AGENTS_INDEX,),
                )?;
                Ok(purged)
            })
            .await
            .map_err(backend)
    }

    // -----------------------------------------------------------------------
    // Edge helpers (read-modify-write inside one connection call)
    // -----------------------------------------------------------------------

    async fn mutate_edge_set(
        &self,
        key: String,
        member: Uuid,
        insert: bool,
    ) -> Result<()> {
        let expires_at = now_secs() + EDGE_TTL_SECS;
        self.conn
            .call(move |conn| {
                let existing: Option<String> = {
                    let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
                    let mut rows = stmt.query((&key,))?;
                    match rows.next()? {
                        Some(row) => Some(row.get(0)?),
                        None => None,
                    }
                };

                let mut set: Vec<Uuid> = existing
                    .and_then(|text| serde_json::from_str(&text).ok())
                    .unwrap_or_default();

                if insert {
                    if !set.contains(&member) {
                        set.push(member);
                    }
                } else {
                    set.retain(|m| *m != member);
                }

                let text = serde_json::to_string(&set)
                    .unwrap_or_else(|_| "[]".to_string());
                conn.execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at",
                    (key, text, expires_at),
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn read_edge_set(&self, key: String) -> Result<Vec<Uuid>> {
        Ok(self.get_json::<Vec<Uuid>>(key).await?.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// StateStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl StateStore for DurableStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        self.get_json(format!("task:{id}")).await
    }

    async fn set_task(&self, task: &Task) -> Result<()> {
        self.put_json(format!("task:{}", task.id), task, Some(TASK_TTL_SECS))
            .await?;
        self.index_add(
            TASKS_INDEX,
            task.id.to_string(),
            task.created_at.timestamp_millis(),
        )
        .await
    }

    async fn delete_task(&self, id: Uuid) -> Result<()> {
        self.delete_key(format!("task:{id}")).await?;
        self.index_remove(TASKS_INDEX, id.to_string()).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let newest_first = filter.newest_first;
        let now = now_secs();
        let rows: Vec<String> = self
            .conn
            .call(move |conn| {
                let sql = if newest_first {
                    "SELECT kv.value FROM ranked_index
                     JOIN kv ON kv.key = 'task:' || ranked_index.member
                     WHERE ranked_index.name = ?1
                       AND (kv.expires_at IS NULL OR kv.expires_at > ?2)
                     ORDER BY ranked_index.rank DESC"
                } else {
                    "SELECT kv.value FROM ranked_index
                     JOIN kv ON kv.key = 'task:' || ranked_index.member
                     WHERE ranked_index.name = ?1
                       AND (kv.expires_at IS NULL OR kv.expires_at > ?2)
                     ORDER BY ranked_index.rank ASC"
                };
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt
                    .query_map((TASKS_INDEX, now), |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        let out = rows
            .iter()
            .filter_map(|text| serde_json::from_str::<Task>(text).ok())
            .filter(|t| filter.matches(t))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(out)
    }

    async fn get_result(&self, task_id: Uuid) -> Result<Option<TaskResult>> {
        self.get_json(format!("result:{task_id}")).await
    }

    async fn set_result(&self, result: &TaskResult) -> Result<()> {
        self.put_json(
            format!("result:{}", result.task_id),
            result,
            Some(RESULT_TTL_SECS),
        )
        .await
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.get_json(format!("agent:{id}")).await
    }

    async fn set_agent(&self, agent: &Agent) -> Result<()> {
        self.put_json(format!("agent:{}", agent.id), agent, Some(AGENT_TTL_SECS))
            .await?;
        self.index_add(
            AGENTS_INDEX,
            agent.id.clone(),
            agent.started_at.timestamp_millis(),
        )
        .await
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        self.delete_key(format!("agent:{id}")).await?;
        self.index_remove(AGENTS_INDEX, id.to_string()).await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let now = now_secs();
        let rows: Vec<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT kv.value FROM ranked_index
                     JOIN kv ON kv.key = 'agent:' || ranked_index.member
                     WHERE ranked_index.name = ?1
                       AND (kv.expires_at IS NULL OR kv.expires_at > ?2)
                     ORDER BY ranked_index.rank ASC",
                )?;
                let rows = stmt
                    .query_map((AGENTS_INDEX, now), |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        Ok(rows
            .iter()
            .filter_map(|text| serde_json::from_str::<Agent>(text).ok())
            .collect())
    }

    async fn count_active_agents(&self) -> Result<usize> {
        let agents = self.list_agents().await?;
        Ok(agents.iter().filter(|a| a.status.is_active()).count())
    }

    async fn get_budget(&self) -> Result<BudgetState> {
        let daily: Option<u64> = self.get_json("budget:daily".into()).await?;
        let weekly: Option<u64> = self.get_json("budget:weekly".into()).await?;
        let paused: Option<bool> = self.get_json("budget:paused".into()).await?;
        let updated: Option<DateTime<Utc>> = self.get_json("budget".into()).await?;
        Ok(BudgetState {
            daily_used_cents: daily.unwrap_or(0),
            weekly_used_cents: weekly.unwrap_or(0),
            paused: paused.unwrap_or(false),
            updated_at: updated.unwrap_or_else(Utc::now),
        })
    }

    async fn set_budget(&self, state: &BudgetState) -> Result<()> {
        self.put_json("budget:daily".into(), &state.daily_used_cents, None)
            .await?;
        self.put_json("budget:weekly".into(), &state.weekly_used_cents, None)
            .await?;
        self.put_json("budget:paused".into(), &state.paused, None)
            .await?;
        self.put_json("budget".into(), &state.updated_at, None).await
    }

    async fn increment_spend(&self, cents: u64) -> Result<BudgetState> {
        // Counters are bumped in one serialized connection call, which
        // makes the increment atomic with respect to other store callers.
        self.conn
            .call(move |conn| {
                for key in ["budget:daily", "budget:weekly"] {
                    conn.execute(
                        "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
                         ON CONFLICT(key) DO UPDATE SET
                            value = CAST(CAST(kv.value AS INTEGER) + ?3 AS TEXT)",
                        (key, cents.to_string(), cents as i64),
                    )?;
                }
                Ok(())
            })
            .await
            .map_err(backend)?;

        let mut state = self.get_budget().await?;
        state.updated_at = Utc::now();
        self.put_json("budget".into(), &state.updated_at, None).await?;
        Ok(state)
    }

    async fn reset_daily(&self) -> Result<()> {
        self.put_json("budget:daily".into(), &0u64, None).await?;
        self.put_json("budget:paused".into(), &false, None).await?;
        self.put_json("budget".into(), &Utc::now(), None).await
    }

    async fn reset_weekly(&self) -> Result<()> {
        self.put_json("budget:weekly".into(), &0u64, None).await?;
        self.put_json("budget".into(), &Utc::now(), None).await
    }

    async fn add_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        self.mutate_edge_set(format!("dep:forward:{task}"), depends_on, true)
            .await?;
        self.mutate_edge_set(format!("dep:reverse:{depends_on}"), task, true)
            .await
    }

    async fn remove_edge(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        self.mutate_edge_set(format!("dep:forward:{task}"), depends_on, false)
            .await?;
        self.mutate_edge_set(format!("dep:reverse:{depends_on}"), task, false)
            .await
    }

    async fn get_dependencies(&self, task: Uuid) -> Result<Vec<Uuid>> {
        self.read_edge_set(format!("dep:forward:{task}")).await
    }

    async fn get_dependents(&self, task: Uuid) -> Result<Vec<Uuid>> {
        self.read_edge_set(format!("dep:reverse:{task}")).await
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(backend)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskContext, TaskType};

    async fn open() -> DurableStore {
        DurableStore::new_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn task_round_trip() {
        let store = open().await;
        let task = Task::new(TaskType::Code, "prompt", TaskContext::for_branch("main"));
        store.set_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.prompt, "prompt");
    }

    #[tokio::test]
    async fn listing_orders_by_insertion_rank() {
        let store = open().await;
        let mut a = Task::new(TaskType::Code, "a", TaskContext::for_branch("main"));
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let b = Task::new(TaskType::Code, "b", TaskContext::for_branch("main"));
        store.set_task(&a).await.unwrap();
        store.set_task(&b).await.unwrap();

        let newest = store
            .list_tasks(&TaskFilter {
                newest_first: true,
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(newest[0].id, b.id);
    }

    #[tokio::test]
    async fn spend_counters_survive_round_trip() {
        let store = open().await;
        let state = store.increment_spend(120).await.unwrap();
        assert_eq!(state.daily_used_cents, 120);

        let state = store.increment_spend(80).await.unwrap();
        assert_eq!(state.daily_used_cents, 200);
        assert_eq!(state.weekly_used_cents, 200);

        store.reset_daily().await.unwrap();
        let budget = store.get_budget().await.unwrap();
        assert_eq!(budget.daily_used_cents, 0);
        assert_eq!(budget.weekly_used_cents, 200);
    }

    #[tokio::test]
    async fn edges_round_trip_and_remove() {
        let store = open().await;
        let t = Uuid::new_v4();
        let d = Uuid::new_v4();

        store.add_edge(t, d).await.unwrap();
        assert_eq!(store.get_dependencies(t).await.unwrap(), vec![d]);
        assert_eq!(store.get_dependents(d).await.unwrap(), vec![t]);

        store.remove_edge(t, d).await.unwrap();
        assert!(store.get_dependencies(t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_removes_expired_rows() {
        let store = open().await;
        // Insert an already-expired row directly.
        store
            .conn
            .call(|conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES ('task:gone', '{}', 1)",
                    [],
                )?;
                Ok::<(), tokio_rusqlite::rusqlite::Error>(())
            })
            .await
            .unwrap();

        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let store = open().await;
        store.ping().await.unwrap();
    }
}
