//! swarm-exec — the execution-provider abstraction and its backends.
//!
//! A provider launches one ephemeral worker per task, reports execution
//! status, and is awaited for completion. Three backends ship: the
//! machines provider (remote machine-lifecycle REST API with a blocking
//! wait endpoint), the jobs provider (pre-defined job templates, polled),
//! and the mock provider (simulate mode).

pub mod env;
pub mod jobs;
pub mod machines;
pub mod mock;
pub mod provider;
pub mod resources;

pub use provider::{
    build_provider, ActiveJob, CompletionOutcome, CompletionStatus, ExecutionHandle,
    ExecutionProvider, ExecutionStatus, ProviderError, DEFAULT_WAIT_TIMEOUT_MS,
};
pub use resources::{tier_for_task, ResourceTier};
