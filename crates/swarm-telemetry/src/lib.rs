//! swarm-telemetry — tracing bootstrap for the orchestrator binaries.

pub mod logging;
