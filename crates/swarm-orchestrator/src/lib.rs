//! swarm-orchestrator — the scheduling-and-coordination brain: the task
//! dependency graph, agent scoring and routing, the scheduler, the
//! conflict monitor, the budget guard, and the topology handlers.

pub mod budget;
pub mod conflict;
pub mod graph;
pub mod router;
pub mod scheduler;
pub mod scoring;
pub mod topology;

pub use budget::{BudgetError, BudgetGuard};
pub use conflict::{AssignmentCheck, ConflictEvent, ConflictMonitor, ConflictSeverity};
pub use graph::{DependencyGraph, GraphError};
pub use router::{AgentRouter, RoutingDecision};
pub use scheduler::{Scheduler, SchedulerError, SchedulingDecision};
pub use scoring::ScoreBoard;
pub use topology::{
    build_topology, HierarchicalTopology, HubTopology, MeshTopology, TopologyError,
    TopologyHandler,
};
