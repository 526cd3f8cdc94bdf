//! swarm-bridge — the notification protocol, broadcast event bus, request
//! authentication, and submission validation shared by the orchestrator
//! components and the HTTP server.

pub mod api_error;
pub mod auth;
pub mod event_bus;
pub mod protocol;
pub mod validation;

pub use api_error::{ApiError, FieldError};
pub use event_bus::EventBus;
pub use protocol::{ClientAction, ClientMessage, EventFilter, Notification, NotificationKind};
