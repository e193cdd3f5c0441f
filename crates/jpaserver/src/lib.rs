//! HTTP front end for the JPA server: FHIR REST endpoints backed by the
//! in-memory resource store, plus the `/websocket` subscription channel.

pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use error::{ApiError, OperationOutcome};
pub use observability::init_tracing;
pub use server::{AppState, JpaServer, ServerBuilder, build_app};
