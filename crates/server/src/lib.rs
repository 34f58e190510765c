//! HTTP boundary for the Warden restore service.
//!
//! This crate exposes the restore engine over HTTP:
//! - Restore upload and resume endpoints
//! - Status, interrupt and cancel endpoints
//! - Export format introspection
//! - Health and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use identity::{Identity, TraceId};
pub use routes::create_router;
pub use state::{AppState, CancellationRestarter};
