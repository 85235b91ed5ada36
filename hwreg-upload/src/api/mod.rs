//! HTTP API handlers for hwreg-upload

pub mod health;
pub mod sse;
pub mod upload_workflow;

pub use health::health_routes;
pub use sse::upload_event_stream;
pub use upload_workflow::upload_routes;
