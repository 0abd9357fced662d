//! Observability for the Player Controller.
//!
//! - [`health`]: liveness and readiness endpoints
//! - [`metrics`]: Prometheus metric definitions
//!
//! The `/metrics` endpoint is served next to the health routes by the
//! `metrics-exporter-prometheus` handle installed in `main`.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
