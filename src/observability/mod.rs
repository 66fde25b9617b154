//! Observability
//!
//! Pool and request metrics with Prometheus text export.

pub mod metrics;
