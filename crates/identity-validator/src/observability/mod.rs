//! Observability for the identity validator.
//!
//! Metric names and recording helpers live in `metrics`. Logging uses
//! `tracing` with `idv.*` targets throughout the crate.

pub mod metrics;
