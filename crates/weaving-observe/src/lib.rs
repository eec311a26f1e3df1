//! Observability setup for Weaving Flow: structured logging via
//! `tracing-subscriber` and optional OpenTelemetry span export.

pub mod tracing_setup;
