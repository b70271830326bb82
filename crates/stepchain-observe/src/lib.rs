//! Observability setup for Stepchain: tracing subscriber initialization and
//! OpenTelemetry GenAI semantic-convention attribute constants.

pub mod genai_attrs;
pub mod tracing_setup;
