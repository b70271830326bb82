//! Pipeline engine core: the components that drive one execution.
//!
//! - `context` -- prompt assembly, fenced code extraction, output-context building
//! - `criteria` -- pass/fail evaluation for every criterion kind
//! - `cost` -- token-to-USD accounting against the model registry
//! - `retry` -- attempt budgets and exponential backoff
//! - `checkpoint` -- persistence of every state transition for the polling observer
//! - `step_runner` -- drives one step through its attempt loop
//! - `executor` -- drives an entire execution, sequentially and fail-fast

pub mod checkpoint;
pub mod context;
pub mod cost;
pub mod criteria;
pub mod executor;
pub mod retry;
pub mod step_runner;
