//! Pipeline execution engine and trait definitions for Stepchain.
//!
//! This crate defines the "ports" (repository and model invoker traits) that
//! the infrastructure layer implements, plus the engine itself. It depends
//! only on `stepchain-types` -- never on `stepchain-infra` or any database/IO
//! crate.

pub mod engine;
pub mod llm;
pub mod repository;
