//! Shared domain types for Stepchain.
//!
//! This crate contains the core domain types used across the Stepchain
//! pipeline engine: workflow definitions, execution tracking records, model
//! request/response shapes, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod workflow;
