//! Infrastructure implementations for Stepchain.
//!
//! Implements the ports defined in `stepchain-core`: SQLite persistence for
//! workflows and executions, the OpenAI-compatible model gateway client, and
//! `config.toml` loading.

pub mod config;
pub mod llm;
pub mod sqlite;
