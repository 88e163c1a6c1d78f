//! codecanvas — agent-driven React app builder over a virtual file system.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod config;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod prompts;
pub mod tools;
pub mod vfs;
