//! Specialist workers and their invocation machinery.
//!
//! This module provides the bounded tool-calling runner and the tool
//! executor bridging model decisions to the dataset operations.

pub mod runner;
pub mod tools;

pub use runner::WorkerRunner;
pub use tools::{ToolExecutor, ToolOutcome};
