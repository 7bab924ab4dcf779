//! Configuration constants and structures for sandtest
//!
//! This module centralizes the limits, budgets and error codes shared by the
//! bundler, the in-context runtime and the sandbox supervisor.

pub mod errors;
pub mod limits;
pub mod timeouts;
