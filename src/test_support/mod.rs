//! Test support infrastructure.
//!
//! Compiled only for tests or with the `test_harness` feature. Nothing in the
//! runtime path refers to this module.

#![cfg(any(test, feature = "test_harness"))]

mod harness;

pub use harness::{run_file, write_tree, HarnessRun, SandtestHarness};
