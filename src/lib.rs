//! Bundle a virtual source tree and run its tests inside an isolated JS context.
//!
//! The pipeline is [`file_index`] lookup, [`bundler`] inlining, [`codegen`]
//! program assembly and finally a [`sandbox`] run that reports a Jest-shaped
//! [`ExecutionResult`].

pub mod bundler;
pub mod codegen;
pub mod config;
pub mod core;
pub mod file_index;
pub mod runtime;
pub mod sandbox;
pub mod syntax;
pub mod transpile;

pub use bundler::{BundleError, BundleOutput, Bundler};
pub use codegen::CodegenOptions;
pub use core::{init_tracing, SandboxOptions};
pub use file_index::{file_map, FileIndex, FileMap, VirtualFile};
pub use runtime::suite::{AssertionResult, ExecutionResult, Status, SuiteResult};
pub use sandbox::{Sandbox, SandboxError};
pub use transpile::TranspileError;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::errors::ERR_NO_ENTRIES;

#[derive(Debug, Error)]
pub enum SandtestError {
    #[error("{}: no entry points given", ERR_NO_ENTRIES)]
    NoEntries,
    #[error(transparent)]
    Bundle(#[from] BundleError),
    /// Hosts that lower sources with [`transpile::transpile`] ahead of a run.
    #[error(transparent)]
    Transpile(#[from] TranspileError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Which files of the map start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoints {
    Single(String),
    Many(Vec<String>),
}

impl EntryPoints {
    pub fn as_slice(&self) -> &[String] {
        match self {
            EntryPoints::Single(path) => std::slice::from_ref(path),
            EntryPoints::Many(paths) => paths,
        }
    }
}

impl From<&str> for EntryPoints {
    fn from(path: &str) -> Self {
        EntryPoints::Single(path.to_string())
    }
}

impl From<String> for EntryPoints {
    fn from(path: String) -> Self {
        EntryPoints::Single(path)
    }
}

impl From<Vec<String>> for EntryPoints {
    fn from(paths: Vec<String>) -> Self {
        EntryPoints::Many(paths)
    }
}

/// Bundles `entries` out of `files`, generates the program and runs it in
/// `sandbox`. `status` payloads are forwarded to `on_status` as they arrive.
pub async fn run_tests<F>(
    files: &FileMap,
    entries: EntryPoints,
    sandbox: &mut Sandbox,
    on_status: F,
) -> Result<ExecutionResult, SandtestError>
where
    F: FnMut(Value),
{
    let entries = entries.as_slice();
    if entries.is_empty() {
        return Err(SandtestError::NoEntries);
    }

    // The index borrows the map, so bundling finishes before the first await.
    let bundle = {
        let index = FileIndex::new(files);
        let mut bundler = Bundler::new(&index)?;
        bundler.bundle_entries(entries)?
    };
    info!(
        target = "sandtest",
        modules = bundle.modules.len(),
        bytes = bundle.code.len(),
        "bundle ready"
    );

    let program = codegen::generate(&bundle, &CodegenOptions::default());
    Ok(sandbox.execute(program, on_status).await?)
}

// Test support infrastructure is only compiled for tests or the test_harness
// feature; nothing at runtime depends on it.
#[cfg(any(test, feature = "test_harness"))]
pub mod test_support;
