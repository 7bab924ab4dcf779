//! Integration tests for the bundle, generate and run pipeline.

mod cli;
mod failures;
mod react_rendering;
mod runner_semantics;
mod timers_and_mocks;

use std::time::Duration;

use sandtest::{
    file_map, run_tests, AssertionResult, EntryPoints, ExecutionResult, FileMap, Sandbox,
    SandboxOptions, SandtestError, Status, VirtualFile,
};
use serde_json::Value;

pub(crate) fn files(entries: &[(&str, &str)]) -> FileMap {
    file_map(
        entries
            .iter()
            .map(|(path, content)| VirtualFile::file(*path, *content)),
    )
}

pub(crate) struct Run {
    pub result: Result<ExecutionResult, SandtestError>,
    pub statuses: Vec<Value>,
}

impl Run {
    pub fn ok(self) -> ExecutionResult {
        match self.result {
            Ok(result) => result,
            Err(err) => panic!("run failed: {err}"),
        }
    }

    pub fn err(self) -> SandtestError {
        match self.result {
            Ok(result) => panic!("expected failure, got {result:?}"),
            Err(err) => err,
        }
    }
}

pub(crate) async fn run_with(
    files: &FileMap,
    entries: impl Into<EntryPoints>,
    options: SandboxOptions,
) -> Run {
    let mut statuses = Vec::new();
    let mut sandbox = Sandbox::new(options);
    let result = run_tests(files, entries.into(), &mut sandbox, |status| statuses.push(status)).await;
    Run { result, statuses }
}

pub(crate) async fn run(files: &FileMap, entries: impl Into<EntryPoints>) -> Run {
    run_with(files, entries, SandboxOptions::default()).await
}

pub(crate) fn short_timeout(ms: u64) -> SandboxOptions {
    SandboxOptions {
        timeout: Duration::from_millis(ms),
        ..SandboxOptions::default()
    }
}

/// Looks up one leaf result by its full name.
pub(crate) fn assertion<'a>(result: &'a ExecutionResult, full_name: &str) -> &'a AssertionResult {
    result
        .assertions()
        .find(|assertion| assertion.full_name == full_name)
        .unwrap_or_else(|| {
            let names: Vec<_> = result.assertions().map(|a| a.full_name.as_str()).collect();
            panic!("no result named {full_name:?}; have {names:?}")
        })
}

pub(crate) fn assert_all_pass(result: &ExecutionResult) {
    let failures: Vec<_> = result
        .assertions()
        .filter(|assertion| assertion.status == Status::Fail)
        .map(|assertion| format!("{}: {:?}", assertion.full_name, assertion.failure_messages))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:#?}");
}
