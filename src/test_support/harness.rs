use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tempfile::TempDir;

use crate::{
    file_map, run_tests, EntryPoints, ExecutionResult, FileMap, Sandbox, SandboxOptions,
    SandtestError, VirtualFile,
};

/// Builds a file map and sandbox options, then runs entries through the full
/// pipeline while recording every status payload.
#[derive(Debug, Clone, Default)]
pub struct SandtestHarness {
    files: FileMap,
    options: SandboxOptions,
}

/// Outcome of one harness run.
#[derive(Debug)]
pub struct HarnessRun {
    pub result: Result<ExecutionResult, SandtestError>,
    pub statuses: Vec<Value>,
}

impl HarnessRun {
    /// Phases reported by the bootstrap, in arrival order.
    pub fn phases(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter_map(|status| status.get("phase").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Status payloads of one `kind` (`console`, `dom`).
    pub fn of_kind(&self, kind: &str) -> Vec<&Value> {
        self.statuses
            .iter()
            .filter(|status| status.get("kind").and_then(Value::as_str) == Some(kind))
            .collect()
    }
}

impl SandtestHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files
            .insert(path.to_string(), VirtualFile::file(path, content));
        self
    }

    pub fn folder(mut self, path: &str) -> Self {
        self.files.insert(path.to_string(), VirtualFile::folder(path));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn visible(mut self) -> Self {
        self.options.visible = true;
        self
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub async fn run(&self, entries: impl Into<EntryPoints>) -> HarnessRun {
        let mut statuses = Vec::new();
        let mut sandbox = Sandbox::new(self.options.clone());
        let result = run_tests(&self.files, entries.into(), &mut sandbox, |status| {
            statuses.push(status)
        })
        .await;
        HarnessRun { result, statuses }
    }
}

/// Runs a single test file with default options.
pub async fn run_file(path: &str, source: &str) -> Result<ExecutionResult, SandtestError> {
    let files = file_map([VirtualFile::file(path, source)]);
    run_tests(&files, path.into(), &mut Sandbox::default(), |_| {}).await
}

/// Materializes `files` under a fresh temporary directory.
pub fn write_tree(files: &FileMap) -> Result<TempDir> {
    let temp = TempDir::new().context("create temp tree")?;
    for file in files.values() {
        let target = temp.path().join(file.path.trim_start_matches('/'));
        if file.is_folder {
            std::fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent().filter(|parent| *parent != Path::new("")) {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&target, &file.content).with_context(|| format!("write {}", target.display()))?;
    }
    Ok(temp)
}
