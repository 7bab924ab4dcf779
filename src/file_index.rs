//! Virtual file lookup used by the bundler.
//!
//! Paths are logical, `/`-separated and compared without leading slashes, so
//! `/src/App.jsx` and `src/App.jsx` address the same file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Suffixes tried, in order, when looking up an import target.
pub const RESOLVE_SUFFIXES: [&str; 9] = [
    "",
    ".js",
    ".jsx",
    ".ts",
    ".tsx",
    "/index.js",
    "/index.jsx",
    "/index.ts",
    "/index.tsx",
];

/// One entry of the host-supplied file map. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_folder: bool,
}

impl VirtualFile {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            is_folder: false,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            is_folder: true,
        }
    }
}

/// Logical path to file, as handed over by the host.
pub type FileMap = BTreeMap<String, VirtualFile>;

/// Builds a [`FileMap`] keyed by each file's own path.
pub fn file_map(files: impl IntoIterator<Item = VirtualFile>) -> FileMap {
    files
        .into_iter()
        .map(|file| (file.path.clone(), file))
        .collect()
}

#[derive(Debug, Clone)]
pub struct FileIndex<'a> {
    by_path: BTreeMap<String, &'a VirtualFile>,
}

impl<'a> FileIndex<'a> {
    pub fn new(files: &'a FileMap) -> Self {
        let by_path = files
            .values()
            .map(|file| (canonical(&file.path).to_string(), file))
            .collect();
        Self { by_path }
    }

    /// Returns the first non-folder file matching `path` or one of its
    /// extension/index variants.
    pub fn find_file(&self, path: &str) -> Option<FoundFile<'a>> {
        let base = canonical(path);
        RESOLVE_SUFFIXES.iter().find_map(|suffix| {
            let candidate = format!("{base}{suffix}");
            self.by_path
                .get(candidate.as_str())
                .copied()
                .filter(|file| !file.is_folder)
                .map(|file| FoundFile {
                    path: candidate,
                    file,
                })
        })
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// A lookup hit: the canonical path it matched under and the file itself.
#[derive(Debug, Clone)]
pub struct FoundFile<'a> {
    pub path: String,
    pub file: &'a VirtualFile,
}

/// Strips leading slashes; the form every lookup compares under.
pub fn canonical(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// True for specifiers the bundler inlines (`./x`, `../x`, `/x`). Everything
/// else names an external package.
pub fn is_local_specifier(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.starts_with('/')
}

/// Resolves `specifier` against the directory of `from_path`, collapsing `.`
/// and `..` segments. A `..` above the root stays at the root.
pub fn resolve(from_path: &str, specifier: &str) -> String {
    if specifier.starts_with('/') {
        return normalize(specifier);
    }
    let mut parts: Vec<&str> = from_path.split('/').collect();
    parts.pop();
    push_segments(&mut parts, specifier);
    parts.join("/")
}

fn normalize(path: &str) -> String {
    let mut parts = vec![""];
    push_segments(&mut parts, path);
    parts.join("/")
}

fn push_segments<'s>(parts: &mut Vec<&'s str>, specifier: &'s str) {
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| !last.is_empty()) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
}
