//! End-to-end coverage: virtual file trees are bundled, generated into a
//! program and run inside the sandbox, the way a host drives the crate.

#[path = "integration_runner/mod.rs"]
mod suite;
