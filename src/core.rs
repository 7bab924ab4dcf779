use std::time::Duration;

use crate::config::limits::{DEFAULT_LOOP_ITERATION_LIMIT, DEFAULT_RECURSION_LIMIT};
use crate::config::timeouts::SANDBOX_TIMEOUT;

// ----------------------------------------------------------------------------
// Sandbox configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Whole-run budget; the run fails with a timeout once it elapses.
    pub timeout: Duration,
    /// Report the rendered document to the host before the results.
    pub visible: bool,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout: SANDBOX_TIMEOUT,
            visible: false,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl SandboxOptions {
    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - SANDTEST_TIMEOUT_MS: Run budget in milliseconds (default: 30000)
    /// - SANDTEST_VISIBLE: `1`/`true` to report the rendered document (default: off)
    /// - SANDTEST_LOOP_LIMIT: Interpreter loop iteration limit (default: 50000000)
    /// - SANDTEST_RECURSION_LIMIT: Interpreter recursion limit (default: 512)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timeout = std::env::var("SANDTEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);

        let visible = std::env::var("SANDTEST_VISIBLE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.visible);

        let loop_iteration_limit = std::env::var("SANDTEST_LOOP_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.loop_iteration_limit);

        let recursion_limit = std::env::var("SANDTEST_RECURSION_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.recursion_limit);

        Self {
            timeout,
            visible,
            loop_iteration_limit,
            recursion_limit,
        }
    }
}

// ----------------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------------

/// Installs the global fmt subscriber filtered by `RUST_LOG`. Safe to call
/// more than once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
    tracing::info!(target = "sandtest", "tracing initialized");
}
