//! Timeout configuration

use std::time::Duration;

/// Whole-run budget enforced by the sandbox supervisor.
pub const SANDBOX_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest the worker sleeps while waiting on real timers before re-checking cancellation.
pub const EVENT_LOOP_IDLE_SLICE: Duration = Duration::from_millis(5);

/// `waitFor` defaults used by the in-context testing helpers.
pub const WAIT_FOR_TIMEOUT_MS: u64 = 1_000;
pub const WAIT_FOR_INTERVAL_MS: u64 = 50;
