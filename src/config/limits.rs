//! Runtime limits and capacity configuration

/// Fake clock limits.
/// Upper bound on tasks fired by a single `advanceTimersByTime`.
pub const ADVANCE_ITERATION_CAP: usize = 10_000;
/// Upper bound on tasks fired by a single `runAllTimers`.
pub const RUN_ALL_ITERATION_CAP: usize = 1_000;
/// Minimum interval period in virtual milliseconds.
pub const MIN_INTERVAL_MS: u64 = 1;

/// Diagnostics limits.
pub const ERROR_SNIPPET_CHARS: usize = 500;
pub const MAX_FORMAT_DEPTH: usize = 4;
pub const MAX_FORMAT_ITEMS: usize = 32;

/// Interpreter limits.
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 50_000_000;
pub const DEFAULT_RECURSION_LIMIT: usize = 512;
/// Upper bound on real timer callbacks fired in one event-loop turn.
pub const EVENT_LOOP_TIMER_BATCH: usize = 1_000;

/// Worker thread stack, sized for deep interpreter recursion.
pub const WORKER_STACK_BYTES: usize = 64 * 1024 * 1024;
