//! Suite tree built during registration, and the sequential runner over it.
//!
//! Both are generic over the callback type so the execution order can be
//! exercised without a script engine. [`TestHost`] is the seam: it invokes
//! one callback to completion, awaiting whatever asynchronous work it starts.

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span};

use crate::config::errors;

pub const DEFAULT_SUITE_NAME: &str = "default suite";
const ROOT_SCOPE_NAME: &str = "<root>";

// ----------------------------------------------------------------------------
// Result payload
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub title: String,
    pub full_name: String,
    pub status: Status,
    pub duration: f64,
    pub failure_messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub name: String,
    pub status: Status,
    pub assertion_results: Vec<AssertionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub num_total_tests: u32,
    pub num_passed_tests: u32,
    pub num_failed_tests: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub test_results: Vec<SuiteResult>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.num_failed_tests == 0
    }

    /// Every leaf result, in execution order.
    pub fn assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.test_results
            .iter()
            .flat_map(|suite| suite.assertion_results.iter())
    }
}

// ----------------------------------------------------------------------------
// Tree
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::BeforeAll => "beforeAll",
            HookKind::AfterAll => "afterAll",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterEach => "afterEach",
        })
    }
}

#[derive(Debug)]
pub struct Hooks<C> {
    pub before_all: Vec<C>,
    pub after_all: Vec<C>,
    pub before_each: Vec<C>,
    pub after_each: Vec<C>,
}

impl<C> Default for Hooks<C> {
    fn default() -> Self {
        Self {
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
        }
    }
}

impl<C> Hooks<C> {
    fn push(&mut self, kind: HookKind, callback: C) {
        match kind {
            HookKind::BeforeAll => self.before_all.push(callback),
            HookKind::AfterAll => self.after_all.push(callback),
            HookKind::BeforeEach => self.before_each.push(callback),
            HookKind::AfterEach => self.after_each.push(callback),
        }
    }
}

#[derive(Debug)]
pub struct TestCase<C> {
    pub name: String,
    pub body: C,
}

#[derive(Debug)]
pub enum Node<C> {
    Suite(Suite<C>),
    Test(TestCase<C>),
}

#[derive(Debug)]
pub struct Suite<C> {
    pub name: String,
    pub children: Vec<Node<C>>,
    pub hooks: Hooks<C>,
}

impl<C> Suite<C> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            hooks: Hooks::default(),
        }
    }
}

/// Registration state. `stack` holds the suites whose grouping callback is
/// currently executing, innermost last.
#[derive(Debug)]
pub struct SuiteTree<C> {
    root_hooks: Hooks<C>,
    suites: Vec<Suite<C>>,
    stack: Vec<Suite<C>>,
    default_suite: Option<usize>,
}

impl<C> Default for SuiteTree<C> {
    fn default() -> Self {
        Self {
            root_hooks: Hooks::default(),
            suites: Vec::new(),
            stack: Vec::new(),
            default_suite: None,
        }
    }
}

impl<C> SuiteTree<C> {
    /// Opens a group; everything registered until [`exit`](Self::exit) lands in it.
    pub fn enter(&mut self, name: impl Into<String>) {
        self.stack.push(Suite::new(name));
    }

    /// Closes the innermost group and attaches it to its parent.
    pub fn exit(&mut self) {
        let Some(suite) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(Node::Suite(suite)),
            None => self.suites.push(suite),
        }
    }

    pub fn add_test(&mut self, name: impl Into<String>, body: C) {
        let test = Node::Test(TestCase {
            name: name.into(),
            body,
        });
        if let Some(active) = self.stack.last_mut() {
            active.children.push(test);
            return;
        }
        let idx = match self.default_suite {
            Some(idx) => idx,
            None => {
                self.suites.push(Suite::new(DEFAULT_SUITE_NAME));
                let idx = self.suites.len() - 1;
                self.default_suite = Some(idx);
                idx
            }
        };
        self.suites[idx].children.push(test);
    }

    /// Hooks outside any group apply to the whole run.
    pub fn add_hook(&mut self, kind: HookKind, callback: C) {
        match self.stack.last_mut() {
            Some(active) => active.hooks.push(kind, callback),
            None => self.root_hooks.push(kind, callback),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn suite_count(&self) -> usize {
        self.suites.len()
    }

    pub fn test_count(&self) -> usize {
        fn count<C>(suite: &Suite<C>) -> usize {
            suite
                .children
                .iter()
                .map(|child| match child {
                    Node::Suite(inner) => count(inner),
                    Node::Test(_) => 1,
                })
                .sum()
        }
        self.suites.iter().map(count).sum()
    }

    /// Closes any group left open by a failed registration callback.
    fn finish(mut self) -> (Hooks<C>, Vec<Suite<C>>) {
        while !self.stack.is_empty() {
            self.exit();
        }
        (self.root_hooks, self.suites)
    }
}

// ----------------------------------------------------------------------------
// Runner
// ----------------------------------------------------------------------------

/// Why a callback did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The callback threw or its promise rejected.
    Thrown(String),
    /// The host gave up on the run (cancellation, uncaught error).
    Aborted(String),
}

pub trait TestHost {
    type Callback;

    /// Runs `callback` to completion.
    fn invoke(&mut self, callback: &Self::Callback) -> Result<(), InvokeError>;

    /// Called once per test after its after-each hooks.
    fn after_test(&mut self) -> Result<(), InvokeError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("{}: {hook} hook failed in \"{suite}\": {message}", errors::ERR_HOOK_FAILED)]
    Hook {
        hook: HookKind,
        suite: String,
        message: String,
    },
    #[error("{}: run aborted: {0}", errors::ERR_RUN_ABORTED)]
    Aborted(String),
}

#[derive(Default)]
struct Tally {
    total: u32,
    passed: u32,
    failed: u32,
}

/// Inherited context for one level of the tree.
struct Frame<'t, C> {
    before_each: Vec<&'t C>,
    after_each: Vec<&'t C>,
    path: Vec<&'t str>,
}

impl<'t, C> Frame<'t, C> {
    /// Ancestor hooks first, then the suite's own, for both directions.
    fn child(&self, suite: &'t Suite<C>) -> Self {
        let mut before_each = self.before_each.clone();
        before_each.extend(suite.hooks.before_each.iter());
        let mut after_each = self.after_each.clone();
        after_each.extend(suite.hooks.after_each.iter());
        let mut path = self.path.clone();
        path.push(suite.name.as_str());
        Self {
            before_each,
            after_each,
            path,
        }
    }
}

struct SuiteOutcome {
    status: Status,
    assertion_results: Vec<AssertionResult>,
}

pub fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// Runs every registered suite depth-first, strictly sequentially.
pub fn run<H: TestHost>(
    tree: SuiteTree<H::Callback>,
    host: &mut H,
) -> Result<ExecutionResult, RunError> {
    let _span = info_span!("run_tests", suites = tree.suite_count(), tests = tree.test_count()).entered();
    let start_time = now_ms();
    let (root_hooks, suites) = tree.finish();
    let mut tally = Tally::default();

    run_hooks(host, &root_hooks.before_all, HookKind::BeforeAll, ROOT_SCOPE_NAME)?;
    let root = Frame {
        before_each: root_hooks.before_each.iter().collect(),
        after_each: root_hooks.after_each.iter().collect(),
        path: Vec::new(),
    };
    let mut test_results = Vec::with_capacity(suites.len());
    for suite in &suites {
        let outcome = run_suite(host, suite, &root, &mut tally)?;
        test_results.push(SuiteResult {
            name: suite.name.clone(),
            status: outcome.status,
            assertion_results: outcome.assertion_results,
        });
    }
    run_hooks(host, &root_hooks.after_all, HookKind::AfterAll, ROOT_SCOPE_NAME)?;

    Ok(ExecutionResult {
        num_total_tests: tally.total,
        num_passed_tests: tally.passed,
        num_failed_tests: tally.failed,
        start_time,
        end_time: now_ms(),
        test_results,
    })
}

fn run_suite<'t, H: TestHost>(
    host: &mut H,
    suite: &'t Suite<H::Callback>,
    parent: &Frame<'t, H::Callback>,
    tally: &mut Tally,
) -> Result<SuiteOutcome, RunError> {
    let frame = parent.child(suite);
    let mut outcome = SuiteOutcome {
        status: Status::Pass,
        assertion_results: Vec::new(),
    };

    run_hooks(host, &suite.hooks.before_all, HookKind::BeforeAll, &suite.name)?;
    for child in &suite.children {
        match child {
            Node::Suite(inner) => {
                let nested = run_suite(host, inner, &frame, tally)?;
                if nested.status == Status::Fail {
                    outcome.status = Status::Fail;
                }
                outcome.assertion_results.extend(nested.assertion_results);
            }
            Node::Test(test) => {
                let result = run_test(host, test, &frame, &suite.name)?;
                tally.total += 1;
                if result.status == Status::Pass {
                    tally.passed += 1;
                } else {
                    tally.failed += 1;
                    outcome.status = Status::Fail;
                }
                outcome.assertion_results.push(result);
            }
        }
    }
    run_hooks(host, &suite.hooks.after_all, HookKind::AfterAll, &suite.name)?;
    Ok(outcome)
}

fn run_test<'t, H: TestHost>(
    host: &mut H,
    test: &TestCase<H::Callback>,
    frame: &Frame<'t, H::Callback>,
    suite_name: &str,
) -> Result<AssertionResult, RunError> {
    let started = Instant::now();
    let mut failure = None;

    let mut before_failed = None;
    for hook in &frame.before_each {
        if let Err(err) = host.invoke(hook) {
            before_failed = Some(err);
            break;
        }
    }

    if before_failed.is_none() {
        match host.invoke(&test.body) {
            Ok(()) => {}
            Err(InvokeError::Thrown(message)) => failure = Some(message),
            Err(InvokeError::Aborted(reason)) => return Err(RunError::Aborted(reason)),
        }
    }

    let mut after_failed = None;
    for hook in &frame.after_each {
        if let Err(err) = host.invoke(hook) {
            after_failed.get_or_insert(err);
        }
    }
    if let Err(err) = host.after_test() {
        after_failed.get_or_insert(err);
    }

    if let Some(err) = before_failed {
        return Err(hook_error(err, HookKind::BeforeEach, suite_name));
    }
    if let Some(err) = after_failed {
        return Err(hook_error(err, HookKind::AfterEach, suite_name));
    }

    let mut full_name = frame.path.join(" > ");
    full_name.push_str(" > ");
    full_name.push_str(&test.name);
    let status = if failure.is_some() {
        Status::Fail
    } else {
        Status::Pass
    };
    debug!(target = "sandtest", test = %full_name, ?status, "test finished");
    Ok(AssertionResult {
        title: test.name.clone(),
        full_name,
        status,
        duration: started.elapsed().as_secs_f64() * 1_000.0,
        failure_messages: failure.into_iter().collect(),
    })
}

fn run_hooks<H: TestHost>(
    host: &mut H,
    hooks: &[H::Callback],
    kind: HookKind,
    suite_name: &str,
) -> Result<(), RunError> {
    for hook in hooks {
        host.invoke(hook)
            .map_err(|err| hook_error(err, kind, suite_name))?;
    }
    Ok(())
}

fn hook_error(err: InvokeError, hook: HookKind, suite: &str) -> RunError {
    match err {
        InvokeError::Thrown(message) => RunError::Hook {
            hook,
            suite: suite.to_string(),
            message,
        },
        InvokeError::Aborted(reason) => RunError::Aborted(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Callbacks are labels; the host records invocation order and fails
    /// any label starting with `fail`.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        cleanups: usize,
    }

    impl TestHost for Recorder {
        type Callback = String;

        fn invoke(&mut self, callback: &String) -> Result<(), InvokeError> {
            self.calls.push(callback.clone());
            if callback.starts_with("fail") {
                Err(InvokeError::Thrown(format!("{callback} exploded")))
            } else if callback.starts_with("abort") {
                Err(InvokeError::Aborted("cancelled".into()))
            } else {
                Ok(())
            }
        }

        fn after_test(&mut self) -> Result<(), InvokeError> {
            self.cleanups += 1;
            Ok(())
        }
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn counts_pass_and_fail() {
        let mut tree = SuiteTree::default();
        tree.enter("math");
        tree.add_test("adds", s("ok"));
        tree.add_test("breaks", s("fail-body"));
        tree.exit();

        let mut host = Recorder::default();
        let result = run(tree, &mut host).expect("run");
        assert_eq!(result.num_total_tests, 2);
        assert_eq!(result.num_passed_tests, 1);
        assert_eq!(result.num_failed_tests, 1);
        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.test_results[0].status, Status::Fail);
        let failed = &result.test_results[0].assertion_results[1];
        assert_eq!(failed.full_name, "math > breaks");
        assert_eq!(failed.failure_messages, vec!["fail-body exploded"]);
        assert_eq!(host.cleanups, 2);
    }

    #[test]
    fn nested_hooks_run_ancestor_first_in_both_directions() {
        let mut tree = SuiteTree::default();
        tree.enter("outer");
        tree.add_hook(HookKind::BeforeAll, s("outer.beforeAll"));
        tree.add_hook(HookKind::BeforeEach, s("outer.beforeEach"));
        tree.add_hook(HookKind::AfterEach, s("outer.afterEach"));
        tree.add_hook(HookKind::AfterAll, s("outer.afterAll"));
        tree.enter("inner");
        tree.add_hook(HookKind::BeforeEach, s("inner.beforeEach"));
        tree.add_hook(HookKind::AfterEach, s("inner.afterEach"));
        tree.add_test("leaf", s("inner.test"));
        tree.exit();
        tree.add_test("sibling", s("outer.test"));
        tree.exit();

        let mut host = Recorder::default();
        let result = run(tree, &mut host).expect("run");
        assert_eq!(
            host.calls,
            vec![
                "outer.beforeAll",
                "outer.beforeEach",
                "inner.beforeEach",
                "inner.test",
                "outer.afterEach",
                "inner.afterEach",
                "outer.beforeEach",
                "outer.test",
                "outer.afterEach",
                "outer.afterAll",
            ]
        );
        let names: Vec<_> = result.assertions().map(|a| a.full_name.as_str()).collect();
        assert_eq!(names, vec!["outer > inner > leaf", "outer > sibling"]);
    }

    #[test]
    fn bare_tests_share_one_default_suite() {
        let mut tree = SuiteTree::default();
        tree.add_test("a", s("ok"));
        tree.add_test("b", s("ok"));
        let result = run(tree, &mut Recorder::default()).expect("run");
        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.test_results[0].name, DEFAULT_SUITE_NAME);
        assert_eq!(result.num_total_tests, 2);
        assert_eq!(
            result.test_results[0].assertion_results[0].full_name,
            "default suite > a"
        );
    }

    #[test]
    fn failing_test_still_runs_after_each() {
        let mut tree = SuiteTree::default();
        tree.enter("s");
        tree.add_hook(HookKind::AfterEach, s("cleanup"));
        tree.add_test("t", s("fail-t"));
        tree.exit();
        let mut host = Recorder::default();
        run(tree, &mut host).expect("run");
        assert_eq!(host.calls, vec!["fail-t", "cleanup"]);
    }

    #[test]
    fn hook_failure_aborts_the_run() {
        let mut tree = SuiteTree::default();
        tree.enter("first");
        tree.add_hook(HookKind::BeforeAll, s("fail-setup"));
        tree.add_test("never", s("body"));
        tree.exit();
        tree.enter("second");
        tree.add_test("also never", s("body2"));
        tree.exit();
        let mut host = Recorder::default();
        let err = run(tree, &mut host).unwrap_err();
        assert_eq!(
            err,
            RunError::Hook {
                hook: HookKind::BeforeAll,
                suite: "first".into(),
                message: "fail-setup exploded".into(),
            }
        );
        assert_eq!(host.calls, vec!["fail-setup"]);
    }

    #[test]
    fn before_each_failure_runs_after_each_then_aborts() {
        let mut tree = SuiteTree::default();
        tree.enter("s");
        tree.add_hook(HookKind::BeforeEach, s("fail-prep"));
        tree.add_hook(HookKind::AfterEach, s("teardown"));
        tree.add_test("t", s("body"));
        tree.exit();
        let mut host = Recorder::default();
        let err = run(tree, &mut host).unwrap_err();
        assert!(matches!(err, RunError::Hook { hook: HookKind::BeforeEach, .. }));
        assert_eq!(host.calls, vec!["fail-prep", "teardown"]);
    }

    #[test]
    fn aborted_body_stops_everything() {
        let mut tree = SuiteTree::default();
        tree.add_test("a", s("abort-now"));
        tree.add_test("b", s("ok"));
        let mut host = Recorder::default();
        let err = run(tree, &mut host).unwrap_err();
        assert_eq!(err, RunError::Aborted("cancelled".into()));
        assert_eq!(host.calls, vec!["abort-now"]);
    }

    #[test]
    fn root_hooks_wrap_every_suite() {
        let mut tree = SuiteTree::default();
        tree.add_hook(HookKind::BeforeEach, s("root.beforeEach"));
        tree.enter("a");
        tree.add_test("t", s("a.test"));
        tree.exit();
        let mut host = Recorder::default();
        run(tree, &mut host).expect("run");
        assert_eq!(host.calls, vec!["root.beforeEach", "a.test"]);
    }

    #[test]
    fn unclosed_groups_are_attached_on_finish() {
        let mut tree = SuiteTree::default();
        tree.enter("open");
        tree.add_test("t", s("ok"));
        assert_eq!(tree.depth(), 1);
        let result = run(tree, &mut Recorder::default()).expect("run");
        assert_eq!(result.num_total_tests, 1);
    }

    #[test]
    fn result_serializes_with_wire_names() {
        let mut tree = SuiteTree::default();
        tree.add_test("a", s("ok"));
        let result = run(tree, &mut Recorder::default()).expect("run");
        let value = serde_json::to_value(&result).expect("json");
        assert_eq!(value["numTotalTests"], 1);
        assert_eq!(value["testResults"][0]["assertionResults"][0]["status"], "pass");
        assert!(value["testResults"][0]["assertionResults"][0]["fullName"].is_string());
    }
}
