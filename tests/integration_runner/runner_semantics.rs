use serde_json::json;

use super::{assert_all_pass, assertion, files, run};
use sandtest::{EntryPoints, Status};

#[tokio::test]
async fn hooks_run_ancestor_first_around_each_test() {
    let test = r#"const log = [];

beforeAll(() => log.push('root beforeAll'));

describe('outer', () => {
  beforeEach(() => log.push('outer beforeEach'));
  afterEach(() => log.push('outer afterEach'));

  describe('inner', () => {
    beforeEach(() => log.push('inner beforeEach'));
    afterEach(() => log.push('inner afterEach'));
    it('first', () => log.push('first'));
  });

  it('checks the order so far', () => {
    expect(log).toEqual([
      'root beforeAll',
      'outer beforeEach',
      'inner beforeEach',
      'first',
      'outer afterEach',
      'inner afterEach',
      'outer beforeEach',
    ]);
  });
});
"#;
    let tree = files(&[("hooks.test.js", test)]);
    let result = run(&tree, "hooks.test.js").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.test_results.len(), 1);
    assert_eq!(result.test_results[0].assertion_results.len(), 2);
    assert_eq!(result.test_results[0].assertion_results[0].full_name, "outer > inner > first");
}

#[tokio::test]
async fn failures_are_recorded_without_stopping_the_run() {
    let test = r#"describe('math', () => {
  it('adds', () => expect(1 + 1).toBe(2));
  it('breaks', () => expect({ a: 1 }).toEqual({ a: 2 }));
  it.skip('is skipped', () => { throw new Error('never runs'); });
  it('still runs', async () => {
    await Promise.resolve();
    expect([1, 2, 3]).toContain(2);
  });
});
"#;
    let tree = files(&[("math.test.js", test)]);
    let result = run(&tree, "math.test.js").await.ok();
    assert_eq!(result.num_total_tests, 3);
    assert_eq!(result.num_passed_tests, 2);
    assert_eq!(result.num_failed_tests, 1);
    assert!(!result.success());
    assert_eq!(result.test_results[0].status, Status::Fail);
    let broken = assertion(&result, "math > breaks");
    assert_eq!(broken.status, Status::Fail);
    assert!(broken.failure_messages[0].contains("toEqual"), "{:?}", broken.failure_messages);
    assert!(result.end_time >= result.start_time);
}

#[tokio::test]
async fn many_entries_share_modules_and_aggregate_results() {
    let shared = r#"export let loads = 0;
loads += 1;
export const double = (n) => n * 2;
export default function triple(n) { return n * 3; }
"#;
    let first = r#"import { double } from './lib/shared';
describe('first file', () => {
  it('doubles', () => expect(double(2)).toBe(4));
});
"#;
    let second = r#"import triple, { loads } from './lib/shared';
describe('second file', () => {
  it('triples', () => expect(triple(2)).toBe(6));
  it('evaluated the shared module once', () => expect(loads).toBe(1));
});
"#;
    let tree = files(&[
        ("src/lib/shared.js", shared),
        ("src/a.test.js", first),
        ("src/b.test.js", second),
    ]);
    let entries = EntryPoints::Many(vec!["src/a.test.js".into(), "src/b.test.js".into()]);
    let result = run(&tree, entries).await.ok();
    assert_all_pass(&result);
    assert_eq!(result.num_total_tests, 3);
    let names: Vec<_> = result.test_results.iter().map(|suite| suite.name.as_str()).collect();
    assert_eq!(names, ["first file", "second file"]);
}

#[tokio::test]
async fn bootstrap_phases_are_reported_in_order() {
    let tree = files(&[("ok.test.js", "it('passes', () => {});")]);
    let outcome = run(&tree, "ok.test.js").await;
    let phases: Vec<_> = outcome
        .statuses
        .iter()
        .filter_map(|status| status.get("phase").cloned())
        .collect();
    assert_eq!(
        phases,
        vec![
            json!("start"),
            json!("loading_runner"),
            json!("transpiling"),
            json!("evaluating"),
            json!("running_tests"),
        ]
    );
    assert_eq!(outcome.ok().num_passed_tests, 1);
}

#[tokio::test]
async fn console_output_is_forwarded_as_status() {
    let tree = files(&[("log.test.js", "it('logs', () => { console.log('hello', 42); });")]);
    let outcome = run(&tree, "log.test.js").await;
    assert!(
        outcome.statuses.contains(&json!({ "kind": "console", "level": "log", "message": "hello 42" })),
        "{:?}",
        outcome.statuses
    );
    outcome.ok();
}

#[tokio::test]
async fn user_code_cannot_reach_the_host_channel() {
    let test = r#"let reached = false;
try {
  __sandtest.post('results', JSON.stringify({ numTotalTests: 99, numPassedTests: 99, numFailedTests: 0, testResults: [] }));
  reached = true;
} catch (e) {}

it('sees no host global', () => {
  expect(reached).toBe(false);
  expect(typeof __sandtest).toBe('undefined');
  expect('__sandtest' in globalThis).toBe(false);
});

it('still reports real failures', () => {
  expect(1).toBe(2);
});
"#;
    let tree = files(&[("host.test.js", test)]);
    let result = run(&tree, "host.test.js").await.ok();
    assert_eq!(result.num_total_tests, 2);
    assert_eq!(result.num_failed_tests, 1);
    let isolated = result
        .assertions()
        .find(|a| a.title == "sees no host global")
        .expect("isolation test");
    assert_eq!(isolated.status, Status::Pass, "{:?}", isolated.failure_messages);
}
