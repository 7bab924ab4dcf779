use super::{assert_all_pass, files, run};

#[tokio::test]
async fn fake_timers_advance_without_real_waiting() {
    let test = r#"describe('fake timers', () => {
  afterEach(() => vi.useRealTimers());

  it('fires timeouts only once their time is reached', () => {
    vi.useFakeTimers();
    const spy = vi.fn();
    setTimeout(spy, 1000);
    vi.advanceTimersByTime(999);
    expect(spy).not.toHaveBeenCalled();
    vi.advanceTimersByTime(1);
    expect(spy).toHaveBeenCalledTimes(1);
  });

  it('intervals can be cleared from inside their callback', () => {
    vi.useFakeTimers();
    let ticks = 0;
    const id = setInterval(() => {
      ticks += 1;
      if (ticks === 3) clearInterval(id);
    }, 10);
    vi.advanceTimersByTime(100);
    expect(ticks).toBe(3);
    expect(vi.getTimerCount()).toBe(0);
  });

  it('Date.now follows the fake clock', () => {
    vi.useFakeTimers();
    const before = Date.now();
    vi.advanceTimersByTime(5000);
    expect(Date.now() - before).toBe(5000);
  });
});
"#;
    let tree = files(&[("timers.test.js", test)]);
    let result = run(&tree, "timers.test.js").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.num_passed_tests, 3);
}

#[tokio::test]
async fn fake_timers_toggle_inside_a_test_body() {
    let test = r#"it('switches clocks and orders intervals by due time', () => {
  vi.useFakeTimers();
  const start = new Date().getTime();
  const order = [];
  setInterval(() => order.push('slow'), 1000);
  setInterval(() => order.push('fast'), 500);
  vi.advanceTimersByTime(1000);
  expect(order).toEqual(['fast', 'slow', 'fast']);
  expect(Date.now() - start).toBe(1000);
  expect(new Date().getTime()).toBe(Date.now());
  expect(vi.getTimerCount()).toBe(2);
  vi.useRealTimers();
  expect(vi.getTimerCount()).toBe(0);
});

it('can enter fake timers again in a later test', () => {
  vi.useFakeTimers();
  const spy = vi.fn();
  setTimeout(spy, 10);
  vi.runAllTimers();
  expect(spy).toHaveBeenCalledTimes(1);
  vi.useRealTimers();
});
"#;
    let tree = files(&[("toggle.test.js", test)]);
    let result = run(&tree, "toggle.test.js").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.num_passed_tests, 2);
}

#[tokio::test]
async fn mocks_record_calls_and_queue_behaviour() {
    let test = r#"it('records calls and results', async () => {
  const fn = vi.fn((a, b) => a + b);
  fn.mockReturnValueOnce(100);
  expect(fn(1, 2)).toBe(100);
  expect(fn(1, 2)).toBe(3);
  expect(fn).toHaveBeenCalledTimes(2);
  expect(fn).toHaveBeenLastCalledWith(1, 2);
  expect(fn.mock.calls).toEqual([[1, 2], [1, 2]]);
  expect(fn.mock.results[1]).toEqual({ type: 'return', value: 3 });

  const load = vi.fn().mockResolvedValueOnce({ ok: true });
  await expect(load()).resolves;
});

it('spies wrap and restore methods', () => {
  const api = { greet: (name) => `hi ${name}` };
  const spy = vi.spyOn(api, 'greet').mockImplementation(() => 'mocked');
  expect(api.greet('ada')).toBe('mocked');
  expect(spy).toHaveBeenCalledWith('ada');
  spy.mockRestore();
  expect(api.greet('ada')).toBe('hi ada');
});

it('stubbed globals are restored', () => {
  vi.stubGlobal('fetch', vi.fn(() => Promise.resolve({ json: () => ({}) })));
  expect(vi.isMockFunction(fetch)).toBe(true);
  vi.unstubAllGlobals();
  expect(vi.isMockFunction(globalThis.fetch)).toBe(false);
});

it('asymmetric matchers compose with equality', () => {
  expect({ id: 7, name: 'Ada', tags: ['x', 'y'] }).toEqual(
    expect.objectContaining({ id: expect.any(Number), tags: expect.arrayContaining(['y']) }),
  );
  expect(0.1 + 0.2).toBeCloseTo(0.3);
  expect(NaN).toEqual(NaN);
});
"#;
    let tree = files(&[("mocks.test.js", test)]);
    let result = run(&tree, "mocks.test.js").await.ok();
    let statuses: Vec<_> = result
        .assertions()
        .map(|a| (a.title.as_str(), a.status, a.failure_messages.clone()))
        .collect();
    assert_eq!(result.num_total_tests, 4, "{statuses:?}");
    // `.resolves` is unsupported and explains itself; everything else passes.
    assert_eq!(result.num_failed_tests, 1, "{statuses:?}");
    let failed = result
        .assertions()
        .find(|a| a.title == "records calls and results")
        .expect("first test");
    assert!(failed.failure_messages[0].contains("[sandtest]"), "{:?}", failed.failure_messages);
}

#[tokio::test]
async fn timers_are_restored_between_tests_by_cleanup() {
    let test = r#"it('leaves fake timers installed', () => {
  vi.useFakeTimers();
  cleanup();
});

it('sees real timers again', async () => {
  await new Promise((resolve) => setTimeout(resolve, 5));
});
"#;
    let tree = files(&[("cleanup.test.js", test)]);
    let result = run(&tree, "cleanup.test.js").await.ok();
    assert_all_pass(&result);
}
