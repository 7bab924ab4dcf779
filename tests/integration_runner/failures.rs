use super::{files, run, run_with, short_timeout};
use sandtest::{BundleError, SandboxError, SandtestError};

#[tokio::test]
async fn missing_import_fails_before_anything_runs() {
    let tree = files(&[("src/app.test.js", "import { thing } from './missing';\nit('x', () => {});")]);
    let err = run(&tree, "src/app.test.js").await.err();
    match &err {
        SandtestError::Bundle(BundleError::ModuleNotFound { specifier, importer }) => {
            assert_eq!(specifier, "./missing");
            assert!(importer.ends_with("src/app.test.js"), "{importer}");
        }
        other => panic!("unexpected {other:?}"),
    }
    let message = err.to_string();
    assert!(message.starts_with("E-SANDTEST-0100"), "{message}");
    assert!(message.contains("Module not found: './missing'"), "{message}");
}

#[tokio::test]
async fn syntax_errors_name_the_file_and_position() {
    let tree = files(&[("broken.test.js", "it('x', () => {\n  const = 1;\n});")]);
    let err = run(&tree, "broken.test.js").await.err();
    match err {
        SandtestError::Bundle(BundleError::Parse { path, line, .. }) => {
            assert!(path.ends_with("broken.test.js"), "{path}");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn load_time_error_carries_debug_info() {
    let test = "const value = 1;\nthrow new Error('boom at load');\n";
    let tree = files(&[("load.test.js", test)]);
    let err = run(&tree, "load.test.js").await.err();
    match err {
        SandtestError::Sandbox(SandboxError::Context { message, .. }) => {
            assert!(message.starts_with("boom at load"), "{message}");
            assert!(message.contains("[Debug Info]\nStep: evaluating"), "{message}");
            assert!(message.contains("Code Snippet: "), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn hook_failure_fails_the_whole_run() {
    let test = r#"describe('db', () => {
  beforeEach(() => { throw new Error('no connection'); });
  it('never gets here', () => {});
});
"#;
    let tree = files(&[("hook.test.js", test)]);
    let err = run(&tree, "hook.test.js").await.err();
    match err {
        SandtestError::Sandbox(SandboxError::Context { message, .. }) => {
            assert!(message.contains("E-SANDTEST-0400"), "{message}");
            assert!(message.contains("no connection"), "{message}");
            assert!(message.contains("Step: running_tests"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn never_settling_test_times_out() {
    let tree = files(&[("hang.test.js", "it('hangs', () => new Promise(() => {}));")]);
    let err = run_with(&tree, "hang.test.js", short_timeout(300)).await.err();
    assert!(matches!(err, SandtestError::Sandbox(SandboxError::Timeout(_))), "{err:?}");
    assert!(err.to_string().starts_with("E-SANDTEST-0300"));
}

#[tokio::test]
async fn unsupported_module_mocking_explains_itself() {
    let test = "it('mocks', () => { vi.mock('./api'); });";
    let tree = files(&[("mock.test.js", test)]);
    let result = run(&tree, "mock.test.js").await.ok();
    assert_eq!(result.num_failed_tests, 1);
    let message = &result.test_results[0].assertion_results[0].failure_messages[0];
    assert!(message.contains("[sandtest]"), "{message}");
}
