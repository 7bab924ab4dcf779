//! Turns a bundle into the single program a sandbox evaluates.
//!
//! Layout: runtime configuration, the pinned in-context libraries, then an
//! async bootstrap that reports each phase over the host channel, loads the
//! runner, transpiles the embedded bundle and evaluates it with the runner's
//! API passed in as parameters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::bundler::BundleOutput;
use crate::config::limits::ERROR_SNIPPET_CHARS;
use crate::config::timeouts::{WAIT_FOR_INTERVAL_MS, WAIT_FOR_TIMEOUT_MS};
use crate::runtime::harness::RUNNER_EXPORTS;
use crate::runtime::HOST_GLOBAL;

/// In-context libraries as `(name, version, source)`, in load order.
pub const PINNED_LIBRARIES: &[(&str, &str, &str)] = &[
    ("dom-lite", "1.0.0", include_str!("../assets/dom.js")),
    ("react-lite", "1.0.0", include_str!("../assets/react.js")),
    ("testing-lite", "1.0.0", include_str!("../assets/testing.js")),
];

/// Body of the function that hands out the runner capability object.
const RUNNER_SOURCE: &str = "return host.loadRunner();";

static SCRIPT_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(script)").expect("script close regex"));

const BOOTSTRAP: &str = r#"
(async () => {
  const host = globalThis.__HOST__;
  delete globalThis.__HOST__;
  const bundle = __BUNDLE__;
  let phase = 'start';
  let transpiled = '';
  const report = (next) => {
    phase = next;
    host.post('status', JSON.stringify({ phase: next }));
  };
  try {
    report('start');
    for (const id of __MOUNT_POINTS__) {
      if (!document.getElementById(id)) {
        const mount = document.createElement('div');
        mount.id = id;
        document.body.appendChild(mount);
      }
    }
    report('loading_runner');
    const runner = await new Function('host', __RUNNER_SOURCE__)(host);
    report('transpiling');
    transpiled = host.transpile(bundle);
    report('evaluating');
    localStorage.clear();
    const names = __AMBIENT_NAMES__;
    const values = names.map((name) => (name in runner ? runner[name] : globalThis[name]));
    const evaluate = new Function(...names, 'return (async () => {\n' + transpiled + '\n})();');
    await evaluate(...values);
    report('running_tests');
    const results = await runner.run();
    host.post('results', JSON.stringify(results));
  } catch (error) {
    const message = error && error.message ? error.message : String(error);
    const snippet = (transpiled || bundle).slice(0, __SNIPPET_CHARS__);
    host.post('error', JSON.stringify({
      message: message + '\n\n[Debug Info]\nStep: ' + phase + '\nCode Snippet: ' + snippet,
      stack: (error && error.stack) || '',
    }));
  }
})();
"#;

// ----------------------------------------------------------------------------
// Options
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Element ids guaranteed to exist in the document before user code runs.
    pub mount_points: Vec<String>,
    /// Names bound as parameters around the evaluated bundle.
    pub ambient_names: Vec<String>,
    /// Length of the source snippet attached to bootstrap errors.
    pub snippet_chars: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            mount_points: vec!["root".into(), "app".into()],
            ambient_names: RUNNER_EXPORTS.iter().map(|name| name.to_string()).collect(),
            snippet_chars: ERROR_SNIPPET_CHARS,
        }
    }
}

// ----------------------------------------------------------------------------
// Generation
// ----------------------------------------------------------------------------

/// Escapes script-closing sequences and the line/paragraph separators so the
/// text stays inert inside a string literal embedded in markup.
pub fn escape_for_embedding(source: &str) -> String {
    SCRIPT_CLOSE_RE
        .replace_all(source, "<\\/$1")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Quoted script string literal for `text`.
fn literal(text: &str) -> String {
    escape_for_embedding(&Value::String(text.to_owned()).to_string())
}

fn runtime_config() -> String {
    let libraries: Map<String, Value> = PINNED_LIBRARIES
        .iter()
        .map(|(name, version, _)| (name.to_string(), Value::from(*version)))
        .collect();
    let config = json!({
        "waitForTimeout": WAIT_FOR_TIMEOUT_MS,
        "waitForInterval": WAIT_FOR_INTERVAL_MS,
    });
    format!(
        "globalThis.__sandtestConfig = {config};\nglobalThis.__sandtestLibraries = {};\n",
        Value::Object(libraries)
    )
}

/// Builds the program for `bundle`.
pub fn generate(bundle: &BundleOutput, options: &CodegenOptions) -> String {
    let mut program = runtime_config();
    for (name, version, source) in PINNED_LIBRARIES {
        program.push_str(&format!("// {name}@{version}\n"));
        program.push_str(source);
        program.push('\n');
    }
    let bootstrap = BOOTSTRAP
        .replace("__HOST__", HOST_GLOBAL)
        .replace("__MOUNT_POINTS__", &escape_for_embedding(&json!(options.mount_points).to_string()))
        .replace("__RUNNER_SOURCE__", &literal(RUNNER_SOURCE))
        .replace("__AMBIENT_NAMES__", &escape_for_embedding(&json!(options.ambient_names).to_string()))
        .replace("__SNIPPET_CHARS__", &options.snippet_chars.to_string())
        // Bundle last, so placeholder-like text inside user code stays intact.
        .replacen("__BUNDLE__", &literal(&bundle.code), 1);
    program.push_str(&bootstrap);
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(code: &str) -> BundleOutput {
        BundleOutput {
            code: code.to_string(),
            modules: vec!["main.js".into()],
        }
    }

    #[test]
    fn script_close_sequences_never_survive() {
        let program = generate(&bundle("const html = '</script><SCRIPT>';"), &CodegenOptions::default());
        assert!(!program.to_ascii_lowercase().contains("</script"));
        assert!(program.contains(r"<\/script>"));
    }

    #[test]
    fn separators_are_escaped() {
        let escaped = escape_for_embedding("a\u{2028}b\u{2029}c");
        assert_eq!(escaped, "a\\u2028b\\u2029c");
    }

    #[test]
    fn escape_is_case_insensitive_and_keeps_case() {
        assert_eq!(escape_for_embedding("x</ScRiPt>y"), "x<\\/ScRiPt>y");
    }

    #[test]
    fn bootstrap_reports_every_phase_in_order() {
        let program = generate(&bundle("1;"), &CodegenOptions::default());
        let positions: Vec<usize> = ["'start'", "'loading_runner'", "'transpiling'", "'evaluating'", "'running_tests'"]
            .iter()
            .map(|phase| program.rfind(phase).expect(phase))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{positions:?}");
    }

    #[test]
    fn runner_names_are_bound_as_parameters() {
        let program = generate(&bundle("1;"), &CodegenOptions::default());
        assert!(program.contains(r#"["describe","it","test","expect","vi","beforeEach","afterEach","beforeAll","afterAll","cleanup"]"#));
        assert!(program.contains(r#"for (const id of ["root","app"])"#));
        assert!(program.contains("globalThis.__sandtest;"));
    }

    #[test]
    fn host_global_is_removed_before_user_code() {
        let program = generate(&bundle("1;"), &CodegenOptions::default());
        let removed = program.find("delete globalThis.__sandtest;").expect("host removed");
        let evaluated = program.find("report('evaluating')").expect("evaluation step");
        assert!(removed < evaluated);
    }

    #[test]
    fn bundle_text_with_placeholders_is_embedded_verbatim() {
        let program = generate(&bundle("const s = '__AMBIENT_NAMES__ __HOST__';"), &CodegenOptions::default());
        assert!(program.contains(r#""const s = '__AMBIENT_NAMES__ __HOST__';""#));
    }

    #[test]
    fn libraries_are_pinned_and_loaded_before_bootstrap() {
        let program = generate(&bundle("1;"), &CodegenOptions::default());
        assert!(program.contains(r#"{"dom-lite":"1.0.0","react-lite":"1.0.0","testing-lite":"1.0.0"}"#));
        let dom = program.find("// dom-lite@1.0.0").expect("dom");
        let react = program.find("// react-lite@1.0.0").expect("react");
        let testing = program.find("// testing-lite@1.0.0").expect("testing");
        let bootstrap = program.find("report('start')").expect("bootstrap");
        assert!(dom < react && react < testing && testing < bootstrap);
    }
}
