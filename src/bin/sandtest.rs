use std::{env, path::Path, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use walkdir::{DirEntry, WalkDir};

use sandtest::{
    init_tracing, run_tests, EntryPoints, ExecutionResult, FileMap, Sandbox, SandboxOptions,
    Status, VirtualFile,
};

const SOURCE_EXTENSIONS: [&str; 6] = ["js", "jsx", "mjs", "ts", "tsx", "json"];
const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "target"];

struct RunArgs {
    dir: PathBuf,
    entries: Vec<String>,
    timeout: Option<Duration>,
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(target = "sandtest", "{err:?}");
            eprintln!("sandtest: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every test passed.
async fn run() -> Result<bool> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        bail!("E-SANDTEST-0500: missing command");
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "run" => run_cmd(parse_run_args(&args)?).await,
        "--help" | "-h" => {
            print_usage();
            Ok(true)
        }
        other => Err(anyhow!("E-SANDTEST-0501: unknown command '{other}'")),
    }
}

fn parse_run_args(args: &[String]) -> Result<RunArgs> {
    let mut dir: Option<PathBuf> = None;
    let mut entries = Vec::new();
    let mut timeout = None;
    let mut json = false;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--entry" => {
                idx += 1;
                let entry = args
                    .get(idx)
                    .context("E-SANDTEST-0502: --entry expects a path")?;
                entries.push(entry.clone());
            }
            "--timeout-ms" => {
                idx += 1;
                let raw = args
                    .get(idx)
                    .context("E-SANDTEST-0502: --timeout-ms expects a number")?;
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("E-SANDTEST-0502: invalid --timeout-ms '{raw}'"))?;
                timeout = Some(Duration::from_millis(ms.max(1)));
            }
            "--json" => json = true,
            flag if flag.starts_with("--") => {
                bail!("E-SANDTEST-0503: unexpected flag '{flag}' for run command");
            }
            path => {
                if dir.replace(PathBuf::from(path)).is_some() {
                    bail!("E-SANDTEST-0503: run takes a single directory");
                }
            }
        }
        idx += 1;
    }
    Ok(RunArgs {
        dir: dir.context("E-SANDTEST-0502: run expects a directory")?,
        entries,
        timeout,
        json,
    })
}

async fn run_cmd(args: RunArgs) -> Result<bool> {
    let files = load_dir(&args.dir)?;
    let entries = if args.entries.is_empty() {
        default_entries(&files)
    } else {
        args.entries.clone()
    };
    if entries.is_empty() {
        bail!(
            "E-SANDTEST-0504: no *.test.* or *.spec.* files under {}",
            args.dir.display()
        );
    }
    tracing::info!(target = "sandtest", files = files.len(), entries = entries.len(), "loaded directory");

    let mut options = SandboxOptions::from_env();
    if let Some(timeout) = args.timeout {
        options.timeout = timeout;
    }
    let mut sandbox = Sandbox::new(options);
    let json = args.json;
    let result = run_tests(&files, EntryPoints::Many(entries), &mut sandbox, |status| {
        if !json {
            print_status(&status);
        }
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(result.success())
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name) || name.starts_with('.'))
            .unwrap_or(false)
}

/// Loads source files under `dir` keyed by their `/`-separated relative path.
fn load_dir(dir: &Path) -> Result<FileMap> {
    if !dir.is_dir() {
        bail!("E-SANDTEST-0505: '{}' is not a directory", dir.display());
    }
    let mut files = FileMap::new();
    for entry in WalkDir::new(dir).into_iter().filter_entry(|entry| !is_skipped(entry)) {
        let entry = entry.context("walk directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !wanted {
            continue;
        }
        let relative = path
            .strip_prefix(dir)
            .context("relative path")?
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        files.insert(relative.clone(), VirtualFile::file(relative, content));
    }
    Ok(files)
}

fn default_entries(files: &FileMap) -> Vec<String> {
    files
        .keys()
        .filter(|path| {
            let name = path.rsplit('/').next().unwrap_or(path.as_str());
            name.contains(".test.") || name.contains(".spec.")
        })
        .cloned()
        .collect()
}

fn print_status(status: &Value) {
    match status.get("kind").and_then(Value::as_str) {
        Some("console") => {
            let level = status.get("level").and_then(Value::as_str).unwrap_or("log");
            let message = status.get("message").and_then(Value::as_str).unwrap_or_default();
            eprintln!("[console.{level}] {message}");
        }
        Some("dom") => {
            if let Some(html) = status.get("html").and_then(Value::as_str) {
                eprintln!("{html}");
            }
        }
        _ => {
            if let Some(phase) = status.get("phase").and_then(Value::as_str) {
                tracing::debug!(target = "sandtest", phase, "phase");
            }
        }
    }
}

fn print_summary(result: &ExecutionResult) {
    for suite in &result.test_results {
        println!("{}", suite.name);
        for assertion in &suite.assertion_results {
            let mark = match assertion.status {
                Status::Pass => "✓",
                Status::Fail => "✗",
            };
            println!("  {mark} {} ({:.0}ms)", assertion.title, assertion.duration);
            for message in &assertion.failure_messages {
                for line in message.lines() {
                    println!("      {line}");
                }
            }
        }
    }
    println!(
        "\nTests: {} passed, {} failed, {} total ({:.0}ms)",
        result.num_passed_tests,
        result.num_failed_tests,
        result.num_total_tests,
        result.end_time - result.start_time
    );
}

fn print_usage() {
    eprintln!(
        "Usage:\n  sandtest run <dir> [--entry <path>]... [--timeout-ms <n>] [--json]\n\n\
         Without --entry every *.test.* and *.spec.* file under <dir> runs.\n\
         Environment: SANDTEST_TIMEOUT_MS, SANDTEST_VISIBLE, SANDTEST_LOOP_LIMIT,\n\
         SANDTEST_RECURSION_LIMIT, RUST_LOG."
    );
}
