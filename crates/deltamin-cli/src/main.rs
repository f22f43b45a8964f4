mod config;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{ArgAction, Parser, ValueEnum};
use config::{Overrides, SessionConfig, Settings};
use deltamin_core::{
    DeltaMinimizer, Driver, MinimizationResult, MinimizerConfig, ProcessOracle,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deltamin")]
#[command(version)]
#[command(about = "Minimize a crashing input with delta debugging")]
struct Cli {
    /// Program under test; each candidate is written to its stdin.
    target: PathBuf,

    /// Input that makes the target crash.
    input: PathBuf,

    /// Arguments passed to the target.
    #[arg(last = true)]
    target_args: Vec<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Where to write the minimized input [default: <INPUT>.delta].
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the report to this file instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Concurrent target runs per probing phase; 0 uses every core.
    #[arg(long)]
    jobs: Option<usize>,

    /// Re-run every failing candidate and keep it only if it fails twice.
    #[arg(long)]
    double_check: bool,

    /// Count a crash only when the target's stderr matches this regex.
    #[arg(long)]
    crash_pattern: Option<String>,

    #[arg(long)]
    cwd: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Serialize)]
struct ReportJson {
    schema_version: String,
    tool: ToolInfo,
    invocation: Invocation,
    inputs: Vec<InputInfo>,
    status: String,
    exit_code: i32,
    started_at: String,
    finished_at: String,
    duration_ms: u64,
    result: MinimizationResult,
}

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    version: String,
    git_sha: String,
}

#[derive(Serialize)]
struct Invocation {
    target: String,
    target_args: Vec<String>,
    input: String,
    output: String,
    timeout_ms: Option<u64>,
    jobs: usize,
    double_check: bool,
    crash_pattern: Option<String>,
}

#[derive(Serialize)]
struct InputInfo {
    role: String,
    path: String,
    size: usize,
    sha256: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tool error: {err:#}");
            2
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let started_at = Utc::now();
    let timer = Instant::now();

    // Bare target names are resolved through PATH at spawn time.
    if cli.target.components().count() > 1 && !cli.target.exists() {
        eprintln!("{} not found", cli.target.display());
        return Ok(1);
    }
    if !cli.input.exists() {
        eprintln!("{} not found", cli.input.display());
        return Ok(1);
    }

    let file = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let settings = Settings::resolve(
        file,
        Overrides {
            timeout_ms: cli.timeout_ms,
            jobs: cli.jobs,
            double_check: cli.double_check,
            crash_pattern: cli.crash_pattern.clone(),
            cwd: cli.cwd.clone(),
            target_args: cli.target_args.clone(),
        },
    )?;

    let input = fs::read(&cli.input).with_context(|| format!("read {}", cli.input.display()))?;
    let oracle = build_oracle(&cli.target, &settings);
    let driver = Driver::new(DeltaMinimizer::new(MinimizerConfig {
        jobs: settings.jobs,
        double_check: settings.double_check,
        verify_input: false,
    }));

    let result = match driver.run(&oracle, &input) {
        Ok(result) => result,
        Err(err) if err.is_usage_error() => {
            eprintln!("{err}");
            return Ok(1);
        }
        Err(err) => return Err(anyhow::Error::new(err).context("minimize input")),
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));
    write_atomic(&output, &result.minimized)?;

    let exit_code = 0;
    let report = ReportJson {
        schema_version: "0.1".to_string(),
        tool: ToolInfo {
            name: "deltamin".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_sha: std::env::var("DELTAMIN_GIT_SHA").unwrap_or_else(|_| "UNKNOWN".to_string()),
        },
        invocation: Invocation {
            target: cli.target.to_string_lossy().to_string(),
            target_args: settings.target_args.clone(),
            input: cli.input.to_string_lossy().to_string(),
            output: output.to_string_lossy().to_string(),
            timeout_ms: settings.timeout_ms,
            jobs: settings.jobs,
            double_check: settings.double_check,
            crash_pattern: settings.crash_pattern.as_ref().map(|p| p.as_str().to_string()),
        },
        inputs: vec![
            input_info("original", &cli.input, &input),
            input_info("minimized", &output, &result.minimized),
        ],
        status: "minimized".to_string(),
        exit_code,
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        duration_ms: timer.elapsed().as_millis() as u64,
        result,
    };

    match cli.format {
        OutputFormat::Json => emit_json(&report, cli.report.as_deref()),
        OutputFormat::Text => emit_text(&report, cli.report.as_deref()),
    }?;

    Ok(exit_code)
}

fn build_oracle(target: &Path, settings: &Settings) -> ProcessOracle {
    let mut oracle = ProcessOracle::new(target)
        .args(&settings.target_args)
        .timeout(settings.timeout_ms.map(Duration::from_millis))
        .crash_pattern(settings.crash_pattern.clone());
    if let Some(cwd) = &settings.cwd {
        oracle = oracle.current_dir(cwd);
    }
    for (key, value) in &settings.env {
        oracle = oracle.env(key, value);
    }
    oracle
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".delta");
    PathBuf::from(name)
}

fn input_info(role: &str, path: &Path, data: &[u8]) -> InputInfo {
    let mut hasher = Sha256::new();
    hasher.update(data);
    InputInfo {
        role: role.to_string(),
        path: path.to_string_lossy().to_string(),
        size: data.len(),
        sha256: hex::encode(hasher.finalize()),
    }
}

fn emit_json(report: &ReportJson, destination: Option<&Path>) -> Result<()> {
    let payload = serde_json::to_string_pretty(report).context("serialize report json")?;
    if let Some(path) = destination {
        write_atomic(path, payload.as_bytes())?;
        return Ok(());
    }

    println!("{payload}");
    Ok(())
}

fn emit_text(report: &ReportJson, destination: Option<&Path>) -> Result<()> {
    let result = &report.result;
    let summary = format!(
        "original inputs size: {}\nminimized input size: {}\noracle invocations: {}\nunresolved verdicts: {}",
        result.original_size,
        result.minimized_size,
        result.invocation_count,
        result.unresolved_count
    );
    if let Some(path) = destination {
        write_atomic(path, summary.as_bytes())?;
        return Ok(());
    }
    println!("{summary}");
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("rename {}", path.display()))?;
    Ok(())
}
