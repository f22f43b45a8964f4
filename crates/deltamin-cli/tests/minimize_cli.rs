#![cfg(unix)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CRASHES_ON_CD: &str = "grep -q cd && exit 1\nexit 0\n";

struct Case {
    dir: TempDir,
}

impl Case {
    fn new(script: &str, input: &[u8]) -> Self {
        let dir = TempDir::new().expect("tmp dir");
        fs::write(dir.path().join("target.sh"), script).expect("write script");
        fs::write(dir.path().join("crash.bin"), input).expect("write input");
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).to_string_lossy().to_string()
    }
}

fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("read json");
    serde_json::from_str(&text).expect("parse json")
}

#[test]
fn writes_minimized_input_next_to_the_original() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .success()
        .stdout(contains("original inputs size: 6"))
        .stdout(contains("minimized input size: 2"));

    let minimized = fs::read(case.path("crash.bin.delta")).expect("read delta");
    assert_eq!(minimized, b"cd".to_vec());
}

#[test]
fn missing_input_is_a_usage_error() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");

    cargo_bin_cmd!("deltamin")
        .args(["/bin/sh".to_string(), case.arg("absent.bin")])
        .assert()
        .code(1)
        .stderr(contains("absent.bin not found"));
}

#[test]
fn input_that_does_not_crash_is_rejected() {
    let case = Case::new(CRASHES_ON_CD, b"abef");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .code(1)
        .stderr(contains("program does not crash with initial input"));

    assert!(!case.path("crash.bin.delta").exists());
}

#[test]
fn missing_target_path_is_a_usage_error() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");

    cargo_bin_cmd!("deltamin")
        .args([
            "/nonexistent/deltamin-target".to_string(),
            case.arg("crash.bin"),
        ])
        .assert()
        .code(1)
        .stderr(contains("/nonexistent/deltamin-target not found"));
}

#[test]
fn unlaunchable_target_is_a_usage_error() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");

    cargo_bin_cmd!("deltamin")
        .args(["deltamin-no-such-target".to_string(), case.arg("crash.bin")])
        .assert()
        .code(1)
        .stderr(contains("cannot launch target"));
}

#[test]
fn json_report_records_invocation_and_digests() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");
    let report = case.path("report.json");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--format".to_string(),
            "json".to_string(),
            "--report".to_string(),
            report.to_string_lossy().to_string(),
            "--output".to_string(),
            case.arg("min.bin"),
            "--jobs".to_string(),
            "2".to_string(),
            "--timeout-ms".to_string(),
            "10000".to_string(),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .success();

    let json = read_json(&report);
    assert_eq!(json["tool"]["name"], "deltamin");
    assert_eq!(json["status"], "minimized");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["invocation"]["jobs"], 2);
    assert_eq!(json["invocation"]["timeout_ms"], 10000);
    assert_eq!(json["invocation"]["target_args"][0], case.arg("target.sh"));
    assert_eq!(json["result"]["minimized"], "6364");
    assert_eq!(json["result"]["original_size"], 6);
    assert_eq!(json["result"]["minimized_size"], 2);
    assert_eq!(json["inputs"][1]["role"], "minimized");
    assert_eq!(json["inputs"][1]["size"], 2);
    assert_eq!(fs::read(case.path("min.bin")).expect("read min"), b"cd".to_vec());
    assert!(!case.path("crash.bin.delta").exists());
}

#[test]
fn crash_pattern_keeps_the_original_fault() {
    // Every input crashes, but only inputs containing "cd" crash with BUG.
    let script = "if grep -q cd; then echo BUG >&2; exit 1; fi\necho OTHER >&2\nexit 1\n";
    let case = Case::new(script, b"xxcdxx");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--crash-pattern".to_string(),
            "BUG".to_string(),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .success();

    let minimized = fs::read(case.path("crash.bin.delta")).expect("read delta");
    assert_eq!(minimized, b"cd".to_vec());
}

#[test]
fn config_file_supplies_target_arguments_and_options() {
    let case = Case::new(CRASHES_ON_CD, b"zzcdzz");
    let config = case.path("deltamin.yaml");
    fs::write(
        &config,
        format!(
            "args: [\"{}\"]\ntimeout_ms: 5000\ndouble_check: true\n",
            case.arg("target.sh")
        ),
    )
    .expect("write config");
    let report = case.path("report.json");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--config".to_string(),
            config.to_string_lossy().to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--report".to_string(),
            report.to_string_lossy().to_string(),
        ])
        .assert()
        .success();

    let json = read_json(&report);
    assert_eq!(json["invocation"]["double_check"], true);
    assert_eq!(json["invocation"]["timeout_ms"], 5000);
    assert_eq!(json["result"]["minimized"], "6364");
}

#[test]
fn malformed_config_is_a_tool_error() {
    let case = Case::new(CRASHES_ON_CD, b"abcdef");
    let config = case.path("deltamin.yaml");
    fs::write(&config, "retries: 3\n").expect("write config");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--config".to_string(),
            config.to_string_lossy().to_string(),
        ])
        .assert()
        .code(2)
        .stderr(contains("tool error"));
}

#[test]
fn cwd_flag_sets_the_target_working_directory() {
    // The script only crashes when run from the directory holding `marker`.
    let script = "test -f marker || exit 0\ngrep -q cd && exit 1\nexit 0\n";
    let case = Case::new(script, b"abcdef");
    fs::create_dir(case.path("work")).expect("create work dir");
    fs::write(case.path("work").join("marker"), "").expect("write marker");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--cwd".to_string(),
            case.arg("work"),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .success();

    let minimized = fs::read(case.path("crash.bin.delta")).expect("read delta");
    assert_eq!(minimized, b"cd".to_vec());
}

#[test]
fn config_env_reaches_the_target() {
    let script = "test \"$DELTAMIN_MODE\" = crash || exit 0\ngrep -q cd && exit 1\nexit 0\n";
    let case = Case::new(script, b"abcdef");
    let config = case.path("deltamin.yaml");
    fs::write(
        &config,
        format!(
            "args: [\"{}\"]\nenv:\n  DELTAMIN_MODE: crash\n",
            case.arg("target.sh")
        ),
    )
    .expect("write config");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--config".to_string(),
            config.to_string_lossy().to_string(),
        ])
        .assert()
        .success();

    let minimized = fs::read(case.path("crash.bin.delta")).expect("read delta");
    assert_eq!(minimized, b"cd".to_vec());
}

#[test]
fn parallel_double_checked_run_matches_sequential() {
    let case = Case::new(CRASHES_ON_CD, b"abcdefgh");
    let report = case.path("report.json");

    cargo_bin_cmd!("deltamin")
        .args([
            "/bin/sh".to_string(),
            case.arg("crash.bin"),
            "--jobs".to_string(),
            "3".to_string(),
            "--double-check".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--report".to_string(),
            report.to_string_lossy().to_string(),
            "--".to_string(),
            case.arg("target.sh"),
        ])
        .assert()
        .success();

    let json = read_json(&report);
    assert_eq!(json["invocation"]["jobs"], 3);
    assert_eq!(json["invocation"]["double_check"], true);
    assert_eq!(json["result"]["minimized"], "6364");
    assert_eq!(json["result"]["unresolved_count"], 0);
}
