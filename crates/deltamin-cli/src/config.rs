use anyhow::{Context, Result};
use regex::bytes::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Session file loaded with `--config`. Every key is optional; command-line
/// flags take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub timeout_ms: Option<u64>,
    pub jobs: Option<usize>,
    pub double_check: Option<bool>,
    pub crash_pattern: Option<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

/// Flags as given on the command line, before merging with the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub timeout_ms: Option<u64>,
    pub jobs: Option<usize>,
    pub double_check: bool,
    pub crash_pattern: Option<String>,
    pub cwd: Option<PathBuf>,
    pub target_args: Vec<String>,
}

#[derive(Debug)]
pub struct Settings {
    pub timeout_ms: Option<u64>,
    pub jobs: usize,
    pub double_check: bool,
    pub crash_pattern: Option<Regex>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub target_args: Vec<String>,
}

impl Settings {
    pub fn resolve(file: SessionConfig, flags: Overrides) -> Result<Self> {
        let crash_pattern = match flags.crash_pattern.or(file.crash_pattern) {
            Some(pattern) => Some(
                Regex::new(&pattern).with_context(|| format!("invalid crash pattern {pattern:?}"))?,
            ),
            None => None,
        };
        let target_args = if flags.target_args.is_empty() {
            file.args
        } else {
            flags.target_args
        };
        Ok(Self {
            timeout_ms: flags.timeout_ms.or(file.timeout_ms),
            jobs: flags.jobs.or(file.jobs).unwrap_or(1),
            double_check: flags.double_check || file.double_check.unwrap_or(false),
            crash_pattern,
            cwd: flags.cwd.or(file.cwd),
            env: file.env,
            target_args,
        })
    }
}
