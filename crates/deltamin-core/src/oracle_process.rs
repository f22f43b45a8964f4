use crate::oracle::{Oracle, OracleError};
use crate::types::Verdict;
use regex::bytes::Regex;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the target program with the candidate on its stdin.
///
/// A clean exit is [`Verdict::Passes`]; a non-zero exit code or death by
/// signal is [`Verdict::Fails`]; running past the timeout kills the child,
/// along with anything it forked on unix, and yields [`Verdict::Unresolved`]. Program output is ignored unless a crash
/// pattern is configured, in which case a failing status only counts when
/// stderr matches it.
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
    crash_pattern: Option<Regex>,
    poll_interval: Duration,
}

enum Completion {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

impl ProcessOracle {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            crash_pattern: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn crash_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.crash_pattern = pattern;
        self
    }

    /// How often a running child is checked for cancellation.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.stdin(Stdio::piped()).stdout(Stdio::null());
        if self.crash_pattern.is_some() {
            command.stderr(Stdio::piped());
        } else {
            command.stderr(Stdio::null());
        }
        command
    }

    fn run(
        &self,
        candidate: &[u8],
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<Verdict>, OracleError> {
        let mut child = self.command().spawn().map_err(|source| OracleError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let feeder = child
            .stdin
            .take()
            .map(|stdin| spawn_feeder(stdin, candidate.to_vec()));
        let collector = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).map(|_| buf)
            })
        });

        // After a kill the I/O threads are left to finish on their own.
        let status = match self.wait(&mut child, cancelled)? {
            Completion::Exited(status) => status,
            Completion::TimedOut => {
                debug!(timeout = ?self.timeout, "target timed out");
                return Ok(Some(Verdict::Unresolved));
            }
            Completion::Cancelled => return Ok(None),
        };

        if let Some(handle) = feeder {
            match join(handle, "stdin writer")? {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(OracleError::io("write candidate to target stdin", err)),
            }
        }
        let stderr = match collector {
            Some(handle) => join(handle, "stderr reader")?
                .map_err(|err| OracleError::io("read target stderr", err))?,
            None => Vec::new(),
        };

        Ok(Some(self.classify(status, &stderr)))
    }

    fn wait(
        &self,
        child: &mut Child,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Completion, OracleError> {
        let started = Instant::now();
        loop {
            let slice = match self.timeout {
                Some(timeout) => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        kill(child);
                        return Ok(Completion::TimedOut);
                    }
                    (timeout - elapsed).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            let status = child
                .wait_timeout(slice)
                .map_err(|err| OracleError::io("wait for target", err))?;
            if let Some(status) = status {
                return Ok(Completion::Exited(status));
            }
            if cancelled() {
                kill(child);
                return Ok(Completion::Cancelled);
            }
        }
    }

    fn classify(&self, status: ExitStatus, stderr: &[u8]) -> Verdict {
        if status.success() {
            return Verdict::Passes;
        }
        match &self.crash_pattern {
            Some(pattern) if !pattern.is_match(stderr) => {
                debug!(code = ?status.code(), "target failed with a different fault");
                Verdict::Passes
            }
            _ => {
                debug!(code = ?status.code(), "target failed");
                Verdict::Fails
            }
        }
    }
}

impl Oracle for ProcessOracle {
    fn invoke(&self, candidate: &[u8]) -> Result<Verdict, OracleError> {
        let verdict = self.run(candidate, &|| false)?;
        Ok(verdict.unwrap_or(Verdict::Unresolved))
    }

    fn invoke_until(
        &self,
        candidate: &[u8],
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<Verdict>, OracleError> {
        if cancelled() {
            return Ok(None);
        }
        self.run(candidate, cancelled)
    }
}

fn spawn_feeder(mut stdin: ChildStdin, data: Vec<u8>) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        stdin.write_all(&data)?;
        stdin.flush()
    })
}

fn join<T>(handle: JoinHandle<T>, what: &'static str) -> Result<T, OracleError> {
    handle.join().map_err(|_| {
        OracleError::io(what, io::Error::new(io::ErrorKind::Other, "thread panicked"))
    })
}

/// Kills the target and everything it forked, then reaps it.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall; the group is led by our unreaped child,
            // so its id cannot have been reused.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    child.kill().ok();
    let _ = child.wait();
}
