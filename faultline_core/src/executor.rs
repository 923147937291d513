use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Poll interval while waiting on a child process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Failures of the execution capability itself. These are fatal to the fuzz
/// call that hit them; a crashing or hanging target is never an error here.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("execution backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to deliver input to target: {0}")]
    InputDelivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// Abnormal termination, with a short description of how.
    Crash(String),
    /// Hard wall-clock timeout. Treated as a crash outcome by the loop,
    /// never as a retryable condition.
    Timeout,
}

/// Outcome of one target execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecutionStatus,
    pub output: String,
    /// Stderr or panic/trace text, when any was produced. This is the raw
    /// material for crash fingerprinting.
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time: Duration,
    /// Covered code units, when instrumentation is available. Absence
    /// degrades the loop to crash-only fuzzing.
    pub coverage: Option<BTreeSet<u32>>,
}

impl ExecOutcome {
    pub fn crashed(&self) -> bool {
        !matches!(self.status, ExecutionStatus::Ok)
    }
}

/// The execution adapter contract. The core does not care whether this is a
/// subprocess, a container, or an in-process interpreter.
pub trait Executor: Send {
    fn run(&mut self, input: &[u8], timeout: Duration) -> Result<ExecOutcome, ExecutorError>;

    /// Total number of coverage units the instrumentation can report, when
    /// known. Used as the denominator for coverage percentages.
    fn coverage_capacity(&self) -> Option<usize> {
        None
    }
}

/// Runs a closure harness in-process, converting panics into crash outcomes.
/// The harness returns the set of coverage units the input exercised.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]) -> BTreeSet<u32>,
{
    harness_fn: F,
    capacity: Option<usize>,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]) -> BTreeSet<u32>,
{
    pub fn new(harness_fn: F) -> Self {
        Self {
            harness_fn,
            capacity: None,
        }
    }

    pub fn with_capacity(harness_fn: F, capacity: usize) -> Self {
        Self {
            harness_fn,
            capacity: Some(capacity),
        }
    }
}

impl<F> Executor for InProcessExecutor<F>
where
    F: Fn(&[u8]) -> BTreeSet<u32> + Send + Sync,
{
    fn run(&mut self, input: &[u8], timeout: Duration) -> Result<ExecOutcome, ExecutorError> {
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| (self.harness_fn)(input)));
        let execution_time = start.elapsed();

        let outcome = match result {
            Ok(coverage) => {
                // In-process execution cannot be preempted; a harness that
                // overran its budget is classified after the fact.
                if execution_time > timeout {
                    ExecOutcome {
                        status: ExecutionStatus::Timeout,
                        output: String::new(),
                        error: Some(format!(
                            "execution exceeded wall-clock budget of {}ms",
                            timeout.as_millis()
                        )),
                        exit_code: None,
                        execution_time,
                        coverage: Some(coverage),
                    }
                } else {
                    ExecOutcome {
                        status: ExecutionStatus::Ok,
                        output: String::new(),
                        error: None,
                        exit_code: Some(0),
                        execution_time,
                        coverage: Some(coverage),
                    }
                }
            }
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                ExecOutcome {
                    status: ExecutionStatus::Crash(msg.clone()),
                    output: String::new(),
                    error: Some(msg),
                    exit_code: None,
                    execution_time,
                    coverage: None,
                }
            }
        };
        Ok(outcome)
    }

    fn coverage_capacity(&self) -> Option<usize> {
        self.capacity
    }
}

pub enum InputDelivery {
    StdIn,
    /// Argument template; `{}` is replaced with the input file path.
    File(String),
}

pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub working_dir: Option<PathBuf>,
}

/// Runs a target as a subprocess with a hard wall-clock timeout.
///
/// No coverage instrumentation: `coverage` is always `None`, which puts the
/// loop in crash-only mode for these targets.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<Option<std::process::ExitStatus>, ExecutorError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if start.elapsed() > timeout {
                        if let Err(e) = child.kill() {
                            return Err(ExecutorError::Unavailable(format!(
                                "failed to kill timed-out target: {e}"
                            )));
                        }
                        let _ = child.wait();
                        return Ok(None);
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ExecutorError::Unavailable(format!(
                        "error waiting for target: {e}"
                    )));
                }
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut source = source;
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        buf
    })
}

impl Executor for CommandExecutor {
    fn run(&mut self, input: &[u8], timeout: Duration) -> Result<ExecOutcome, ExecutorError> {
        if self.config.command.is_empty() {
            return Err(ExecutorError::Unavailable(
                "no target command configured".to_string(),
            ));
        }

        let mut cmd = Command::new(&self.config.command[0]);
        if self.config.command.len() > 1 {
            cmd.args(&self.config.command[1..]);
        }
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;
        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let named_temp_file = tempfile::NamedTempFile::new().map_err(|e| {
                    ExecutorError::InputDelivery(format!("failed to create temp file: {e}"))
                })?;
                File::create(named_temp_file.path())
                    .and_then(|mut f| f.write_all(input))
                    .map_err(|e| {
                        ExecutorError::InputDelivery(format!(
                            "failed to write input file {:?}: {e}",
                            named_temp_file.path()
                        ))
                    })?;
                let path_str = named_temp_file.path().to_str().ok_or_else(|| {
                    ExecutorError::InputDelivery("temp file path is not valid UTF-8".to_string())
                })?;
                let final_arg = arg_template.replace("{}", path_str);
                for part in final_arg.split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            ExecutorError::Unavailable(format!(
                "failed to spawn target {:?}: {e}",
                self.config.command
            ))
        })?;

        if let InputDelivery::StdIn = self.config.input_delivery {
            if let Some(mut child_stdin) = child.stdin.take() {
                // A fast-crashing child may close its end first; a broken
                // pipe here is an outcome, not a delivery failure.
                if let Err(e) = child_stdin.write_all(input) {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExecutorError::InputDelivery(format!(
                            "failed to write target stdin: {e}"
                        )));
                    }
                }
            }
        }

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let exit = self.wait_with_timeout(&mut child, timeout)?;
        let execution_time = start.elapsed();

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        drop(temp_file_handle);

        let output = String::from_utf8_lossy(&stdout).into_owned();
        let stderr_text = String::from_utf8_lossy(&stderr).into_owned();
        let error = if stderr_text.trim().is_empty() {
            None
        } else {
            Some(stderr_text)
        };

        let outcome = match exit {
            None => ExecOutcome {
                status: ExecutionStatus::Timeout,
                output,
                error: error.or_else(|| {
                    Some(format!(
                        "target killed after wall-clock timeout of {}ms",
                        timeout.as_millis()
                    ))
                }),
                exit_code: None,
                execution_time,
                coverage: None,
            },
            Some(status) if status.success() => ExecOutcome {
                status: ExecutionStatus::Ok,
                output,
                error,
                exit_code: status.code(),
                execution_time,
                coverage: None,
            },
            Some(status) => {
                let desc = if let Some(code) = status.code() {
                    format!("target exited with code {code}")
                } else {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        match status.signal() {
                            Some(signal) => format!("target terminated by signal {signal}"),
                            None => "target exited abnormally".to_string(),
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        "target exited abnormally".to_string()
                    }
                };
                ExecOutcome {
                    status: ExecutionStatus::Crash(desc),
                    output,
                    error,
                    exit_code: status.code(),
                    execution_time,
                    coverage: None,
                }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod in_process_executor_tests {
    use super::*;

    fn quiet_harness(_data: &[u8]) -> BTreeSet<u32> {
        BTreeSet::from([1, 2])
    }

    fn panicking_harness(data: &[u8]) -> BTreeSet<u32> {
        if data.first() == Some(&0xFF) {
            panic!("boom at offset 0");
        }
        BTreeSet::new()
    }

    #[test]
    fn in_process_reports_coverage_on_success() {
        let mut executor = InProcessExecutor::with_capacity(quiet_harness, 16);
        let outcome = executor
            .run(&[1, 2, 3], Duration::from_secs(1))
            .expect("in-process run is infallible");
        assert_eq!(outcome.status, ExecutionStatus::Ok);
        assert_eq!(outcome.coverage, Some(BTreeSet::from([1, 2])));
        assert_eq!(executor.coverage_capacity(), Some(16));
        assert!(!outcome.crashed());
    }

    #[test]
    fn in_process_catches_panic_as_crash() {
        let mut executor = InProcessExecutor::new(panicking_harness);
        let outcome = executor.run(&[0xFF], Duration::from_secs(1)).unwrap();
        match outcome.status {
            ExecutionStatus::Crash(msg) => assert!(msg.contains("boom")),
            other => panic!("expected crash, got {other:?}"),
        }
        assert!(outcome.error.unwrap().contains("boom"));
        assert!(outcome.coverage.is_none());
    }
}

#[cfg(test)]
mod command_executor_tests {
    use super::*;

    fn sh_executor(script: &str) -> CommandExecutor {
        CommandExecutor::new(CommandExecutorConfig {
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            input_delivery: InputDelivery::StdIn,
            working_dir: None,
        })
    }

    #[test]
    fn cmd_exec_clean_exit_is_ok() {
        let mut executor = sh_executor("cat > /dev/null; exit 0");
        let outcome = executor.run(b"hello", Duration::from_secs(2)).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Ok);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.coverage.is_none());
    }

    #[test]
    fn cmd_exec_nonzero_exit_is_crash_with_stderr() {
        let mut executor = sh_executor("echo trace-line >&2; exit 7");
        let outcome = executor.run(b"", Duration::from_secs(2)).unwrap();
        match outcome.status {
            ExecutionStatus::Crash(desc) => assert!(desc.contains("code 7")),
            other => panic!("expected crash, got {other:?}"),
        }
        assert!(outcome.error.unwrap().contains("trace-line"));
    }

    #[test]
    fn cmd_exec_hang_hits_wall_clock_timeout() {
        let mut executor = sh_executor("sleep 5");
        let outcome = executor.run(b"", Duration::from_millis(100)).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(outcome.crashed());
    }

    #[test]
    fn cmd_exec_missing_binary_is_adapter_failure() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec!["./no_such_binary_exists_12345".to_string()],
            input_delivery: InputDelivery::StdIn,
            working_dir: None,
        });
        match executor.run(b"", Duration::from_secs(1)) {
            Err(ExecutorError::Unavailable(msg)) => {
                assert!(msg.contains("failed to spawn"));
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn cmd_exec_file_delivery_passes_path() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec!["/bin/sh".to_string(), "-c".to_string(),
                "grep -q MAGIC \"$0\" && exit 3 || exit 0".to_string()],
            input_delivery: InputDelivery::File("{}".to_string()),
            working_dir: None,
        });
        let benign = executor.run(b"plain", Duration::from_secs(2)).unwrap();
        assert_eq!(benign.status, ExecutionStatus::Ok);

        let hit = executor.run(b"has MAGIC token", Duration::from_secs(2)).unwrap();
        match hit.status {
            ExecutionStatus::Crash(desc) => assert!(desc.contains("code 3")),
            other => panic!("expected crash, got {other:?}"),
        }
    }
}
