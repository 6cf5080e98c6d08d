//! Action Script Execution
//!
//! `invoke` is the only place envdeploy starts an action script. It:
//!
//! - runs `<shell> <script>` with no arguments and stdin from `/dev/null`
//! - builds the child environment from the ambient environment plus the
//!   scope's parameters; parameters win when a name exists in both
//! - captures stdout and stderr into separate buffers
//! - runs the script in its own process group registered with
//!   `ChildRegistry`, so a timeout or a signal takes down everything it started
//!
//! A non-zero exit is reported in `ActionOutput`; `ensure_success` turns it
//! into a `DeployError::Execution` carrying both captured streams.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::params::ParameterSet;
use crate::process_guard::{self, ChildRegistry, CommandProcessGroup};

/// How long output pipes may stay open once the script itself has exited
pub const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// How action scripts are started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Interpreter the script path is handed to
    pub shell: String,
    /// Kill the action and fail the run after this long
    pub timeout: Option<Duration>,
    /// Working directory of the child; inherited when unset
    pub working_dir: Option<PathBuf>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            timeout: None,
            working_dir: None,
        }
    }
}

/// Output from an action execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ActionOutput {
    fn from_status(status: ExitStatus, stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success(),
        }
    }

    /// Convert an unsuccessful exit into `DeployError::Execution`
    pub fn ensure_success(&self, action: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        Err(DeployError::Execution {
            action: action.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut(Duration),
}

/// Run an action script and wait for it to finish.
///
/// # Errors
///
/// - `Spawn` if the interpreter cannot be started
/// - `Timeout` if `options.timeout` expires; the process group is terminated
/// - `Io` if waiting on the child fails
///
/// A script that runs and exits non-zero is `Ok` with `success == false`.
pub fn invoke(
    script_path: &Path,
    params: &ParameterSet,
    options: &InvokeOptions,
) -> Result<ActionOutput> {
    let label = script_path.display().to_string();
    info!("Running {} {}", options.shell, label);
    debug!(
        "Parameters for {}: {:?}",
        label,
        params.iter().map(|(name, _)| name).collect::<Vec<_>>()
    );

    let mut cmd = Command::new(&options.shell);
    cmd.arg(script_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(params.iter())
        .in_new_process_group();
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| DeployError::Spawn {
        action: label.clone(),
        source,
    })?;
    let pid = child.id();
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let waited = wait_for(&mut child, options.timeout);

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    // A background tool may still hold the pipes; keep what arrived so far
    let drain_deadline = Instant::now() + OUTPUT_DRAIN_LIMIT;
    let stdout = collect(stdout_reader, drain_deadline);
    let stderr = collect(stderr_reader, drain_deadline);

    match waited? {
        Waited::Exited(status) => {
            let output = ActionOutput::from_status(status, stdout, stderr);
            if output.success {
                info!("{} completed successfully", label);
            } else {
                info!("{} failed with exit code {:?}", label, output.exit_code);
            }
            Ok(output)
        }
        Waited::TimedOut(limit) => Err(DeployError::Timeout {
            action: label,
            seconds: limit.as_secs(),
            stdout,
            stderr,
        }),
    }
}

fn wait_for(child: &mut Child, timeout: Option<Duration>) -> Result<Waited> {
    let Some((limit, deadline)) =
        timeout.and_then(|limit| Some((limit, Instant::now().checked_add(limit)?)))
    else {
        return Ok(Waited::Exited(child.wait()?));
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Waited::Exited(status));
        }
        if Instant::now() >= deadline {
            info!("Action PID {} exceeded {:?}, terminating", child.id(), limit);
            process_guard::terminate_group(child.id(), process_guard::TERMINATION_GRACE);
            child.wait()?;
            return Ok(Waited::TimedOut(limit));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Pipe contents read so far, plus a signal for end of stream
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<PipeReader>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = shared.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("Reading action output failed: {}", e);
                        break;
                    }
                }
            }
            let _ = tx.send(());
        });
        PipeReader { buf, done }
    })
}

fn collect(reader: Option<PipeReader>, deadline: Instant) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let wait = deadline.saturating_duration_since(Instant::now());
    if reader.done.recv_timeout(wait).is_err() {
        warn!("Action output still open after exit, keeping what was read");
    }
    let bytes = reader
        .buf
        .lock()
        .map(|buf| buf.clone())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
