//! Lifecycle management for action subprocesses
//!
//! Action scripts provision real infrastructure; an orphaned script that keeps
//! running after envdeploy is gone can still change things. So every action:
//! - runs in its own process group, with `PR_SET_PDEATHSIG` set
//! - is registered in a global registry while it runs
//! - is terminated as a whole group (SIGTERM, then SIGKILL after a grace
//!   period) on timeout, on SIGINT/SIGTERM/SIGHUP, or when the guard drops

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Process group leaders of the actions currently running
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once shutdown cleanup has run
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered action process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered action process group {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate every tracked process group. Runs at most once.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        info!("Terminating {} running action(s)", self.pids.len());
        for pid in self.pids.drain() {
            terminate_group(pid, grace_period);
        }
    }
}

/// SIGTERM the process group led by `pgid`, SIGKILL it if any member is
/// still alive after `grace_period`. Falls back to signalling the leader
/// alone when the group cannot be signalled.
pub fn terminate_group(pgid: u32, grace_period: Duration) {
    if let Err(e) = send_signal_to_group(pgid, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pgid, e);
        if let Err(e) = send_signal(pgid, Signal::SIGTERM) {
            debug!("SIGTERM to PID {} failed: {}", pgid, e);
            return;
        }
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !is_group_alive(pgid) {
            debug!("Process group {} terminated", pgid);
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    warn!("Process group {} ignored SIGTERM, sending SIGKILL", pgid);
    if send_signal_to_group(pgid, Signal::SIGKILL).is_err() {
        let _ = send_signal(pgid, Signal::SIGKILL);
    }
}

/// Whether any process of group `pgid` is still running.
///
/// The leader is usually an unreaped zombie by now, so the group is scanned
/// for live members rather than probing the leader alone.
pub fn is_group_alive(pgid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return is_process_alive(pgid);
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok())
        .any(|stat| match stat_fields(&stat) {
            Some((state, group)) => group == pgid && !matches!(state, "Z" | "X"),
            None => false,
        })
}

/// State letter and process group id from a `/proc/<pid>/stat` line
fn stat_fields(stat: &str) -> Option<(&str, u32)> {
    // The command name may contain spaces; fields after it are fixed
    let mut fields = stat.rsplit_once(')')?.1.split_whitespace();
    let state = fields.next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group, reaching the tools the script
/// started as well as bash itself
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive means present and neither zombie nor dead
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state letter
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all running actions on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Guard over the global registry
    pub fn new() -> Self {
        Self::with_registry(ChildRegistry::global())
    }

    pub fn with_registry(registry: Arc<Mutex<ChildRegistry>>) -> Self {
        Self { registry }
    }

    /// Number of actions that would be terminated on drop
    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(TERMINATION_GRACE);
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// On delivery, running actions are terminated and the process exits with
/// `128 + signo`. Side effects the actions already made are left as they are.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            warn!("Received {}, aborting run", signal_name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
