//! Local child processes and what happens to them when we exit
//!
//! Every local command runs as the leader of its own process group and is
//! tracked in a global registry. On SIGINT, SIGTERM or SIGHUP, and when the
//! [`ProcessGuard`] held by `main` is dropped, each tracked group receives
//! SIGTERM and, after a grace period, SIGKILL.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period given to children when the guard is dropped
pub const DROP_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Grace period given to children when a termination signal arrives
pub const SIGNAL_GRACE_PERIOD: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process group leaders that are still running
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        Arc::clone(CHILD_REGISTRY.get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default()))))
    }

    /// Lock the global registry, recovering it if a holder panicked
    fn lock_global() -> MutexGuard<'static, ChildRegistry> {
        let registry =
            CHILD_REGISTRY.get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())));
        match registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register_global(pid: u32) {
        Self::lock_global().register(pid);
    }

    pub fn unregister_global(pid: u32) {
        Self::lock_global().unregister(pid);
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        if self.pids.remove(&pid) {
            debug!(pid, "unregistered child process");
        }
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, then SIGKILL whatever is left after
    /// `grace_period`. Only the first call does anything.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("child cleanup already initiated");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.drain().collect();
        info!(count = pids.len(), "terminating child processes");

        for &pid in &pids {
            signal_group_or_process(pid, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if !pids.iter().any(|&pid| is_process_alive(pid)) {
                info!("all child processes terminated");
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            warn!(pid, "child did not terminate, sending SIGKILL");
            signal_group_or_process(pid, Signal::SIGKILL);
        }
    }
}

/// Signal the whole group led by `pid`, or just `pid` if that fails
fn signal_group_or_process(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range");
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(-raw), sig) {
        debug!(pid, signal = sig.as_str(), "could not signal process group: {}", e);
        if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
            warn!(pid, signal = sig.as_str(), "could not signal process: {}", e);
        }
    }
}

/// Running or sleeping; zombies count as dead
fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if signal::kill(Pid::from_raw(raw), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // the state field follows the parenthesized command name
        Ok(stat) => match stat.rsplit_once(')') {
            Some((_, rest)) => !matches!(rest.split_whitespace().next(), Some("Z" | "X")),
            None => true,
        },
        Err(_) => true,
    }
}

/// Terminates every registered child when dropped
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

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
        let mut registry = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.terminate_all(DROP_GRACE_PERIOD);
    }
}

/// Terminate children and exit with 128 + signal on SIGINT, SIGTERM or SIGHUP.
///
/// Call once at startup.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "received termination signal, cleaning up");
            ChildRegistry::lock_global().terminate_all(SIGNAL_GRACE_PERIOD);
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Spawn a command as the leader of a new process group that dies with us
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;

        self.process_group(0);
        // SAFETY: prctl is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
