//! Transport boundary
//!
//! The engine never opens connections itself. It is handed something that can
//! start a shell command on the target machine and wait for it, and it feeds
//! that command two [`OutputChannel`]s to write into while it runs.
//!
//! [`LocalShellTransport`] targets the local host through `sh -c`. It is used
//! by the CLI as a loopback target and by integration tests.

use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::fs;
use std::io::{self, PipeWriter, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a transport while starting or waiting for a command
#[derive(Error, Debug)]
pub enum TransportError {
    /// The command ran to completion with a non-zero status
    #[error("exited with status {code}")]
    Exit { code: i32 },

    /// The connection could not run the command or lost it
    #[error("{0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Writable end of one output stream of a running command.
///
/// Clones share the same underlying pipe. Once [`OutputChannel::close`] has
/// been called every clone reports `BrokenPipe` on write, and the reading side
/// sees end-of-stream.
#[derive(Clone, Debug)]
pub struct OutputChannel {
    writer: Arc<Mutex<Option<PipeWriter>>>,
}

impl OutputChannel {
    pub(crate) fn new(writer: PipeWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Drop the pipe writer so the reader observes EOF
    pub fn close(&self) {
        match self.writer.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

impl Write for OutputChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("output channel lock poisoned"))?;
        match guard.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output channel closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("output channel lock poisoned"))?;
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// The primary and secondary output streams handed to a started command
#[derive(Clone, Debug)]
pub struct ExecStreams {
    pub stdout: OutputChannel,
    pub stderr: OutputChannel,
}

/// A command that has been started on a transport
pub trait RunningCommand: Send {
    /// Block until the command finishes.
    ///
    /// `Ok(())` means exit status zero. A non-zero status is reported as
    /// [`TransportError::Exit`]; anything else is a transport failure.
    fn wait(self: Box<Self>) -> Result<(), TransportError>;
}

/// Capability to run commands on, and copy files to, a target machine
pub trait Transport: Send + Sync {
    /// Start `command` on the target, writing its output into `streams`
    fn start(
        &self,
        command: &str,
        streams: ExecStreams,
    ) -> Result<Box<dyn RunningCommand>, TransportError>;

    /// Write `contents` to `remote_path` on the target
    fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError>;
}

/// Runs commands on the local host with `sh -c`
#[derive(Debug, Clone)]
pub struct LocalShellTransport {
    shell: String,
}

impl LocalShellTransport {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (it must accept `-c <command>`)
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalShellTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalShellTransport {
    fn start(
        &self,
        command: &str,
        streams: ExecStreams,
    ) -> Result<Box<dyn RunningCommand>, TransportError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                TransportError::Connection(format!("failed to spawn {}: {}", self.shell, e))
            })?;

        let pid = child.id();
        ChildRegistry::register_global(pid);

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            ChildRegistry::unregister_global(pid);
            return Err(TransportError::Connection(
                "child output was not piped".to_string(),
            ));
        };

        let ExecStreams {
            stdout: out_channel,
            stderr: err_channel,
        } = streams;
        let copies = vec![
            spawn_copy(stdout, out_channel),
            spawn_copy(stderr, err_channel),
        ];

        debug!(pid, "started local command");
        Ok(Box::new(LocalCommand { child, pid, copies }))
    }

    fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        if let Some(parent) = Path::new(remote_path).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(remote_path, contents)?;
        debug!(path = remote_path, bytes = contents.len(), "uploaded file");
        Ok(())
    }
}

fn spawn_copy<R>(mut source: R, mut sink: OutputChannel) -> JoinHandle<io::Result<u64>>
where
    R: io::Read + Send + 'static,
{
    thread::spawn(move || io::copy(&mut source, &mut sink))
}

struct LocalCommand {
    child: Child,
    pid: u32,
    copies: Vec<JoinHandle<io::Result<u64>>>,
}

impl RunningCommand for LocalCommand {
    fn wait(self: Box<Self>) -> Result<(), TransportError> {
        let LocalCommand {
            mut child,
            pid,
            copies,
        } = *self;

        let status = child.wait();
        ChildRegistry::unregister_global(pid);

        // the child's pipes close on exit, so the copies finish on their own
        for copy in copies {
            match copy.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(pid, "lost output of local command: {}", e),
                Err(_) => {
                    return Err(TransportError::Connection(
                        "output copy thread panicked".to_string(),
                    ));
                }
            }
        }

        let status = status?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(TransportError::Exit { code }),
            None => Err(TransportError::Connection(
                "command terminated by signal".to_string(),
            )),
        }
    }
}
