//! Command execution primitives
//!
//! [`exec`] runs a shell command on the target through the context's
//! transport; [`local_exec`] runs a program on this host. Both stream output
//! line by line while the command is still running and do not return before
//! every line has reached the sink.
//!
//! # Output flow
//!
//! ```text
//!                ┌──────── stdout pipe ──> reader thread ──┐
//! transport ─────┤                                          ├──> exec output sink
//!                └──────── stderr pipe ──> reader thread ──┘
//! ```
//!
//! After the command finishes both pipes are closed explicitly and both
//! reader threads are joined. Lines within one stream keep their order; lines
//! of the two streams may interleave in any order.

use crate::action::Action;
use crate::combinators::{try_action, with_cleanup};
use crate::context::OutputSink;
use crate::error::ActionError;
use crate::files::{delete_file, temp_filename, upload_bytes_to_file};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::transport::{ExecStreams, OutputChannel, Transport, TransportError};
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Arguments passed to `sudo` when privilege escalation is enabled
pub const SUDO_ARGS: &str = "--non-interactive";

/// Interpreter used by [`exec_script`]
pub const SCRIPT_INTERPRETER: &str = "sh";

/// Prefix for lines a local command writes to stderr
const LOCAL_STDERR_PREFIX: &str = "ERROR: ";

/// Run `command` on the target.
///
/// An empty command does nothing. With sudo enabled the command is wrapped in
/// `sudo --non-interactive`, and stderr is folded into stdout so the output
/// reads as one log.
pub fn exec(command: impl Into<String>) -> Action {
    let command = command.into();
    Action::deferred(move |ctx| {
        if command.trim().is_empty() {
            return Action::NoOp;
        }
        let full = remote_command_line(&command, ctx.sudo());
        debug!(command = %full, "running remote command");

        let transport = Arc::clone(ctx.transport());
        let sink = Arc::clone(ctx.exec_output());
        match run_streaming(transport.as_ref(), &command, &full, sink) {
            Ok(()) => Action::NoOp,
            Err(err) => {
                debug!("remote command failed: {}", err);
                Action::Error(err)
            }
        }
    })
}

fn remote_command_line(command: &str, sudo: bool) -> String {
    let mut full = if sudo {
        format!("sudo {} {}", SUDO_ARGS, command)
    } else {
        command.to_string()
    };
    full.push_str(" 2>&1");
    full
}

fn run_streaming(
    transport: &dyn Transport,
    command: &str,
    full: &str,
    sink: Arc<dyn OutputSink>,
) -> Result<(), ActionError> {
    let transport_error = |reason: String| ActionError::Transport {
        command: command.to_string(),
        reason,
    };
    let (out_reader, out_writer) =
        io::pipe().map_err(|e| transport_error(format!("could not create output pipe: {}", e)))?;
    let (err_reader, err_writer) =
        io::pipe().map_err(|e| transport_error(format!("could not create output pipe: {}", e)))?;
    let streams = ExecStreams {
        stdout: OutputChannel::new(out_writer),
        stderr: OutputChannel::new(err_writer),
    };

    let result = thread::scope(|scope| {
        let out_sink = Arc::clone(&sink);
        let out_task = scope.spawn(move || forward_lines(out_reader, out_sink.as_ref(), ""));
        let err_task = scope.spawn(move || forward_lines(err_reader, sink.as_ref(), ""));

        let result = transport
            .start(full, streams.clone())
            .and_then(|running| running.wait());

        streams.stdout.close();
        streams.stderr.close();
        for task in [out_task, err_task] {
            match task.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("error reading command output: {}", e),
                Err(_) => warn!("output reader panicked"),
            }
        }
        result
    });

    match result {
        Ok(()) | Err(TransportError::Exit { code: 0 }) => Ok(()),
        Err(TransportError::Exit { code }) => Err(ActionError::Command {
            command: command.to_string(),
            code,
        }),
        Err(e) => Err(transport_error(e.to_string())),
    }
}

/// Split `reader` into lines and emit each one as soon as it is complete.
///
/// A trailing line without a newline is emitted at end of stream.
fn forward_lines<R: Read>(reader: R, sink: &dyn OutputSink, prefix: &str) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if prefix.is_empty() {
            sink.emit(line);
        } else {
            sink.emit(&format!("{}{}", prefix, line));
        }
    }
}

/// Upload `contents` to a temporary path on the target and run it with `sh`.
///
/// The temporary file is removed whatever the outcome of the script.
pub fn exec_script(contents: impl Into<Vec<u8>>) -> Action {
    let contents = contents.into();
    Action::deferred(move |_| {
        let path = temp_filename();
        with_cleanup(
            try_action(delete_file(&path)),
            Action::list([
                upload_bytes_to_file(contents.clone(), &path),
                exec(format!("{} {}", SCRIPT_INTERPRETER, path)),
            ]),
        )
    })
}

/// Run `program` with `args` on this host.
///
/// Stdout and stderr are streamed to the exec output as they are produced;
/// stderr lines are prefixed with `ERROR: `. A non-zero exit is an error.
pub fn local_exec<I, S>(program: impl Into<String>, args: I) -> Action
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let program = program.into();
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    Action::deferred(move |ctx| {
        let full = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        ctx.say(&format!("Running local command {:?}...", full));

        let sink = Arc::clone(ctx.exec_output());
        match run_local(&program, &args, &full, sink) {
            Ok(()) => Action::NoOp,
            Err(err) => {
                ctx.say(&format!("Error waiting for {:?}: {}", full, err));
                Action::Error(err)
            }
        }
    })
}

fn run_local(
    program: &str,
    args: &[String],
    full: &str,
    sink: Arc<dyn OutputSink>,
) -> Result<(), ActionError> {
    let failure = |reason: String| ActionError::Transport {
        command: full.to_string(),
        reason,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()
        .map_err(|e| failure(format!("could not start: {}", e)))?;
    let pid = child.id();
    ChildRegistry::register_global(pid);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let status = thread::scope(|scope| {
        let out_sink = Arc::clone(&sink);
        let out_task =
            stdout.map(|out| scope.spawn(move || forward_lines(out, out_sink.as_ref(), "")));
        let err_task = stderr.map(|err| {
            scope.spawn(move || forward_lines(err, sink.as_ref(), LOCAL_STDERR_PREFIX))
        });

        let status = child.wait();
        for task in [out_task, err_task].into_iter().flatten() {
            match task.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pid, "error reading local command output: {}", e),
                Err(_) => warn!(pid, "output reader panicked"),
            }
        }
        status
    });
    ChildRegistry::unregister_global(pid);

    let status = status.map_err(|e| failure(format!("could not wait: {}", e)))?;
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ActionError::Command {
            command: full.to_string(),
            code,
        }),
        None => Err(failure("terminated by signal".to_string())),
    }
}
