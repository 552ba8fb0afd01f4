//! Checkers backed by commands on the target
//!
//! Probe commands run with their output captured into a private buffer, so a
//! check never prints to the live output.

use crate::checker::Checker;
use crate::combinators::with_exec_output;
use crate::context::{CaptureSink, Context};
use crate::error::ActionError;
use crate::exec::exec;
use crate::files::shell_quote;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Printed by the probe when the condition holds
pub const CHECK_SUCCEEDED: &str = "CONDITION_SUCCEEDED";
/// Printed by the probe when the condition does not hold
pub const CHECK_FAILED: &str = "CONDITION_FAILED";

/// Run `command` on the target and return everything it printed
fn capture_output(ctx: &mut Context, command: &str) -> Result<String, ActionError> {
    let capture = CaptureSink::new();
    with_exec_output(Arc::new(capture.clone()), exec(command))
        .run(ctx)
        .map(|()| capture.contents())
}

/// True iff `cmd` succeeds on the target.
///
/// Runs `<cmd> && echo CONDITION_SUCCEEDED || echo CONDITION_FAILED` and
/// requires the success marker without the failure marker, since the command's
/// own output may contain either.
pub fn check_exec(cmd: impl Into<String>) -> Checker {
    let cmd = cmd.into();
    let probe = format!(
        "{} && echo '{}' || echo '{}'",
        cmd, CHECK_SUCCEEDED, CHECK_FAILED
    );
    Checker::new(cmd.clone(), move |ctx| {
        debug!(check = %cmd, "checking condition");
        let output = capture_output(ctx, &probe).map_err(|err| {
            debug!(check = %cmd, "error when performing check: {}", err);
            ActionError::check(cmd.clone(), err.to_string())
        })?;

        let res = output.contains(CHECK_SUCCEEDED) && !output.contains(CHECK_FAILED);
        debug!(check = %cmd, result = res, "check finished");
        Ok(res)
    })
}

/// True iff `name` resolves to an executable on the target's `PATH`
pub fn check_binary_exists(name: impl Into<String>) -> Checker {
    let name = name.into();
    // `command` is a builtin, so it needs a shell under sudo. `|| true` stays
    // inside that shell: unknown names print nothing, a sudo failure still exits
    // non-zero
    let lookup = format!("command -v {} || true", shell_quote(&name));
    let probe = format!("sh -c {}", shell_quote(&lookup));
    Checker::new(probe.clone(), move |ctx| {
        debug!(binary = %name, "checking binary exists");
        let output = capture_output(ctx, &probe)
            .map_err(|err| ActionError::check(probe.clone(), err.to_string()))?;

        let found = output.trim();
        if found.is_empty() {
            debug!(binary = %name, "not found: empty output");
            return Ok(false);
        }
        // shell builtins and functions print just the name
        if found == name {
            debug!(binary = %name, "found");
            return Ok(true);
        }
        if Path::new(found).is_absolute() {
            debug!(binary = %name, path = found, "verifying resolved path");
            return check_file_exists(found).check(ctx);
        }
        debug!(binary = %name, output = found, "not found");
        Ok(false)
    })
}

/// True iff `path` is a regular file on the target
pub fn check_file_exists(path: impl Into<String>) -> Checker {
    check_exec(format!("test -f {}", shell_quote(&path.into())))
}

/// [`check_file_exists`] memoized for the rest of the workflow.
///
/// Only for files that are never deleted once they appear.
pub fn check_file_exists_once(path: impl Into<String>) -> Checker {
    check_file_exists(path).once()
}

/// True iff `path` exists on this host
pub fn check_local_file_exists(path: impl Into<PathBuf>) -> Checker {
    let path = path.into();
    Checker::new(format!("local file {}", path.display()), move |_| {
        Ok(path.exists())
    })
}
