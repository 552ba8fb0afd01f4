//! Remote files, temporary paths and leftovers
//!
//! Temporary remote files follow one naming scheme,
//! `/tmp/kubeprov-<32 hex digits>.tmp`, so any path can be classified as
//! "one of ours" with [`is_temp_filename`]. Paths that must outlive a single
//! step are registered as leftovers and deleted by [`cleanup_leftovers`] at
//! the end of the workflow.

use crate::action::Action;
use crate::combinators::{try_action, with_cleanup, with_exec_output};
use crate::context::CaptureSink;
use crate::error::ActionError;
use crate::exec::exec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const TEMP_DIR: &str = "/tmp";
pub const TEMP_PREFIX: &str = "kubeprov-";
pub const TEMP_SUFFIX: &str = ".tmp";

const TEMP_RANDOM_LEN: usize = 32;

/// A fresh temporary path for the target machine
pub fn temp_filename() -> String {
    format!(
        "{}/{}{}{}",
        TEMP_DIR,
        TEMP_PREFIX,
        Uuid::new_v4().simple(),
        TEMP_SUFFIX
    )
}

/// True iff `path` was produced by [`temp_filename`]
pub fn is_temp_filename(path: &str) -> bool {
    let Some(name) = path
        .strip_prefix(TEMP_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return false;
    };
    let Some(random) = name
        .strip_prefix(TEMP_PREFIX)
        .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
    else {
        return false;
    };
    random.len() == TEMP_RANDOM_LEN && random.chars().all(|c| c.is_ascii_hexdigit())
}

/// Single-quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Remove a remote file; a missing file is not an error
pub fn delete_file(path: impl Into<String>) -> Action {
    exec(format!("rm -f {}", shell_quote(&path.into())))
}

/// Move a remote file, replacing the destination
pub fn move_file(src: impl Into<String>, dst: impl Into<String>) -> Action {
    exec(format!(
        "mv -f {} {}",
        shell_quote(&src.into()),
        shell_quote(&dst.into())
    ))
}

/// Remove a local file; a missing file is not an error
pub fn delete_local_file(path: impl Into<PathBuf>) -> Action {
    let path = path.into();
    Action::deferred(move |_| match fs::remove_file(&path) {
        Ok(()) => Action::NoOp,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Action::NoOp,
        Err(e) => Action::error(format!("could not remove {}: {}", path.display(), e)),
    })
}

fn raw_upload(contents: Vec<u8>, dst: String) -> Action {
    Action::deferred(move |ctx| {
        debug!(path = %dst, bytes = contents.len(), "uploading");
        match ctx.transport().upload(&dst, &contents) {
            Ok(()) => Action::NoOp,
            Err(e) => Action::Error(ActionError::Transport {
                command: format!("upload to {}", dst),
                reason: e.to_string(),
            }),
        }
    })
}

/// Write `contents` to `dst` on the target.
///
/// With sudo enabled, anything but one of our temporary paths is written to a
/// temporary file first and moved into place with privileges.
pub fn upload_bytes_to_file(contents: impl Into<Vec<u8>>, dst: impl Into<String>) -> Action {
    let contents = contents.into();
    let dst = dst.into();
    Action::deferred(move |ctx| {
        if ctx.sudo() && !is_temp_filename(&dst) {
            let tmp = temp_filename();
            debug!(path = %dst, staging = %tmp, "staging upload for privileged move");
            return with_cleanup(
                try_action(delete_file(&tmp)),
                Action::list([
                    raw_upload(contents.clone(), tmp.clone()),
                    move_file(&tmp, &dst),
                ]),
            );
        }
        raw_upload(contents.clone(), dst.clone())
    })
}

/// Copy the local file `src` to `dst` on the target
pub fn upload_file_to_file(src: impl AsRef<Path>, dst: impl Into<String>) -> Action {
    let src = src.as_ref().to_path_buf();
    let dst = dst.into();
    Action::deferred(move |_| match fs::read(&src) {
        Ok(contents) => upload_bytes_to_file(contents, dst.clone()),
        Err(e) => Action::Error(ActionError::precondition(format!(
            "could not read {}: {}",
            src.display(),
            e
        ))),
    })
}

/// Copy the remote text file `src` to the local path `dst`.
///
/// The file travels as output lines, so only UTF-8 text survives unchanged:
/// CRLF endings become LF, a missing final newline is added and invalid UTF-8
/// is replaced. Kubeconfigs and manifests fit that shape.
pub fn download_file(src: impl Into<String>, dst: impl Into<PathBuf>) -> Action {
    let src = src.into();
    let dst = dst.into();
    Action::deferred(move |ctx| {
        let capture = CaptureSink::new();
        let res = with_exec_output(
            Arc::new(capture.clone()),
            exec(format!("cat {}", shell_quote(&src))),
        )
        .apply(ctx);
        if res.is_error() {
            return res;
        }

        let mut contents = capture.contents();
        if !contents.is_empty() {
            contents.push('\n');
        }
        match fs::write(&dst, contents) {
            Ok(()) => {
                debug!(remote = %src, local = %dst.display(), "downloaded file");
                Action::NoOp
            }
            Err(e) => Action::error(format!("could not write {}: {}", dst.display(), e)),
        }
    })
}

/// Register `path` for deletion by [`cleanup_leftovers`]
pub fn add_leftover(path: impl Into<String>) -> Action {
    let path = path.into();
    Action::deferred(move |ctx| {
        ctx.add_leftover(path.clone());
        Action::NoOp
    })
}

/// Delete every registered leftover, best effort.
///
/// Failures are ignored and never stop the remaining deletions.
pub fn cleanup_leftovers() -> Action {
    Action::deferred(|ctx| {
        let leftovers = ctx.take_leftovers();
        if leftovers.is_empty() {
            debug!("no leftovers to remove");
            return Action::NoOp;
        }
        debug!(count = leftovers.len(), "removing leftovers");
        leftovers
            .into_iter()
            .map(|path| try_action(delete_file(path)))
            .collect()
    })
}
