//! Kubernetes manifests and how they reach the target
//!
//! A manifest comes from a local file, a URL, or inline text. URLs are handed
//! to the apply command untouched; the other two are uploaded to a temporary
//! remote file first, which is removed once the apply command has run.

use crate::action::Action;
use crate::combinators::{try_action, with_cleanup};
use crate::files::{delete_file, temp_filename, upload_bytes_to_file, upload_file_to_file};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Source of one manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manifest {
    /// A file on this host
    Path(PathBuf),
    /// A URL the target can fetch itself
    Url(String),
    /// The manifest text
    Inline(String),
}

impl Manifest {
    /// Classify `s`: a URL, then an existing local file, otherwise inline text
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if is_url(trimmed) {
            Self::Url(trimmed.to_string())
        } else if Path::new(trimmed).is_file() {
            Self::Path(PathBuf::from(trimmed))
        } else {
            Self::Inline(s.to_string())
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
            Self::Inline(text) => write!(f, "inline manifest ({} bytes)", text.len()),
        }
    }
}

fn is_url(s: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        s.len() > scheme.len()
            && s[..scheme.len()].eq_ignore_ascii_case(scheme)
            && !s.contains(char::is_whitespace)
    })
}

/// Builds the action that applies a manifest found at a remote path or URL
pub type ApplyFn = Rc<dyn Fn(&str) -> Action>;

/// Deliver `manifest` to the target and run `apply` against where it landed
pub fn deliver_manifest(manifest: Manifest, apply: ApplyFn) -> Action {
    match manifest {
        Manifest::Url(url) => apply(url.as_str()),
        Manifest::Path(path) => Action::deferred(move |_| {
            let remote = temp_filename();
            with_cleanup(
                try_action(delete_file(&remote)),
                Action::list([upload_file_to_file(&path, &remote), apply(remote.as_str())]),
            )
        }),
        Manifest::Inline(text) => Action::deferred(move |_| {
            let remote = temp_filename();
            with_cleanup(
                try_action(delete_file(&remote)),
                Action::list([
                    upload_bytes_to_file(text.clone().into_bytes(), &remote),
                    apply(remote.as_str()),
                ]),
            )
        }),
    }
}

/// Deliver and apply several manifests in order, stopping at the first failure
pub fn deliver_manifests(manifests: impl IntoIterator<Item = Manifest>, apply: ApplyFn) -> Action {
    manifests
        .into_iter()
        .map(|manifest| deliver_manifest(manifest, Rc::clone(&apply)))
        .collect()
}
