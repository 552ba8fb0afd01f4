//! Error handling module for kubeprov
//!
//! Two layers of errors live here:
//!
//! - [`ActionError`]: the failure carried by an `Action::Error`. Every failed
//!   step of a workflow resolves to one of these, and the message always names
//!   the offending command or check.
//! - [`ProvisionError`]: failures of the commands built on top of the engine,
//!   local I/O or a workflow that ended in an `ActionError`.

use thiserror::Error;

/// Failure value of a workflow step.
///
/// Cloneable because terminal results are returned by value from `apply`
/// while the action tree that produced them stays intact for retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A command ran and exited with a non-zero status
    #[error("Command {command:?} exited with non-zero exit status: {code}")]
    Command { command: String, code: i32 },

    /// The transport could not start the command or lost it mid-run
    #[error("Error executing command {command:?}: {reason}")]
    Transport { command: String, reason: String },

    /// Something required before execution was missing or malformed
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A checker could not be evaluated (distinct from answering `false`)
    #[error("Check {check:?} could not be evaluated: {reason}")]
    Check { check: String, reason: String },

    /// An internal invariant was violated; never retried
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Free-form failure raised by workflow code
    #[error("{0}")]
    Message(String),
}

impl ActionError {
    /// Create a free-form error
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a checker evaluation error
    pub fn check(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Check {
            check: check.into(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Exit code of the failed command, when the failure came from one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Command { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Crate-level error type
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors (local files, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A workflow resolved to an error
    #[error("Workflow failed: {0}")]
    Action(#[from] ActionError),
}

/// Result type alias for kubeprov operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
