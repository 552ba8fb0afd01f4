//! The action engine
//!
//! An [`Action`] is either a terminal result (`NoOp`, `Error`) or something
//! that still has to run (`List`, `Deferred`). Workflows are built as trees of
//! actions and walked by [`Action::apply`], which executes them strictly in
//! order against a [`Context`] and yields a terminal result.
//!
//! # Sequencing
//!
//! ```text
//! List[a, b, c]  ->  apply(a) ─ok─> apply(b) ─ok─> apply(c) ─ok─> NoOp
//!                        │              │              │
//!                       err            err            err
//!                        └──────────────┴──────────────┴──> that Error
//! ```

use crate::context::Context;
use crate::error::ActionError;
use std::fmt;
use std::rc::Rc;

/// Body of a deferred action
pub type DeferredFn = dyn Fn(&mut Context) -> Action;

/// A composable unit of workflow behavior
#[derive(Clone, Default)]
pub enum Action {
    /// Success, nothing left to do
    #[default]
    NoOp,
    /// Failure with its cause
    Error(ActionError),
    /// Actions applied left to right, stopping at the first error
    List(Vec<Action>),
    /// Built lazily from the context at the point it is reached
    Deferred(Rc<DeferredFn>),
}

impl Action {
    pub fn noop() -> Self {
        Self::NoOp
    }

    /// A free-form error action
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(ActionError::message(msg))
    }

    pub fn list(actions: impl IntoIterator<Item = Action>) -> Self {
        Self::List(actions.into_iter().collect())
    }

    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&mut Context) -> Action + 'static,
    {
        Self::Deferred(Rc::new(f))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The error carried by an `Error` action
    pub fn as_error(&self) -> Option<&ActionError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Walk the tree against `ctx` and return the terminal result.
    ///
    /// The returned action is always `NoOp` or `Error`.
    pub fn apply(&self, ctx: &mut Context) -> Action {
        match self {
            Self::NoOp => Self::NoOp,
            Self::Error(err) => Self::Error(err.clone()),
            Self::List(actions) => {
                for action in actions {
                    let res = action.apply(ctx);
                    if res.is_error() {
                        return res;
                    }
                }
                Self::NoOp
            }
            Self::Deferred(body) => body(ctx).apply(ctx),
        }
    }

    /// Convert a terminal result into a `Result`.
    ///
    /// Non-terminal actions count as success; call [`Action::apply`] first.
    pub fn into_result(self) -> Result<(), ActionError> {
        match self {
            Self::Error(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Apply and convert to a `Result` in one step
    pub fn run(&self, ctx: &mut Context) -> Result<(), ActionError> {
        self.apply(ctx).into_result()
    }
}

impl From<ActionError> for Action {
    fn from(err: ActionError) -> Self {
        Self::Error(err)
    }
}

impl From<Vec<Action>> for Action {
    fn from(actions: Vec<Action>) -> Self {
        Self::List(actions)
    }
}

impl FromIterator<Action> for Action {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self::list(iter)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => f.write_str("NoOp"),
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::List(actions) => f.debug_list().entries(actions).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => f.write_str("ok"),
            Self::Error(err) => write!(f, "{}", err),
            Self::List(actions) => write!(f, "list of {} actions", actions.len()),
            Self::Deferred(_) => f.write_str("deferred action"),
        }
    }
}
