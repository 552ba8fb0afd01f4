//! Boolean predicates over the context
//!
//! A [`Checker`] answers a yes/no question about the target (does a file
//! exist, is a binary installed). Answering `false` and failing to answer are
//! different outcomes: the latter is an `Err` and must not be mistaken for
//! `false` by the caller.

use crate::context::Context;
use crate::error::ActionError;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

type Predicate = dyn Fn(&mut Context) -> Result<bool, ActionError>;

/// A named predicate evaluated against a [`Context`]
#[derive(Clone)]
pub struct Checker {
    name: String,
    predicate: Rc<Predicate>,
}

impl Checker {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&mut Context) -> Result<bool, ActionError> + 'static,
    {
        Self {
            name: name.into(),
            predicate: Rc::new(predicate),
        }
    }

    /// A checker that always answers `value`
    pub fn constant(value: bool) -> Self {
        Self::new(value.to_string(), move |_| Ok(value))
    }

    /// Identity of the check; also the memoization key for [`Checker::once`]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, ctx: &mut Context) -> Result<bool, ActionError> {
        (self.predicate)(ctx)
    }

    /// Memoize the answer in the context for the rest of the workflow.
    ///
    /// Only for facts backed by state that never regresses during a run:
    /// once cached, the answer is returned without querying the target again.
    /// Errors are not cached.
    pub fn once(self) -> Self {
        let key = self.name.clone();
        let name = format!("once({})", self.name);
        Self::new(name, move |ctx| {
            if key.trim().is_empty() {
                return Err(ActionError::precondition(
                    "memoized check requires a non-empty key",
                ));
            }
            if let Some(cached) = ctx.cached_check(&key) {
                debug!(check = %key, result = cached, "using cached check result");
                return Ok(cached);
            }
            let res = self.check(ctx)?;
            ctx.cache_check(&key, res);
            Ok(res)
        })
    }

    pub fn negate(self) -> Self {
        let name = format!("not({})", self.name);
        Self::new(name, move |ctx| self.check(ctx).map(|res| !res))
    }

    /// Both must hold; `other` is not evaluated when `self` is false
    pub fn and(self, other: Checker) -> Self {
        let name = format!("({} && {})", self.name, other.name);
        Self::new(name, move |ctx| Ok(self.check(ctx)? && other.check(ctx)?))
    }

    /// Either must hold; `other` is not evaluated when `self` is true
    pub fn or(self, other: Checker) -> Self {
        let name = format!("({} || {})", self.name, other.name);
        Self::new(name, move |ctx| Ok(self.check(ctx)? || other.check(ctx)?))
    }
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker").field("name", &self.name).finish()
    }
}
