//! Control combinators
//!
//! These wrap other actions to change how failure flows through a workflow.
//! Suppressing a failure is always an explicit choice made here; the engine
//! itself never logs-and-continues.
//!
//! | Combinator      | Result                                                     |
//! |-----------------|------------------------------------------------------------|
//! | `if_else`       | branch chosen by a checker; a checker error is the result |
//! | `try_action`    | always `NoOp`                                              |
//! | `retry`         | first success, or the error of the last attempt           |
//! | `with_cleanup`  | main result, unless only the cleanup failed               |

use crate::action::Action;
use crate::checker::Checker;
use crate::context::OutputSink;
use crate::error::ActionError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay between attempts when none is given
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How many times, and how far apart, `retry` attempts an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// `attempts` tries with the default interval
    pub fn times(attempts: u32) -> Self {
        Self::new(attempts, DEFAULT_RETRY_INTERVAL)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::times(3)
    }
}

/// Apply `then` when `checker` answers true, `otherwise` when it answers false.
///
/// If the checker cannot be evaluated, its error is the result and neither
/// branch runs.
pub fn if_else(checker: Checker, then: Action, otherwise: Action) -> Action {
    Action::deferred(move |ctx| match checker.check(ctx) {
        Ok(true) => {
            debug!(check = checker.name(), "condition held");
            then.apply(ctx)
        }
        Ok(false) => {
            debug!(check = checker.name(), "condition did not hold");
            otherwise.apply(ctx)
        }
        Err(err) => {
            debug!(check = checker.name(), "condition could not be evaluated: {}", err);
            Action::Error(err)
        }
    })
}

/// `if_else` without an else branch
pub fn if_then(checker: Checker, then: Action) -> Action {
    if_else(checker, then, Action::NoOp)
}

/// Apply `action` and report success whatever happened.
///
/// Side effects of `action` still take place.
pub fn try_action(action: Action) -> Action {
    Action::deferred(move |ctx| {
        if let Action::Error(err) = action.apply(ctx) {
            warn!("ignoring failure: {}", err);
        }
        Action::NoOp
    })
}

/// Apply `action` until it succeeds, at most `policy.attempts` times.
///
/// Attempts never overlap and are separated by `policy.interval`. Only the
/// error of the last attempt is reported. A fatal error ends retrying at once.
pub fn retry(policy: RetryPolicy, action: Action) -> Action {
    Action::deferred(move |ctx| {
        if policy.attempts == 0 {
            return Action::Error(ActionError::precondition(
                "retry policy needs at least one attempt",
            ));
        }

        let mut attempt = 1;
        loop {
            let res = action.apply(ctx);
            let Action::Error(err) = &res else {
                return res;
            };
            if err.is_fatal() || attempt >= policy.attempts {
                return res;
            }
            warn!(
                attempt,
                attempts = policy.attempts,
                "attempt failed, retrying in {:?}: {}",
                policy.interval,
                err
            );
            thread::sleep(policy.interval);
            attempt += 1;
        }
    })
}

/// Apply `main`, then always apply `cleanup`.
///
/// The result is the result of `main`, except when `main` succeeded and
/// `cleanup` failed: then the cleanup failure is reported. A panic while
/// applying `main` still runs `cleanup` and becomes a fatal error.
pub fn with_cleanup(cleanup: Action, main: Action) -> Action {
    Action::deferred(move |ctx| {
        let main_res = match panic::catch_unwind(AssertUnwindSafe(|| main.apply(ctx))) {
            Ok(res) => res,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("action panicked: {}", msg);
                Action::Error(ActionError::fatal(format!("action panicked: {}", msg)))
            }
        };

        let cleanup_res = cleanup.apply(ctx);
        match (main_res.is_error(), cleanup_res.is_error()) {
            (false, true) => cleanup_res,
            (true, true) => {
                warn!("cleanup also failed: {}", cleanup_res);
                main_res
            }
            _ => main_res,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Apply `action` with command output routed to `sink` instead of the
/// context's exec output, restoring the previous sink afterwards even if
/// `action` panics
pub fn with_exec_output(sink: Arc<dyn OutputSink>, action: Action) -> Action {
    Action::deferred(move |ctx| {
        let previous = ctx.replace_exec_output(Arc::clone(&sink));
        let res = panic::catch_unwind(AssertUnwindSafe(|| action.apply(ctx)));
        ctx.replace_exec_output(previous);
        res.unwrap_or_else(|payload| panic::resume_unwind(payload))
    })
}

/// Tell the user something is happening
pub fn message_info(text: impl Into<String>) -> Action {
    let text = text.into();
    Action::deferred(move |ctx| {
        info!("{}", text);
        ctx.say(&text);
        Action::NoOp
    })
}

/// Warn the user about something that is skipped or suspicious
pub fn message_warn(text: impl Into<String>) -> Action {
    let text = text.into();
    Action::deferred(move |ctx| {
        warn!("{}", text);
        ctx.say(&format!("WARNING: {}", text));
        Action::NoOp
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CaptureSink;
    use crate::testing::{MockTransport, test_context};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Instant;

    fn counted(calls: &Rc<Cell<u32>>, result: Action) -> Action {
        let calls = Rc::clone(calls);
        Action::deferred(move |_| {
            calls.set(calls.get() + 1);
            result.clone()
        })
    }

    fn fails_with(msg: &'static str) -> Action {
        Action::error(msg)
    }

    #[test]
    fn test_if_else_selects_branch() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let then_calls = Rc::new(Cell::new(0));
        let else_calls = Rc::new(Cell::new(0));

        if_else(
            Checker::constant(true),
            counted(&then_calls, Action::NoOp),
            counted(&else_calls, Action::NoOp),
        )
        .run(&mut ctx)
        .expect("then branch");
        if_else(
            Checker::constant(false),
            counted(&then_calls, Action::NoOp),
            counted(&else_calls, Action::NoOp),
        )
        .run(&mut ctx)
        .expect("else branch");

        assert_eq!(then_calls.get(), 1);
        assert_eq!(else_calls.get(), 1);
    }

    #[test]
    fn test_if_else_propagates_checker_error() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let broken = Checker::new("broken", |_| Err(ActionError::check("broken", "no route")));

        let res = if_else(
            broken,
            counted(&calls, Action::NoOp),
            counted(&calls, Action::NoOp),
        )
        .apply(&mut ctx);

        assert!(matches!(res.as_error(), Some(ActionError::Check { .. })));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_try_swallows_error_but_keeps_side_effects() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let res = try_action(counted(&calls, fails_with("rm failed"))).apply(&mut ctx);
        assert!(!res.is_error());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_stops_after_first_success() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let flaky = Action::deferred(move |_| {
            counter.set(counter.get() + 1);
            if counter.get() < 2 {
                Action::error("not yet")
            } else {
                Action::NoOp
            }
        });

        let res = retry(RetryPolicy::new(3, Duration::from_millis(1)), flaky).apply(&mut ctx);
        assert!(!res.is_error());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_retry_reports_last_error_after_all_attempts() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let always_failing = Action::deferred(move |_| {
            counter.set(counter.get() + 1);
            Action::error(format!("attempt {}", counter.get()))
        });

        let interval = Duration::from_millis(20);
        let started = Instant::now();
        let res = retry(RetryPolicy::new(3, interval), always_failing).apply(&mut ctx);

        assert_eq!(calls.get(), 3);
        assert!(started.elapsed() >= interval * 2);
        assert_eq!(res.to_string(), "attempt 3");
    }

    #[test]
    fn test_retry_does_not_repeat_fatal_errors() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let fatal = counted(&calls, Action::Error(ActionError::fatal("invariant")));
        let res = retry(RetryPolicy::new(5, Duration::from_millis(1)), fatal).apply(&mut ctx);
        assert!(res.as_error().is_some_and(ActionError::is_fatal));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_with_zero_attempts_is_a_precondition_error() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let res = retry(RetryPolicy::times(0), counted(&calls, Action::NoOp)).apply(&mut ctx);
        assert!(matches!(res.as_error(), Some(ActionError::Precondition(_))));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_cleanup_runs_after_main() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let order = Rc::new(RefCell::new(Vec::new()));
        let main_log = Rc::clone(&order);
        let cleanup_log = Rc::clone(&order);

        let res = with_cleanup(
            Action::deferred(move |_| {
                cleanup_log.borrow_mut().push("cleanup");
                Action::NoOp
            }),
            Action::deferred(move |_| {
                main_log.borrow_mut().push("main");
                Action::NoOp
            }),
        )
        .apply(&mut ctx);

        assert!(!res.is_error());
        assert_eq!(*order.borrow(), vec!["main", "cleanup"]);
    }

    #[test]
    fn test_cleanup_runs_when_main_fails() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let res = with_cleanup(counted(&calls, Action::NoOp), fails_with("main failed"))
            .apply(&mut ctx);
        assert_eq!(res.to_string(), "main failed");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cleanup_failure_visible_when_main_succeeds() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let res = with_cleanup(fails_with("cleanup failed"), Action::NoOp).apply(&mut ctx);
        assert_eq!(res.to_string(), "cleanup failed");
    }

    #[test]
    fn test_main_failure_wins_when_both_fail() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let res = with_cleanup(fails_with("cleanup failed"), fails_with("main failed"))
            .apply(&mut ctx);
        assert_eq!(res.to_string(), "main failed");
    }

    #[test]
    fn test_cleanup_runs_when_main_panics() {
        let (mut ctx, _) = test_context(MockTransport::new());
        let calls = Rc::new(Cell::new(0));
        let res = with_cleanup(
            counted(&calls, Action::NoOp),
            Action::deferred(|_| panic!("manifest table corrupted")),
        )
        .apply(&mut ctx);

        assert_eq!(calls.get(), 1);
        let err = res.as_error().expect("fatal error");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("manifest table corrupted"));
    }

    #[test]
    fn test_with_exec_output_restores_previous_sink() {
        let (mut ctx, live) = test_context(MockTransport::new());
        let captured = CaptureSink::new();

        with_exec_output(
            Arc::new(captured.clone()),
            Action::deferred(|ctx| {
                ctx.exec_output().emit("captured line");
                Action::NoOp
            }),
        )
        .run(&mut ctx)
        .expect("capture");
        ctx.exec_output().emit("live line");

        assert_eq!(captured.lines(), vec!["captured line".to_string()]);
        assert_eq!(live.lines(), vec!["live line".to_string()]);
    }

    #[test]
    fn test_cleanup_after_panic_writes_to_restored_sink() {
        let (mut ctx, live) = test_context(MockTransport::new());
        let captured = CaptureSink::new();

        let err = with_cleanup(
            Action::deferred(|ctx| {
                ctx.exec_output().emit("cleanup line");
                Action::NoOp
            }),
            with_exec_output(
                Arc::new(captured.clone()),
                Action::deferred(|_| panic!("lost the node")),
            ),
        )
        .run(&mut ctx)
        .unwrap_err();

        assert!(err.is_fatal());
        assert!(captured.is_empty());
        assert_eq!(live.lines(), vec!["cleanup line".to_string()]);
    }

    #[test]
    fn test_messages_reach_user_output() {
        let user = CaptureSink::new();
        let (ctx, _) = test_context(MockTransport::new());
        let mut ctx = ctx.with_user_output(Arc::new(user.clone()));

        Action::list([message_info("Loading CNI plugin"), message_warn("no dashboard")])
            .run(&mut ctx)
            .expect("messages");
        assert_eq!(
            user.lines(),
            vec![
                "Loading CNI plugin".to_string(),
                "WARNING: no dashboard".to_string()
            ]
        );
    }
}
