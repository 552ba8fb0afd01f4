//! Property-based tests for the action engine
//!
//! These tests verify:
//! - Lists stop at the first error and report exactly that error
//! - try_action always succeeds and still runs its action
//! - Checker algebra agrees with boolean logic
//! - Temporary names are recognized and nothing else is

use kubeprov::files::{is_temp_filename, temp_filename};
use kubeprov::testing::{MockTransport, test_context};
use kubeprov::{Action, ActionError, Checker, try_action};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

/// An action that records `index` when applied and then fails or succeeds
fn recording(index: usize, fails: bool, log: Rc<RefCell<Vec<usize>>>) -> Action {
    Action::deferred(move |_| {
        log.borrow_mut().push(index);
        if fails {
            Action::error(format!("step {} failed", index))
        } else {
            Action::NoOp
        }
    })
}

// =============================================================================
// List Short-Circuit Properties
// =============================================================================

proptest! {
    /// Steps run in order up to and including the first failure, never after
    #[test]
    fn list_stops_at_first_error(outcomes in prop::collection::vec(any::<bool>(), 0..12)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (mut ctx, _) = test_context(MockTransport::new());

        let list: Action = outcomes
            .iter()
            .enumerate()
            .map(|(i, &fails)| recording(i, fails, Rc::clone(&log)))
            .collect();
        let res = list.apply(&mut ctx);

        match outcomes.iter().position(|&fails| fails) {
            Some(first) => {
                prop_assert_eq!(log.borrow().clone(), (0..=first).collect::<Vec<_>>());
                prop_assert_eq!(
                    res.as_error().cloned(),
                    Some(ActionError::message(format!("step {} failed", first)))
                );
            }
            None => {
                prop_assert_eq!(log.borrow().len(), outcomes.len());
                prop_assert!(!res.is_error());
            }
        }
    }

    /// Nesting lists does not change which steps run
    #[test]
    fn nested_lists_flatten(outcomes in prop::collection::vec(any::<bool>(), 1..10), split in 0usize..10) {
        let split = split.min(outcomes.len());
        let flat_log = Rc::new(RefCell::new(Vec::new()));
        let nested_log = Rc::new(RefCell::new(Vec::new()));
        let (mut ctx, _) = test_context(MockTransport::new());

        let flat: Action = outcomes
            .iter()
            .enumerate()
            .map(|(i, &f)| recording(i, f, Rc::clone(&flat_log)))
            .collect();
        let (head, tail) = outcomes.split_at(split);
        let nested = Action::list([
            head.iter()
                .enumerate()
                .map(|(i, &f)| recording(i, f, Rc::clone(&nested_log)))
                .collect::<Action>(),
            tail.iter()
                .enumerate()
                .map(|(i, &f)| recording(split + i, f, Rc::clone(&nested_log)))
                .collect::<Action>(),
        ]);

        let flat_res = flat.apply(&mut ctx);
        let nested_res = nested.apply(&mut ctx);
        prop_assert_eq!(flat_log.borrow().clone(), nested_log.borrow().clone());
        prop_assert_eq!(flat_res.as_error().cloned(), nested_res.as_error().cloned());
    }
}

// =============================================================================
// try_action Properties
// =============================================================================

proptest! {
    /// try_action never fails, and the wrapped action is always applied
    #[test]
    fn try_action_always_succeeds(outcomes in prop::collection::vec(any::<bool>(), 0..8)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (mut ctx, _) = test_context(MockTransport::new());

        let wrapped: Action = outcomes
            .iter()
            .enumerate()
            .map(|(i, &fails)| try_action(recording(i, fails, Rc::clone(&log))))
            .collect();

        prop_assert!(!wrapped.apply(&mut ctx).is_error());
        prop_assert_eq!(log.borrow().len(), outcomes.len());
    }
}

// =============================================================================
// Checker Algebra Properties
// =============================================================================

proptest! {
    #[test]
    fn checker_algebra_matches_bool_logic(a in any::<bool>(), b in any::<bool>()) {
        let (mut ctx, _) = test_context(MockTransport::new());

        prop_assert_eq!(Checker::constant(a).negate().check(&mut ctx), Ok(!a));
        prop_assert_eq!(
            Checker::constant(a).and(Checker::constant(b)).check(&mut ctx),
            Ok(a && b)
        );
        prop_assert_eq!(
            Checker::constant(a).or(Checker::constant(b)).check(&mut ctx),
            Ok(a || b)
        );
    }
}

// =============================================================================
// Temporary Name Properties
// =============================================================================

proptest! {
    /// Every generated name is recognized
    #[test]
    fn generated_temp_names_are_recognized(_seed in any::<u8>()) {
        prop_assert!(is_temp_filename(&temp_filename()));
    }

    /// Arbitrary paths outside /tmp are never temporary
    #[test]
    fn paths_outside_tmp_are_not_temp(path in "/(etc|var|home|opt)/[a-z0-9/._-]{0,40}") {
        prop_assert!(!is_temp_filename(&path));
    }

    /// Any hex run of the wrong length is rejected
    #[test]
    fn wrong_length_random_part_is_rejected(random in "[0-9a-f]{0,31}|[0-9a-f]{33,40}") {
        let path = format!("/tmp/kubeprov-{}.tmp", random);
        prop_assert!(!is_temp_filename(&path));
    }
}
