//! Every cell of the trigger decision matrix, spelled out.

use pretty_assertions::assert_eq;
use waypoint_rollback::{
    evaluate, lookup, RollbackAction, RollbackScope, RollbackTrigger, TRIGGER_MATRIX,
};

use waypoint_rollback::RollbackAction::{
    EmergencyStopAndRollback as Stop, RescheduleWithBackoff as Reschedule,
    RollbackCurrentPhase as RollbackPhase, SkipAndContinue as Skip,
};

/// (condition, scope, expected action, fail-safe applied)
const EXPECTED: &[(&str, &str, RollbackAction, bool)] = &[
    ("validation-failure", "phase", RollbackPhase, false),
    ("validation-failure", "plan-unit", RollbackPhase, false),
    ("validation-failure", "artifact", Skip, false),
    ("validation-failure", "entire-execution", Stop, true),
    ("resource-exhaustion", "phase", Reschedule, false),
    ("resource-exhaustion", "plan-unit", Reschedule, false),
    ("resource-exhaustion", "artifact", Reschedule, false),
    ("resource-exhaustion", "entire-execution", Stop, true),
    ("security-violation", "phase", Stop, false),
    ("security-violation", "plan-unit", Stop, false),
    ("security-violation", "artifact", Stop, false),
    ("security-violation", "entire-execution", Stop, false),
    ("timeout", "phase", Stop, true),
    ("timeout", "plan-unit", Stop, true),
    ("timeout", "artifact", Stop, true),
    ("timeout", "entire-execution", Stop, true),
    ("manual", "phase", Stop, true),
    ("manual", "plan-unit", Stop, true),
    ("manual", "artifact", Stop, true),
    ("manual", "entire-execution", Stop, true),
];

#[test]
fn every_cell() {
    for (condition, scope, action, fail_safe) in EXPECTED {
        let eval = evaluate(condition, scope);
        assert_eq!(
            (eval.action, eval.fail_safe, eval.error),
            (*action, *fail_safe, None),
            "{condition} / {scope}"
        );
    }
}

#[test]
fn expected_table_covers_the_full_product() {
    assert_eq!(
        EXPECTED.len(),
        RollbackTrigger::ALL.len() * RollbackScope::ALL.len()
    );
    assert_eq!(EXPECTED.iter().filter(|(.., fail_safe)| !fail_safe).count(), TRIGGER_MATRIX.len());
}

#[test]
fn lookup_agrees_with_matrix() {
    for trigger in RollbackTrigger::ALL {
        for scope in RollbackScope::ALL {
            let listed = TRIGGER_MATRIX
                .iter()
                .find(|(t, s, _)| t == trigger && s == scope)
                .map(|(_, _, a)| *a);
            assert_eq!(lookup(*trigger, *scope), listed);
        }
    }
}

#[test]
fn malformed_input_never_weakens() {
    for (condition, scope) in [
        ("bogus-condition", "phase"),
        ("validation-failure", "bogus-scope"),
        ("", ""),
        ("VALIDATION-FAILURE", "phase"),
        ("validation_failure", "plan_unit"),
    ] {
        let eval = evaluate(condition, scope);
        assert_eq!(eval.action, RollbackAction::FAIL_SAFE, "{condition} / {scope}");
        assert!(eval.fail_safe);
        assert!(eval.error.is_some());
    }
}

mod properties {
    use proptest::prelude::*;
    use waypoint_rollback::{evaluate, RollbackAction, RollbackScope, RollbackTrigger};

    proptest! {
        #[test]
        fn unparseable_input_always_fails_safe(condition in "\\PC{0,24}", scope in "\\PC{0,24}") {
            let valid = condition.parse::<RollbackTrigger>().is_ok()
                && scope.parse::<RollbackScope>().is_ok();
            let eval = evaluate(&condition, &scope);
            if !valid {
                prop_assert_eq!(eval.action, RollbackAction::FAIL_SAFE);
                prop_assert!(eval.fail_safe);
                prop_assert!(eval.error.is_some());
            }
        }

        #[test]
        fn fail_safe_never_weaker_than_any_cell(
            t in prop::sample::select(RollbackTrigger::ALL),
            s in prop::sample::select(RollbackScope::ALL),
        ) {
            let eval = evaluate(t.as_str(), s.as_str());
            prop_assert!(eval.action.severity() <= RollbackAction::FAIL_SAFE.severity());
            prop_assert_eq!(eval.fail_safe, waypoint_rollback::lookup(t, s).is_none());
        }
    }
}
