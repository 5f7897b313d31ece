//! Trigger decision matrix
//!
//! Maps a classified failure and the scope it affected to the action the
//! engine should take. The matrix is data, not branching: every cell can be
//! listed and tested, and anything missing from it resolves to
//! [`RollbackAction::FAIL_SAFE`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Invalid trigger input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("unknown trigger condition: {0}")]
    UnknownTrigger(String),

    #[error("invalid rollback scope: {0}")]
    UnknownScope(String),

    #[error("unknown rollback action: {0}")]
    UnknownAction(String),
}

macro_rules! wire_names {
    ($ty:ident, $err:ident, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Kebab-case wire name
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = TriggerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| TriggerError::$err(s.to_string()))
            }
        }
    };
}

/// Classified failure condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackTrigger {
    ValidationFailure,
    ResourceExhaustion,
    SecurityViolation,
    Timeout,
    Manual,
}

wire_names!(RollbackTrigger, UnknownTrigger, {
    ValidationFailure => "validation-failure",
    ResourceExhaustion => "resource-exhaustion",
    SecurityViolation => "security-violation",
    Timeout => "timeout",
    Manual => "manual",
});

/// Granularity of a rollback, broadest last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackScope {
    Phase,
    PlanUnit,
    Artifact,
    EntireExecution,
}

wire_names!(RollbackScope, UnknownScope, {
    Phase => "phase",
    PlanUnit => "plan-unit",
    Artifact => "artifact",
    EntireExecution => "entire-execution",
});

/// Response to a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackAction {
    RollbackCurrentPhase,
    RescheduleWithBackoff,
    EmergencyStopAndRollback,
    SkipAndContinue,
}

wire_names!(RollbackAction, UnknownAction, {
    RollbackCurrentPhase => "rollback-current-phase",
    RescheduleWithBackoff => "reschedule-with-backoff",
    EmergencyStopAndRollback => "emergency-stop-and-rollback",
    SkipAndContinue => "skip-and-continue",
});

impl RollbackAction {
    /// Action applied to anything the matrix does not cover
    pub const FAIL_SAFE: Self = Self::EmergencyStopAndRollback;

    /// How drastic the action is; [`RollbackAction::FAIL_SAFE`] is the maximum
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::SkipAndContinue => 0,
            Self::RescheduleWithBackoff => 1,
            Self::RollbackCurrentPhase => 2,
            Self::EmergencyStopAndRollback => 3,
        }
    }

    /// Whether the engine must restore state for this action
    #[must_use]
    pub const fn requires_rollback(self) -> bool {
        matches!(self, Self::RollbackCurrentPhase | Self::EmergencyStopAndRollback)
    }
}

/// Every defined `(trigger, scope) -> action` cell
///
/// `Timeout` and `Manual` are valid triggers with no cells of their own.
pub const TRIGGER_MATRIX: &[(RollbackTrigger, RollbackScope, RollbackAction)] = {
    use RollbackAction::*;
    use RollbackScope::*;
    use RollbackTrigger::*;
    &[
        (ValidationFailure, Phase, RollbackCurrentPhase),
        (ValidationFailure, PlanUnit, RollbackCurrentPhase),
        (ValidationFailure, Artifact, SkipAndContinue),
        (ResourceExhaustion, Phase, RescheduleWithBackoff),
        (ResourceExhaustion, PlanUnit, RescheduleWithBackoff),
        (ResourceExhaustion, Artifact, RescheduleWithBackoff),
        (SecurityViolation, Phase, EmergencyStopAndRollback),
        (SecurityViolation, PlanUnit, EmergencyStopAndRollback),
        (SecurityViolation, Artifact, EmergencyStopAndRollback),
        (SecurityViolation, EntireExecution, EmergencyStopAndRollback),
    ]
};

/// Matrix cell for a typed pair, `None` when undefined
#[must_use]
pub fn lookup(trigger: RollbackTrigger, scope: RollbackScope) -> Option<RollbackAction> {
    TRIGGER_MATRIX
        .iter()
        .find(|(t, s, _)| *t == trigger && *s == scope)
        .map(|(_, _, action)| *action)
}

/// Outcome of evaluating a raw trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Parsed condition, if it was recognised
    pub trigger: Option<RollbackTrigger>,
    /// Parsed scope, if it was recognised
    pub scope: Option<RollbackScope>,
    pub action: RollbackAction,
    /// The action is the default for an undefined cell or bad input
    pub fail_safe: bool,
    /// First validation error in the input
    pub error: Option<TriggerError>,
}

/// Classify a raw `(condition, scope)` pair
///
/// Never fails: malformed input is reported in [`Evaluation::error`] and
/// answered with [`RollbackAction::FAIL_SAFE`].
#[must_use]
pub fn evaluate(condition: &str, scope: &str) -> Evaluation {
    let trigger = condition.parse::<RollbackTrigger>();
    let parsed_scope = scope.parse::<RollbackScope>();

    let evaluation = match (trigger, parsed_scope) {
        (Ok(t), Ok(s)) => {
            let cell = lookup(t, s);
            Evaluation {
                trigger: Some(t),
                scope: Some(s),
                action: cell.unwrap_or(RollbackAction::FAIL_SAFE),
                fail_safe: cell.is_none(),
                error: None,
            }
        }
        (t, s) => {
            let error = match (&t, &s) {
                (Err(e), _) | (_, Err(e)) => Some(e.clone()),
                _ => None,
            };
            Evaluation {
                trigger: t.ok(),
                scope: s.ok(),
                action: RollbackAction::FAIL_SAFE,
                fail_safe: true,
                error,
            }
        }
    };

    if let Some(err) = &evaluation.error {
        tracing::warn!(condition, scope, error = %err, "invalid trigger, applying fail-safe");
    } else if evaluation.fail_safe {
        tracing::warn!(condition, scope, action = %evaluation.action, "no action defined, applying fail-safe");
    } else {
        tracing::info!(condition, scope, action = %evaluation.action, "evaluated trigger");
    }

    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for trigger in RollbackTrigger::ALL {
            assert_eq!(trigger.as_str().parse::<RollbackTrigger>().unwrap(), *trigger);
        }
        for scope in RollbackScope::ALL {
            assert_eq!(scope.to_string().parse::<RollbackScope>().unwrap(), *scope);
        }
        for action in RollbackAction::ALL {
            assert_eq!(action.as_str().parse::<RollbackAction>().unwrap(), *action);
        }
    }

    #[test]
    fn serde_matches_wire_names() {
        let json = serde_json::to_string(&RollbackScope::PlanUnit).unwrap();
        assert_eq!(json, "\"plan-unit\"");
        let action: RollbackAction = serde_json::from_str("\"skip-and-continue\"").unwrap();
        assert_eq!(action, RollbackAction::SkipAndContinue);
    }

    #[test]
    fn parse_is_exact() {
        assert!("Phase".parse::<RollbackScope>().is_err());
        assert!("plan_unit".parse::<RollbackScope>().is_err());
        assert_eq!(
            "bogus".parse::<RollbackTrigger>(),
            Err(TriggerError::UnknownTrigger("bogus".into()))
        );
    }

    #[test]
    fn matrix_has_no_duplicate_cells() {
        for (i, (t, s, _)) in TRIGGER_MATRIX.iter().enumerate() {
            assert!(
                TRIGGER_MATRIX[i + 1..].iter().all(|(t2, s2, _)| (t2, s2) != (t, s)),
                "duplicate cell {t}/{s}"
            );
        }
    }

    #[test]
    fn fail_safe_is_most_severe() {
        for action in RollbackAction::ALL {
            assert!(action.severity() <= RollbackAction::FAIL_SAFE.severity());
        }
        assert!(RollbackAction::FAIL_SAFE.requires_rollback());
        assert!(!RollbackAction::SkipAndContinue.requires_rollback());
    }

    #[test]
    fn named_examples() {
        assert_eq!(
            evaluate("security-violation", "artifact").action,
            RollbackAction::EmergencyStopAndRollback
        );
        assert_eq!(
            evaluate("validation-failure", "phase").action,
            RollbackAction::RollbackCurrentPhase
        );
        let bogus = evaluate("bogus-condition", "phase");
        assert_eq!(bogus.action, RollbackAction::EmergencyStopAndRollback);
        assert!(bogus.fail_safe);
        assert_eq!(bogus.error, Some(TriggerError::UnknownTrigger("bogus-condition".into())));
        assert_eq!(bogus.scope, Some(RollbackScope::Phase));
    }

    #[test]
    fn defined_security_cell_is_not_fail_safe() {
        let eval = evaluate("security-violation", "entire-execution");
        assert_eq!(eval.action, RollbackAction::EmergencyStopAndRollback);
        assert!(!eval.fail_safe);
    }

    #[test]
    fn bad_scope_is_reported() {
        let eval = evaluate("timeout", "galaxy");
        assert_eq!(eval.trigger, Some(RollbackTrigger::Timeout));
        assert_eq!(eval.scope, None);
        assert_eq!(eval.error, Some(TriggerError::UnknownScope("galaxy".into())));
        assert_eq!(eval.action, RollbackAction::FAIL_SAFE);
    }
}
