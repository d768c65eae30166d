//! Deterministic additive quality scoring (specification §4.4).
//!
//! Every factor is independent and additive; the ceiling (0.15 + 0.25 +
//! 0.20 + 0.10 + 0.15 + 0.10 + 0.05 = 1.00) is reached only by a decision
//! that maxes out every factor at once, so the result is always in `[0,
//! 1]` without needing a separate clamp.

use akashi_core::Decision;

/// Everything [`score`] needs, gathered before a decision's alternatives
/// and evidence rows exist as entities (step 3 runs before step 4 builds
/// them) — so this takes the raw shape of the trace input rather than
/// built `Alternative`/`Evidence` rows.
pub struct QualityInputs<'a> {
    pub decision_type: &'a str,
    pub outcome: &'a str,
    pub confidence: f64,
    pub reasoning: Option<&'a str>,
    pub alternative_count: usize,
    pub any_alternative_has_long_rejection_reason: bool,
    pub evidence_count: usize,
}

/// Compute the additive quality score. Strict inequalities at every
/// boundary, per specification.
pub fn score(inputs: &QualityInputs) -> f64 {
    let mut total = 0.0;

    total += confidence_contribution(inputs.confidence);
    total += reasoning_contribution(inputs.reasoning);
    total += alternatives_count_contribution(inputs.alternative_count);
    if inputs.any_alternative_has_long_rejection_reason {
        total += 0.10;
    }
    total += evidence_contribution(inputs.evidence_count);
    if Decision::is_standard_type(inputs.decision_type) {
        total += 0.10;
    }
    if inputs.outcome.trim().chars().count() > 20 {
        total += 0.05;
    }

    total
}

fn confidence_contribution(c: f64) -> f64 {
    if c > 0.05 && c < 0.95 {
        0.15
    } else if (c > 0.0 && c <= 0.05) || (c >= 0.95 && c < 1.0) {
        0.10
    } else {
        0.0
    }
}

fn reasoning_contribution(reasoning: Option<&str>) -> f64 {
    let len = reasoning.map(|r| r.trim().chars().count()).unwrap_or(0);
    if len > 100 {
        0.25
    } else if len > 50 {
        0.20
    } else if len > 20 {
        0.10
    } else {
        0.0
    }
}

fn alternatives_count_contribution(count: usize) -> f64 {
    match count {
        0 => 0.0,
        1 => 0.05,
        2 => 0.15,
        _ => 0.20,
    }
}

fn evidence_contribution(count: usize) -> f64 {
    if count >= 2 {
        0.15
    } else if count >= 1 {
        0.10
    } else {
        0.0
    }
}

/// Whether a rejection reason counts towards the "has a long rejection
/// reason" bonus: trimmed length strictly greater than 10 characters.
pub fn has_long_rejection_reason(reason: Option<&str>) -> bool {
    reason.map(|r| r.trim().chars().count() > 10).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> QualityInputs<'static> {
        QualityInputs {
            decision_type: "other",
            outcome: "x",
            confidence: 0.0,
            reasoning: None,
            alternative_count: 0,
            any_alternative_has_long_rejection_reason: false,
            evidence_count: 0,
        }
    }

    #[test]
    fn mid_range_confidence_scores_highest() {
        assert_eq!(confidence_contribution(0.5), 0.15);
        assert_eq!(confidence_contribution(0.05), 0.0);
        assert_eq!(confidence_contribution(0.051), 0.10);
        assert_eq!(confidence_contribution(0.95), 0.10);
        assert_eq!(confidence_contribution(1.0), 0.0);
        assert_eq!(confidence_contribution(0.0), 0.0);
    }

    #[test]
    fn reasoning_length_thresholds_are_strict() {
        assert_eq!(reasoning_contribution(Some(&"a".repeat(20))), 0.0);
        assert_eq!(reasoning_contribution(Some(&"a".repeat(21))), 0.10);
        assert_eq!(reasoning_contribution(Some(&"a".repeat(50))), 0.10);
        assert_eq!(reasoning_contribution(Some(&"a".repeat(51))), 0.20);
        assert_eq!(reasoning_contribution(Some(&"a".repeat(100))), 0.20);
        assert_eq!(reasoning_contribution(Some(&"a".repeat(101))), 0.25);
        assert_eq!(reasoning_contribution(None), 0.0);
    }

    #[test]
    fn reasoning_length_trims_whitespace_before_counting() {
        let padded = format!("  {}  ", "a".repeat(21));
        assert_eq!(reasoning_contribution(Some(&padded)), 0.10);
    }

    #[test]
    fn alternatives_count_steps() {
        assert_eq!(alternatives_count_contribution(0), 0.0);
        assert_eq!(alternatives_count_contribution(1), 0.05);
        assert_eq!(alternatives_count_contribution(2), 0.15);
        assert_eq!(alternatives_count_contribution(3), 0.20);
        assert_eq!(alternatives_count_contribution(9), 0.20);
    }

    #[test]
    fn evidence_count_steps() {
        assert_eq!(evidence_contribution(0), 0.0);
        assert_eq!(evidence_contribution(1), 0.10);
        assert_eq!(evidence_contribution(2), 0.15);
        assert_eq!(evidence_contribution(5), 0.15);
    }

    #[test]
    fn rejection_reason_bonus_is_strictly_greater_than_ten_chars() {
        assert!(!has_long_rejection_reason(Some("0123456789")));
        assert!(has_long_rejection_reason(Some("01234567890")));
        assert!(!has_long_rejection_reason(None));
    }

    #[test]
    fn standard_type_and_outcome_length_bonuses_apply() {
        let outcome = "a".repeat(21);
        let inputs = QualityInputs {
            decision_type: "architecture",
            outcome: &outcome,
            confidence: 0.5,
            reasoning: None,
            alternative_count: 0,
            any_alternative_has_long_rejection_reason: false,
            evidence_count: 0,
        };
        let score = score(&inputs);
        // confidence 0.15 + standard type 0.10 + outcome length 0.05
        assert!((score - 0.30).abs() < 1e-9);
    }

    #[test]
    fn maxed_out_decision_scores_exactly_one() {
        let outcome = "a".repeat(21);
        let reasoning = "a".repeat(101);
        let inputs = QualityInputs {
            decision_type: "security",
            outcome: &outcome,
            confidence: 0.5,
            reasoning: Some(&reasoning),
            alternative_count: 3,
            any_alternative_has_long_rejection_reason: true,
            evidence_count: 2,
        };
        assert!((score(&inputs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn minimal_decision_scores_zero() {
        let inputs = base();
        assert_eq!(score(&inputs), 0.0);
    }
}
