//! Global-wave consensus between the two designated validators

use serde::Serialize;

use crate::schemas::{Confidence, Verdict};

/// One side of the consensus check
#[derive(Debug, Clone, PartialEq)]
pub struct Opinion<'a> {
    pub validator_id: &'a str,
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub rationale: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsensusOutcome {
    /// Effective verdict for both validators
    Agreed { verdict: Verdict },
    /// Needs a human
    Escalated { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusReport {
    pub validators: Vec<String>,
    #[serde(flatten)]
    pub outcome: ConsensusOutcome,
}

impl ConsensusReport {
    pub fn is_escalated(&self) -> bool {
        matches!(self.outcome, ConsensusOutcome::Escalated { .. })
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self.outcome {
            ConsensusOutcome::Agreed { verdict } => Some(verdict),
            ConsensusOutcome::Escalated { .. } => None,
        }
    }
}

/// Combine two opinions.
///
/// Matching verdicts stand. Approve against reject escalates. When one side
/// is pending, the conclusive side is adopted only if both report the same
/// confidence and it gave a rationale.
pub fn resolve(a: &Opinion<'_>, b: &Opinion<'_>) -> ConsensusReport {
    let outcome = match (a.verdict, b.verdict) {
        (x, y) if x == y => ConsensusOutcome::Agreed { verdict: x },
        (Verdict::Approve, Verdict::Reject) | (Verdict::Reject, Verdict::Approve) => {
            ConsensusOutcome::Escalated {
                reason: format!(
                    "{} voted {} but {} voted {}",
                    a.validator_id, a.verdict, b.validator_id, b.verdict
                ),
            }
        }
        _ => {
            let (conclusive, pending) = if a.verdict.is_conclusive() { (a, b) } else { (b, a) };
            if conclusive.confidence == pending.confidence && !conclusive.rationale.trim().is_empty() {
                ConsensusOutcome::Agreed {
                    verdict: conclusive.verdict,
                }
            } else {
                ConsensusOutcome::Escalated {
                    reason: format!(
                        "{} is pending and {} ({}) cannot decide alone",
                        pending.validator_id, conclusive.validator_id, conclusive.verdict
                    ),
                }
            }
        }
    };

    ConsensusReport {
        validators: vec![a.validator_id.to_string(), b.validator_id.to_string()],
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opinion(id: &'static str, verdict: Verdict, confidence: Confidence, rationale: &'static str) -> Opinion<'static> {
        Opinion {
            validator_id: id,
            verdict,
            confidence,
            rationale,
        }
    }

    #[test]
    fn test_agreement() {
        let r = resolve(
            &opinion("a", Verdict::Approve, Confidence::High, "ok"),
            &opinion("b", Verdict::Approve, Confidence::Low, ""),
        );
        assert_eq!(r.verdict(), Some(Verdict::Approve));

        let r = resolve(
            &opinion("a", Verdict::Reject, Confidence::High, "bad"),
            &opinion("b", Verdict::Reject, Confidence::High, "bad"),
        );
        assert_eq!(r.verdict(), Some(Verdict::Reject));
    }

    #[test]
    fn test_conflict_escalates() {
        let r = resolve(
            &opinion("a", Verdict::Approve, Confidence::High, "ok"),
            &opinion("b", Verdict::Reject, Confidence::High, "bad"),
        );
        assert!(r.is_escalated());
        assert_eq!(r.validators, vec!["a", "b"]);
    }

    #[test]
    fn test_pending_tie_break() {
        let adopted = resolve(
            &opinion("a", Verdict::Pending, Confidence::Medium, ""),
            &opinion("b", Verdict::Reject, Confidence::Medium, "missing tests"),
        );
        assert_eq!(adopted.verdict(), Some(Verdict::Reject));

        let unequal = resolve(
            &opinion("a", Verdict::Approve, Confidence::High, "fine"),
            &opinion("b", Verdict::Pending, Confidence::Low, ""),
        );
        assert!(unequal.is_escalated());

        let no_rationale = resolve(
            &opinion("a", Verdict::Approve, Confidence::Medium, "  "),
            &opinion("b", Verdict::Pending, Confidence::Medium, ""),
        );
        assert!(no_rationale.is_escalated());
    }

    #[test]
    fn test_serializes_flat() {
        let r = resolve(
            &opinion("a", Verdict::Approve, Confidence::High, "ok"),
            &opinion("b", Verdict::Reject, Confidence::High, "bad"),
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "escalated");
        assert!(json["reason"].as_str().unwrap().contains("a voted approve"));
    }
}
