//! Admission gates consulted before a proposal is accepted.
//!
//! A gate is a read-only predicate over policies and bounded recent
//! aggregates. Gates never mutate state, so the proposal service can
//! evaluate them speculatively before deciding anything.

mod deploy;
mod quota;
mod roundtable;

use std::collections::HashMap;

pub use deploy::DeployGate;
pub use quota::{ContentQuotaGate, TweetQuotaGate};
pub use roundtable::RoundtableCapGate;

use crate::error::Result;
use crate::mission::StepKind;
use crate::store::Store;

/// Outcome of a single gate check.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Pass,
    Reject { reason: String },
}

impl GateDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

pub trait CapGate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read-only admission check. Must not write to the store.
    fn check(&self, store: &Store) -> Result<GateDecision>;
}

/// Step kind → gate mapping. Kinds without a registered gate pass
/// unconditionally.
pub struct GateRegistry {
    gates: HashMap<String, Box<dyn CapGate>>,
}

impl GateRegistry {
    pub fn empty() -> Self {
        Self {
            gates: HashMap::new(),
        }
    }

    /// The standing registry: tweet quota, content-draft quota, deploy
    /// cooldown/kill-switch, roundtable daily cap.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(StepKind::PostTweet, Box::new(TweetQuotaGate));
        registry.register(StepKind::WriteContent, Box::new(ContentQuotaGate));
        registry.register(StepKind::from("deploy"), Box::new(DeployGate));
        registry.register(StepKind::from("schedule_roundtable"), Box::new(RoundtableCapGate));
        registry
    }

    pub fn register(&mut self, kind: StepKind, gate: Box<dyn CapGate>) {
        self.gates.insert(kind.as_str().to_string(), gate);
    }

    /// Check one step kind. Unregistered kinds pass.
    pub fn check_kind(&self, kind: &StepKind, store: &Store) -> Result<GateDecision> {
        match self.gates.get(kind.as_str()) {
            Some(gate) => gate.check(store),
            None => Ok(GateDecision::Pass),
        }
    }

    /// Check every distinct kind in a proposed step list, returning the
    /// first rejection.
    pub fn check_all(&self, kinds: &[StepKind], store: &Store) -> Result<GateDecision> {
        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            if !seen.insert(kind.as_str().to_string()) {
                continue;
            }
            if let rejection @ GateDecision::Reject { .. } = self.check_kind(kind, store)? {
                return Ok(rejection);
            }
        }
        Ok(GateDecision::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysReject;

    impl CapGate for AlwaysReject {
        fn name(&self) -> &'static str {
            "always_reject"
        }

        fn check(&self, _store: &Store) -> Result<GateDecision> {
            Ok(GateDecision::reject("no"))
        }
    }

    #[test]
    fn test_unregistered_kind_passes() {
        let store = Store::open_in_memory().unwrap();
        let registry = GateRegistry::empty();
        let decision = registry
            .check_kind(&StepKind::Research, &store)
            .unwrap();
        assert!(decision.is_pass());
    }

    #[test]
    fn test_first_rejection_wins() {
        let store = Store::open_in_memory().unwrap();
        let mut registry = GateRegistry::empty();
        registry.register(StepKind::Analyze, Box::new(AlwaysReject));

        let decision = registry
            .check_all(&[StepKind::Research, StepKind::Analyze], &store)
            .unwrap();
        assert_eq!(decision, GateDecision::reject("no"));
    }
}
