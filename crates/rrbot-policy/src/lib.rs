//! rrbot Policy Engine
//!
//! Blacklist resolution and the suppress-or-reply decision with floor replies

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rrbot_config::{Config, TargetKind, DEFAULT_REPLY_PROBABILITY};
use rrbot_storage::{CounterStore, ManagedBlacklist};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub id: String,
}

/// Blacklisted users and groups: static config lists (current and legacy keys)
/// merged with the managed list. A disabled category resolves to an empty set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blacklists {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl Blacklists {
    pub fn resolve(config: &Config, managed: &ManagedBlacklist) -> Self {
        let resolve_kind = |kind: TargetKind| -> BTreeSet<String> {
            if !config.is_enabled(kind) {
                return BTreeSet::new();
            }
            let mut targets = config.static_targets(kind);
            targets.extend(managed.targets(kind).iter().cloned());
            targets
        };

        Self {
            users: resolve_kind(TargetKind::User),
            groups: resolve_kind(TargetKind::Group),
        }
    }

    pub fn targets(&self, kind: TargetKind) -> &BTreeSet<String> {
        match kind {
            TargetKind::User => &self.users,
            TargetKind::Group => &self.groups,
        }
    }

    /// The sender is checked before the group it spoke in.
    pub fn match_message(&self, sender_id: &str, group_id: Option<&str>) -> Option<Target> {
        if self.users.contains(sender_id) {
            return Some(Target {
                kind: TargetKind::User,
                id: sender_id.to_string(),
            });
        }

        group_id
            .filter(|gid| self.groups.contains(*gid))
            .map(|gid| Target {
                kind: TargetKind::Group,
                id: gid.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// Floor replies are off; suppression can continue indefinitely.
    Disabled,
    Max(u32),
}

impl Threshold {
    pub fn from_count(count: i64) -> Self {
        if count <= 0 {
            Threshold::Disabled
        } else {
            Threshold::Max(u32::try_from(count).unwrap_or(u32::MAX))
        }
    }

    pub fn is_reached(self, current: u32) -> bool {
        match self {
            Threshold::Disabled => false,
            Threshold::Max(max) => current.saturating_add(1) >= max,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Disabled => write!(f, "inf"),
            Threshold::Max(max) => write!(f, "{}", max),
        }
    }
}

/// Reply probability and floor threshold for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryPolicy {
    pub probability: f64,
    pub threshold: Threshold,
}

impl CategoryPolicy {
    pub fn new(probability: f64, threshold: Threshold) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            threshold,
        }
    }

    /// Malformed values fall back to the documented defaults with a warning.
    pub fn from_config(config: &Config, kind: TargetKind) -> Self {
        let probability = match config.raw_reply_probability(kind) {
            None => DEFAULT_REPLY_PROBABILITY,
            Some(raw) => raw.as_f64().unwrap_or_else(|e| {
                warn!(
                    "{} reply_probability value {} is invalid ({}), using default {}",
                    kind, raw, e, DEFAULT_REPLY_PROBABILITY
                );
                DEFAULT_REPLY_PROBABILITY
            }),
        };

        let default_max = kind.default_max_interception();
        let max_count = match config.raw_max_interception_count(kind) {
            None => default_max,
            Some(raw) => raw.as_i64().unwrap_or_else(|e| {
                warn!(
                    "{} max_interception_count value {} is invalid ({}), using default {}",
                    kind, raw, e, default_max
                );
                default_max
            }),
        };

        Self::new(probability, Threshold::from_count(max_count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Threshold reached, reply forced through.
    FloorReply,
    /// The random draw fell within the reply probability.
    ProbabilityReply,
    Suppress,
}

impl Outcome {
    pub fn suppresses(self) -> bool {
        matches!(self, Outcome::Suppress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub outcome: Outcome,
    /// Counter before the decision.
    pub previous: u32,
    /// Counter after the decision.
    pub counter: u32,
    pub draw: f64,
}

/// Pure decision for a given draw in `[0, 1)`.
pub fn decide(policy: &CategoryPolicy, current: u32, draw: f64) -> Decision {
    let (outcome, counter) = if policy.threshold.is_reached(current) {
        (Outcome::FloorReply, 0)
    } else if draw <= policy.probability {
        (Outcome::ProbabilityReply, 0)
    } else {
        (Outcome::Suppress, current.saturating_add(1))
    };

    Decision {
        outcome,
        previous: current,
        counter,
        draw,
    }
}

pub struct PolicyEngine<R: Rng = StdRng> {
    rng: R,
}

impl PolicyEngine<StdRng> {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for PolicyEngine<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> PolicyEngine<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Decide for `target` and record the new counter in `counters`.
    pub fn evaluate(
        &mut self,
        policy: &CategoryPolicy,
        counters: &mut CounterStore,
        target: &Target,
    ) -> Decision {
        let current = counters.get(target.kind, &target.id);
        let draw: f64 = self.rng.gen();
        let decision = decide(policy, current, draw);
        counters.set(target.kind, &target.id, decision.counter);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_config(input: &str) -> Config {
        toml::from_str(input).expect("valid config")
    }

    fn user(id: &str) -> Target {
        Target {
            kind: TargetKind::User,
            id: id.to_string(),
        }
    }

    #[test]
    fn floor_reply_ignores_the_draw() {
        let policy = CategoryPolicy::new(0.0, Threshold::Max(5));
        for draw in [0.0, 0.3, 0.999] {
            let decision = decide(&policy, 4, draw);
            assert_eq!(decision.outcome, Outcome::FloorReply);
            assert_eq!(decision.counter, 0);
        }
        // Counters past the threshold (e.g. after lowering it) also trigger it.
        assert_eq!(decide(&policy, 9, 0.9).outcome, Outcome::FloorReply);
    }

    #[test]
    fn draw_within_probability_replies_and_resets() {
        let policy = CategoryPolicy::new(0.3, Threshold::Max(8));
        let decision = decide(&policy, 3, 0.3);
        assert_eq!(decision.outcome, Outcome::ProbabilityReply);
        assert_eq!(decision.previous, 3);
        assert_eq!(decision.counter, 0);
    }

    #[test]
    fn draw_above_probability_suppresses_and_increments() {
        let policy = CategoryPolicy::new(0.3, Threshold::Max(8));
        let decision = decide(&policy, 0, 0.5);
        assert_eq!(decision.outcome, Outcome::Suppress);
        assert!(decision.outcome.suppresses());
        assert_eq!(decision.counter, 1);
    }

    #[test]
    fn threshold_of_one_always_replies() {
        let policy = CategoryPolicy::new(0.0, Threshold::from_count(1));
        assert_eq!(decide(&policy, 0, 0.99).outcome, Outcome::FloorReply);
    }

    #[test]
    fn disabled_threshold_never_forces_a_reply() {
        let policy = CategoryPolicy::new(0.0, Threshold::from_count(0));
        assert_eq!(policy.threshold, Threshold::Disabled);
        assert_eq!(Threshold::from_count(-3), Threshold::Disabled);
        let decision = decide(&policy, 1_000, 0.5);
        assert_eq!(decision.outcome, Outcome::Suppress);
        assert_eq!(decision.counter, 1_001);
        assert_eq!(Threshold::Disabled.to_string(), "inf");
    }

    #[test]
    fn probability_is_clamped() {
        assert_eq!(CategoryPolicy::new(1.7, Threshold::Disabled).probability, 1.0);
        assert_eq!(CategoryPolicy::new(-0.2, Threshold::Disabled).probability, 0.0);
    }

    #[test]
    fn policy_defaults_per_kind() {
        let cfg = Config::default();
        let user_policy = CategoryPolicy::from_config(&cfg, TargetKind::User);
        let group_policy = CategoryPolicy::from_config(&cfg, TargetKind::Group);
        assert_eq!(user_policy.probability, 0.3);
        assert_eq!(user_policy.threshold, Threshold::Max(5));
        assert_eq!(group_policy.threshold, Threshold::Max(8));
    }

    #[test]
    fn malformed_policy_values_fall_back_to_defaults() {
        let cfg = parse_config(
            r#"
[user_settings]
reply_probability = "sometimes"
max_interception_count = "never"

[group_settings]
reply_probability = [1, 2]
max_interception_count = true
"#,
        );
        let user_policy = CategoryPolicy::from_config(&cfg, TargetKind::User);
        assert_eq!(user_policy.probability, 0.3);
        assert_eq!(user_policy.threshold, Threshold::Max(5));
        let group_policy = CategoryPolicy::from_config(&cfg, TargetKind::Group);
        assert_eq!(group_policy.probability, 0.3);
        assert_eq!(group_policy.threshold, Threshold::Max(8));
    }

    #[test]
    fn legacy_policy_keys_are_honoured() {
        let cfg = parse_config(
            r#"
reply_probability = 2.5
max_group_interception_count = -1
"#,
        );
        let user_policy = CategoryPolicy::from_config(&cfg, TargetKind::User);
        assert_eq!(user_policy.probability, 1.0);
        let group_policy = CategoryPolicy::from_config(&cfg, TargetKind::Group);
        assert_eq!(group_policy.threshold, Threshold::Disabled);
    }

    #[test]
    fn resolve_merges_static_legacy_and_managed() {
        let cfg = parse_config(
            r#"
blacklisted_users = [1]

[user_settings]
blacklisted_users = ["2"]

[group_settings]
blacklisted_groups = ["10"]
"#,
        );
        let mut managed = ManagedBlacklist::default();
        managed.insert(TargetKind::User, "3");
        managed.insert(TargetKind::Group, "11");

        let lists = Blacklists::resolve(&cfg, &managed);
        assert_eq!(
            lists.users.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );
        assert_eq!(lists.groups.len(), 2);
    }

    #[test]
    fn disabled_category_resolves_empty() {
        let cfg = parse_config(
            r#"
blacklisted_groups = ["99"]

[group_settings]
enable = false
blacklisted_groups = ["10"]
"#,
        );
        let mut managed = ManagedBlacklist::default();
        managed.insert(TargetKind::Group, "11");
        let lists = Blacklists::resolve(&cfg, &managed);
        assert!(lists.targets(TargetKind::Group).is_empty());
    }

    #[test]
    fn sender_match_wins_over_group_match() {
        let mut lists = Blacklists::default();
        lists.users.insert("7".to_string());
        lists.groups.insert("70".to_string());

        assert_eq!(lists.match_message("7", Some("70")), Some(user("7")));
        assert_eq!(
            lists.match_message("8", Some("70")),
            Some(Target {
                kind: TargetKind::Group,
                id: "70".to_string(),
            })
        );
        assert_eq!(lists.match_message("8", Some("71")), None);
        assert_eq!(lists.match_message("8", None), None);
    }

    #[test]
    fn engine_updates_counters() {
        let mut engine = PolicyEngine::with_rng(StdRng::seed_from_u64(7));
        let mut counters = CounterStore::default();
        let target = user("42");

        // Probability zero: only the floor can let a reply through.
        let policy = CategoryPolicy::new(0.0, Threshold::Max(3));
        let outcomes: Vec<Outcome> = (0..6)
            .map(|_| engine.evaluate(&policy, &mut counters, &target).outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::Suppress,
                Outcome::Suppress,
                Outcome::FloorReply,
                Outcome::Suppress,
                Outcome::Suppress,
                Outcome::FloorReply,
            ]
        );
        assert_eq!(counters.get(TargetKind::User, "42"), 0);
    }

    #[test]
    fn engine_always_replies_with_probability_one() {
        let mut engine = PolicyEngine::with_rng(StdRng::seed_from_u64(1));
        let mut counters = CounterStore::default();
        counters.set(TargetKind::User, "42", 2);
        let policy = CategoryPolicy::new(1.0, Threshold::Disabled);
        let decision = engine.evaluate(&policy, &mut counters, &user("42"));
        assert_eq!(decision.outcome, Outcome::ProbabilityReply);
        assert_eq!(decision.previous, 2);
        assert_eq!(counters.get(TargetKind::User, "42"), 0);
    }
}
