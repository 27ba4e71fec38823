use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::db::models::Snapshot;

/// How many names to list in a violation before truncating.
const MAX_LISTED: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    pub expected_count: Option<usize>,
    /// Number of previously present teams that may disappear
    pub shrink_tolerance: usize,
    /// Operator has confirmed the team list shrank on purpose
    pub acknowledge_shrink: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    TeamCount,
    PointsPerGame,
    DuplicateTeamKey,
    TeamsDropped,
    DisplayName,
    FixtureState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: Rule,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.rule, self.detail)
    }
}

/// Pass only with zero violations. Never an error: the caller decides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has(&self, rule: Rule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    fn push(&mut self, rule: Rule, detail: String) {
        self.violations.push(Violation { rule, detail });
    }
}

/// Check a candidate snapshot. Every rule runs; all violations are reported.
pub fn validate(
    candidate: &Snapshot,
    previous: Option<&Snapshot>,
    options: &ValidationOptions,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    if let Some(expected) = options.expected_count {
        if candidate.len() != expected {
            result.push(
                Rule::TeamCount,
                format!("snapshot has {} teams, expected {}", candidate.len(), expected),
            );
        }
    }

    let bad_ppg: Vec<&str> = candidate
        .teams
        .iter()
        .filter(|t| {
            !matches!(t.stats.points_per_game, Some(v) if v.is_finite() && v >= 0.0)
        })
        .map(|t| t.team_key.as_str())
        .collect();
    if !bad_ppg.is_empty() {
        result.push(
            Rule::PointsPerGame,
            format!(
                "{} team(s) missing a valid points-per-game: {}",
                bad_ppg.len(),
                listed(bad_ppg)
            ),
        );
    }

    let mut seen = HashSet::new();
    let duplicates: BTreeSet<&str> = candidate
        .teams
        .iter()
        .map(|t| t.team_key.as_str())
        .filter(|k| !seen.insert(*k))
        .collect();
    if !duplicates.is_empty() {
        result.push(
            Rule::DuplicateTeamKey,
            format!("duplicate team key(s): {}", listed(duplicates)),
        );
    }

    let unnamed: Vec<&str> = candidate
        .teams
        .iter()
        .filter(|t| t.display_name.trim().is_empty())
        .map(|t| t.team_key.as_str())
        .collect();
    if !unnamed.is_empty() {
        result.push(
            Rule::DisplayName,
            format!("{} team(s) without a display name: {}", unnamed.len(), listed(unnamed)),
        );
    }

    let inconsistent: Vec<String> = candidate
        .teams
        .iter()
        .filter(|t| !t.fixture_consistent())
        .map(|t| format!("{} ({})", t.team_key, t.fixture_status))
        .collect();
    if !inconsistent.is_empty() {
        result.push(
            Rule::FixtureState,
            format!(
                "{} team(s) with scores inconsistent with fixture status: {}",
                inconsistent.len(),
                listed(inconsistent.iter().map(String::as_str))
            ),
        );
    }

    if let Some(previous) = previous {
        let current_keys: HashSet<&str> =
            candidate.teams.iter().map(|t| t.team_key.as_str()).collect();
        let dropped: BTreeSet<&str> = previous
            .teams
            .iter()
            .map(|t| t.team_key.as_str())
            .filter(|k| !current_keys.contains(k))
            .collect();
        if dropped.len() > options.shrink_tolerance && !options.acknowledge_shrink {
            result.push(
                Rule::TeamsDropped,
                format!(
                    "{} team(s) present in previous snapshot are missing (tolerance {}): {}",
                    dropped.len(),
                    options.shrink_tolerance,
                    listed(dropped)
                ),
            );
        }
    }

    result
}

fn listed<'a>(keys: impl IntoIterator<Item = &'a str>) -> String {
    let keys: Vec<&str> = keys.into_iter().collect();
    let mut out = keys
        .iter()
        .take(MAX_LISTED)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > MAX_LISTED {
        out.push_str(&format!(" (+{} more)", keys.len() - MAX_LISTED));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FixtureStatus, Generation};
    use crate::fetch::testing::record;

    fn snapshot(n: usize) -> Snapshot {
        Snapshot::new(
            Generation::Candidate,
            (0..n)
                .map(|i| record(&format!("t{}", i), FixtureStatus::Played, 1.0))
                .collect(),
        )
    }

    #[test]
    fn test_clean_snapshot_passes() {
        let options = ValidationOptions {
            expected_count: Some(3),
            ..Default::default()
        };
        let result = validate(&snapshot(3), Some(&snapshot(3)), &options);
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn test_count_mismatch_cites_both_numbers() {
        let options = ValidationOptions {
            expected_count: Some(26),
            ..Default::default()
        };
        let result = validate(&snapshot(24), None, &options);
        assert!(!result.passed());
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].rule, Rule::TeamCount);
        assert!(result.violations[0].detail.contains("24"));
        assert!(result.violations[0].detail.contains("26"));
    }

    #[test]
    fn test_ppg_must_be_finite_and_non_negative() {
        let mut snap = snapshot(4);
        snap.teams[0].stats.points_per_game = None;
        snap.teams[1].stats.points_per_game = Some(f64::NAN);
        snap.teams[2].stats.points_per_game = Some(-0.5);
        let result = validate(&snap, None, &ValidationOptions::default());
        assert!(result.has(Rule::PointsPerGame));
        assert!(result.violations[0].detail.starts_with("3 team(s)"));
    }

    #[test]
    fn test_all_rules_reported_without_short_circuit() {
        let mut snap = snapshot(3);
        snap.teams[1].team_key = "t0".into();
        snap.teams[2].stats.points_per_game = None;
        snap.teams[2].display_name = " ".into();
        snap.teams[2].home_score = None;
        let options = ValidationOptions {
            expected_count: Some(5),
            ..Default::default()
        };
        let result = validate(&snap, Some(&snapshot(3)), &options);
        for rule in [
            Rule::TeamCount,
            Rule::PointsPerGame,
            Rule::DuplicateTeamKey,
            Rule::DisplayName,
            Rule::FixtureState,
            Rule::TeamsDropped,
        ] {
            assert!(result.has(rule), "missing {:?}", rule);
        }
    }

    #[test]
    fn test_any_shrink_flagged_by_default() {
        let result = validate(&snapshot(2), Some(&snapshot(3)), &ValidationOptions::default());
        assert!(result.has(Rule::TeamsDropped));
        assert!(result.violations[0].detail.contains("t2"));
    }

    #[test]
    fn test_shrink_within_tolerance_or_acknowledged() {
        let tolerant = ValidationOptions {
            shrink_tolerance: 1,
            ..Default::default()
        };
        assert!(validate(&snapshot(2), Some(&snapshot(3)), &tolerant).passed());

        let acknowledged = ValidationOptions {
            acknowledge_shrink: true,
            ..Default::default()
        };
        assert!(validate(&snapshot(0), Some(&snapshot(3)), &acknowledged)
            .violations
            .iter()
            .all(|v| v.rule != Rule::TeamsDropped));
    }

    #[test]
    fn test_growth_is_not_shrink() {
        let result = validate(&snapshot(4), Some(&snapshot(3)), &ValidationOptions::default());
        assert!(result.passed());
    }

    #[test]
    fn test_listing_truncates() {
        let keys = ["a", "b", "c", "d", "e", "f", "g"];
        assert_eq!(listed(keys), "a, b, c, d, e (+2 more)");
    }
}
