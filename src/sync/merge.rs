//! Reconciles a fresh fetch batch with the last promoted snapshot.
//!
//! Resolution per team, first match wins:
//!
//! | fresh fetch | previous record | resolution             |
//! |-------------|-----------------|------------------------|
//! | failed      | present         | `FallbackToPrevious`   |
//! | failed      | absent          | `CarriedOverMissing`   |
//! | regression  | `Played`        | `RolledBackToPrevious` |
//! | ok          | any             | `FreshAccepted`        |
//!
//! A regression is a fresh status strictly below a previous `Played`, using
//! the `FixtureStatus` total order, or a fresh `Played` that lost its score.
//! Nothing here fails or touches storage: upstream failures are just inputs.
//!
//! Teams in the previous snapshot but not in the fresh batch (removed from
//! the team map) are carried forward unless [`MergePolicy::drop_absent_up_to`]
//! lets them go. Either way they are not fetch failures.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::db::models::{FixtureStatus, Generation, Snapshot, TeamRecord};
use crate::fetch::{FailureKind, FetchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    FreshAccepted,
    RolledBackToPrevious,
    FallbackToPrevious,
    CarriedOverMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeEntry {
    pub team_key: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

/// Per-team outcome of one merge, in candidate order followed by omitted teams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub entries: Vec<MergeEntry>,
}

impl MergeReport {
    pub fn count(&self, resolution: Resolution) -> usize {
        self.entries
            .iter()
            .filter(|e| e.resolution == resolution)
            .count()
    }

    /// True when any requested team could not be fetched this cycle.
    /// The store uses this to protect the rotation baseline.
    pub fn has_fetch_failures(&self) -> bool {
        self.entries.iter().any(|e| e.failure_kind.is_some())
    }

    pub fn get(&self, team_key: &str) -> Option<&MergeEntry> {
        self.entries.iter().find(|e| e.team_key == team_key)
    }
}

/// Merge knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergePolicy {
    /// Also roll back an in-progress fixture whose fresh score went down.
    pub guard_live_scores: bool,
    /// Drop teams missing from the fresh batch when at most this many are
    /// missing. `None` always carries them forward.
    pub drop_absent_up_to: Option<usize>,
}

/// Ordered fresh batch: team key → terminal fetch outcome, in dispatch order.
pub type FreshBatch = Vec<(String, FetchOutcome)>;

/// Build the candidate snapshot and report from a fresh batch and the
/// previously promoted snapshot.
pub fn merge(
    fresh: &[(String, FetchOutcome)],
    previous: Option<&Snapshot>,
    policy: MergePolicy,
) -> (Snapshot, MergeReport) {
    let previous_by_key: HashMap<&str, &TeamRecord> = previous
        .map(|s| s.teams.iter().map(|t| (t.team_key.as_str(), t)).collect())
        .unwrap_or_default();

    let mut teams = Vec::with_capacity(fresh.len());
    let mut entries = Vec::with_capacity(fresh.len());
    let mut omitted = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (key, outcome) in fresh {
        if !seen.insert(key.as_str()) {
            warn!("Duplicate team key '{}' in fresh batch, keeping first", key);
            continue;
        }
        let prev = previous_by_key.get(key.as_str()).copied();

        match (outcome, prev) {
            (FetchOutcome::Failure(failure), Some(prev)) => {
                teams.push(prev.clone());
                entries.push(MergeEntry {
                    team_key: key.clone(),
                    resolution: Resolution::FallbackToPrevious,
                    reason: Some(failure.to_string()),
                    failure_kind: Some(failure.kind()),
                });
            }
            (FetchOutcome::Failure(failure), None) => {
                omitted.push(MergeEntry {
                    team_key: key.clone(),
                    resolution: Resolution::CarriedOverMissing,
                    reason: Some(failure.to_string()),
                    failure_kind: Some(failure.kind()),
                });
            }
            (FetchOutcome::Success(record), Some(prev)) => {
                match regression(prev, record, policy) {
                    Some(reason) => {
                        debug!("Rolling back {}: {}", key, reason);
                        teams.push(prev.clone());
                        entries.push(MergeEntry {
                            team_key: key.clone(),
                            resolution: Resolution::RolledBackToPrevious,
                            reason: Some(reason),
                            failure_kind: None,
                        });
                    }
                    None => {
                        teams.push(keyed(record, key));
                        entries.push(accepted(key));
                    }
                }
            }
            (FetchOutcome::Success(record), None) => {
                teams.push(keyed(record, key));
                entries.push(accepted(key));
            }
        }
    }

    // Teams we knew about but did not ask for this cycle
    let absent: Vec<&TeamRecord> = previous
        .map(|s| {
            s.teams
                .iter()
                .filter(|t| seen.insert(t.team_key.as_str()))
                .collect()
        })
        .unwrap_or_default();
    let drop_absent = matches!(policy.drop_absent_up_to, Some(limit) if absent.len() <= limit);
    if !absent.is_empty() && !drop_absent {
        warn!(
            "{} team(s) missing from the fresh batch carried forward; acknowledge the shrink to drop them",
            absent.len()
        );
    }
    for prev in absent {
        if drop_absent {
            omitted.push(MergeEntry {
                team_key: prev.team_key.clone(),
                resolution: Resolution::CarriedOverMissing,
                reason: Some("absent from fresh batch, dropped".to_string()),
                failure_kind: None,
            });
        } else {
            teams.push(prev.clone());
            entries.push(MergeEntry {
                team_key: prev.team_key.clone(),
                resolution: Resolution::FallbackToPrevious,
                reason: Some("absent from fresh batch".to_string()),
                failure_kind: None,
            });
        }
    }

    entries.extend(omitted);
    (
        Snapshot::new(Generation::Candidate, teams),
        MergeReport { entries },
    )
}

/// The batch key is authoritative; a record filed under another key is rekeyed.
fn keyed(record: &TeamRecord, key: &str) -> TeamRecord {
    if record.team_key != key {
        warn!(
            "Fetched record for '{}' carries key '{}', filing it under '{}'",
            key, record.team_key, key
        );
        return TeamRecord {
            team_key: key.to_string(),
            ..record.clone()
        };
    }
    record.clone()
}

fn accepted(key: &str) -> MergeEntry {
    MergeEntry {
        team_key: key.to_string(),
        resolution: Resolution::FreshAccepted,
        reason: None,
        failure_kind: None,
    }
}

/// Returns why `fresh` would regress `prev`, if it would.
fn regression(prev: &TeamRecord, fresh: &TeamRecord, policy: MergePolicy) -> Option<String> {
    if prev.fixture_status == FixtureStatus::Played && fresh.fixture_status < FixtureStatus::Played
    {
        return Some(format!(
            "fresh status {} would replace Played {}-{}",
            fresh.fixture_status,
            score_text(prev.home_score),
            score_text(prev.away_score)
        ));
    }

    if prev.fixture_status == FixtureStatus::Played
        && (fresh.home_score.is_none() || fresh.away_score.is_none())
    {
        return Some(format!(
            "fresh Played result has no score, would replace {}-{}",
            score_text(prev.home_score),
            score_text(prev.away_score)
        ));
    }

    if policy.guard_live_scores
        && prev.fixture_status == FixtureStatus::InProgress
        && fresh.fixture_status == FixtureStatus::InProgress
    {
        let lower = |p: Option<u32>, f: Option<u32>| match (p, f) {
            (Some(p), Some(f)) => f < p,
            (Some(_), None) => true,
            _ => false,
        };
        if lower(prev.home_score, fresh.home_score) || lower(prev.away_score, fresh.away_score) {
            return Some(format!(
                "live score {}-{} would replace {}-{}",
                score_text(fresh.home_score),
                score_text(fresh.away_score),
                score_text(prev.home_score),
                score_text(prev.away_score)
            ));
        }
    }

    None
}

fn score_text(score: Option<u32>) -> String {
    score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}
