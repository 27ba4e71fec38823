use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::db::models::{Snapshot, TeamRecord};

/// PPG changes smaller than this are representation noise, not movement.
pub const PPG_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Steady,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendEntry {
    pub team_key: String,
    /// 1-based position in the current table
    pub current_rank: usize,
    /// Previous rank minus current rank; positive means climbing
    pub rank_delta: i64,
    pub ppg_delta: f64,
    pub trend: Trend,
}

/// Highest PPG first. Teams without a usable PPG sink to the bottom.
fn by_ppg_desc(a: &TeamRecord, b: &TeamRecord) -> Ordering {
    match (a.ppg(), b.ppg()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Table order for display. `sort_by` is stable, so equal PPGs keep fetch order.
pub fn ranked(snapshot: &Snapshot) -> Vec<&TeamRecord> {
    let mut teams: Vec<&TeamRecord> = snapshot.teams.iter().collect();
    teams.sort_by(|a, b| by_ppg_desc(a, b));
    teams
}

/// team key → 1-based rank. A repeated key keeps its first (higher) rank.
pub fn rank_map(snapshot: &Snapshot) -> HashMap<&str, usize> {
    let mut ranks = HashMap::with_capacity(snapshot.len());
    for (idx, team) in ranked(snapshot).into_iter().enumerate() {
        ranks.entry(team.team_key.as_str()).or_insert(idx + 1);
    }
    ranks
}

fn classify(rank_delta: i64, ppg_delta: f64) -> Trend {
    match rank_delta.cmp(&0) {
        Ordering::Greater => Trend::Up,
        Ordering::Less => Trend::Down,
        Ordering::Equal if ppg_delta > PPG_EPSILON => Trend::Up,
        Ordering::Equal if ppg_delta < -PPG_EPSILON => Trend::Down,
        Ordering::Equal => Trend::Steady,
    }
}

/// Trend entries for every team in `current`, in current table order.
///
/// Any two snapshots can be compared. Without a baseline, or for a team the
/// baseline does not know, the entry is `Steady` with zero deltas.
pub fn ordered_trends(current: &Snapshot, previous: Option<&Snapshot>) -> Vec<TrendEntry> {
    let previous_ranks = previous.map(rank_map).unwrap_or_default();
    let previous_teams: HashMap<&str, &TeamRecord> = previous
        .map(|s| s.teams.iter().map(|t| (t.team_key.as_str(), t)).collect())
        .unwrap_or_default();

    let mut out: Vec<TrendEntry> = Vec::with_capacity(current.len());
    for (idx, team) in ranked(current).into_iter().enumerate() {
        let current_rank = idx + 1;
        if out.iter().any(|e| e.team_key == team.team_key) {
            continue;
        }

        let entry = match (
            previous_ranks.get(team.team_key.as_str()),
            previous_teams.get(team.team_key.as_str()),
        ) {
            (Some(&prev_rank), Some(prev)) => {
                let rank_delta = prev_rank as i64 - current_rank as i64;
                let ppg_delta = team.ppg().unwrap_or(0.0) - prev.ppg().unwrap_or(0.0);
                TrendEntry {
                    team_key: team.team_key.clone(),
                    current_rank,
                    rank_delta,
                    ppg_delta,
                    trend: classify(rank_delta, ppg_delta),
                }
            }
            _ => TrendEntry {
                team_key: team.team_key.clone(),
                current_rank,
                rank_delta: 0,
                ppg_delta: 0.0,
                trend: Trend::Steady,
            },
        };
        out.push(entry);
    }
    out
}

/// Keyed view of [`ordered_trends`].
pub fn compute_trends(
    current: &Snapshot,
    previous: Option<&Snapshot>,
) -> HashMap<String, TrendEntry> {
    ordered_trends(current, previous)
        .into_iter()
        .map(|e| (e.team_key.clone(), e))
        .collect()
}
