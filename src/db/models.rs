use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Fixture state of a team's current reporting period.
///
/// The derive order is the progression order: `Scheduled < InProgress < Played`.
/// The merge engine compares statuses through this ordering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixtureStatus {
    Scheduled,
    InProgress,
    Played,
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FixtureStatus::Scheduled => "Scheduled",
            FixtureStatus::InProgress => "InProgress",
            FixtureStatus::Played => "Played",
        };
        f.write_str(s)
    }
}

/// One entry of a team's recent form, most recent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormResult {
    Win,
    Loss,
    Draw,
}

/// League-table columns for one team
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub points: i32,
    /// The upstream table reports PPG as text; unparsable values load as `None`.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub points_per_game: Option<f64>,
}

/// One team's standing and fixture state for a reporting period.
///
/// Records are values: the merge engine picks between whole records and
/// never edits one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRecord {
    /// Upstream team id, or the configured team name when there is no id
    pub team_key: String,
    pub display_name: String,
    #[serde(default)]
    pub competition_label: String,
    pub stats: TeamStats,
    #[serde(default)]
    pub form: Vec<FormResult>,
    pub fixture_status: FixtureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_score: Option<u32>,
}

impl TeamRecord {
    /// Checks the fixture invariant: a played fixture carries both scores,
    /// a scheduled one carries neither.
    pub fn fixture_consistent(&self) -> bool {
        match self.fixture_status {
            FixtureStatus::Played => self.home_score.is_some() && self.away_score.is_some(),
            FixtureStatus::Scheduled => self.home_score.is_none() && self.away_score.is_none(),
            FixtureStatus::InProgress => true,
        }
    }

    /// PPG used for ranking; teams without one sort below every team with one.
    pub fn ppg(&self) -> Option<f64> {
        self.stats.points_per_game.filter(|v| v.is_finite())
    }
}

/// Named slot in the rotation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Generation {
    Current,
    Previous,
    LastGameweek,
    /// Built by the merge engine, not yet promoted
    Candidate,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::Current => "current",
            Generation::Previous => "previous",
            Generation::LastGameweek => "last-gameweek",
            Generation::Candidate => "candidate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "current" => Some(Generation::Current),
            "previous" => Some(Generation::Previous),
            "last-gameweek" | "lastgw" => Some(Generation::LastGameweek),
            "candidate" => Some(Generation::Candidate),
            _ => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete set of team records for one point in time, in fetch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_date: DateTime<Utc>,
    pub generation: Generation,
    pub teams: Vec<TeamRecord>,
}

impl Snapshot {
    pub fn new(generation: Generation, teams: Vec<TeamRecord>) -> Self {
        Snapshot {
            snapshot_date: Utc::now(),
            generation,
            teams,
        }
    }

    pub fn get(&self, team_key: &str) -> Option<&TeamRecord> {
        self.teams.iter().find(|t| t.team_key == team_key)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Same records, relabelled for another slot.
    pub fn with_generation(&self, generation: Generation) -> Self {
        Snapshot {
            snapshot_date: self.snapshot_date,
            generation,
            teams: self.teams.clone(),
        }
    }
}

/// Accepts a JSON number, a numeric string, or null.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_total_order() {
        assert!(FixtureStatus::Scheduled < FixtureStatus::InProgress);
        assert!(FixtureStatus::InProgress < FixtureStatus::Played);
    }

    #[test]
    fn test_ppg_accepts_text_and_numbers() {
        let from_text: TeamStats = serde_json::from_str(
            r#"{"played":4,"won":2,"drawn":1,"lost":1,"points":7,"pointsPerGame":"1.75"}"#,
        )
        .unwrap();
        assert_eq!(from_text.points_per_game, Some(1.75));

        let from_number: TeamStats = serde_json::from_str(
            r#"{"played":4,"won":2,"drawn":1,"lost":1,"points":7,"pointsPerGame":1.75}"#,
        )
        .unwrap();
        assert_eq!(from_number.points_per_game, Some(1.75));

        let garbage: TeamStats = serde_json::from_str(
            r#"{"played":0,"won":0,"drawn":0,"lost":0,"points":0,"pointsPerGame":"-"}"#,
        )
        .unwrap();
        assert_eq!(garbage.points_per_game, None);
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{
            "teamKey": "t-1",
            "displayName": "St Albans 1",
            "competitionLabel": "Men's Prem",
            "stats": {"played":1,"won":1,"drawn":0,"lost":0,"points":3,"pointsPerGame":3.0},
            "form": ["Win"],
            "fixtureStatus": "Played",
            "homeScore": 2,
            "awayScore": 1
        }"#;
        let record: TeamRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.fixture_status, FixtureStatus::Played);
        assert!(record.fixture_consistent());
        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["teamKey"], "t-1");
        assert_eq!(back["homeScore"], 2);
    }

    #[test]
    fn test_scheduled_with_score_is_inconsistent() {
        let json = r#"{
            "teamKey": "t-1", "displayName": "A",
            "stats": {"played":0,"won":0,"drawn":0,"lost":0,"points":0},
            "fixtureStatus": "Scheduled", "homeScore": 0
        }"#;
        let record: TeamRecord = serde_json::from_str(json).unwrap();
        assert!(!record.fixture_consistent());
    }

    #[test]
    fn test_generation_parse() {
        assert_eq!(Generation::parse("lastgw"), Some(Generation::LastGameweek));
        assert_eq!(Generation::parse("previous"), Some(Generation::Previous));
        assert_eq!(Generation::parse("nope"), None);
    }
}
