use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::provider::{FetchFailure, TeamFetcher};
use super::teams::TeamEntry;
use crate::db::models::{FixtureStatus, FormResult, TeamRecord, TeamStats};

/// Team-data source that reads one TeamRecord-shaped JSON document per team
/// from `{base}/teams/{teamId}?comp={compId}`.
pub struct HttpTeamFetcher {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

/// Upstream body. Identity fields come from the team map, not from here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamPayload {
    #[serde(default)]
    team_name: Option<String>,
    #[serde(default)]
    competition_label: Option<String>,
    stats: TeamStats,
    #[serde(default)]
    form: Vec<FormResult>,
    fixture_status: FixtureStatus,
    #[serde(default)]
    home_score: Option<u32>,
    #[serde(default)]
    away_score: Option<u32>,
}

impl HttpTeamFetcher {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let mut base_url = Url::parse(base_url).context("Invalid upstream API URL")?;
        // Url::join drops the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(HttpTeamFetcher {
            http,
            base_url,
            api_key,
        })
    }

    fn team_url(&self, team: &TeamEntry) -> Result<Url, FetchFailure> {
        let id = team
            .key()
            .ok_or_else(|| FetchFailure::NotFound("team has no id".to_string()))?;
        let mut url = self
            .base_url
            .join("teams/")
            .and_then(|u| u.join(id))
            .map_err(|e| FetchFailure::Malformed(format!("cannot build URL for {}: {}", id, e)))?;
        if let Some(comp) = team.comp_id.as_deref() {
            url.query_pairs_mut().append_pair("comp", comp);
        }
        Ok(url)
    }
}

#[async_trait]
impl TeamFetcher for HttpTeamFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_team(&self, team: &TeamEntry) -> Result<TeamRecord, FetchFailure> {
        let url = self.team_url(team)?;
        debug!("Fetching {} from {}", team.label(), url);

        let mut req = self.http.get(url.clone());
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        // Connection failures are reported as timeouts: no usable response either way
        let resp = req
            .send()
            .await
            .map_err(|e| FetchFailure::Timeout(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(classify_status(status, retry_after, team.label()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchFailure::Malformed(format!("unreadable body: {}", e)))?;
        parse_team_payload(team, &body)
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    label: &str,
) -> FetchFailure {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchFailure::RateLimited {
            detail: format!("{} ({})", label, status),
            retry_after,
        },
        StatusCode::NOT_FOUND => FetchFailure::NotFound(label.to_string()),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            FetchFailure::Timeout(format!("{} ({})", label, s))
        }
        s => FetchFailure::Malformed(format!("{} unexpected status {}", label, s)),
    }
}

fn parse_team_payload(team: &TeamEntry, body: &str) -> Result<TeamRecord, FetchFailure> {
    let key = team
        .key()
        .ok_or_else(|| FetchFailure::NotFound("team has no id".to_string()))?;
    let payload: TeamPayload = serde_json::from_str(body)
        .map_err(|e| FetchFailure::Malformed(format!("{}: {}", team.label(), e)))?;

    let display_name = payload
        .team_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| team.label().to_string());
    let competition_label = team
        .comp_label
        .clone()
        .or(payload.competition_label)
        .unwrap_or_default();

    let record = TeamRecord {
        team_key: key.to_string(),
        display_name,
        competition_label,
        stats: payload.stats,
        form: payload.form,
        fixture_status: payload.fixture_status,
        home_score: payload.home_score,
        away_score: payload.away_score,
    };
    // A half-filled fixture is a bad response for this team only
    if !record.fixture_consistent() {
        return Err(FetchFailure::Malformed(format!(
            "{}: {} fixture with inconsistent scores",
            team.label(),
            record.fixture_status
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TeamEntry {
        TeamEntry {
            name: Some("Men's 1s".into()),
            team_id: Some("t-42".into()),
            comp_id: Some("c-7".into()),
            comp_label: Some("Men's Prem".into()),
        }
    }

    #[test]
    fn test_team_url() {
        let fetcher =
            HttpTeamFetcher::new("https://feed.example.com/api", None, Duration::from_secs(5))
                .unwrap();
        let url = fetcher.team_url(&entry()).unwrap();
        assert_eq!(url.as_str(), "https://feed.example.com/api/teams/t-42?comp=c-7");
    }

    #[test]
    fn test_classify_status() {
        let limited = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            "A",
        );
        assert_eq!(
            limited,
            FetchFailure::RateLimited {
                detail: "A (429 Too Many Requests)".into(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None, "A"),
            FetchFailure::NotFound("A".into())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "A"),
            FetchFailure::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, "A"),
            FetchFailure::Malformed(_)
        ));
    }

    #[test]
    fn test_retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_parse_payload_keys_by_team_map() {
        let body = r#"{
            "teamName": "St Albans 1",
            "stats": {"played":3,"won":2,"drawn":0,"lost":1,"points":6,"pointsPerGame":"2.00"},
            "form": ["Win", "Loss", "Win"],
            "fixtureStatus": "Played",
            "homeScore": 2,
            "awayScore": 1
        }"#;
        let record = parse_team_payload(&entry(), body).unwrap();
        assert_eq!(record.team_key, "t-42");
        assert_eq!(record.display_name, "St Albans 1");
        assert_eq!(record.competition_label, "Men's Prem");
        assert_eq!(record.stats.points_per_game, Some(2.0));
        assert_eq!(record.form[0], FormResult::Win);
    }

    #[test]
    fn test_parse_payload_falls_back_to_configured_name() {
        let body = r#"{
            "stats": {"played":0,"won":0,"drawn":0,"lost":0,"points":0,"pointsPerGame":0},
            "fixtureStatus": "Scheduled"
        }"#;
        let record = parse_team_payload(&entry(), body).unwrap();
        assert_eq!(record.display_name, "Men's 1s");
    }

    #[test]
    fn test_parse_payload_malformed() {
        let err = parse_team_payload(&entry(), "<html>").unwrap_err();
        assert!(matches!(err, FetchFailure::Malformed(_)));
    }

    #[test]
    fn test_parse_payload_played_without_score_is_malformed() {
        let body = r#"{
            "stats": {"played":4,"won":3,"drawn":0,"lost":1,"points":9,"pointsPerGame":2.25},
            "fixtureStatus": "Played",
            "homeScore": 3
        }"#;
        let err = parse_team_payload(&entry(), body).unwrap_err();
        assert_eq!(err.kind(), crate::fetch::FailureKind::Malformed);
    }
}
