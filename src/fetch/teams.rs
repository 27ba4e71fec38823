use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One configured team, as saved by the competitions lookup
/// (`teamCompIDs.json`). Unknown fields such as the competition option list
/// are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub comp_id: Option<String>,
    #[serde(default)]
    pub comp_label: Option<String>,
}

impl TeamEntry {
    /// Stable key: the upstream team id, falling back to the configured name.
    pub fn key(&self) -> Option<&str> {
        non_blank(self.team_id.as_deref()).or_else(|| non_blank(self.name.as_deref()))
    }

    pub fn label(&self) -> &str {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.team_id.as_deref()))
            .unwrap_or("Unknown Team")
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Load the team map. Any structural problem is a fatal configuration error:
/// nothing is fetched from a map we cannot trust.
pub fn load_team_map(path: &Path) -> Result<Vec<TeamEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read team map {}", path.display()))?;
    parse_team_map(&raw).with_context(|| format!("Invalid team map {}", path.display()))
}

pub fn parse_team_map(raw: &str) -> Result<Vec<TeamEntry>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("team map is not valid JSON")?;
    if !value.is_array() {
        anyhow::bail!("team map must contain a list of team objects");
    }
    let teams: Vec<TeamEntry> =
        serde_json::from_value(value).context("team map entries must be objects")?;
    if teams.is_empty() {
        anyhow::bail!("team map is empty");
    }

    let mut seen = HashSet::new();
    for (idx, team) in teams.iter().enumerate() {
        let key = team
            .key()
            .with_context(|| format!("entry {} has neither teamId nor name", idx + 1))?;
        if !seen.insert(key.to_string()) {
            anyhow::bail!("duplicate team key '{}' at entry {}", key, idx + 1);
        }
    }
    Ok(teams)
}
