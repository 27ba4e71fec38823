use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::db::models::{Generation, Snapshot, TeamRecord};
use crate::db::SnapshotStore;
use crate::sync::trends::{ordered_trends, TrendEntry};

pub const CURRENT_FILE: &str = "teamData.json";
pub const PREVIOUS_FILE: &str = "teamData.prev.json";
pub const LAST_GAMEWEEK_FILE: &str = "teamData.lastgw.json";
pub const BUNDLE_FILE: &str = "league.json";

/// Everything a display needs in one request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeagueBundle<'a> {
    generated_at: DateTime<Utc>,
    current: Option<&'a [TeamRecord]>,
    previous: Option<&'a [TeamRecord]>,
    trends: Vec<TrendEntry>,
}

/// Write the published slots as static JSON files into `dir`.
///
/// Each file is replaced atomically, so a display polling the directory sees
/// either the old file or the new one. The per-slot files are replaced one
/// after another, so a reader may briefly pair a new `teamData.json` with an
/// old `teamData.prev.json`; `league.json` always holds a consistent
/// current/previous pair and is the file to read when both are needed. A slot
/// that has never been written has its file removed instead of left stale.
pub fn export_slots(store: &SnapshotStore, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let slots = store.read_all().context("Failed to read published snapshots")?;
    let mut written = Vec::new();

    for (file, snapshot) in [
        (CURRENT_FILE, slots.current.as_ref()),
        (PREVIOUS_FILE, slots.previous.as_ref()),
        (LAST_GAMEWEEK_FILE, slots.last_gameweek.as_ref()),
    ] {
        let path = dir.join(file);
        match snapshot {
            Some(snapshot) => {
                write_json_atomic(&path, &snapshot.teams)?;
                written.push(path);
            }
            None => remove_if_present(&path)?,
        }
    }

    let bundle = LeagueBundle {
        generated_at: Utc::now(),
        current: slots.current.as_ref().map(|s| s.teams.as_slice()),
        previous: slots.previous.as_ref().map(|s| s.teams.as_slice()),
        trends: slots
            .current
            .as_ref()
            .map(|c| ordered_trends(c, slots.previous.as_ref()))
            .unwrap_or_default(),
    };
    let bundle_path = dir.join(BUNDLE_FILE);
    write_json_atomic(&bundle_path, &bundle)?;
    written.push(bundle_path);

    info!("Exported {} file(s) to {}", written.len(), dir.display());
    Ok(written)
}

/// Read a published-format file (JSON array of team records).
pub fn read_snapshot_file(path: &Path, generation: Generation) -> Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let teams: Vec<TeamRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of team records", path.display()))?;
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(Snapshot {
        snapshot_date: modified,
        generation,
        teams,
    })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize export")?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    debug!("Wrote {} ({} bytes)", path.display(), json.len());
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
