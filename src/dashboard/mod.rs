use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::db::models::{Generation, Snapshot};
use crate::db::{CycleRecord, RejectedSnapshot, SnapshotStore};
use crate::sync::trends::{ordered_trends, TrendEntry};

#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Build the read-only display API.
///
/// With a static directory the front-end is served from disk, otherwise the
/// embedded league table page is used.
pub fn router(state: AppState, static_dir: Option<&str>) -> Router {
    let api = Router::new()
        .route("/api/snapshots/:slot", get(snapshot_handler))
        .route("/api/trends", get(trends_handler))
        .route("/api/cycles", get(cycles_handler))
        .route("/api/rejected", get(rejected_handler));

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api.route("/", get(index_handler)),
    };

    app.layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn index_handler() -> Html<&'static str> {
    Html(LEAGUE_HTML)
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// GET /api/snapshots/{current|previous|last-gameweek}
async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
    Path(slot): Path<String>,
) -> ApiResult<Snapshot> {
    let generation = match Generation::parse(&slot) {
        Some(g) if g != Generation::Candidate => g,
        _ => return Err((StatusCode::BAD_REQUEST, format!("unknown slot '{}'", slot))),
    };
    match state.store.read(generation).map_err(internal)? {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no {} snapshot published yet", generation),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    pub baseline: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsResponse {
    pub baseline: Generation,
    pub has_baseline: bool,
    pub trends: Vec<TrendEntry>,
}

/// GET /api/trends?baseline=previous|last-gameweek
///
/// A missing baseline yields all-Steady entries, never an error.
async fn trends_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendsQuery>,
) -> ApiResult<TrendsResponse> {
    let baseline = match query.baseline.as_deref() {
        None => Generation::Previous,
        Some(s) => match Generation::parse(s) {
            Some(g @ (Generation::Previous | Generation::LastGameweek)) => g,
            _ => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    format!("baseline must be previous or last-gameweek, got '{}'", s),
                ))
            }
        },
    };

    let (current, previous) = state
        .store
        .read_pair(Generation::Current, baseline)
        .map_err(internal)?;
    let current = current.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            "no current snapshot published yet".to_string(),
        )
    })?;

    Ok(Json(TrendsResponse {
        baseline,
        has_baseline: previous.is_some(),
        trends: ordered_trends(&current, previous.as_ref()),
    }))
}

/// GET /api/cycles
async fn cycles_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<CycleRecord>> {
    state.store.list_cycles(50).map(Json).map_err(internal)
}

/// GET /api/rejected
async fn rejected_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<RejectedSnapshot>> {
    state.store.list_rejected(20).map(Json).map_err(internal)
}

/// Embedded league table (HTML + CSS + JS)
const LEAGUE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>League Table</title>
<style>
  :root { --bg: #0f1117; --card: #1a1d27; --border: #2a2d3a; --green: #00c896; --red: #ff4f6a; --text: #e0e0e0; --muted: #8888aa; }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; padding: 2rem; }
  h1 { font-size: 1.6rem; margin-bottom: 0.25rem; }
  #updated { color: var(--muted); font-size: 0.85rem; margin-bottom: 1.5rem; }
  table { width: 100%; border-collapse: collapse; background: var(--card); border: 1px solid var(--border); }
  th, td { padding: 0.6rem 0.9rem; text-align: left; border-bottom: 1px solid var(--border); }
  th { color: var(--muted); font-weight: 600; font-size: 0.8rem; text-transform: uppercase; }
  td.num { text-align: right; font-variant-numeric: tabular-nums; }
  .Up { color: var(--green); }
  .Down { color: var(--red); }
  .Steady { color: var(--muted); }
</style>
</head>
<body>
<h1>League Table</h1>
<div id="updated">Loading…</div>
<table>
  <thead><tr><th>#</th><th></th><th>Team</th><th>P</th><th>W</th><th>D</th><th>L</th><th>Pts</th><th>PPG</th></tr></thead>
  <tbody id="rows"></tbody>
</table>
<script>
const ARROWS = { Up: '▲', Down: '▼', Steady: '–' };

async function load() {
  const [snapRes, trendRes] = await Promise.all([
    fetch('/api/snapshots/current'),
    fetch('/api/trends'),
  ]);
  if (!snapRes.ok || !trendRes.ok) {
    document.getElementById('updated').textContent = 'No table published yet';
    return;
  }
  const snapshot = await snapRes.json();
  const { trends } = await trendRes.json();
  const byKey = Object.fromEntries(snapshot.teams.map(t => [t.teamKey, t]));

  document.getElementById('updated').textContent =
    'Updated ' + new Date(snapshot.snapshotDate).toLocaleString();
  const rows = trends.map(e => {
    const t = byKey[e.teamKey];
    const s = t.stats;
    const ppg = s.pointsPerGame == null ? '–' : s.pointsPerGame.toFixed(2);
    const tr = document.createElement('tr');
    const cells = [
      [String(e.currentRank), ''],
      [ARROWS[e.trend], e.trend],
      [t.displayName, ''],
      [s.played, 'num'], [s.won, 'num'], [s.drawn, 'num'], [s.lost, 'num'],
      [s.points, 'num'], [ppg, 'num'],
    ];
    for (const [text, cls] of cells) {
      const td = document.createElement('td');
      td.textContent = String(text);
      if (cls) td.className = cls;
      tr.appendChild(td);
    }
    return tr;
  });
  document.getElementById('rows').replaceChildren(...rows);
}

load();
setInterval(load, 60000);
</script>
</body>
</html>
"#;
