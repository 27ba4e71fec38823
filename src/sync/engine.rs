use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::merge::{merge, MergePolicy, MergeReport, Resolution};
use super::validate::{validate, ValidationOptions, ValidationResult};
use crate::db::{
    CycleRecord, PreparedPublish, PublishOptions, PublishOutcome, SnapshotStore, StoreError,
};
use crate::fetch::{fetch_all, FetchSettings, TeamEntry, TeamFetcher};

/// Terminal result of one sync cycle. Only `FatalConfigError` is a failure
/// from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleOutcome {
    Promoted,
    SkippedInvalid,
    SkippedRotationGuard,
    FatalConfigError,
}

impl CycleOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            CycleOutcome::FatalConfigError => 1,
            _ => 0,
        }
    }
}

impl From<PublishOutcome> for CycleOutcome {
    fn from(outcome: PublishOutcome) -> Self {
        match outcome {
            PublishOutcome::Promoted => CycleOutcome::Promoted,
            PublishOutcome::SkippedInvalid => CycleOutcome::SkippedInvalid,
            PublishOutcome::SkippedRotationGuard => CycleOutcome::SkippedRotationGuard,
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub rotate: bool,
    pub validation: ValidationOptions,
    pub merge: MergePolicy,
    pub keep_rejected: bool,
}

impl SyncSettings {
    /// Merge policy whose absent-team limit follows the shrink options: a
    /// shrink the validator would accept is dropped instead of carried.
    fn merge_policy(&self) -> MergePolicy {
        let limit = if self.validation.acknowledge_shrink {
            usize::MAX
        } else {
            self.validation.shrink_tolerance
        };
        MergePolicy {
            drop_absent_up_to: Some(limit),
            ..self.merge
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub merge: MergeReport,
    pub validation: ValidationResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    /// Whether the published slots changed, so exports need refreshing.
    pub fn published(&self) -> bool {
        matches!(
            self.outcome,
            CycleOutcome::Promoted | CycleOutcome::SkippedRotationGuard
        )
    }
}

/// Runs fetch → merge → validate → publish over one team list.
pub struct SyncEngine {
    store: SnapshotStore,
    fetcher: Arc<dyn TeamFetcher>,
    fetch: FetchSettings,
    settings: SyncSettings,
    cycle_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: SnapshotStore,
        fetcher: Arc<dyn TeamFetcher>,
        fetch: FetchSettings,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            fetch,
            settings,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one cycle. Cycles in this process never overlap; a second caller
    /// waits.
    ///
    /// Merge, validation and publish run inside the store's write
    /// transaction against the `current` slot as it is at that moment, so a
    /// cycle in another process that promoted during our fetch is the
    /// baseline we merge against. Dropping the returned future before it
    /// resolves publishes nothing.
    pub async fn run_cycle(&self, teams: &[TeamEntry]) -> Result<CycleReport, StoreError> {
        let _guard = self.cycle_lock.lock().await;
        let started_at = Utc::now();
        info!("Sync cycle started: {} team(s)", teams.len());

        let fresh = fetch_all(Arc::clone(&self.fetcher), teams, &self.fetch).await;

        let settings = &self.settings;
        let policy = settings.merge_policy();
        let (outcome, (report, validation)) =
            self.store.publish_against_current(|baseline| {
                let (candidate, report) = merge(&fresh, baseline.as_ref(), policy);
                let validation = validate(&candidate, baseline.as_ref(), &settings.validation);
                let prepared = PreparedPublish {
                    candidate,
                    validation: validation.clone(),
                    options: PublishOptions {
                        rotate: settings.rotate,
                        incomplete_fetch: report.has_fetch_failures(),
                        keep_rejected: settings.keep_rejected,
                    },
                };
                (prepared, (report, validation))
            })?;
        for violation in &validation.violations {
            warn!("Validation: {}", violation);
        }
        let outcome = CycleOutcome::from(outcome);

        let cycle = CycleRecord::new(started_at, &outcome.to_string(), &report, &validation);
        if let Err(e) = self.store.record_cycle(&cycle) {
            warn!("Failed to record sync cycle: {}", e);
        }

        info!(
            "Sync cycle finished: {} (fresh={}, rolled_back={}, fallback={}, missing={})",
            outcome,
            report.count(Resolution::FreshAccepted),
            report.count(Resolution::RolledBackToPrevious),
            report.count(Resolution::FallbackToPrevious),
            report.count(Resolution::CarriedOverMissing)
        );

        Ok(CycleReport {
            outcome,
            merge: report,
            validation,
            started_at,
            finished_at: cycle.finished_at,
        })
    }
}
