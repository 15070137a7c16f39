use crate::source::{TaskSource, UpstreamError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wv_core::normalize::{
    normalize_member, normalize_task, normalize_team, Normalized, RecordSkipped,
};
use wv_storage::{StorageError, WorkloadStore};

pub const DEFAULT_MAX_PAGES: u32 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Teams,
    Members,
    Tasks,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Teams => "teams",
            SyncPhase::Members => "members",
            SyncPhase::Tasks => "tasks",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream unavailable during {phase} sync{}: {source}", page_suffix(.page))]
    UpstreamUnavailable {
        phase: SyncPhase,
        page: Option<u32>,
        #[source]
        source: UpstreamError,
    },
    #[error("upstream returned no {phase} for org {org_id}")]
    UpstreamEmpty { phase: SyncPhase, org_id: String },
    #[error("task pagination exceeded {max_pages} pages without an empty page")]
    PaginationLimit { max_pages: u32 },
    #[error("storage error during {phase} sync: {source}")]
    Storage {
        phase: SyncPhase,
        #[source]
        source: StorageError,
    },
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "configuration_error",
            SyncError::UpstreamUnavailable { .. } | SyncError::PaginationLimit { .. } => {
                "upstream_unavailable"
            }
            SyncError::UpstreamEmpty { .. } => "upstream_empty",
            SyncError::Storage { .. } => "storage_error",
        }
    }
}

fn page_suffix(page: &Option<u32>) -> String {
    page.map(|page| format!(" (page {page})")).unwrap_or_default()
}

/// A failed run together with everything already committed before the failure.
/// Committed rows are not rolled back.
#[derive(Debug, Error)]
#[error("{error} (committed {} tasks before failing)", .committed.tasks.processed)]
pub struct PartialSync {
    pub committed: SyncReport,
    #[source]
    pub error: SyncError,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TeamSyncReport {
    pub teams: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MemberSyncReport {
    pub members: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskSyncReport {
    pub pages: u32,
    pub processed: usize,
    pub skipped: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub teams: TeamSyncReport,
    pub members: MemberSyncReport,
    pub tasks: TaskSyncReport,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub org_id: Option<String>,
    pub max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            org_id: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

pub struct IngestionSync<S> {
    source: S,
    store: Arc<Mutex<WorkloadStore>>,
    config: SyncConfig,
}

impl<S: TaskSource> IngestionSync<S> {
    pub fn new(source: S, store: Arc<Mutex<WorkloadStore>>, config: SyncConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    fn org_id(&self) -> Result<&str, SyncError> {
        self.config
            .org_id
            .as_deref()
            .map(str::trim)
            .filter(|org_id| !org_id.is_empty())
            .ok_or_else(|| SyncError::Configuration("no upstream org id configured".to_string()))
    }

    /// Runs teams, members and tasks strictly in that order, stopping at the first failure.
    pub async fn sync_all(&self) -> Result<SyncReport, PartialSync> {
        let mut report = SyncReport::default();

        report.teams = self.sync_teams().await.map_err(|error| PartialSync {
            committed: report.clone(),
            error,
        })?;
        report.members = self.sync_members().await.map_err(|error| PartialSync {
            committed: report.clone(),
            error,
        })?;
        report.tasks = self.sync_tasks().await.map_err(|partial| PartialSync {
            committed: SyncReport {
                tasks: partial.committed.tasks,
                ..report.clone()
            },
            error: partial.error,
        })?;

        info!(
            event = "sync_complete",
            teams = report.teams.teams,
            members = report.members.members,
            tasks = report.tasks.processed
        );
        Ok(report)
    }

    pub async fn sync_teams(&self) -> Result<TeamSyncReport, SyncError> {
        let phase = SyncPhase::Teams;
        let org_id = self.org_id()?;
        info!(event = "sync_phase_start", phase = %phase, org_id);

        let spaces = self.source.list_spaces(org_id).await.map_err(|source| {
            upstream_failure(phase, None, source)
        })?;
        if spaces.is_empty() {
            error!(event = "sync_upstream_empty", phase = %phase, org_id);
            return Err(SyncError::UpstreamEmpty {
                phase,
                org_id: org_id.to_string(),
            });
        }

        let mut report = TeamSyncReport::default();
        {
            let store = self.store.lock();
            for space in &spaces {
                let Some(team) = accept(phase, normalize_team(space)) else {
                    report.skipped += 1;
                    continue;
                };
                store
                    .upsert_team(&team.record)
                    .map_err(|source| SyncError::Storage { phase, source })?;
                report.teams += 1;
            }
        }

        info!(event = "sync_phase_done", phase = %phase, teams = report.teams, skipped = report.skipped);
        Ok(report)
    }

    pub async fn sync_members(&self) -> Result<MemberSyncReport, SyncError> {
        let phase = SyncPhase::Members;
        let org_id = self.org_id()?;
        info!(event = "sync_phase_start", phase = %phase, org_id);

        let roster = self.source.list_members(org_id).await.map_err(|source| {
            upstream_failure(phase, None, source)
        })?;

        let mut report = MemberSyncReport::default();
        {
            let store = self.store.lock();
            for entry in &roster {
                let Some(member) = accept(phase, normalize_member(entry)) else {
                    report.skipped += 1;
                    continue;
                };
                store
                    .upsert_member(&member.record)
                    .map_err(|source| SyncError::Storage { phase, source })?;
                report.members += 1;
            }
        }

        info!(event = "sync_phase_done", phase = %phase, members = report.members, skipped = report.skipped);
        Ok(report)
    }

    /// Pages through the task listing from page 0 until an empty page, upserting
    /// each page before requesting the next.
    pub async fn sync_tasks(&self) -> Result<TaskSyncReport, PartialSync> {
        let phase = SyncPhase::Tasks;
        let mut report = TaskSyncReport::default();
        let org_id = self
            .org_id()
            .map_err(|error| partial_tasks(report.clone(), error))?;
        info!(event = "sync_phase_start", phase = %phase, org_id);

        let mut page = 0u32;
        loop {
            if page >= self.config.max_pages {
                error!(event = "sync_page_limit", phase = %phase, max_pages = self.config.max_pages);
                return Err(partial_tasks(
                    report,
                    SyncError::PaginationLimit {
                        max_pages: self.config.max_pages,
                    },
                ));
            }

            let tasks = match self.source.list_tasks(org_id, page).await {
                Ok(tasks) => tasks,
                Err(source) => {
                    return Err(partial_tasks(
                        report,
                        upstream_failure(phase, Some(page), source),
                    ))
                }
            };
            if tasks.is_empty() {
                break;
            }

            {
                let store = self.store.lock();
                for raw in &tasks {
                    let Some(task) = accept(phase, normalize_task(raw)) else {
                        report.skipped += 1;
                        continue;
                    };
                    report.anomalies += task.anomalies.len();
                    if let Err(source) = store.upsert_task(&task.record) {
                        error!(event = "sync_store_failed", phase = %phase, page, task_id = %task.record.id, error = %source);
                        return Err(partial_tasks(report, SyncError::Storage { phase, source }));
                    }
                    report.processed += 1;
                }
            }

            report.pages += 1;
            debug!(event = "sync_page_done", phase = %phase, page, tasks = tasks.len(), processed = report.processed);
            page += 1;
        }

        info!(
            event = "sync_phase_done",
            phase = %phase,
            pages = report.pages,
            processed = report.processed,
            skipped = report.skipped,
            anomalies = report.anomalies
        );
        Ok(report)
    }
}

fn accept<T>(
    phase: SyncPhase,
    normalized: Result<Normalized<T>, RecordSkipped>,
) -> Option<Normalized<T>> {
    match normalized {
        Ok(normalized) => {
            for anomaly in &normalized.anomalies {
                debug!(event = "field_anomaly", phase = %phase, field = anomaly.field, detail = %anomaly.detail);
            }
            Some(normalized)
        }
        Err(skipped) => {
            warn!(event = "record_skipped", phase = %phase, reason = %skipped.reason);
            None
        }
    }
}

fn upstream_failure(phase: SyncPhase, page: Option<u32>, source: UpstreamError) -> SyncError {
    error!(event = "sync_upstream_failed", phase = %phase, page = ?page, error = %source);
    SyncError::UpstreamUnavailable {
        phase,
        page,
        source,
    }
}

fn partial_tasks(tasks: TaskSyncReport, error: SyncError) -> PartialSync {
    PartialSync {
        committed: SyncReport {
            tasks,
            ..SyncReport::default()
        },
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_match_taxonomy() {
        assert_eq!(
            SyncError::Configuration("x".to_string()).kind(),
            "configuration_error"
        );
        assert_eq!(
            SyncError::UpstreamEmpty {
                phase: SyncPhase::Teams,
                org_id: "1".to_string()
            }
            .kind(),
            "upstream_empty"
        );
        assert_eq!(
            SyncError::PaginationLimit { max_pages: 3 }.kind(),
            "upstream_unavailable"
        );
    }

    #[test]
    fn upstream_error_message_names_phase_and_page() {
        let err = SyncError::UpstreamUnavailable {
            phase: SyncPhase::Tasks,
            page: Some(3),
            source: UpstreamError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "upstream unavailable during tasks sync (page 3): upstream error 502: bad gateway"
        );

        let err = SyncError::UpstreamUnavailable {
            phase: SyncPhase::Teams,
            page: None,
            source: UpstreamError::Timeout("20s".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "upstream unavailable during teams sync: upstream request timed out: 20s"
        );
    }
}
