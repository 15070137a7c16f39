use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use wv_core::time::{day_bounds, parse_date, DATE_FORMAT};
use wv_core::workload::{
    group_by_assignee, sort_workloads, summarize, summarize_assignee, AssigneeWorkload,
    WorkloadRange, WorkloadSummary, WorkloadThresholds,
};
use wv_core::{SortDirection, TaskRecord};
use wv_storage::{StorageError, TaskFilter, WorkloadStore};

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WorkloadError {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadError::InvalidRange(_) => "invalid_range",
            WorkloadError::InvalidFilter(_) => "invalid_filter",
            WorkloadError::Storage(_) => "storage_error",
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Query-string shaped input, exactly as the caller supplied it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkloadQuery {
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadQuery {
    pub assignee: Option<String>,
    pub range: Option<(NaiveDate, NaiveDate)>,
    pub sort: SortDirection,
}

impl WorkloadQuery {
    /// Validates raw inputs. Dates must be `YYYY-MM-DD`; an `end` without a
    /// `start` is rejected, a `start` without an `end` runs through `today`.
    pub fn parse(raw: &RawWorkloadQuery, today: NaiveDate) -> Result<Self, WorkloadError> {
        let assignee = non_blank(raw.assignee.as_deref()).map(str::to_string);
        let sort = match non_blank(raw.sort.as_deref()) {
            None => SortDirection::default(),
            Some(value) => value
                .parse::<SortDirection>()
                .map_err(WorkloadError::InvalidFilter)?,
        };

        let start = non_blank(raw.start.as_deref())
            .map(|value| parse_boundary("start", value))
            .transpose()?;
        let end = non_blank(raw.end.as_deref())
            .map(|value| parse_boundary("end", value))
            .transpose()?;

        let range = match (start, end) {
            (None, None) => None,
            (None, Some(_)) => {
                return Err(WorkloadError::InvalidRange(
                    "end supplied without start".to_string(),
                ))
            }
            (Some(start), end) => {
                let end = end.unwrap_or(today);
                if end < start {
                    return Err(WorkloadError::InvalidRange(format!(
                        "end {end} precedes start {start}"
                    )));
                }
                Some((start, end))
            }
        };

        Ok(Self {
            assignee,
            range,
            sort,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_boundary(name: &str, value: &str) -> Result<NaiveDate, WorkloadError> {
    parse_date(value).map_err(|err| {
        WorkloadError::InvalidRange(format!(
            "{name} {value:?} is not a {DATE_FORMAT} date: {err}"
        ))
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum WorkloadView {
    Assignee {
        range: Option<WorkloadRange>,
        workload: AssigneeWorkload,
    },
    Breakdown {
        range: Option<WorkloadRange>,
        sort: SortDirection,
        summary: WorkloadSummary,
        assignees: Vec<AssigneeWorkload>,
    },
}

pub struct WorkloadAggregator {
    store: Arc<Mutex<WorkloadStore>>,
    clock: Arc<dyn Clock>,
    thresholds: WorkloadThresholds,
    offset: FixedOffset,
}

impl WorkloadAggregator {
    pub fn new(
        store: Arc<Mutex<WorkloadStore>>,
        clock: Arc<dyn Clock>,
        thresholds: WorkloadThresholds,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            clock,
            thresholds,
            offset,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }

    pub fn parse_query(&self, raw: &RawWorkloadQuery) -> Result<WorkloadQuery, WorkloadError> {
        WorkloadQuery::parse(raw, self.today())
    }

    fn filter_for(&self, query: &WorkloadQuery) -> TaskFilter {
        let (start, end) = match query.range {
            Some((start, end)) => (
                Some(day_bounds(start, &self.offset).0.with_timezone(&Utc)),
                Some(day_bounds(end, &self.offset).1.with_timezone(&Utc)),
            ),
            None => (None, None),
        };
        TaskFilter {
            assignee_id: query.assignee.clone(),
            start,
            end,
        }
    }

    pub fn tasks(&self, query: &WorkloadQuery) -> Result<Vec<TaskRecord>, WorkloadError> {
        let filter = self.filter_for(query);
        let tasks = self.store.lock().list_tasks(&filter)?;
        Ok(tasks)
    }

    /// Single-assignee summary when the query names an assignee, otherwise a
    /// per-assignee breakdown ordered by total hours in the requested direction.
    pub fn compute_workload(&self, query: &WorkloadQuery) -> Result<WorkloadView, WorkloadError> {
        let tasks = self.tasks(query)?;
        let range = query
            .range
            .map(|(start, end)| WorkloadRange::new(start, end));
        debug!(
            event = "workload_query",
            assignee = ?query.assignee,
            tasks = tasks.len(),
            ranged = range.is_some()
        );

        let with_expected = |workload: AssigneeWorkload| match range {
            Some(range) => workload.with_expected_hours(range.expected_hours),
            None => workload,
        };

        if let Some(assignee) = query.assignee.as_deref() {
            let workload = with_expected(summarize_assignee(assignee, &tasks, &self.thresholds));
            return Ok(WorkloadView::Assignee { range, workload });
        }

        let mut assignees = group_by_assignee(&tasks, &self.thresholds)
            .into_iter()
            .map(with_expected)
            .collect::<Vec<_>>();
        sort_workloads(&mut assignees, query.sort);
        let summary = summarize(&assignees);

        Ok(WorkloadView::Breakdown {
            range,
            sort: query.sort,
            summary,
            assignees,
        })
    }

    pub fn compute_raw(&self, raw: &RawWorkloadQuery) -> Result<WorkloadView, WorkloadError> {
        let query = self.parse_query(raw)?;
        self.compute_workload(&query)
    }
}
