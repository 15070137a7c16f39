use crate::time::{business_days_between, expected_hours, seconds_to_hours};
use crate::{SortDirection, TaskRecord, WorkloadCategory};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hour thresholds for workload classification.
///
/// `normal_min`/`normal_max` are carried for display; classification only
/// consults `underload_max` and `overload_min`, everything in between
/// (including any gap around the normal band) is `normal`. No ordering is
/// enforced between the four values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorkloadThresholds {
    pub underload_max: f64,
    pub normal_min: f64,
    pub normal_max: f64,
    pub overload_min: f64,
}

impl Default for WorkloadThresholds {
    fn default() -> Self {
        Self {
            underload_max: 35.0,
            normal_min: 36.0,
            normal_max: 45.0,
            overload_min: 60.0,
        }
    }
}

impl WorkloadThresholds {
    pub fn classify(&self, total_hours: f64) -> WorkloadCategory {
        if total_hours <= self.underload_max {
            WorkloadCategory::Underload
        } else if total_hours >= self.overload_min {
            WorkloadCategory::Overload
        } else {
            WorkloadCategory::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub business_days: u32,
    pub expected_hours: f64,
}

impl WorkloadRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let business_days = business_days_between(start, end);
        Self {
            start,
            end,
            business_days,
            expected_hours: expected_hours(business_days),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssigneeWorkload {
    pub assignee_id: String,
    pub username: String,
    pub email: String,
    pub color: String,
    pub task_count: usize,
    pub total_hours: f64,
    pub hours_spent: f64,
    pub hours_estimated: f64,
    pub avg_percent_complete: f64,
    pub category: WorkloadCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilization_pct: Option<f64>,
}

impl AssigneeWorkload {
    /// Attaches `total_hours / expected_hours` as a percentage; no-op for an empty range.
    pub fn with_expected_hours(mut self, expected_hours: f64) -> Self {
        self.utilization_pct =
            (expected_hours > 0.0).then(|| self.total_hours / expected_hours * 100.0);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSummary {
    pub task_count: usize,
    pub total_hours: f64,
    pub assignee_count: usize,
    pub underloaded: usize,
    pub normal: usize,
    pub overloaded: usize,
}

#[derive(Debug, Clone, Default)]
struct WorkloadAccumulator {
    username: String,
    email: String,
    color: String,
    task_count: usize,
    contributed_seconds: i64,
    spent_seconds: i64,
    estimated_seconds: i64,
    percent_sum: f64,
    percent_count: usize,
}

impl WorkloadAccumulator {
    fn add(&mut self, task: &TaskRecord) {
        if self.task_count == 0 {
            self.username = task.assignee.username.clone();
            self.email = task.assignee.email.clone();
            self.color = task.assignee.color.clone();
        }
        self.task_count += 1;
        self.contributed_seconds = self
            .contributed_seconds
            .saturating_add(task.contributed_seconds().unwrap_or(0));
        self.spent_seconds = self
            .spent_seconds
            .saturating_add(task.time_spent_seconds.unwrap_or(0));
        self.estimated_seconds = self
            .estimated_seconds
            .saturating_add(task.time_estimate_seconds.unwrap_or(0));
        if let Some(percent) = task.percent_complete {
            self.percent_sum += percent;
            self.percent_count += 1;
        }
    }

    fn finish(self, assignee_id: String, thresholds: &WorkloadThresholds) -> AssigneeWorkload {
        let total_hours = seconds_to_hours(self.contributed_seconds);
        let avg_percent_complete = if self.percent_count == 0 {
            0.0
        } else {
            self.percent_sum / self.percent_count as f64
        };

        AssigneeWorkload {
            assignee_id,
            username: self.username,
            email: self.email,
            color: self.color,
            task_count: self.task_count,
            total_hours,
            hours_spent: seconds_to_hours(self.spent_seconds),
            hours_estimated: seconds_to_hours(self.estimated_seconds),
            avg_percent_complete,
            category: thresholds.classify(total_hours),
            utilization_pct: None,
        }
    }
}

/// Summarizes `tasks` as one assignee's workload, whoever they are assigned to.
pub fn summarize_assignee(
    assignee_id: &str,
    tasks: &[TaskRecord],
    thresholds: &WorkloadThresholds,
) -> AssigneeWorkload {
    let mut accumulator = WorkloadAccumulator::default();
    for task in tasks {
        accumulator.add(task);
    }
    accumulator.finish(assignee_id.to_string(), thresholds)
}

/// One entry per distinct assignee id, in ascending id order. Unassigned tasks
/// group under the empty id.
pub fn group_by_assignee(
    tasks: &[TaskRecord],
    thresholds: &WorkloadThresholds,
) -> Vec<AssigneeWorkload> {
    let mut groups: BTreeMap<&str, WorkloadAccumulator> = BTreeMap::new();
    for task in tasks {
        groups
            .entry(task.assignee.id.as_str())
            .or_default()
            .add(task);
    }

    groups
        .into_iter()
        .map(|(assignee_id, accumulator)| accumulator.finish(assignee_id.to_string(), thresholds))
        .collect()
}

/// Orders by total hours in `direction`; equal totals always fall back to ascending id.
pub fn sort_workloads(workloads: &mut [AssigneeWorkload], direction: SortDirection) {
    workloads.sort_by(|left, right| {
        let by_hours = match direction {
            SortDirection::Asc => left.total_hours.total_cmp(&right.total_hours),
            SortDirection::Desc => right.total_hours.total_cmp(&left.total_hours),
        };
        by_hours.then_with(|| left.assignee_id.cmp(&right.assignee_id))
    });
}

pub fn summarize(workloads: &[AssigneeWorkload]) -> WorkloadSummary {
    let mut summary = WorkloadSummary {
        assignee_count: workloads.len(),
        ..WorkloadSummary::default()
    };
    for workload in workloads {
        summary.task_count += workload.task_count;
        summary.total_hours += workload.total_hours;
        match workload.category {
            WorkloadCategory::Underload => summary.underloaded += 1,
            WorkloadCategory::Normal => summary.normal += 1,
            WorkloadCategory::Overload => summary.overloaded += 1,
        }
    }
    summary
}
