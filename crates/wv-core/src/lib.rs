pub mod normalize;
pub mod time;
pub mod upstream;
pub mod workload;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MEMBER_ROLE: &str = "employee";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub color: String,
}

/// Denormalized snapshot of the primary assignee at the time of the last sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignee {
    pub id: String,
    pub username: String,
    pub email: String,
    pub color: String,
}

impl Assignee {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
            && self.username.is_empty()
            && self.email.is_empty()
            && self.color.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Assignee,
    #[serde(default)]
    pub time_estimate_seconds: Option<i64>,
    #[serde(default)]
    pub time_spent_seconds: Option<i64>,
    #[serde(default)]
    pub percent_complete: Option<f64>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_done: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_closed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl TaskRecord {
    /// Seconds this task contributes to workload: time spent, else the estimate.
    pub fn contributed_seconds(&self) -> Option<i64> {
        self.time_spent_seconds.or(self.time_estimate_seconds)
    }

    /// The instant a date-range filter is matched against.
    pub fn range_anchor(&self) -> Option<DateTime<Utc>> {
        self.due_date.or(self.start_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub color: String,
    pub role: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadCategory {
    Underload,
    Normal,
    Overload,
}

impl WorkloadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadCategory::Underload => "underload",
            WorkloadCategory::Normal => "normal",
            WorkloadCategory::Overload => "overload",
        }
    }
}

impl fmt::Display for WorkloadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadCategory {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "underload" | "underloaded" => Ok(WorkloadCategory::Underload),
            "normal" => Ok(WorkloadCategory::Normal),
            "overload" | "overloaded" => Ok(WorkloadCategory::Overload),
            other => Err(format!("Unknown workload category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for SortDirection {
    fn default() -> Self {
        Self::Desc
    }
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("Unknown sort direction: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contributed_seconds_prefers_time_spent() {
        let mut task = TaskRecord {
            id: "t1".to_string(),
            time_estimate_seconds: Some(1800),
            time_spent_seconds: Some(3600),
            ..Default::default()
        };
        assert_eq!(task.contributed_seconds(), Some(3600));

        task.time_spent_seconds = None;
        assert_eq!(task.contributed_seconds(), Some(1800));

        task.time_estimate_seconds = None;
        assert_eq!(task.contributed_seconds(), None);
    }

    #[test]
    fn sort_direction_parses_case_insensitively() {
        assert_eq!("ASC".parse::<SortDirection>(), Ok(SortDirection::Asc));
        assert_eq!(" desc ".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert!("sideways".parse::<SortDirection>().is_err());
        assert_eq!(SortDirection::default(), SortDirection::Desc);
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&WorkloadCategory::Overload).expect("serialize");
        assert_eq!(json, "\"overload\"");
        assert_eq!(
            "underloaded".parse::<WorkloadCategory>(),
            Ok(WorkloadCategory::Underload)
        );
    }
}
