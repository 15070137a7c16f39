use crate::time::epoch_millis_to_datetime;
use crate::upstream::{value_as_id, UpstreamMember, UpstreamSpace, UpstreamTask};
use crate::{Assignee, Member, TaskRecord, TaskStatus, Team, DEFAULT_MEMBER_ROLE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Upper bound for a single tracked or estimated duration (ten years).
pub const MAX_DURATION_MS: i64 = 10 * 366 * 24 * 3600 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record skipped: {reason}")]
pub struct RecordSkipped {
    pub reason: String,
}

impl RecordSkipped {
    fn missing_id(kind: &str) -> Self {
        Self {
            reason: format!("{kind} payload has no usable id"),
        }
    }
}

/// A field that was present upstream but could not be used as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldAnomaly {
    pub field: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub record: T,
    pub anomalies: Vec<FieldAnomaly>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateTyping {
    NumberOrNumericString,
    NumberOnly,
}

#[derive(Default)]
struct FieldReader {
    anomalies: Vec<FieldAnomaly>,
}

impl FieldReader {
    fn flag(&mut self, field: &'static str, detail: impl Into<String>) {
        self.anomalies.push(FieldAnomaly {
            field,
            detail: detail.into(),
        });
    }

    fn text(&mut self, field: &'static str, value: Option<&Value>) -> String {
        match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => {
                self.flag(field, format!("expected text, found {}", type_name(other)));
                String::new()
            }
        }
    }

    fn optional_id(&mut self, field: &'static str, value: Option<&Value>) -> Option<String> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => map.get("id").and_then(value_as_id),
            Some(other) => {
                let id = value_as_id(other);
                if id.is_none() {
                    self.flag(field, format!("unusable id {}", type_name(other)));
                }
                id
            }
        }
    }

    fn duration_seconds(&mut self, field: &'static str, value: Option<&Value>) -> Option<i64> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_f64().filter(|ms| ms.is_finite()) {
                Some(ms) if ms < 0.0 => {
                    self.flag(field, format!("negative duration {n}"));
                    None
                }
                Some(ms) if ms > MAX_DURATION_MS as f64 => {
                    self.flag(field, format!("duration {n} exceeds {MAX_DURATION_MS} ms"));
                    None
                }
                Some(ms) => Some(ms.trunc() as i64 / 1000),
                None => {
                    self.flag(field, format!("non-finite duration {n}"));
                    None
                }
            },
            Some(other) => {
                self.flag(
                    field,
                    format!("expected millisecond count, found {}", type_name(other)),
                );
                None
            }
        }
    }

    fn instant(
        &mut self,
        field: &'static str,
        value: Option<&Value>,
        typing: DateTyping,
    ) -> Option<DateTime<Utc>> {
        let millis = match value {
            None | Some(Value::Null) => return None,
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) if typing == DateTyping::NumberOrNumericString => {
                s.trim().parse::<i64>().ok()
            }
            Some(other) => {
                self.flag(
                    field,
                    format!("expected epoch milliseconds, found {}", type_name(other)),
                );
                return None;
            }
        };

        match millis.and_then(epoch_millis_to_datetime) {
            Some(instant) => Some(instant),
            None => {
                self.flag(field, "unparsable epoch milliseconds");
                None
            }
        }
    }

    fn percent(&mut self, field: &'static str, value: Option<&Value>) -> Option<f64> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(p) if (0.0..=100.0).contains(&p) => Some(p),
                _ => {
                    self.flag(field, format!("percent out of range {n}"));
                    None
                }
            },
            Some(other) => {
                self.flag(field, format!("expected number, found {}", type_name(other)));
                None
            }
        }
    }

    fn status(&mut self, value: Option<&Value>) -> TaskStatus {
        match value {
            None | Some(Value::Null) => TaskStatus::default(),
            Some(Value::String(name)) => TaskStatus {
                name: name.clone(),
                ..TaskStatus::default()
            },
            Some(Value::Object(map)) => TaskStatus {
                name: self.text("status.status", map.get("status")),
                kind: self.text("status.type", map.get("type")),
                color: self.text("status.color", map.get("color")),
            },
            Some(other) => {
                self.flag("status", format!("expected object, found {}", type_name(other)));
                TaskStatus::default()
            }
        }
    }

    fn assignee(&mut self, assignees: Option<&Value>, creator: Option<&Value>) -> Assignee {
        let primary = match assignees {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => items.first(),
            Some(other) => {
                self.flag(
                    "assignees",
                    format!("expected list, found {}", type_name(other)),
                );
                None
            }
        };

        let source = primary.or(match creator {
            Some(Value::Null) => None,
            other => other,
        });

        match source {
            None => Assignee::default(),
            Some(Value::Object(map)) => Assignee {
                id: map.get("id").and_then(value_as_id).unwrap_or_default(),
                username: self.text("assignee.username", map.get("username")),
                email: self.text("assignee.email", map.get("email")),
                color: self.text("assignee.color", map.get("color")),
            },
            Some(other) => {
                self.flag(
                    "assignee",
                    format!("expected object, found {}", type_name(other)),
                );
                Assignee::default()
            }
        }
    }

    fn finish<T>(self, record: T) -> Normalized<T> {
        Normalized {
            record,
            anomalies: self.anomalies,
        }
    }
}

/// Maps one upstream task onto a [`TaskRecord`].
///
/// Only a missing id rejects the record. Every other unusable field is left
/// unset and reported in [`Normalized::anomalies`]. `start_date`/`due_date`
/// accept numeric strings (the upstream sends them that way); `date_done`
/// and `date_closed` are only read when numeric.
pub fn normalize_task(raw: &UpstreamTask) -> Result<Normalized<TaskRecord>, RecordSkipped> {
    let id = raw
        .id
        .as_ref()
        .and_then(value_as_id)
        .ok_or_else(|| RecordSkipped::missing_id("task"))?;

    let mut reader = FieldReader::default();
    let url = reader.text("url", raw.url.as_ref());
    let record = TaskRecord {
        id,
        name: reader.text("name", raw.name.as_ref()),
        description: reader.text("description", raw.description.as_ref()),
        status: reader.status(raw.status.as_ref()),
        assignee: reader.assignee(raw.assignees.as_ref(), raw.creator.as_ref()),
        time_estimate_seconds: reader.duration_seconds("time_estimate", raw.time_estimate.as_ref()),
        time_spent_seconds: reader.duration_seconds("time_spent", raw.time_spent.as_ref()),
        percent_complete: reader.percent("percent_complete", raw.percent_complete.as_ref()),
        start_date: reader.instant(
            "start_date",
            raw.start_date.as_ref(),
            DateTyping::NumberOrNumericString,
        ),
        due_date: reader.instant(
            "due_date",
            raw.due_date.as_ref(),
            DateTyping::NumberOrNumericString,
        ),
        date_done: reader.instant("date_done", raw.date_done.as_ref(), DateTyping::NumberOnly),
        date_closed: reader.instant(
            "date_closed",
            raw.date_closed.as_ref(),
            DateTyping::NumberOnly,
        ),
        space_id: reader.optional_id("space", raw.space.as_ref()),
        url: (!url.is_empty()).then_some(url),
    };

    Ok(reader.finish(record))
}

pub fn normalize_member(raw: &UpstreamMember) -> Result<Normalized<Member>, RecordSkipped> {
    let identity = raw.identity();
    let id = identity
        .id
        .as_ref()
        .and_then(value_as_id)
        .ok_or_else(|| RecordSkipped::missing_id("member"))?;

    let mut reader = FieldReader::default();
    let username = reader.text("username", identity.username.as_ref());
    let display_name = reader.text("name", identity.name.as_ref());
    let record = Member {
        id,
        name: if display_name.trim().is_empty() {
            username.clone()
        } else {
            display_name
        },
        username,
        email: reader.text("email", identity.email.as_ref()),
        color: reader.text("color", identity.color.as_ref()),
        role: DEFAULT_MEMBER_ROLE.to_string(),
        team_id: reader.optional_id("team_id", identity.team_id.as_ref()),
    };

    Ok(reader.finish(record))
}

pub fn normalize_team(raw: &UpstreamSpace) -> Result<Normalized<Team>, RecordSkipped> {
    let id = raw
        .id
        .as_ref()
        .and_then(value_as_id)
        .ok_or_else(|| RecordSkipped::missing_id("space"))?;

    let mut reader = FieldReader::default();
    let parent_id = match reader.optional_id("parent", raw.parent.as_ref()) {
        Some(parent) => Some(parent),
        None => reader.optional_id("parent_id", raw.parent_id.as_ref()),
    };
    let record = Team {
        id,
        name: reader.text("name", raw.name.as_ref()),
        parent_id,
    };

    Ok(reader.finish(record))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
