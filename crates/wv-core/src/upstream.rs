//! Permissive decode targets for the upstream task-source payloads.
//!
//! The upstream API is inconsistent about field presence and typing across
//! endpoints and versions (ids as numbers or strings, dates as numbers or
//! numeric strings). Every field here is optional and loosely typed; the
//! [`crate::normalize`] functions turn these into canonical records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamTask {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub assignees: Option<Value>,
    #[serde(default)]
    pub creator: Option<Value>,
    #[serde(default)]
    pub time_estimate: Option<Value>,
    #[serde(default)]
    pub time_spent: Option<Value>,
    #[serde(default)]
    pub percent_complete: Option<Value>,
    #[serde(default)]
    pub start_date: Option<Value>,
    #[serde(default)]
    pub due_date: Option<Value>,
    #[serde(default)]
    pub date_done: Option<Value>,
    #[serde(default)]
    pub date_closed: Option<Value>,
    #[serde(default)]
    pub space: Option<Value>,
    #[serde(default)]
    pub url: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamTaskPage {
    #[serde(default)]
    pub tasks: Vec<UpstreamTask>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamSpace {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub parent: Option<Value>,
    #[serde(default)]
    pub parent_id: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamSpaceList {
    #[serde(default)]
    pub spaces: Vec<UpstreamSpace>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamUser {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub username: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
    #[serde(default)]
    pub color: Option<Value>,
    #[serde(default)]
    pub team_id: Option<Value>,
}

/// Roster entry. Some endpoints wrap the identity as `{ "user": {...} }`,
/// others return it flat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamMember {
    #[serde(default)]
    pub user: Option<UpstreamUser>,
    #[serde(flatten)]
    pub flat: UpstreamUser,
}

impl UpstreamMember {
    pub fn identity(&self) -> &UpstreamUser {
        self.user.as_ref().unwrap_or(&self.flat)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamWorkspace {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub members: Vec<UpstreamMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamWorkspaceList {
    #[serde(default)]
    pub teams: Vec<UpstreamWorkspace>,
}

/// Renders a string-or-number identifier; anything else is `None`.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_decode_tolerates_mixed_types() {
        let task: UpstreamTask = serde_json::from_value(json!({
            "id": 42,
            "name": "Quarterly report",
            "time_estimate": "not a number",
            "due_date": "1708995600000",
            "unexpected": {"nested": true}
        }))
        .expect("permissive decode");

        assert_eq!(task.id.as_ref().and_then(value_as_id), Some("42".to_string()));
        assert_eq!(task.time_estimate, Some(json!("not a number")));
        assert!(task.assignees.is_none());
    }

    #[test]
    fn member_identity_unwraps_user_wrapper() {
        let wrapped: UpstreamMember = serde_json::from_value(json!({
            "user": {"id": 7, "username": "ada"}
        }))
        .expect("wrapped member");
        assert_eq!(wrapped.identity().username, Some(json!("ada")));

        let flat: UpstreamMember =
            serde_json::from_value(json!({"id": "8", "username": "grace"})).expect("flat member");
        assert_eq!(flat.identity().id, Some(json!("8")));
    }

    #[test]
    fn task_page_needs_only_the_task_list() {
        let page: UpstreamTaskPage =
            serde_json::from_value(json!({"tasks": [{"id": "t1"}], "last_page": true}))
                .expect("page with paging flag");
        assert_eq!(page.tasks.len(), 1);

        let empty: UpstreamTaskPage = serde_json::from_value(json!({})).expect("bare page");
        assert!(empty.tasks.is_empty());
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(value_as_id(&json!("  ")), None);
        assert_eq!(value_as_id(&json!(null)), None);
        assert_eq!(value_as_id(&json!({"id": 1})), None);
    }
}
