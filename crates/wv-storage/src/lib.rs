use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use wv_core::time::epoch_millis_to_datetime;
use wv_core::{Assignee, Member, TaskRecord, TaskStatus, Team};

pub const WORKLOAD_SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Selection for [`WorkloadStore::list_tasks`]. Range bounds are inclusive and
/// matched against the due date, falling back to the start date; tasks with
/// neither are excluded once either bound is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub assignee_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Admin {
    pub fn verify_password(&self, password: &str) -> bool {
        password_hash(&self.username, password) == self.password_hash
    }
}

pub struct WorkloadStore {
    conn: Connection,
}

impl WorkloadStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > WORKLOAD_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: WORKLOAD_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_workload_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            debug!(event = "schema_migrated", version = 1);
        }

        Ok(())
    }

    pub fn upsert_team(&self, team: &Team) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO teams (id, name, parent_id, synced_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name=excluded.name,
                parent_id=excluded.parent_id,
                synced_at=excluded.synced_at
            ",
            params![team.id, team.name, team.parent_id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn upsert_member(&self, member: &Member) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO members (id, username, name, email, color, role, team_id, synced_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                username=excluded.username,
                name=excluded.name,
                email=excluded.email,
                color=excluded.color,
                role=excluded.role,
                team_id=excluded.team_id,
                synced_at=excluded.synced_at
            ",
            params![
                member.id,
                member.username,
                member.name,
                member.email,
                member.color,
                member.role,
                member.team_id,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_task(&self, task: &TaskRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO tasks (
                id,
                name,
                description,
                status_name,
                status_type,
                status_color,
                assignee_id,
                assignee_username,
                assignee_email,
                assignee_color,
                time_estimate_seconds,
                time_spent_seconds,
                percent_complete,
                start_date_ms,
                due_date_ms,
                date_done_ms,
                date_closed_ms,
                space_id,
                url,
                synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(id) DO UPDATE SET
                name=excluded.name,
                description=excluded.description,
                status_name=excluded.status_name,
                status_type=excluded.status_type,
                status_color=excluded.status_color,
                assignee_id=excluded.assignee_id,
                assignee_username=excluded.assignee_username,
                assignee_email=excluded.assignee_email,
                assignee_color=excluded.assignee_color,
                time_estimate_seconds=excluded.time_estimate_seconds,
                time_spent_seconds=excluded.time_spent_seconds,
                percent_complete=excluded.percent_complete,
                start_date_ms=excluded.start_date_ms,
                due_date_ms=excluded.due_date_ms,
                date_done_ms=excluded.date_done_ms,
                date_closed_ms=excluded.date_closed_ms,
                space_id=excluded.space_id,
                url=excluded.url,
                synced_at=excluded.synced_at
            ",
            params![
                task.id,
                task.name,
                task.description,
                task.status.name,
                task.status.kind,
                task.status.color,
                task.assignee.id,
                task.assignee.username,
                task.assignee.email,
                task.assignee.color,
                task.time_estimate_seconds,
                task.time_spent_seconds,
                task.percent_complete,
                task.start_date.map(|d| d.timestamp_millis()),
                task.due_date.map(|d| d.timestamp_millis()),
                task.date_done.map(|d| d.timestamp_millis()),
                task.date_closed.map(|d| d.timestamp_millis()),
                task.space_id,
                task.url,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE (?1 IS NULL OR assignee_id = ?1)
              AND (?2 IS NULL OR COALESCE(due_date_ms, start_date_ms) >= ?2)
              AND (?3 IS NULL OR COALESCE(due_date_ms, start_date_ms) <= ?3)
            ORDER BY id ASC
            "
        ))?;

        let rows = statement.query_map(
            params![
                filter.assignee_id,
                filter.start.map(|d| d.timestamp_millis()),
                filter.end.map(|d| d.timestamp_millis()),
            ],
            task_from_row,
        )?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub fn task(&self, task_id: &str) -> Result<Option<TaskRecord>, StorageError> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn task_synced_at(&self, task_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let synced_at: Option<String> = self
            .conn
            .query_row("SELECT synced_at FROM tasks WHERE id = ?1", [task_id], |row| {
                row.get(0)
            })
            .optional()?;
        synced_at.map(parse_timestamp).transpose()
    }

    pub fn task_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
    }

    pub fn list_members(&self) -> Result<Vec<Member>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT id, username, name, email, color, role, team_id
            FROM members
            ORDER BY username ASC, id ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(Member {
                id: row.get(0)?,
                username: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                color: row.get(4)?,
                role: row.get(5)?,
                team_id: row.get(6)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn list_teams(&self) -> Result<Vec<Team>, StorageError> {
        let mut statement = self
            .conn
            .prepare("SELECT id, name, parent_id FROM teams ORDER BY name ASC, id ASC")?;
        let rows = statement.query_map([], |row| {
            Ok(Team {
                id: row.get(0)?,
                name: row.get(1)?,
                parent_id: row.get(2)?,
            })
        })?;

        let mut teams = Vec::new();
        for row in rows {
            teams.push(row?);
        }
        Ok(teams)
    }

    pub fn upsert_admin(&self, username: &str, password: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO admins (username, password_hash, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(username) DO UPDATE SET password_hash=excluded.password_hash
            ",
            params![username, password_hash(username, password), now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_admin_by_username(&self, username: &str) -> Result<Admin, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT username, password_hash, created_at FROM admins WHERE username = ?1",
                [username],
                |row| {
                    let created_at = parse_timestamp(row.get::<_, String>(2)?).map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(err),
                        )
                    })?;
                    Ok(Admin {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                        created_at,
                    })
                },
            )
            .optional()?;

        row.ok_or_else(|| StorageError::NotFound {
            entity: "admin",
            key: username.to_string(),
        })
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

const TASK_COLUMNS: &str = "
    id, name, description, status_name, status_type, status_color,
    assignee_id, assignee_username, assignee_email, assignee_color,
    time_estimate_seconds, time_spent_seconds, percent_complete,
    start_date_ms, due_date_ms, date_done_ms, date_closed_ms, space_id, url
";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus {
            name: row.get(3)?,
            kind: row.get(4)?,
            color: row.get(5)?,
        },
        assignee: Assignee {
            id: row.get(6)?,
            username: row.get(7)?,
            email: row.get(8)?,
            color: row.get(9)?,
        },
        time_estimate_seconds: row.get(10)?,
        time_spent_seconds: row.get(11)?,
        percent_complete: row.get(12)?,
        start_date: millis_column(row, 13)?,
        due_date: millis_column(row, 14)?,
        date_done: millis_column(row, 15)?,
        date_closed: millis_column(row, 16)?,
        space_id: row.get(17)?,
        url: row.get(18)?,
    })
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(millis) = row.get::<_, Option<i64>>(idx)? else {
        return Ok(None);
    };
    epoch_millis_to_datetime(millis).map(Some).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(StorageError::Timestamp(format!(
                "epoch millis out of range: {millis}"
            ))),
        )
    })
}

/// Lowercase hex SHA-256 of `"{username}:{password}"`.
pub fn password_hash(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn sample_task(id: &str, assignee_id: &str) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            name: format!("task {id}"),
            description: "details".to_string(),
            status: TaskStatus {
                name: "in progress".to_string(),
                kind: "custom".to_string(),
                color: "#ffcc00".to_string(),
            },
            assignee: Assignee {
                id: assignee_id.to_string(),
                username: format!("user-{assignee_id}"),
                email: format!("{assignee_id}@example.com"),
                color: "#000".to_string(),
            },
            time_estimate_seconds: Some(1800),
            time_spent_seconds: Some(3600),
            percent_complete: Some(50.0),
            start_date: Some(ts(23, 9)),
            due_date: Some(ts(25, 17)),
            date_done: None,
            date_closed: None,
            space_id: Some("space-1".to_string()),
            url: None,
        }
    }

    #[test]
    fn migration_creates_workload_tables() {
        let db = WorkloadStore::open_in_memory().expect("open db");
        for table in ["teams", "members", "tasks", "admins"] {
            assert!(db.table_exists(table).expect("table check"));
        }
        assert_eq!(
            db.schema_version().expect("schema version"),
            WORKLOAD_SCHEMA_VERSION
        );
    }

    #[test]
    fn reopening_on_disk_store_keeps_rows() {
        let db_file = NamedTempFile::new().expect("temp db");
        {
            let store = WorkloadStore::open(db_file.path()).expect("open store");
            store.upsert_task(&sample_task("t1", "a")).expect("upsert");
        }
        let store = WorkloadStore::open(db_file.path()).expect("reopen store");
        assert_eq!(store.task_count().expect("count"), 1);
    }

    #[test]
    fn task_upsert_is_idempotent_and_last_write_wins() {
        let db = WorkloadStore::open_in_memory().expect("open db");
        let task = sample_task("t1", "a");

        db.upsert_task(&task).expect("first upsert");
        db.upsert_task(&task).expect("second upsert");
        assert_eq!(db.task_count().expect("count"), 1);
        assert_eq!(db.task("t1").expect("load"), Some(task.clone()));
        assert!(db.task_synced_at("t1").expect("synced_at").is_some());

        let mut changed = task.clone();
        changed.assignee = Assignee::default();
        changed.time_spent_seconds = None;
        changed.due_date = None;
        db.upsert_task(&changed).expect("overwrite");
        assert_eq!(db.task_count().expect("count"), 1);
        assert_eq!(db.task("t1").expect("load"), Some(changed));
    }

    #[test]
    fn list_tasks_filters_by_assignee_and_anchor_date() {
        let db = WorkloadStore::open_in_memory().expect("open db");

        let due_in_range = sample_task("t1", "a");

        let mut start_only = sample_task("t2", "a");
        start_only.due_date = None;
        start_only.start_date = Some(ts(24, 8));

        let mut undated = sample_task("t3", "a");
        undated.due_date = None;
        undated.start_date = None;

        let mut other_assignee = sample_task("t4", "b");
        other_assignee.due_date = Some(ts(26, 8));

        let mut out_of_range = sample_task("t5", "a");
        out_of_range.due_date = Some(ts(27, 8));
        // start is in range but the due date wins
        out_of_range.start_date = Some(ts(24, 8));

        for task in [
            &due_in_range,
            &start_only,
            &undated,
            &other_assignee,
            &out_of_range,
        ] {
            db.upsert_task(task).expect("upsert");
        }

        let all = db.list_tasks(&TaskFilter::default()).expect("all");
        assert_eq!(all.len(), 5);

        let for_a = db
            .list_tasks(&TaskFilter {
                assignee_id: Some("a".to_string()),
                ..TaskFilter::default()
            })
            .expect("assignee a");
        assert_eq!(for_a.len(), 4);

        let start = ts(23, 0);
        let end = ts(27, 0) - Duration::nanoseconds(1);
        let ranged = db
            .list_tasks(&TaskFilter {
                assignee_id: None,
                start: Some(start),
                end: Some(end),
            })
            .expect("ranged");
        let ids = ranged.iter().map(|t| t.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t1", "t2", "t4"]);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let db = WorkloadStore::open_in_memory().expect("open db");
        let mut task = sample_task("edge", "a");
        task.due_date = Some(ts(25, 0));
        db.upsert_task(&task).expect("upsert");

        let hits = db
            .list_tasks(&TaskFilter {
                assignee_id: None,
                start: Some(ts(25, 0)),
                end: Some(ts(25, 0)),
            })
            .expect("query");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn members_and_teams_upsert_by_id() {
        let db = WorkloadStore::open_in_memory().expect("open db");
        db.upsert_team(&Team {
            id: "s1".to_string(),
            name: "People Ops".to_string(),
            parent_id: None,
        })
        .expect("team");
        db.upsert_team(&Team {
            id: "s1".to_string(),
            name: "People Operations".to_string(),
            parent_id: Some("root".to_string()),
        })
        .expect("team update");

        let mut member = Member {
            id: "7".to_string(),
            username: "ada".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            color: "#abc".to_string(),
            role: "employee".to_string(),
            team_id: Some("s1".to_string()),
        };
        db.upsert_member(&member).expect("member");
        member.email = "ada@corp.example.com".to_string();
        db.upsert_member(&member).expect("member update");

        let teams = db.list_teams().expect("teams");
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].name, "People Operations");
        assert_eq!(teams[0].parent_id.as_deref(), Some("root"));

        let members = db.list_members().expect("members");
        assert_eq!(members, vec![member]);
    }

    #[test]
    fn admin_lookup_and_password_check() {
        let db = WorkloadStore::open_in_memory().expect("open db");
        db.upsert_admin("hr-admin", "s3cret").expect("admin");

        let admin = db.get_admin_by_username("hr-admin").expect("found");
        assert!(admin.verify_password("s3cret"));
        assert!(!admin.verify_password("wrong"));
        assert_eq!(admin.password_hash.len(), 64);

        let missing = db.get_admin_by_username("nobody").expect_err("missing");
        assert!(matches!(missing, StorageError::NotFound { entity: "admin", .. }));
    }
}
