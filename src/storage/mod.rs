//! Storage layer for AgentMesh events.
//!
//! Every event is written twice:
//! - `events.jsonl` - append-only log, one serialized event per line. Never
//!   rewritten; it is the source of truth after a crash.
//! - `events.db` - SQLite index keyed by an autoincrement sequence number,
//!   with secondary indexes on `run_id`, `task_id` and `kind`. Derived data,
//!   rebuildable from the log with [`EventStore::rebuild_index`].
//!
//! The two writes are not transactional with each other. A crash between them
//! leaves the index one event behind the log.

use crate::models::Event;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde_json::{Map, Value, json};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sequential log file name inside the data directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Indexed store file name inside the data directory.
pub const EVENT_DB_FILE: &str = "events.db";

/// Default maximum number of events returned by a query.
pub const DEFAULT_QUERY_LIMIT: i64 = 200;

const INSERT_EVENT: &str = "INSERT INTO events \
    (schema_version, ts, run_id, kind, task_id, step, payload, metadata, team_run_id) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Filters for [`EventStore::query`]. All provided filters are AND-ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub run_id: Option<String>,
    pub task_id: Option<String>,
    pub kind: Option<String>,
    /// Maximum number of events; `<= 0` means unbounded.
    pub limit: i64,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            run_id: None,
            task_id: None,
            kind: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// A query with no filters and no limit.
    pub fn all() -> Self {
        Self::default().limit(0)
    }
}

/// Open file handles, dropped on close.
struct Handles {
    conn: Connection,
    log: File,
}

/// Dual-write event store for a single data directory.
///
/// Safe to share between threads: one lock covers the log handle and the
/// SQLite connection, so a query never observes a half-finished append.
pub struct EventStore {
    root: PathBuf,
    log_path: PathBuf,
    db_path: PathBuf,
    handles: Mutex<Option<Handles>>,
}

impl EventStore {
    /// Open or create the store in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(storage_error(data_dir))?;

        let log_path = data_dir.join(EVENT_LOG_FILE);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(storage_error(&log_path))?;

        let db_path = data_dir.join(EVENT_DB_FILE);
        let conn = Connection::open(&db_path)
            .and_then(|conn| Self::init_schema(&conn).map(|_| conn))
            .map_err(database_error(&db_path))?;

        debug!(data_dir = %data_dir.display(), "event store opened");

        Ok(Self {
            root: data_dir.to_path_buf(),
            log_path,
            db_path,
            handles: Mutex::new(Some(Handles { conn, log })),
        })
    }

    /// Initialize the SQLite schema. Idempotent.
    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_version TEXT NOT NULL DEFAULT '1',
                ts TEXT NOT NULL,
                run_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                task_id TEXT,
                step TEXT,
                payload TEXT NOT NULL,
                metadata TEXT NOT NULL,
                team_run_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_run_id ON events(run_id);
            CREATE INDEX IF NOT EXISTS idx_events_task_id ON events(task_id);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            "#,
        )?;
        Ok(())
    }

    /// Data directory this store lives in.
    pub fn data_dir(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Append an event: log line first (flushed), then the index row.
    pub fn append(&self, event: &Event) -> Result<()> {
        let mut line = event.to_json()?;
        line.push('\n');

        let mut guard = self.handles.lock();
        let handles = guard.as_mut().ok_or(Error::StoreClosed)?;

        handles
            .log
            .write_all(line.as_bytes())
            .and_then(|_| handles.log.flush())
            .map_err(storage_error(&self.log_path))?;

        insert_event(&handles.conn, event).map_err(database_error(&self.db_path))?;

        debug!(run_id = event.run_id(), kind = event.kind(), "event appended");
        Ok(())
    }

    /// Query the index in insertion order.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut sql = String::from(
            "SELECT schema_version, ts, run_id, kind, task_id, step, payload, metadata, team_run_id
             FROM events WHERE 1=1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(run_id) = &query.run_id {
            sql.push_str(" AND run_id = ?");
            params_vec.push(Box::new(run_id.clone()));
        }
        if let Some(task_id) = &query.task_id {
            sql.push_str(" AND task_id = ?");
            params_vec.push(Box::new(task_id.clone()));
        }
        if let Some(kind) = &query.kind {
            sql.push_str(" AND kind = ?");
            params_vec.push(Box::new(kind.clone()));
        }

        sql.push_str(" ORDER BY id ASC");

        if query.limit > 0 {
            sql.push_str(" LIMIT ?");
            params_vec.push(Box::new(query.limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let guard = self.handles.lock();
        let handles = guard.as_ref().ok_or(Error::StoreClosed)?;

        let rows = select_rows(&handles.conn, &sql, &params_refs)
            .map_err(database_error(&self.db_path))?;

        rows.into_iter().map(StoredRow::into_event).collect()
    }

    /// Read every event from the sequential log.
    ///
    /// Blank lines are skipped. Malformed lines (for example a torn final
    /// line after a crash) are logged and skipped.
    pub fn read_log(&self) -> Result<Vec<Event>> {
        let guard = self.handles.lock();
        if guard.is_none() {
            return Err(Error::StoreClosed);
        }
        read_log_file(&self.log_path)
    }

    /// Rebuild the SQLite index from the sequential log.
    ///
    /// Returns the number of events indexed.
    pub fn rebuild_index(&self) -> Result<usize> {
        let mut guard = self.handles.lock();
        let handles = guard.as_mut().ok_or(Error::StoreClosed)?;

        let events = read_log_file(&self.log_path)?;

        replace_all(&mut handles.conn, &events).map_err(database_error(&self.db_path))?;

        info!(count = events.len(), "event index rebuilt from log");
        Ok(events.len())
    }

    /// Release the connection and log handle. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        let Some(mut handles) = self.handles.lock().take() else {
            return Ok(());
        };
        handles.log.flush().map_err(storage_error(&self.log_path))?;
        handles
            .conn
            .close()
            .map_err(|(_, source)| database_error(&self.db_path)(source))?;
        debug!(data_dir = %self.root.display(), "event store closed");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.handles.lock().is_none()
    }
}

/// Raw column values of one `events` row.
struct StoredRow {
    schema_version: String,
    ts: String,
    run_id: String,
    kind: String,
    task_id: Option<String>,
    step: Option<String>,
    payload: String,
    metadata: String,
    team_run_id: Option<String>,
}

impl StoredRow {
    fn into_event(self) -> Result<Event> {
        let payload: Map<String, Value> = serde_json::from_str(&self.payload)?;
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)?;
        Event::from_value(json!({
            "schema_version": self.schema_version,
            "ts": self.ts,
            "run_id": self.run_id,
            "kind": self.kind,
            "task_id": self.task_id,
            "step": self.step,
            "payload": payload,
            "metadata": metadata,
            "team_run_id": self.team_run_id,
        }))
    }
}

fn select_rows(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Vec<StoredRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(StoredRow {
                schema_version: row.get(0)?,
                ts: row.get(1)?,
                run_id: row.get(2)?,
                kind: row.get(3)?,
                task_id: row.get(4)?,
                step: row.get(5)?,
                payload: row.get(6)?,
                metadata: row.get(7)?,
                team_run_id: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Replace every indexed row with `events`, in one transaction.
fn replace_all(conn: &mut Connection, events: &[Event]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM events", [])?;
    tx.execute("DELETE FROM sqlite_sequence WHERE name = 'events'", [])?;
    for event in events {
        insert_event(&tx, event)?;
    }
    tx.commit()
}

fn insert_event(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    let payload = Value::Object(event.payload().clone()).to_string();
    let metadata = Value::Object(event.metadata().clone()).to_string();
    conn.execute(
        INSERT_EVENT,
        params![
            event.schema_version(),
            event.timestamp(),
            event.run_id(),
            event.kind(),
            event.task_id(),
            event.step(),
            payload,
            metadata,
            event.team_run_id(),
        ],
    )?;
    Ok(())
}

fn read_log_file(path: &Path) -> Result<Vec<Event>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_error(path)(e)),
    };
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(storage_error(path))?;
        if line.trim().is_empty() {
            continue;
        }
        match Event::from_json(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = index + 1, error = %e, "skipping malformed event log line"),
        }
    }
    Ok(events)
}

fn database_error(path: &Path) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |source| Error::Database {
        resource: path.to_path_buf(),
        source,
    }
}

fn storage_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Storage {
        resource: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use crate::test_utils::{TestEnv, status_event};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn tool_event(run_id: &str, name: &str) -> Event {
        let payload = json!({ "name": name }).as_object().cloned().unwrap();
        Event::new(run_id, EventKind::Tool).with_payload(payload)
    }

    #[test]
    fn test_open_creates_files() {
        let env = TestEnv::new();
        let store = env.open_store();
        assert!(env.data_path().join(EVENT_LOG_FILE).exists());
        assert!(env.data_path().join(EVENT_DB_FILE).exists());
        assert_eq!(store.data_dir(), env.data_path());
    }

    #[test]
    fn test_open_creates_nested_directory() {
        let env = TestEnv::new();
        let nested = env.data_path().join("a").join("b");
        let store = EventStore::open(&nested).unwrap();
        assert!(store.log_path().exists());
    }

    #[test]
    fn test_append_then_query() {
        let env = TestEnv::new();
        let store = env.open_store();
        store
            .append(&status_event("r1", "working").with_task_id("t1"))
            .unwrap();

        let results = store.query(&EventQuery::new().run_id("r1")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind(), "status");
        assert_eq!(results[0].payload()["state"], "working");
        assert_eq!(results[0].task_id(), Some("t1"));
    }

    #[test]
    fn test_query_returns_insertion_order() {
        let env = TestEnv::new();
        let store = env.open_store();
        for i in 0..5 {
            let payload = json!({ "i": i }).as_object().cloned().unwrap();
            store
                .append(&Event::new("r1", EventKind::Status).with_payload(payload))
                .unwrap();
        }

        let results = store.query(&EventQuery::new().run_id("r1")).unwrap();
        let order: Vec<i64> = results
            .iter()
            .map(|e| e.payload()["i"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_filter_conjunction() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.append(&status_event("r1", "working")).unwrap();
        store.append(&tool_event("r1", "exec")).unwrap();
        store.append(&tool_event("r2", "read")).unwrap();
        store.append(&status_event("r2", "done")).unwrap();

        let both = store
            .query(&EventQuery::new().run_id("r1").kind("tool"))
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].payload()["name"], "exec");

        let tools = store.query(&EventQuery::new().kind("tool")).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].run_id(), "r1");
        assert_eq!(tools[1].run_id(), "r2");
    }

    #[test]
    fn test_filter_by_task_id() {
        let env = TestEnv::new();
        let store = env.open_store();
        store
            .append(&Event::new("r1", EventKind::Status).with_task_id("t1"))
            .unwrap();
        store
            .append(&Event::new("r1", EventKind::Status).with_task_id("t2"))
            .unwrap();

        let results = store.query(&EventQuery::new().task_id("t1")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id(), Some("t1"));
    }

    #[test]
    fn test_limit_returns_first_events() {
        let env = TestEnv::new();
        let store = env.open_store();
        for i in 0..10 {
            let payload = json!({ "i": i }).as_object().cloned().unwrap();
            store
                .append(&Event::new("r1", EventKind::Status).with_payload(payload))
                .unwrap();
        }

        let results = store.query(&EventQuery::new().limit(3)).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].payload()["i"], 0);
        assert_eq!(results[2].payload()["i"], 2);
    }

    #[test]
    fn test_non_positive_limit_is_unbounded() {
        let env = TestEnv::new();
        let store = env.open_store();
        for _ in 0..250 {
            store.append(&Event::new("r1", EventKind::Status)).unwrap();
        }

        assert_eq!(store.query(&EventQuery::new()).unwrap().len(), 200);
        assert_eq!(store.query(&EventQuery::new().limit(0)).unwrap().len(), 250);
        assert_eq!(store.query(&EventQuery::new().limit(-5)).unwrap().len(), 250);
    }

    #[test]
    fn test_empty_query() {
        let env = TestEnv::new();
        let store = env.open_store();
        assert!(store.query(&EventQuery::new()).unwrap().is_empty());
    }

    #[test]
    fn test_log_matches_index() {
        let env = TestEnv::new();
        let store = env.open_store();
        let events = vec![
            status_event("r1", "working").with_task_id("t1"),
            tool_event("r1", "exec").with_task_id("t1"),
            Event::new("r2", "custom").with_step("post"),
            Event::new("r1", EventKind::Artifact).with_team_run_id("team"),
        ];
        for event in &events {
            store.append(event).unwrap();
        }

        let from_log = store.read_log().unwrap();
        let from_index = store.query(&EventQuery::all()).unwrap();
        assert_eq!(from_log, events);
        assert_eq!(from_index, events);
    }

    #[test]
    fn test_log_is_one_event_per_line() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.append(&status_event("r1", "a")).unwrap();
        store.append(&status_event("r1", "b")).unwrap();

        let contents = fs::read_to_string(store.log_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(Event::from_json(line).is_ok());
        }
    }

    #[test]
    fn test_durability_across_reopen() {
        let env = TestEnv::new();
        let first = status_event("r1", "working");
        let second = tool_event("r1", "exec");
        {
            let store = env.open_store();
            store.append(&first).unwrap();
            store.append(&second).unwrap();
            store.close().unwrap();
        }

        let store = env.open_store();
        let results = store.query(&EventQuery::new().run_id("r1")).unwrap();
        assert_eq!(results, vec![first, second]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.close().unwrap();

        assert!(matches!(
            store.append(&Event::new("r1", EventKind::Status)),
            Err(Error::StoreClosed)
        ));
        assert!(matches!(
            store.query(&EventQuery::new()),
            Err(Error::StoreClosed)
        ));
    }

    #[test]
    fn test_read_log_skips_blank_and_malformed_lines() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.append(&status_event("r1", "a")).unwrap();
        {
            let mut log = OpenOptions::new()
                .append(true)
                .open(store.log_path())
                .unwrap();
            writeln!(log).unwrap();
            writeln!(log, "{{\"kind\": \"status\", \"run_id\"").unwrap();
            writeln!(log, r#"{{"event_type":"status","message":"legacy","run_id":"r0"}}"#)
                .unwrap();
        }

        let events = store.read_log().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].run_id(), "r0");
        assert_eq!(events[1].payload()["text"], "legacy");
    }

    #[test]
    fn test_rebuild_index_from_log() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.append(&status_event("r1", "a")).unwrap();
        store.append(&tool_event("r1", "exec")).unwrap();

        // Simulate a crash after the log write but before the index write
        let orphan = status_event("r1", "done");
        {
            let mut log = OpenOptions::new()
                .append(true)
                .open(store.log_path())
                .unwrap();
            writeln!(log, "{}", orphan.to_json().unwrap()).unwrap();
        }
        assert_eq!(store.query(&EventQuery::all()).unwrap().len(), 2);

        assert_eq!(store.rebuild_index().unwrap(), 3);
        let results = store.query(&EventQuery::all()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2], orphan);

        // Rebuilding twice does not duplicate rows
        assert_eq!(store.rebuild_index().unwrap(), 3);
        assert_eq!(store.query(&EventQuery::all()).unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_appends_keep_log_and_index_consistent() {
        let env = TestEnv::new();
        let store = Arc::new(env.open_store());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        let run_id = format!("r{}", t);
                        let payload = json!({ "i": i }).as_object().cloned().unwrap();
                        store
                            .append(&Event::new(run_id, EventKind::Status).with_payload(payload))
                            .unwrap();
                        store.query(&EventQuery::new().limit(5)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let from_log = store.read_log().unwrap();
        let from_index = store.query(&EventQuery::all()).unwrap();
        assert_eq!(from_log.len(), 200);
        assert_eq!(from_log, from_index);
    }

    #[test]
    fn test_unknown_kind_is_stored_verbatim() {
        let env = TestEnv::new();
        let store = env.open_store();
        store.append(&Event::new("r1", "telemetry")).unwrap();
        let results = store.query(&EventQuery::new().kind("telemetry")).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_open_corrupt_database_names_db_file() {
        let env = TestEnv::new();
        fs::write(env.data_path().join(EVENT_DB_FILE), "not a sqlite database at all").unwrap();

        match EventStore::open(env.data_path()) {
            Err(Error::Database { resource, .. }) => {
                assert_eq!(resource, env.data_path().join(EVENT_DB_FILE))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("corrupt database opened"),
        }
    }

    #[test]
    fn test_index_failures_name_db_file() {
        let env = TestEnv::new();
        let store = env.open_store();
        Connection::open(store.db_path())
            .unwrap()
            .execute_batch("DROP TABLE events")
            .unwrap();

        let err = store.append(&status_event("r1", "working")).unwrap_err();
        assert!(matches!(err, Error::Database { ref resource, .. } if resource == store.db_path()));
        assert!(err.to_string().contains(EVENT_DB_FILE));

        let err = store.query(&EventQuery::all()).unwrap_err();
        assert!(matches!(err, Error::Database { ref resource, .. } if resource == store.db_path()));
    }
}
