//! Append-only audit event store
//!
//! Every signing attempt, agent lifecycle transition, and limit breach lands
//! here. The store exposes no update or delete operations; the only writes
//! are inserts, and every details blob passes through the sanitizer plus a
//! post-serialization assertion before it touches disk. The database file
//! doubles as a cross-process mailbox: a `system_stop_request` row is how an
//! operator halts a running loop from outside the process.

pub mod sanitize;

use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ts           TEXT NOT NULL,
    agent_id     TEXT NOT NULL,
    event        TEXT NOT NULL,
    wallet_pk    TEXT NOT NULL,
    signature    TEXT,
    status       TEXT,
    details_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_agent_ts  ON events (agent_id, ts);
CREATE INDEX IF NOT EXISTS idx_events_event_ts  ON events (event, ts);
CREATE INDEX IF NOT EXISTS idx_events_wallet_ts ON events (wallet_pk, ts);
";

/// Event kinds recorded by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TxAttempt,
    TxConfirmed,
    TxFailed,
    TxTimeout,
    AgentAction,
    AgentNoop,
    AgentStart,
    AgentStop,
    AgentError,
    LimitBreach,
    SystemStopRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TxAttempt => "tx_attempt",
            EventKind::TxConfirmed => "tx_confirmed",
            EventKind::TxFailed => "tx_failed",
            EventKind::TxTimeout => "tx_timeout",
            EventKind::AgentAction => "agent_action",
            EventKind::AgentNoop => "agent_noop",
            EventKind::AgentStart => "agent_start",
            EventKind::AgentStop => "agent_stop",
            EventKind::AgentError => "agent_error",
            EventKind::LimitBreach => "limit_breach",
            EventKind::SystemStopRequest => "system_stop_request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "tx_attempt" => EventKind::TxAttempt,
            "tx_confirmed" => EventKind::TxConfirmed,
            "tx_failed" => EventKind::TxFailed,
            "tx_timeout" => EventKind::TxTimeout,
            "agent_action" => EventKind::AgentAction,
            "agent_noop" => EventKind::AgentNoop,
            "agent_start" => EventKind::AgentStart,
            "agent_stop" => EventKind::AgentStop,
            "agent_error" => EventKind::AgentError,
            "limit_breach" => EventKind::LimitBreach,
            "system_stop_request" => EventKind::SystemStopRequest,
            _ => return None,
        })
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub ts: String,
    pub agent_id: String,
    pub event: EventKind,
    pub wallet_pk: String,
    pub signature: Option<String>,
    pub status: Option<String>,
    pub details: Value,
}

/// Filters for [`AuditDb::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery<'a> {
    pub agent_id: Option<&'a str>,
    pub wallet_pk: Option<&'a str>,
    pub event: Option<EventKind>,
    /// Exclusive ISO-8601 upper bound on `ts`.
    pub before: Option<&'a str>,
    /// Row cap; 0 falls back to the default of 50.
    pub limit: u32,
}

pub struct AuditDb {
    conn: Mutex<Option<Connection>>,
}

impl AuditDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::prepare(conn)
    }

    /// In-memory store for tests; same schema and pragmas where applicable.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                conn.execute_batch(SCHEMA)?;
                conn.execute_batch(&format!("PRAGMA user_version={SCHEMA_VERSION}"))?;
            }
            SCHEMA_VERSION => {}
            other => {
                return Err(Error::SchemaMismatch(format!(
                    "expected schema version {SCHEMA_VERSION}, found {other}"
                )));
            }
        }

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        // A poisoned lock still holds a usable connection.
        let guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::ClosedStore),
        }
    }

    /// Append an event. The details tree is sanitized, serialized, and then
    /// re-checked for key-adjacent substrings before the insert runs.
    pub fn insert(
        &self,
        agent_id: &str,
        event: EventKind,
        wallet_pk: &str,
        signature: Option<&str>,
        status: Option<&str>,
        details: &Value,
    ) -> Result<i64> {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.insert_row(&ts, agent_id, event, wallet_pk, signature, status, details)
    }

    #[cfg(test)]
    pub(crate) fn insert_at(
        &self,
        ts: &str,
        agent_id: &str,
        event: EventKind,
        wallet_pk: &str,
        details: &Value,
    ) -> Result<i64> {
        self.insert_row(ts, agent_id, event, wallet_pk, None, None, details)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_row(
        &self,
        ts: &str,
        agent_id: &str,
        event: EventKind,
        wallet_pk: &str,
        signature: Option<&str>,
        status: Option<&str>,
        details: &Value,
    ) -> Result<i64> {
        let sanitized = sanitize::sanitize_details(details);
        let details_json = serde_json::to_string(&sanitized)?;
        sanitize::assert_no_key_material(&details_json)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (ts, agent_id, event, wallet_pk, signature, status, details_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    ts,
                    agent_id,
                    event.as_str(),
                    wallet_pk,
                    signature,
                    status,
                    details_json
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Rows matching the filters, newest first.
    pub fn query(&self, filter: &EventQuery<'_>) -> Result<Vec<AuditEvent>> {
        let mut sql = String::from(
            "SELECT id, ts, agent_id, event, wallet_pk, signature, status, details_json
             FROM events WHERE 1=1",
        );
        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
        let event_str = filter.event.map(|e| e.as_str());

        if let Some(agent_id) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            params.push(agent_id);
        }
        if let Some(wallet_pk) = &filter.wallet_pk {
            sql.push_str(" AND wallet_pk = ?");
            params.push(wallet_pk);
        }
        if let Some(event) = &event_str {
            sql.push_str(" AND event = ?");
            params.push(event);
        }
        if let Some(before) = &filter.before {
            sql.push_str(" AND ts < ?");
            params.push(before);
        }
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        sql.push_str(&format!(" ORDER BY ts DESC, id DESC LIMIT {limit}"));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(&params[..], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Timestamp of the newest `system_stop_request` row for an agent.
    pub fn latest_stop_request(&self, agent_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let ts = conn
                .query_row(
                    "SELECT ts FROM events
                     WHERE agent_id = ?1 AND event = 'system_stop_request'
                     ORDER BY ts DESC, id DESC LIMIT 1",
                    [agent_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(ts)
        })
    }

    /// `(agent_id, event, count)` triples, grouped.
    pub fn summarise(&self) -> Result<Vec<(String, String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT agent_id, event, COUNT(*) FROM events
                 GROUP BY agent_id, event ORDER BY agent_id, event",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self, agent_id: Option<&str>, wallet_pk: Option<&str>) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM events WHERE 1=1");
        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(agent_id) = &agent_id {
            sql.push_str(" AND agent_id = ?");
            params.push(agent_id);
        }
        if let Some(wallet_pk) = &wallet_pk {
            sql.push_str(" AND wallet_pk = ?");
            params.push(wallet_pk);
        }
        self.with_conn(|conn| Ok(conn.query_row(&sql, &params[..], |row| row.get(0))?))
    }

    /// Checkpoint the write-ahead journal and close the store. Any later
    /// operation fails with a closed-store error.
    pub fn close(&self) -> Result<()> {
        let mut guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.take() {
            Some(conn) => {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                drop(conn);
                Ok(())
            }
            None => Err(Error::ClosedStore),
        }
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let event_str: String = row.get(3)?;
    let event = EventKind::parse(&event_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown event kind `{event_str}`"),
            )),
        )
    })?;
    let details_json: String = row.get(7)?;
    let details = serde_json::from_str(&details_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
    })?;

    Ok(AuditEvent {
        id: row.get(0)?,
        ts: row.get(1)?,
        agent_id: row.get(2)?,
        event,
        wallet_pk: row.get(4)?,
        signature: row.get(5)?,
        status: row.get(6)?,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AuditDb {
        AuditDb::open_in_memory().unwrap()
    }

    #[test]
    fn inserts_and_queries_newest_first() {
        let db = store();
        db.insert_at("2026-01-01T00:00:00.000Z", "a", EventKind::AgentStart, "pk", &json!({}))
            .unwrap();
        db.insert_at("2026-01-01T00:00:01.000Z", "a", EventKind::AgentNoop, "pk", &json!({}))
            .unwrap();
        db.insert_at("2026-01-01T00:00:02.000Z", "a", EventKind::AgentStop, "pk", &json!({}))
            .unwrap();

        let rows = db.query(&EventQuery::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].event, EventKind::AgentStop);
        assert_eq!(rows[2].event, EventKind::AgentStart);
    }

    #[test]
    fn filters_compose() {
        let db = store();
        db.insert("a", EventKind::TxConfirmed, "pk-a", Some("sig1"), Some("confirmed"), &json!({}))
            .unwrap();
        db.insert("b", EventKind::TxFailed, "pk-b", None, Some("failed"), &json!({}))
            .unwrap();

        let rows = db
            .query(&EventQuery {
                agent_id: Some("a"),
                event: Some(EventKind::TxConfirmed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].wallet_pk, "pk-a");
        assert_eq!(rows[0].signature.as_deref(), Some("sig1"));

        assert_eq!(db.count(Some("a"), None).unwrap(), 1);
        assert_eq!(db.count(None, None).unwrap(), 2);
        assert_eq!(db.count(None, Some("pk-b")).unwrap(), 1);
    }

    #[test]
    fn details_are_sanitized_before_persisting() {
        let db = store();
        db.insert(
            "a",
            EventKind::AgentError,
            "pk",
            None,
            None,
            &json!({ "rationale": "buy", "secretKey": "s3cr3t", "nested": { "seed": [1, 2] } }),
        )
        .unwrap();

        let rows = db.query(&EventQuery::default()).unwrap();
        let serialized = serde_json::to_string(&rows[0].details).unwrap();
        assert!(!serialized.to_lowercase().contains("secretkey"));
        assert!(!serialized.to_lowercase().contains("seed"));
        assert_eq!(rows[0].details["rationale"], "buy");
    }

    #[test]
    fn summarise_groups_by_agent_and_event() {
        let db = store();
        db.insert("a", EventKind::AgentNoop, "pk", None, None, &json!({})).unwrap();
        db.insert("a", EventKind::AgentNoop, "pk", None, None, &json!({})).unwrap();
        db.insert("b", EventKind::AgentStart, "pk", None, None, &json!({})).unwrap();

        let summary = db.summarise().unwrap();
        assert_eq!(summary[0], ("a".to_string(), "agent_noop".to_string(), 2));
        assert_eq!(summary[1], ("b".to_string(), "agent_start".to_string(), 1));
    }

    #[test]
    fn latest_stop_request_picks_newest() {
        let db = store();
        assert!(db.latest_stop_request("a").unwrap().is_none());
        db.insert_at("2026-01-01T00:00:00.000Z", "a", EventKind::SystemStopRequest, "pk", &json!({}))
            .unwrap();
        db.insert_at("2026-01-02T00:00:00.000Z", "a", EventKind::SystemStopRequest, "pk", &json!({}))
            .unwrap();
        assert_eq!(
            db.latest_stop_request("a").unwrap().as_deref(),
            Some("2026-01-02T00:00:00.000Z")
        );
        assert!(db.latest_stop_request("b").unwrap().is_none());
    }

    #[test]
    fn closed_store_rejects_writes() {
        let db = store();
        db.insert("a", EventKind::AgentStart, "pk", None, None, &json!({})).unwrap();
        db.close().unwrap();

        let err = db
            .insert("a", EventKind::AgentStop, "pk", None, None, &json!({}))
            .unwrap_err();
        assert_eq!(err.code(), "CLOSED_STORE");
        assert_eq!(db.close().unwrap_err().code(), "CLOSED_STORE");
    }

    #[test]
    fn wal_mode_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let db = AuditDb::open(&path).unwrap();
        db.insert("a", EventKind::AgentStart, "pk", None, None, &json!({})).unwrap();
        db.close().unwrap();

        // Reopen against the same file; schema version must round-trip.
        let db = AuditDb::open(&path).unwrap();
        assert_eq!(db.count(None, None).unwrap(), 1);
    }
}
