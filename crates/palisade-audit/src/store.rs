//! SQLite-backed audit event table.

use crate::error::AuditResult;
use crate::event::{AuditEvent, Severity};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

/// Filters for [`EventStore::query`]. Empty filter returns the newest rows.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Append-only audit table with reporting indexes.
///
/// One connection per store; the audit consumer owns the writing store and
/// readers open their own. SQLite handles the cross-connection coordination.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the audit table at `path`.
    pub fn open(path: &Path) -> AuditResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests that do not need cross-connection reads.
    pub fn open_in_memory() -> AuditResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> AuditResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                symbol TEXT,
                strategy TEXT,
                severity TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
            CREATE INDEX IF NOT EXISTS idx_audit_events_symbol ON audit_events(symbol);
            CREATE INDEX IF NOT EXISTS idx_audit_events_strategy ON audit_events(strategy);
            "#,
        )?;
        Ok(())
    }

    /// Append one event. Rows are never updated afterwards.
    pub fn insert(&self, event: &AuditEvent) -> AuditResult<()> {
        let payload = serde_json::to_string(&event.payload)?;
        self.conn.execute(
            r#"
            INSERT INTO audit_events (timestamp, event_type, symbol, strategy, severity, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.symbol,
                event.strategy,
                event.severity.as_str(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Query events matching `filter`, newest first, up to `limit` rows.
    pub fn query(&self, filter: &EventFilter, limit: usize) -> AuditResult<Vec<AuditEvent>> {
        let mut sql = String::from(
            "SELECT timestamp, event_type, symbol, strategy, severity, payload \
             FROM audit_events WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(ref event_type) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            args.push(event_type.clone());
        }
        if let Some(ref symbol) = filter.symbol {
            sql.push_str(" AND symbol = ?");
            args.push(symbol.clone());
        }
        if let Some(ref strategy) = filter.strategy {
            sql.push_str(" AND strategy = ?");
            args.push(strategy.clone());
        }
        if let Some(severity) = filter.severity {
            sql.push_str(" AND severity = ?");
            args.push(severity.as_str().to_string());
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(since.to_rfc3339());
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(until.to_rfc3339());
        }

        sql.push_str(&format!(" ORDER BY id DESC LIMIT {limit}"));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let timestamp: String = row.get(0)?;
            let event_type: String = row.get(1)?;
            let symbol: Option<String> = row.get(2)?;
            let strategy: Option<String> = row.get(3)?;
            let severity: String = row.get(4)?;
            let payload: String = row.get(5)?;
            Ok((timestamp, event_type, symbol, strategy, severity, payload))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (timestamp, event_type, symbol, strategy, severity, payload) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            events.push(AuditEvent {
                timestamp,
                event_type,
                symbol,
                strategy,
                severity: Severity::parse(&severity).unwrap_or(Severity::Info),
                payload: serde_json::from_str(&payload)?,
            });
        }

        Ok(events)
    }

    /// Total row count; used by flush tests and session summaries.
    pub fn count(&self) -> AuditResult<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        Ok(count)
    }
}
