//! SQLite-backed attendance record store.
//!
//! The persistence sink for gate-emitted attendance events, plus the query
//! surface behind the records and statistics commands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id          TEXT PRIMARY KEY,
    identity    TEXT NOT NULL,
    confidence  REAL NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_identity ON attendance (identity);
CREATE INDEX IF NOT EXISTS idx_attendance_recorded_at ON attendance (recorded_at);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("corrupt timestamp in record {0}")]
    CorruptTimestamp(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub identity: String,
    pub confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate view over the attendance log (status/statistics surface).
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSummary {
    pub total_records: u64,
    pub unique_people: u64,
    pub today: u64,
    pub most_active: Option<String>,
}

#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Persist one attendance event; returns the record id.
    pub async fn record(
        &self,
        identity: &str,
        confidence: f32,
        recorded_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = (
            id.clone(),
            identity.to_string(),
            confidence as f64,
            recorded_at.to_rfc3339(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (id, identity, confidence, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![row.0, row.1, row.2, row.3],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(identity, confidence, "attendance persisted");
        Ok(id)
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows: Vec<(String, String, f64, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity, confidence, recorded_at
                     FROM attendance ORDER BY recorded_at DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, identity, confidence, recorded_at)| {
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|_| StoreError::CorruptTimestamp(id.clone()))?
                    .with_timezone(&Utc);
                Ok(AttendanceRecord { id, identity, confidence, recorded_at })
            })
            .collect()
    }

    /// Aggregate statistics over the whole log. "Today" is the UTC calendar
    /// day of `now`.
    pub async fn summary(&self, now: DateTime<Utc>) -> Result<AttendanceSummary, StoreError> {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().to_rfc3339())
            .unwrap_or_else(|| now.to_rfc3339());

        self.conn
            .call(move |conn| {
                let total_records: u64 =
                    conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))?;
                let unique_people: u64 = conn.query_row(
                    "SELECT COUNT(DISTINCT identity) FROM attendance",
                    [],
                    |r| r.get(0),
                )?;
                let today: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE recorded_at >= ?1",
                    [day_start],
                    |r| r.get(0),
                )?;
                let most_active: Option<String> = conn
                    .query_row(
                        "SELECT identity FROM attendance
                         GROUP BY identity ORDER BY COUNT(*) DESC, identity ASC LIMIT 1",
                        [],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|err| match err {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                Ok(AttendanceSummary {
                    total_records,
                    unique_people,
                    today,
                    most_active,
                })
            })
            .await
            .map_err(StoreError::from)
    }
}
