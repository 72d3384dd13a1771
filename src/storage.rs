use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Duration;

use crate::config::{db_parent_dir, StoreSettings};
use crate::error::{StoreError, StoreResult};
use crate::event::{
    decode_timestamp, encode_timestamp, validate_class_label, validate_confidence, DetectionEvent,
};
use crate::logging::StoreLog;
use crate::open_db_connection;
use crate::stats::{ClassCounts, Summary};

const SELECT_EVENT_COLUMNS: &str =
    "SELECT id, timestamp, class_name, confidence, image_path, is_notified FROM detections";

/// File-backed detection log.
///
/// Each process opens its own store; all cross-process coordination goes
/// through SQLite locking (WAL journal, `BEGIN IMMEDIATE` for registrations,
/// `busy_timeout` bounding the wait for the write lock).
pub struct DetectionStore {
    pub(crate) conn: Connection,
    pub(crate) log: StoreLog,
    lock_timeout: Duration,
}

impl DetectionStore {
    pub fn open(settings: &StoreSettings, log: StoreLog) -> StoreResult<Self> {
        if let Some(dir) = db_parent_dir(&settings.db_path) {
            std::fs::create_dir_all(&dir)
                .map_err(|source| StoreError::Directory { path: dir, source })?;
        }
        let conn = open_db_connection(&settings.db_path)?;
        conn.busy_timeout(settings.lock_timeout)?;
        let mut store = Self {
            conn,
            log,
            lock_timeout: settings.lock_timeout,
        };
        store.ensure_schema()?;
        store.log.debug(format_args!(
            "detection store opened at {} (lock timeout {:?})",
            settings.db_path, settings.lock_timeout
        ));
        Ok(store)
    }

    fn ensure_schema(&mut self) -> StoreResult<()> {
        // WAL: readers never wait on the writer.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              class_name TEXT NOT NULL,
              confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
              image_path TEXT,
              is_notified INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_detections_class_confidence_time
              ON detections(class_name, confidence, timestamp);
            CREATE INDEX IF NOT EXISTS idx_detections_timestamp_class
              ON detections(timestamp, class_name);
            "#,
        )?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Records a detection without any suppression decision (below-threshold
    /// and non-notifiable observations).
    pub fn append(
        &self,
        class_label: &str,
        confidence: f64,
        source_reference: Option<&str>,
        notified: bool,
    ) -> StoreResult<i64> {
        self.append_at(Utc::now(), class_label, confidence, source_reference, notified)
    }

    pub fn append_at(
        &self,
        timestamp: DateTime<Utc>,
        class_label: &str,
        confidence: f64,
        source_reference: Option<&str>,
        notified: bool,
    ) -> StoreResult<i64> {
        validate_class_label(class_label)?;
        validate_confidence(confidence)?;
        let id = insert_detection(
            &self.conn,
            timestamp,
            class_label,
            confidence,
            source_reference,
            notified,
        )?;
        self.log.debug(format_args!(
            "recorded detection {} ({} {:.3}, notified={})",
            id, class_label, confidence, notified
        ));
        Ok(id)
    }

    pub fn exists_since(
        &self,
        class_label: &str,
        min_confidence: f64,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        exists_since(&self.conn, class_label, min_confidence, since)
    }

    pub fn counts_since(&self, since: DateTime<Utc>) -> StoreResult<ClassCounts> {
        counts_since(&self.conn, since)
    }

    pub fn summary_since(&self, since: DateTime<Utc>) -> StoreResult<Summary> {
        summary_since(&self.conn, since)
    }

    pub fn get(&self, id: i64) -> StoreResult<Option<DetectionEvent>> {
        let raw = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_EVENT_COLUMNS),
                params![id],
                RawRow::read,
            )
            .optional()?;
        raw.map(RawRow::into_event).transpose()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> StoreResult<Vec<DetectionEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_EVENT_COLUMNS))?;
        let rows = stmt
            .query_map(params![limit], RawRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRow::into_event).collect()
    }
}

/// Inserts one row; callers validate first. Works on a plain connection or
/// inside a `Transaction`.
pub(crate) fn insert_detection(
    conn: &Connection,
    timestamp: DateTime<Utc>,
    class_label: &str,
    confidence: f64,
    source_reference: Option<&str>,
    notified: bool,
) -> StoreResult<i64> {
    conn.execute(
        r#"
        INSERT INTO detections(timestamp, class_name, confidence, image_path, is_notified)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            encode_timestamp(timestamp),
            class_label,
            confidence,
            source_reference,
            notified
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// True iff a row of `class_label` with `confidence >= min_confidence` was
/// recorded strictly after `since`.
///
/// Takes a bare connection so it can run inside a caller-held transaction
/// (`Transaction` derefs to `Connection`).
pub fn exists_since(
    conn: &Connection,
    class_label: &str,
    min_confidence: f64,
    since: DateTime<Utc>,
) -> StoreResult<bool> {
    let exists: bool = conn.query_row(
        r#"
        SELECT EXISTS(
          SELECT 1 FROM detections
          WHERE class_name = ?1 AND confidence >= ?2 AND timestamp > ?3
        )
        "#,
        params![class_label, min_confidence, encode_timestamp(since)],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Per-class row counts with `timestamp >= since`.
pub fn counts_since(conn: &Connection, since: DateTime<Utc>) -> StoreResult<ClassCounts> {
    let mut stmt = conn.prepare(
        r#"
        SELECT class_name, COUNT(*) FROM detections
        WHERE timestamp >= ?1
        GROUP BY class_name
        "#,
    )?;
    let mut rows = stmt.query(params![encode_timestamp(since)])?;
    let mut counts = ClassCounts::new();
    while let Some(row) = rows.next()? {
        let class: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.insert(class, count as u64);
    }
    Ok(counts)
}

pub fn summary_since(conn: &Connection, since: DateTime<Utc>) -> StoreResult<Summary> {
    let (total, notified): (i64, i64) = conn.query_row(
        r#"
        SELECT COUNT(*), COUNT(CASE WHEN is_notified = 1 THEN 1 END)
        FROM detections
        WHERE timestamp >= ?1
        "#,
        params![encode_timestamp(since)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(Summary {
        total: total as u64,
        notified: notified as u64,
    })
}

/// Per-class row counts with `since <= timestamp < until`.
pub fn counts_between(
    conn: &Connection,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> StoreResult<ClassCounts> {
    let mut stmt = conn.prepare(
        r#"
        SELECT class_name, COUNT(*) FROM detections
        WHERE timestamp >= ?1 AND timestamp < ?2
        GROUP BY class_name
        "#,
    )?;
    let mut rows = stmt.query(params![encode_timestamp(since), encode_timestamp(until)])?;
    let mut counts = ClassCounts::new();
    while let Some(row) = rows.next()? {
        let class: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.insert(class, count as u64);
    }
    Ok(counts)
}

pub fn summary_between(
    conn: &Connection,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> StoreResult<Summary> {
    let (total, notified): (i64, i64) = conn.query_row(
        r#"
        SELECT COUNT(*), COUNT(CASE WHEN is_notified = 1 THEN 1 END)
        FROM detections
        WHERE timestamp >= ?1 AND timestamp < ?2
        "#,
        params![encode_timestamp(since), encode_timestamp(until)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(Summary {
        total: total as u64,
        notified: notified as u64,
    })
}

struct RawRow {
    id: i64,
    timestamp: String,
    class_label: String,
    confidence: f64,
    source_reference: Option<String>,
    notified: bool,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            class_label: row.get(2)?,
            confidence: row.get(3)?,
            source_reference: row.get(4)?,
            notified: row.get(5)?,
        })
    }

    fn into_event(self) -> StoreResult<DetectionEvent> {
        let timestamp = decode_timestamp(&self.timestamp).map_err(|e| StoreError::CorruptRow {
            id: self.id,
            details: format!("timestamp {:?}: {}", self.timestamp, e),
        })?;
        Ok(DetectionEvent {
            id: self.id,
            timestamp,
            class_label: self.class_label,
            confidence: self.confidence,
            source_reference: self.source_reference,
            notified: self.notified,
        })
    }
}
