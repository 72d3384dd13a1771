//! Detection event store
//!
//! Durable log of image-classification outcomes for a motion-triggered
//! notifier, with a race-free decision on whether a detection should alert a
//! human.
//!
//! # Architecture
//!
//! Every motion event runs in its own OS process. Those processes share one
//! SQLite file and nothing else, so all coordination goes through the
//! database:
//!
//! 1. **Append-only log**: every observation becomes one `detections` row; rows are never deleted.
//! 2. **Insert-as-claim**: the suppression check and the claiming insert share one
//!    `BEGIN IMMEDIATE` transaction, so concurrent callers for the same class are totally ordered.
//! 3. **Reconciliation**: the only mutation is a later correction of the `notified` flag.
//! 4. **UTC storage**: timestamps are stored as fixed-width UTC text; day boundaries are
//!    computed in the caller's timezone and converted.
//!
//! # Module Structure
//!
//! - `storage`: schema, `DetectionStore`, append and read primitives
//! - `suppression`: atomic register-and-decide
//! - `reconcile`: notified-flag correction
//! - `stats`: daily rollups and summaries
//! - `pipeline`: threshold/class filtering, retry and the `Notifier` seam
//! - `config`, `logging`, `error`: ambient concerns

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod pipeline;
pub mod reconcile;
pub mod stats;
pub mod storage;
pub mod suppression;

pub use config::{DetectionConfig, PipelineSettings, StoreSettings};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use event::{validate_confidence, DetectionEvent};
pub use logging::StoreLog;
pub use pipeline::{
    Classification, DetectionPipeline, Disposition, Notifier, Outcome, PipelineStats,
};
pub use stats::{local_midnight, ClassCounts, DailyReport, Summary};
pub use storage::DetectionStore;
pub use suppression::{Registration, SuppressionPolicy};

pub(crate) fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

/// Opens the store described by a loaded config, logging through `log`.
pub fn open_store(cfg: &DetectionConfig, log: StoreLog) -> Result<DetectionStore> {
    Ok(DetectionStore::open(&cfg.store, log)?)
}
