use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{StoreError, StoreResult};
use crate::storage::{self, DetectionStore};

/// Detections per class label.
pub type ClassCounts = BTreeMap<String, u64>;

/// Classes always listed in the daily report, even at zero.
const REPORTED_CLASSES: &[&str] = &["chige", "motsu", "other"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: u64,
    pub notified: u64,
}

/// One local calendar day of detections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    /// Local midnight of `date`, in UTC.
    pub since: DateTime<Utc>,
    /// Local midnight of the following day, in UTC. Exclusive.
    pub until: DateTime<Utc>,
    pub counts: ClassCounts,
    pub summary: Summary,
}

impl DailyReport {
    pub fn count(&self, class_label: &str) -> u64 {
        self.counts.get(class_label).copied().unwrap_or(0)
    }

    pub fn render_text(&self) -> String {
        let mut out = format!("Detection summary for {}\n", self.date);
        for class in REPORTED_CLASSES {
            let _ = writeln!(out, "  {}: {}", class, self.count(class));
        }
        for (class, count) in &self.counts {
            if !REPORTED_CLASSES.contains(&class.as_str()) {
                let _ = writeln!(out, "  {}: {}", class, count);
            }
        }
        let _ = writeln!(out, "  total: {}", self.summary.total);
        let _ = write!(out, "  notified: {}", self.summary.notified);
        out
    }
}

/// The instant `date` begins in `tz`, in UTC.
///
/// When midnight falls in a DST gap the first existing local hour is used;
/// when it is ambiguous the earlier instant wins.
pub fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> StoreResult<DateTime<Utc>> {
    for hour in 0..24 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(start) = tz.from_local_datetime(&naive).earliest() {
            return Ok(start.with_timezone(&Utc));
        }
    }
    Err(StoreError::Validation(format!(
        "no local start of day exists for {}",
        date
    )))
}

impl DetectionStore {
    /// Counts and summary for `date` as seen in `tz`, from local midnight up
    /// to the next local midnight.
    ///
    /// Both reads share one snapshot, so the per-class counts always add up
    /// to `summary.total` even while other processes are registering.
    pub fn daily_rollup<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> StoreResult<DailyReport> {
        let next_day = date
            .succ_opt()
            .ok_or_else(|| StoreError::Validation(format!("no day follows {}", date)))?;
        let since = local_midnight(date, tz)?;
        let until = local_midnight(next_day, tz)?;

        let tx = self.conn.unchecked_transaction()?;
        let counts = storage::counts_between(&tx, since, until)?;
        let summary = storage::summary_between(&tx, since, until)?;
        tx.commit()?;

        Ok(DailyReport {
            date,
            since,
            until,
            counts,
            summary,
        })
    }

    pub fn today_rollup(&self) -> StoreResult<DailyReport> {
        self.daily_rollup(Local::now().date_naive(), &Local)
    }
}
