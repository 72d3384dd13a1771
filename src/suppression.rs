use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::event::{validate_class_label, validate_confidence};
use crate::storage::{exists_since, insert_detection, DetectionStore};

/// Which earlier detections silence a new one: same class, at least
/// `threshold` confidence, recorded within the trailing `window`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SuppressionPolicy {
    pub threshold: f64,
    pub window: Duration,
}

impl SuppressionPolicy {
    pub fn new(threshold: f64, window: Duration) -> Self {
        Self { threshold, window }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(StoreError::Validation(format!(
                "suppression threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.window.is_zero() {
            return Err(StoreError::Validation(
                "suppression window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `now - window`. Rows at exactly this instant do not suppress.
    pub fn cutoff(&self, now: DateTime<Utc>) -> StoreResult<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.window).map_err(|_| {
            StoreError::Validation(format!("suppression window {:?} is too large", self.window))
        })?;
        now.checked_sub_signed(window).ok_or_else(|| {
            StoreError::Validation(format!(
                "suppression window {:?} reaches before the representable range",
                self.window
            ))
        })
    }
}

/// Result of an atomic register-and-decide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub should_notify: bool,
    pub id: i64,
}

impl DetectionStore {
    pub fn register_with_suppression(
        &mut self,
        class_label: &str,
        confidence: f64,
        source_reference: Option<&str>,
        policy: &SuppressionPolicy,
    ) -> StoreResult<Registration> {
        self.register_with_suppression_at(
            Utc::now(),
            class_label,
            confidence,
            source_reference,
            policy,
        )
    }

    /// Checks for a suppressing detection and appends this one, claiming the
    /// notification when none exists, in a single `BEGIN IMMEDIATE`
    /// transaction. A second caller for the same class waits for the first to
    /// commit and then sees its row.
    pub fn register_with_suppression_at(
        &mut self,
        now: DateTime<Utc>,
        class_label: &str,
        confidence: f64,
        source_reference: Option<&str>,
        policy: &SuppressionPolicy,
    ) -> StoreResult<Registration> {
        validate_class_label(class_label)?;
        validate_confidence(confidence)?;
        policy.validate()?;
        let since = policy.cutoff(now)?;

        let result = register_exclusive(
            &mut self.conn,
            now,
            since,
            class_label,
            confidence,
            source_reference,
            policy.threshold,
        );

        match &result {
            Ok(reg) if reg.should_notify => self.log.info(format_args!(
                "detection {} ({} {:.3}) claims notification",
                reg.id, class_label, confidence
            )),
            Ok(reg) => self.log.info(format_args!(
                "detection {} ({} {:.3}) suppressed: {} already seen within {:?}",
                reg.id, class_label, confidence, class_label, policy.window
            )),
            Err(StoreError::LockTimeout) => self.log.warn(format_args!(
                "registration of {} gave up after {:?} waiting for the write lock",
                class_label,
                self.lock_timeout()
            )),
            Err(_) => {}
        }
        result
    }
}

fn register_exclusive(
    conn: &mut Connection,
    now: DateTime<Utc>,
    since: DateTime<Utc>,
    class_label: &str,
    confidence: f64,
    source_reference: Option<&str>,
    threshold: f64,
) -> StoreResult<Registration> {
    // Any early return drops `tx`, which rolls back.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let should_notify = !exists_since(&tx, class_label, threshold, since)?;
    let id = insert_detection(
        &tx,
        now,
        class_label,
        confidence,
        source_reference,
        should_notify,
    )?;
    tx.commit()?;
    Ok(Registration { should_notify, id })
}
