use rusqlite::{params, TransactionBehavior};

use crate::error::{StoreError, StoreResult};
use crate::storage::DetectionStore;

impl DetectionStore {
    /// Overwrites the notified flag of one detection once the real outcome of
    /// the notification attempt is known. Idempotent, last write wins.
    ///
    /// Other callers that already saw the original claim and suppressed
    /// themselves are not revisited.
    pub fn update_notification_status(&mut self, id: i64, notified: bool) -> StoreResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE detections SET is_notified = ?1 WHERE id = ?2",
            params![notified, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        tx.commit()?;
        self.log.info(format_args!(
            "detection {} notification status set to {}",
            id, notified
        ));
        Ok(())
    }
}
