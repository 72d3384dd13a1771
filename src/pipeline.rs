//! Per-image orchestration around the store.
//!
//! Decides, for one classification, whether it is interesting at all
//! (confidence threshold, notification switch, target classes), runs the
//! atomic suppression check for the interesting ones, drives the external
//! [`Notifier`] and reconciles the claim when the send fails.

use serde::Serialize;

use crate::config::PipelineSettings;
use crate::error::{StoreError, StoreResult};
use crate::logging::StoreLog;
use crate::storage::DetectionStore;
use crate::suppression::Registration;

/// Output of the upstream classifier for one image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub class_label: String,
    pub confidence: f64,
    pub source_reference: Option<String>,
}

impl Classification {
    pub fn new(class_label: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            source_reference: None,
        }
    }

    pub fn with_source(mut self, source_reference: impl Into<String>) -> Self {
        self.source_reference = Some(source_reference.into());
        self
    }
}

/// Push-messaging collaborator. Retry and transport details live behind it.
pub trait Notifier {
    fn notify(&mut self, classification: &Classification) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Disposition {
    BelowThreshold,
    NotificationsDisabled,
    NotNotifiable,
    Suppressed,
    Notified,
    NotifyFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub id: i64,
    pub disposition: Disposition,
}

impl Outcome {
    pub fn notified(&self) -> bool {
        self.disposition == Disposition::Notified
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub recorded_only: u64,
    pub suppressed: u64,
    pub notified: u64,
    pub notify_failed: u64,
    pub lock_retries: u64,
}

pub struct DetectionPipeline {
    settings: PipelineSettings,
    log: StoreLog,
    stats: PipelineStats,
}

impl DetectionPipeline {
    pub fn new(settings: PipelineSettings, log: StoreLog) -> Self {
        Self {
            settings,
            log,
            stats: PipelineStats::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// An empty class list makes every class notifiable.
    fn is_notifiable(&self, class_label: &str) -> bool {
        self.settings.notify_classes.is_empty()
            || self
                .settings
                .notify_classes
                .iter()
                .any(|class| class == class_label)
    }

    fn skip_reason(&self, classification: &Classification) -> Option<Disposition> {
        if classification.confidence < self.settings.notify_threshold {
            Some(Disposition::BelowThreshold)
        } else if !self.settings.notification_enabled {
            Some(Disposition::NotificationsDisabled)
        } else if !self.is_notifiable(&classification.class_label) {
            Some(Disposition::NotNotifiable)
        } else {
            None
        }
    }

    pub fn process(
        &mut self,
        store: &mut DetectionStore,
        classification: &Classification,
        notifier: &mut dyn Notifier,
    ) -> StoreResult<Outcome> {
        self.stats.processed += 1;
        let source = classification.source_reference.as_deref();

        if let Some(disposition) = self.skip_reason(classification) {
            let id = store.append(
                &classification.class_label,
                classification.confidence,
                source,
                false,
            )?;
            self.stats.recorded_only += 1;
            self.log.info(format_args!(
                "detection {} ({} {:.3}) recorded without notification: {:?}",
                id, classification.class_label, classification.confidence, disposition
            ));
            return Ok(Outcome { id, disposition });
        }

        let registration = self.register_with_retry(store, classification)?;
        if !registration.should_notify {
            self.stats.suppressed += 1;
            return Ok(Outcome {
                id: registration.id,
                disposition: Disposition::Suppressed,
            });
        }

        match notifier.notify(classification) {
            Ok(()) => {
                self.stats.notified += 1;
                Ok(Outcome {
                    id: registration.id,
                    disposition: Disposition::Notified,
                })
            }
            Err(e) => {
                self.stats.notify_failed += 1;
                self.log.warn(format_args!(
                    "notification for detection {} failed: {:#}",
                    registration.id, e
                ));
                if let Err(e) = store.update_notification_status(registration.id, false) {
                    self.log.warn(format_args!(
                        "could not record failed notification for detection {}: {}",
                        registration.id, e
                    ));
                }
                Ok(Outcome {
                    id: registration.id,
                    disposition: Disposition::NotifyFailed,
                })
            }
        }
    }

    /// Lock contention is retried with linear backoff; any other error is returned at once.
    fn register_with_retry(
        &mut self,
        store: &mut DetectionStore,
        classification: &Classification,
    ) -> StoreResult<Registration> {
        let mut attempt: u32 = 0;
        loop {
            let result = store.register_with_suppression(
                &classification.class_label,
                classification.confidence,
                classification.source_reference.as_deref(),
                &self.settings.suppression,
            );
            match result {
                Err(StoreError::LockTimeout) if attempt < self.settings.lock_retries => {
                    attempt += 1;
                    self.stats.lock_retries += 1;
                    let backoff = self.settings.retry_backoff * attempt;
                    self.log.warn(format_args!(
                        "write lock contention registering {}; retry {}/{} in {:?}",
                        classification.class_label, attempt, self.settings.lock_retries, backoff
                    ));
                    std::thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }
}
