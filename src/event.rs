use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// One persisted classification outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionEvent {
    pub id: i64,
    /// Recorded instant, always UTC.
    pub timestamp: DateTime<Utc>,
    pub class_label: String,
    /// 0..=1
    pub confidence: f64,
    /// Opaque pointer to the originating artifact (e.g. an image path).
    pub source_reference: Option<String>,
    /// Notification claim or outcome. `false` means either suppressed or failed to send.
    pub notified: bool,
}

/// Rejects confidences outside `[0, 1]`, NaN included.
pub fn validate_confidence(confidence: f64) -> StoreResult<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(StoreError::Validation(format!(
            "confidence must be within [0, 1], got {}",
            confidence
        )));
    }
    Ok(())
}

pub(crate) fn validate_class_label(class_label: &str) -> StoreResult<()> {
    if class_label.trim().is_empty() {
        return Err(StoreError::Validation(
            "class label must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Fixed-width RFC 3339 text so that lexical order in SQLite equals time order.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn confidence_bounds_are_inclusive() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(-0.0001).is_err());
        assert!(validate_confidence(1.0001).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
    }

    #[test]
    fn blank_class_label_is_rejected() {
        assert!(validate_class_label("chige").is_ok());
        assert!(validate_class_label("  ").is_err());
    }

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let base = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let later = base + Duration::microseconds(1);
        let much_later = base + Duration::days(400);

        let a = encode_timestamp(base);
        let b = encode_timestamp(later);
        let c = encode_timestamp(much_later);
        assert_eq!(a, "2024-03-09T23:59:59.000000Z");
        assert!(a < b && b < c);
        assert_eq!(decode_timestamp(&b).unwrap(), later);
    }
}
