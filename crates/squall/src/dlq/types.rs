//! DLQ record and statistics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use squall_core::FailureKind;

/// A notification that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    /// Pub/Sub message ID of the notification.
    pub message_id: String,
    /// Object the notification pointed at, when it got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Notification body (lossy UTF-8).
    pub data: String,
    pub error: String,
    pub kind: FailureKind,
    pub timestamp: DateTime<Utc>,
}

/// Failure counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub malformed_input: usize,
    pub not_found: usize,
    pub downstream: usize,
}

impl FailureStats {
    pub fn increment(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::MalformedInput => self.malformed_input += 1,
            FailureKind::NotFound => self.not_found += 1,
            FailureKind::Downstream => self.downstream += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed_input + self.not_found + self.downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_stats_increment() {
        let mut stats = FailureStats::default();
        stats.increment(FailureKind::MalformedInput);
        stats.increment(FailureKind::MalformedInput);
        stats.increment(FailureKind::Downstream);

        assert_eq!(stats.malformed_input, 2);
        assert_eq!(stats.downstream, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_record_serializes_kind_snake_case() {
        let record = FailedRecord {
            message_id: "m1".to_string(),
            locator: None,
            data: "{".to_string(),
            error: "Notification is not valid JSON".to_string(),
            kind: FailureKind::MalformedInput,
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "malformed_input");
        assert!(value.get("locator").is_none());
    }
}
