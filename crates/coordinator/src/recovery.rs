//! Retry/recovery manager
//!
//! Holds the single most recent failure. Only the latest failure is
//! retryable; recording a new one overwrites the old.

use crate::settings::SessionParams;

#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub conversation_id: String,
    pub text: String,
    pub params: SessionParams,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryManager {
    record: Option<FailureRecord>,
}

impl RecoveryManager {
    pub fn record(&mut self, failure: FailureRecord) {
        self.record = Some(failure);
    }

    /// Take the record, leaving the manager empty.
    pub fn consume(&mut self) -> Option<FailureRecord> {
        self.record.take()
    }

    pub fn clear(&mut self) {
        self.record = None;
    }

    pub fn has_record(&self) -> bool {
        self.record.is_some()
    }

    pub fn current(&self) -> Option<&FailureRecord> {
        self.record.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(text: &str) -> FailureRecord {
        FailureRecord {
            conversation_id: "1".to_string(),
            text: text.to_string(),
            params: SessionParams::default(),
        }
    }

    #[test]
    fn record_overwrites_previous() {
        let mut manager = RecoveryManager::default();
        manager.record(failure("first"));
        manager.record(failure("second"));

        assert_eq!(manager.current().map(|r| r.text.as_str()), Some("second"));
    }

    #[test]
    fn consume_empties_the_manager() {
        let mut manager = RecoveryManager::default();
        assert!(manager.consume().is_none());

        manager.record(failure("test"));
        assert_eq!(manager.consume().map(|r| r.text), Some("test".to_string()));
        assert!(!manager.has_record());
        assert!(manager.consume().is_none());
    }
}
