//! Transaction time box
//!
//! The run's watermark: unset until the export job completes, then set exactly
//! once by the orchestrator and read by sinks and the checkpoint commit. Clones
//! share the same slot.

use crate::domain::instant::format_instant;
use crate::domain::{BulkFetchError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Single-writer, read-many watermark for one run
#[derive(Clone, Default)]
pub struct TransactionTime {
    slot: Arc<OnceLock<DateTime<Utc>>>,
}

impl TransactionTime {
    /// Creates an unset transaction time
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the watermark
    ///
    /// # Errors
    ///
    /// Returns a state error if the value was already set during this run.
    pub fn set(&self, value: DateTime<Utc>) -> Result<()> {
        self.slot.set(value).map_err(|rejected| {
            BulkFetchError::State(format!(
                "transaction time already set to {}; refusing to overwrite with {}",
                self.slot.get().map(format_instant).unwrap_or_default(),
                format_instant(&rejected)
            ))
        })
    }

    /// The watermark, if set
    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.slot.get().copied()
    }

    /// The watermark, failing if it has not been set yet
    pub fn require(&self) -> Result<DateTime<Utc>> {
        self.get().ok_or_else(|| {
            BulkFetchError::State("transaction time read before it was set".to_string())
        })
    }

    /// Whether the watermark has been set
    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl fmt::Debug for TransactionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(ts) => write!(f, "TransactionTime({})", format_instant(&ts)),
            None => write!(f, "TransactionTime(unset)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_once() {
        let tt = TransactionTime::new();
        assert!(!tt.is_set());
        assert!(tt.require().is_err());

        let ts = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        tt.set(ts).unwrap();
        assert_eq!(tt.get(), Some(ts));
        assert_eq!(tt.require().unwrap(), ts);
    }

    #[test]
    fn test_second_set_is_rejected_and_value_kept() {
        let tt = TransactionTime::new();
        let first = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        tt.set(first).unwrap();

        let err = tt.set(second).unwrap_err();
        assert!(matches!(err, BulkFetchError::State(_)));
        assert_eq!(tt.get(), Some(first));
    }

    #[test]
    fn test_clones_share_the_slot() {
        let tt = TransactionTime::new();
        let reader = tt.clone();
        let ts = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        tt.set(ts).unwrap();
        assert_eq!(reader.get(), Some(ts));
    }
}
