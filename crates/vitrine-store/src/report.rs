use serde::Serialize;
use vitrine_types::ImageKey;

use crate::error::StoreError;

/// Outcome of one reference-checked image deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The blob was unreferenced and has been deleted.
    Deleted,
    /// The key is still referenced; nothing was touched.
    Retained,
    /// The key was unreferenced but no blob was stored under it.
    Absent,
}

/// A per-key cleanup error that was recorded instead of aborting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub key: ImageKey,
    pub error: String,
}

/// Result of a best-effort cleanup over several image keys.
///
/// A cascade never stops at the first failure: every key is attempted, and
/// the ones that failed are listed here so the caller can retry or alert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<ImageKey>,
    pub retained: Vec<ImageKey>,
    pub absent: Vec<ImageKey>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: ImageKey, disposition: Disposition) {
        match disposition {
            Disposition::Deleted => self.deleted.push(key),
            Disposition::Retained => self.retained.push(key),
            Disposition::Absent => self.absent.push(key),
        }
    }

    pub fn record_failure(&mut self, key: ImageKey, error: &StoreError) {
        self.failed.push(CleanupFailure {
            key,
            error: error.to_string(),
        });
    }

    /// `true` when every attempted key reached a final disposition.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of keys attempted.
    pub fn attempted(&self) -> usize {
        self.deleted.len() + self.retained.len() + self.absent.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_types::ProjectId;

    #[test]
    fn records_each_disposition() {
        let mut report = CleanupReport::new();
        report.record(ImageKey::new("a"), Disposition::Deleted);
        report.record(ImageKey::new("b"), Disposition::Retained);
        report.record(ImageKey::new("c"), Disposition::Absent);

        assert_eq!(report.deleted, vec![ImageKey::new("a")]);
        assert_eq!(report.retained, vec![ImageKey::new("b")]);
        assert_eq!(report.absent, vec![ImageKey::new("c")]);
        assert!(report.is_complete());
        assert_eq!(report.attempted(), 3);
    }

    #[test]
    fn failures_make_report_incomplete() {
        let mut report = CleanupReport::new();
        let err = StoreError::NotFound(ProjectId::new("p-1"));
        report.record_failure(ImageKey::new("a"), &err);

        assert!(!report.is_complete());
        assert_eq!(report.failed[0].key, ImageKey::new("a"));
        assert!(report.failed[0].error.contains("p-1"));
    }
}
