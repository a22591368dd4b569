//! Cache invalidation signals
//!
//! Read views are cached outside the engine. After each commit the engine
//! hands the affected keys to a [`CacheInvalidator`]; it never reads the
//! cache itself.

use std::collections::BTreeSet;
use std::sync::Mutex;

use super::types::{BranchId, FundSource, TransactionId};

/// Eviction sink. Infallible and advisory: a lost signal only delays
/// freshness of a cached view.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, keys: &BTreeSet<String>);
}

/// Key set affected by one committed mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKeys(BTreeSet<String>);

impl CacheKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, id: BranchId) -> Self {
        self.0.insert(format!("branch:{}", id));
        self.0.insert(format!("branch_transactions:{}", id));
        self
    }

    /// System Manager has no cached view
    pub fn source(self, source: FundSource) -> Self {
        match source {
            FundSource::Branch(id) => self.branch(id),
            FundSource::SystemManager => self,
        }
    }

    pub fn transaction(mut self, id: TransactionId) -> Self {
        self.0.insert(format!("transaction:{}", id));
        self
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.0
    }

    pub fn send(&self, sink: &dyn CacheInvalidator) {
        if !self.0.is_empty() {
            sink.invalidate(&self.0);
        }
    }
}

/// Default sink when no cache is deployed
#[derive(Debug, Default)]
pub struct LoggingInvalidator;

impl CacheInvalidator for LoggingInvalidator {
    fn invalidate(&self, keys: &BTreeSet<String>) {
        tracing::debug!(?keys, "[cache] invalidate");
    }
}

/// Keeps every signal, in order
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    signals: Mutex<Vec<BTreeSet<String>>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<BTreeSet<String>> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<BTreeSet<String>> {
        self.signals().pop()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, keys: &BTreeSet<String>) {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(keys.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_keys() {
        let id = TransactionId::new();
        let keys = CacheKeys::new()
            .source(FundSource::Branch(1))
            .branch(2)
            .transaction(id);

        let expected: BTreeSet<String> = [
            "branch:1".to_string(),
            "branch_transactions:1".to_string(),
            "branch:2".to_string(),
            "branch_transactions:2".to_string(),
            format!("transaction:{}", id),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.keys(), &expected);
    }

    #[test]
    fn test_system_manager_has_no_keys() {
        let keys = CacheKeys::new().source(FundSource::SystemManager);
        assert!(keys.keys().is_empty());

        let sink = RecordingInvalidator::new();
        keys.send(&sink);
        assert!(sink.signals().is_empty());
    }

    #[test]
    fn test_same_branch_deduplicated() {
        let keys = CacheKeys::new().branch(3).branch(3);
        assert_eq!(keys.keys().len(), 2);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingInvalidator::new();
        CacheKeys::new().branch(1).send(&sink);
        CacheKeys::new().branch(2).send(&sink);

        let signals = sink.signals();
        assert_eq!(signals.len(), 2);
        assert!(sink.last().unwrap().contains("branch:2"));
    }
}
