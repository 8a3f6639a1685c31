use parking_lot::RwLock;
use std::collections::VecDeque;

use super::TelemetryRecord;

/// Bounded history of the latest telemetry records, oldest first.
#[derive(Debug)]
pub struct RecentValues {
    records: RwLock<VecDeque<TelemetryRecord>>,
    capacity: usize,
}

impl RecentValues {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, record: TelemetryRecord) {
        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records.read().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.records.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
