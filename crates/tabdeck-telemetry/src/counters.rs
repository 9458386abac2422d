use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named fault counters. The coordinator's handlers swallow bad
/// input instead of crashing; these counters are what keeps those swallowed
/// faults visible.
#[derive(Default)]
pub struct FaultCounters {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

/// Point-in-time copy of all counters, serializable for the health endpoint.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FaultSnapshot(pub HashMap<String, u64>);

impl FaultCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.increment();
            return;
        }
        let mut counters = self.counters.write();
        counters
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Counter::new()))
            .increment();
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.read().get(name).map(|c| c.get()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> FaultSnapshot {
        FaultSnapshot(
            self.counters
                .read()
                .iter()
                .map(|(name, counter)| (name.clone(), counter.get()))
                .collect(),
        )
    }
}
