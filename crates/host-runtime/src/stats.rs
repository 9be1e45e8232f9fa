// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution statistics export.
//!
//! The telemetry sink is an injected collaborator: the host manager holds
//! an `Arc<dyn StatsExporter>` handed in at construction instead of
//! reaching for a process global. [`InMemoryStats`] is the default and
//! doubles as the test double; production embeds hand in their own
//! exporter.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Counter and time-series keys emitted by the host manager.
pub mod keys {
    pub const DEVICE_MEMORY_USED: &str = "device_memory_used";
    pub const DEVICE_MEMORY_AVAILABLE: &str = "device_memory_available";
    pub const DEVICE_MEMORY_MAX: &str = "device_memory_max";

    /// Per-scope counter of completed requests. Scope is a network name
    /// or `"global"`.
    pub fn requests_processed(scope: &str) -> String {
        format!("requests_processed.{scope}")
    }

    pub fn requests_succeeded(scope: &str) -> String {
        format!("requests_succeeded.{scope}")
    }

    pub fn requests_failed(scope: &str) -> String {
        format!("requests_failed.{scope}")
    }

    /// End-to-end run duration series, in microseconds.
    pub fn execution_duration(scope: &str) -> String {
        format!("execution_duration_e2e.{scope}")
    }
}

/// Sink for host counters and time series.
pub trait StatsExporter: Send + Sync {
    /// Sets a gauge-style counter to an absolute value.
    fn set_counter(&self, key: &str, value: u64);

    /// Increments a monotonic counter.
    fn increment_counter(&self, key: &str);

    /// Appends one sample to a time series.
    fn add_time_series_value(&self, key: &str, value: u64);
}

/// The default exporter: keeps everything in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    counters: Mutex<BTreeMap<String, u64>>,
    series: Mutex<BTreeMap<String, Vec<u64>>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a counter's current value (0 when never touched).
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    /// Returns a snapshot of a time series.
    pub fn series(&self, key: &str) -> Vec<u64> {
        self.series.lock().get(key).cloned().unwrap_or_default()
    }
}

impl StatsExporter for InMemoryStats {
    fn set_counter(&self, key: &str, value: u64) {
        self.counters.lock().insert(key.to_string(), value);
    }

    fn increment_counter(&self, key: &str) {
        *self.counters.lock().entry(key.to_string()).or_insert(0) += 1;
    }

    fn add_time_series_value(&self, key: &str, value: u64) {
        self.series
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = InMemoryStats::new();
        assert_eq!(stats.counter(keys::DEVICE_MEMORY_MAX), 0);
        stats.set_counter(keys::DEVICE_MEMORY_MAX, 42);
        assert_eq!(stats.counter(keys::DEVICE_MEMORY_MAX), 42);

        let key = keys::requests_processed("global");
        stats.increment_counter(&key);
        stats.increment_counter(&key);
        assert_eq!(stats.counter(&key), 2);
    }

    #[test]
    fn test_series() {
        let stats = InMemoryStats::new();
        let key = keys::execution_duration("f");
        stats.add_time_series_value(&key, 10);
        stats.add_time_series_value(&key, 20);
        assert_eq!(stats.series(&key), vec![10, 20]);
    }
}
