// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The network registry: published networks plus the processing set.
//!
//! The registry is the single owner of its invariants:
//!
//! - a name is in at most one of `networks` / `processing` at any time,
//! - a network's refcount counts its in-flight runs and gates removal,
//! - acquire/release only touch the refcount under the shared lock.
//!
//! One reader/writer lock guards both maps. Reservation and publication
//! are the only write-lock critical sections of an add; dispatch-path
//! reads hold the shared lock just long enough to look up and bump.

use crate::HostError;
use graph_ir::Module;
use parking_lot::RwLock;
use partition_planner::CompiledDag;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One published network.
pub struct NetworkEntry {
    pub dag: Arc<CompiledDag>,
    pub module: Arc<Module>,
    /// In-flight runs against this network.
    refcount: AtomicUsize,
}

impl NetworkEntry {
    fn new(dag: Arc<CompiledDag>, module: Arc<Module>) -> Self {
        Self {
            dag,
            module,
            refcount: AtomicUsize::new(0),
        }
    }

    /// Current in-flight count.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct RegistryInner {
    networks: HashMap<String, NetworkEntry>,
    processing: HashSet<String>,
}

/// Thread-safe name → network mapping with add-in-progress tracking.
#[derive(Default)]
pub struct NetworkRegistry {
    inner: RwLock<RegistryInner>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserves `names` for an in-flight add.
    ///
    /// Fails without side effects if any name is already published,
    /// already being added, or duplicated within `names`.
    pub fn reserve(&self, names: &[String]) -> Result<(), HostError> {
        let mut inner = self.inner.write();
        let mut batch: HashSet<&str> = HashSet::with_capacity(names.len());
        for name in names {
            if inner.networks.contains_key(name)
                || inner.processing.contains(name)
                || !batch.insert(name.as_str())
            {
                return Err(HostError::Runtime(format!(
                    "failed to add network: already have a function called '{name}'"
                )));
            }
        }
        for name in names {
            inner.processing.insert(name.clone());
        }
        Ok(())
    }

    /// Drops reservations after a failed add.
    pub fn cancel_reservation(&self, names: &[String]) {
        let mut inner = self.inner.write();
        for name in names {
            inner.processing.remove(name.as_str());
        }
    }

    /// Publishes a reserved name, moving it from processing to networks.
    pub fn publish(&self, name: &str, dag: Arc<CompiledDag>, module: Arc<Module>) {
        let mut inner = self.inner.write();
        inner.processing.remove(name);
        inner
            .networks
            .insert(name.to_string(), NetworkEntry::new(dag, module));
    }

    /// Increments the refcount of `name` and returns its DAG, or `None`
    /// if the network is not published.
    pub fn acquire(&self, name: &str) -> Option<Arc<CompiledDag>> {
        let inner = self.inner.read();
        inner.networks.get(name).map(|entry| {
            entry.refcount.fetch_add(1, Ordering::AcqRel);
            Arc::clone(&entry.dag)
        })
    }

    /// Decrements the refcount of `name`. Never blocks on anything but the
    /// shared lock.
    pub fn release(&self, name: &str) {
        let inner = self.inner.read();
        if let Some(entry) = inner.networks.get(name) {
            entry.refcount.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Returns the DAG of a published network without touching refcounts.
    pub fn dag(&self, name: &str) -> Option<Arc<CompiledDag>> {
        self.inner.read().networks.get(name).map(|e| Arc::clone(&e.dag))
    }

    /// Removes `name` and returns its entry for teardown.
    ///
    /// - `Ok(None)` when the name is unknown (silent success).
    /// - `Err(NetBusy)` when the name is mid-add or has outstanding runs.
    pub fn remove(&self, name: &str) -> Result<Option<NetworkEntry>, HostError> {
        let mut inner = self.inner.write();
        if inner.processing.contains(name) {
            return Err(HostError::NetBusy(format!(
                "cannot remove network '{name}', it is currently being modified"
            )));
        }
        let Some(entry) = inner.networks.get(name) else {
            return Ok(None);
        };
        if entry.refcount() != 0 {
            return Err(HostError::NetBusy(format!(
                "cannot remove network '{name}', there are still outstanding runs"
            )));
        }
        Ok(inner.networks.remove(name))
    }

    /// Returns `true` if `name` is published.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().networks.contains_key(name)
    }

    /// Returns `true` if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.inner.read().networks.is_empty()
    }

    /// Number of published networks.
    pub fn len(&self) -> usize {
        self.inner.read().networks.len()
    }

    /// Names of all published networks.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().networks.keys().cloned().collect()
    }

    /// Returns `true` if `name` is in the processing set.
    pub fn is_processing(&self, name: &str) -> bool {
        self.inner.read().processing.contains(name)
    }

    /// Number of names currently being added.
    pub fn processing_len(&self) -> usize {
        self.inner.read().processing.len()
    }

    /// Current refcount of a published network.
    pub fn refcount(&self, name: &str) -> Option<usize> {
        self.inner.read().networks.get(name).map(|e| e.refcount())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_parts() -> (Arc<CompiledDag>, Arc<Module>) {
        (
            Arc::new(CompiledDag::new("f")),
            Arc::new(Module::new()),
        )
    }

    fn registry_with(name: &str) -> NetworkRegistry {
        let registry = NetworkRegistry::new();
        registry.reserve(&[name.to_string()]).unwrap();
        let (dag, module) = entry_parts();
        registry.publish(name, dag, module);
        registry
    }

    #[test]
    fn test_reserve_publish_flow() {
        let registry = NetworkRegistry::new();
        registry.reserve(&["f".to_string()]).unwrap();
        assert!(registry.is_processing("f"));
        assert!(!registry.contains("f"));

        let (dag, module) = entry_parts();
        registry.publish("f", dag, module);
        assert!(!registry.is_processing("f"));
        assert!(registry.contains("f"));
    }

    #[test]
    fn test_reserve_rejects_published_name() {
        let registry = registry_with("f");
        let err = registry
            .reserve(&["f".to_string(), "g".to_string()])
            .unwrap_err();
        assert!(matches!(err, HostError::Runtime(_)));
        // Atomic: g must not be left reserved.
        assert!(!registry.is_processing("g"));
    }

    #[test]
    fn test_reserve_rejects_in_flight_name() {
        let registry = NetworkRegistry::new();
        registry.reserve(&["f".to_string()]).unwrap();
        assert!(registry.reserve(&["f".to_string()]).is_err());
    }

    #[test]
    fn test_reserve_rejects_batch_duplicates() {
        let registry = NetworkRegistry::new();
        let err = registry
            .reserve(&["f".to_string(), "f".to_string()])
            .unwrap_err();
        assert!(matches!(err, HostError::Runtime(_)));
        assert_eq!(registry.processing_len(), 0);
    }

    #[test]
    fn test_acquire_release_refcount() {
        let registry = registry_with("f");
        assert!(registry.acquire("f").is_some());
        assert!(registry.acquire("f").is_some());
        assert_eq!(registry.refcount("f"), Some(2));
        registry.release("f");
        assert_eq!(registry.refcount("f"), Some(1));
        registry.release("f");
        assert_eq!(registry.refcount("f"), Some(0));
    }

    #[test]
    fn test_acquire_unknown() {
        let registry = NetworkRegistry::new();
        assert!(registry.acquire("ghost").is_none());
    }

    #[test]
    fn test_remove_busy_refcount() {
        let registry = registry_with("f");
        registry.acquire("f");
        assert!(matches!(registry.remove("f"), Err(HostError::NetBusy(_))));
        registry.release("f");
        assert!(registry.remove("f").unwrap().is_some());
        assert!(!registry.contains("f"));
    }

    #[test]
    fn test_remove_busy_processing() {
        let registry = NetworkRegistry::new();
        registry.reserve(&["f".to_string()]).unwrap();
        assert!(matches!(registry.remove("f"), Err(HostError::NetBusy(_))));
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let registry = NetworkRegistry::new();
        assert!(registry.remove("ghost").unwrap().is_none());
    }

    #[test]
    fn test_name_disjointness_invariant() {
        let registry = registry_with("f");
        registry.reserve(&["g".to_string()]).unwrap();
        for name in ["f", "g"] {
            assert!(
                !(registry.contains(name) && registry.is_processing(name)),
                "'{name}' is in both maps"
            );
        }
    }
}
