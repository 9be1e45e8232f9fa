// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device-manager contract and the CPU implementation.
//!
//! One [`DeviceManager`] per physical device. It owns artifact residency
//! (load/evict with memory accounting), runs compiled functions against a
//! caller's bindings, and reports the [`DeviceInfo`] snapshot the
//! partitioner plans with. The host never touches device-resident state
//! directly.

use crate::{DeviceConfig, DeviceError, DeviceId};
use backend_core::CompiledFunction;
use graph_ir::{Bindings, TraceContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of one device, taken by the host when adding a network.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub device_name: String,
    pub backend_name: String,
    pub maximum_memory: u64,
    pub available_memory: u64,
    /// Operator names this device is restricted to; empty means "ask the
    /// backend gate".
    pub supported_nodes: Vec<String>,
    /// Operator names this device refuses regardless of the gate.
    pub non_supported_nodes: Vec<String>,
}

/// Owns one device: initialization, artifact residency, execution,
/// tracing.
pub trait DeviceManager: Send + Sync {
    /// Brings the device up. Must be called before any load or run.
    fn init(&self) -> Result<(), DeviceError>;

    /// Stops the device. Resident artifacts are dropped.
    fn stop(&self) -> Result<(), DeviceError>;

    /// The immutable configuration this device was created from.
    fn config(&self) -> &DeviceConfig;

    /// Host-assigned device id.
    fn device_id(&self) -> DeviceId {
        self.config().device_id
    }

    /// The backend that drives this device.
    fn backend_name(&self) -> &str {
        &self.config().backend_name
    }

    /// Total device memory in bytes.
    fn maximum_memory(&self) -> u64;

    /// Memory not yet claimed by resident artifacts.
    fn available_memory(&self) -> u64;

    /// Returns a backend parameter by name.
    fn param(&self, key: &str) -> Option<String> {
        self.config().params.get(key).cloned()
    }

    /// Returns the planning snapshot for this device.
    fn device_info(&self) -> DeviceInfo;

    /// Makes `artifact` resident under `name`, claiming its memory.
    fn load_function(
        &self,
        name: &str,
        artifact: Arc<dyn CompiledFunction>,
    ) -> Result<(), DeviceError>;

    /// Evicts the artifact under `name`, releasing its memory. Evicting an
    /// unknown name is an error.
    fn evict_function(&self, name: &str) -> Result<(), DeviceError>;

    /// Runs the resident function `name` against `bindings`.
    fn run_function(&self, name: &str, bindings: &mut Bindings) -> Result<(), DeviceError>;

    /// Begins routing device events into `trace`.
    fn start_trace(&self, trace: &TraceContext) -> Result<(), DeviceError>;

    /// Stops routing device events.
    fn stop_trace(&self, trace: &TraceContext) -> Result<(), DeviceError>;
}

/// Creates the device manager matching `config.backend_name`.
pub fn create_device_manager(
    config: DeviceConfig,
) -> Result<Arc<dyn DeviceManager>, DeviceError> {
    match config.backend_name.as_str() {
        "cpu" => Ok(Arc::new(CpuDeviceManager::new(config))),
        other => Err(DeviceError::UnknownBackend(other.to_string())),
    }
}

/// A CPU device: artifacts live in host memory, runs execute inline on
/// the calling (executor) thread.
pub struct CpuDeviceManager {
    config: DeviceConfig,
    name: String,
    functions: RwLock<HashMap<String, Arc<dyn CompiledFunction>>>,
    used_memory: AtomicU64,
    running: AtomicBool,
    tracing_active: AtomicBool,
}

impl CpuDeviceManager {
    /// Creates a stopped device from `config`.
    pub fn new(config: DeviceConfig) -> Self {
        let name = config.resolved_name(config.device_id);
        Self {
            config,
            name,
            functions: RwLock::new(HashMap::new()),
            used_memory: AtomicU64::new(0),
            running: AtomicBool::new(false),
            tracing_active: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<(), DeviceError> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DeviceError::Stopped(self.name.clone()))
        }
    }
}

impl DeviceManager for CpuDeviceManager {
    fn init(&self) -> Result<(), DeviceError> {
        self.running.store(true, Ordering::Release);
        tracing::info!(
            "device '{}' up: backend={}, memory={} bytes",
            self.name,
            self.config.backend_name,
            self.config.memory_bytes,
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Release);
        self.functions.write().clear();
        self.used_memory.store(0, Ordering::Release);
        tracing::info!("device '{}' stopped", self.name);
        Ok(())
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn maximum_memory(&self) -> u64 {
        self.config.memory_bytes
    }

    fn available_memory(&self) -> u64 {
        self.config
            .memory_bytes
            .saturating_sub(self.used_memory.load(Ordering::Acquire))
    }

    fn device_info(&self) -> DeviceInfo {
        let split = |key: &str| -> Vec<String> {
            self.param(key)
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };
        DeviceInfo {
            device_id: self.config.device_id,
            device_name: self.name.clone(),
            backend_name: self.config.backend_name.clone(),
            maximum_memory: self.maximum_memory(),
            available_memory: self.available_memory(),
            supported_nodes: split("supportedNodes"),
            non_supported_nodes: split("nonSupportedNodes"),
        }
    }

    fn load_function(
        &self,
        name: &str,
        artifact: Arc<dyn CompiledFunction>,
    ) -> Result<(), DeviceError> {
        self.ensure_running()?;
        let size = artifact.size_bytes() as u64;
        let available = self.available_memory();
        if size > available {
            return Err(DeviceError::OutOfMemory {
                device: self.name.clone(),
                requested: size,
                available,
            });
        }
        self.used_memory.fetch_add(size, Ordering::AcqRel);
        self.functions.write().insert(name.to_string(), artifact);
        tracing::debug!("device '{}': loaded '{name}' ({size} bytes)", self.name);
        Ok(())
    }

    fn evict_function(&self, name: &str) -> Result<(), DeviceError> {
        let removed = self.functions.write().remove(name);
        match removed {
            Some(artifact) => {
                self.used_memory
                    .fetch_sub(artifact.size_bytes() as u64, Ordering::AcqRel);
                tracing::debug!("device '{}': evicted '{name}'", self.name);
                Ok(())
            }
            None => Err(DeviceError::FunctionNotFound {
                device: self.name.clone(),
                function: name.to_string(),
            }),
        }
    }

    fn run_function(&self, name: &str, bindings: &mut Bindings) -> Result<(), DeviceError> {
        self.ensure_running()?;
        let artifact = self.functions.read().get(name).cloned().ok_or_else(|| {
            DeviceError::FunctionNotFound {
                device: self.name.clone(),
                function: name.to_string(),
            }
        })?;
        artifact
            .execute(bindings)
            .map_err(|source| DeviceError::RunFailed {
                device: self.name.clone(),
                function: name.to_string(),
                source,
            })
    }

    fn start_trace(&self, trace: &TraceContext) -> Result<(), DeviceError> {
        self.tracing_active.store(true, Ordering::Release);
        trace.record("trace start", self.name.clone());
        Ok(())
    }

    fn stop_trace(&self, trace: &TraceContext) -> Result<(), DeviceError> {
        self.tracing_active.store(false, Ordering::Release);
        trace.record("trace stop", self.name.clone());
        Ok(())
    }
}
