// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The provisioner: compiles DAG nodes on their backends and loads the
//! artifacts onto their devices.
//!
//! Provisioning is all-or-nothing per call: if any node fails to compile
//! or load, every load performed by that call is rolled back before the
//! error escapes.

use crate::HostError;
use backend_core::{create_backend, Backend, BackendOptions, CompiledFunction};
use device_manager::{DeviceId, DeviceManager};
use parking_lot::Mutex;
use partition_planner::CompiledDag;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Compiles and places artifacts for the host manager.
pub struct Provisioner {
    devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>>,
    backends: BTreeMap<String, Arc<dyn Backend>>,
    artifacts: Mutex<HashMap<String, Arc<dyn CompiledFunction>>>,
}

impl Provisioner {
    /// Creates a provisioner over `devices`, instantiating one backend per
    /// distinct backend name among them.
    pub fn new(devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>>) -> Result<Self, HostError> {
        let mut backends = BTreeMap::new();
        for device in devices.values() {
            let name = device.backend_name().to_string();
            if !backends.contains_key(&name) {
                backends.insert(name.clone(), create_backend(&name)?);
            }
        }
        Ok(Self {
            devices,
            backends,
            artifacts: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the backend registered under `name`.
    pub fn get_backend(&self, name: &str) -> Result<Arc<dyn Backend>, HostError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::Runtime(format!("no backend named '{name}'")))
    }

    /// The backend registry, keyed by name.
    pub fn backends(&self) -> &BTreeMap<String, Arc<dyn Backend>> {
        &self.backends
    }

    /// Compiles every DAG node on its backend and loads it onto its
    /// devices. Rolls back this call's loads on failure.
    pub fn provision(
        &self,
        dags: &[CompiledDag],
        module: &graph_ir::Module,
        opts: &BackendOptions,
        verbose: bool,
    ) -> Result<(), HostError> {
        let mut loaded: Vec<(String, DeviceId)> = Vec::new();
        let mut compiled: Vec<String> = Vec::new();

        let result = (|| -> Result<(), HostError> {
            for dag in dags {
                for node in dag.nodes() {
                    let backend = self.get_backend(&node.backend_name)?;
                    if verbose {
                        tracing::info!(
                            "provisioning '{}' on backend '{}'",
                            node.name,
                            node.backend_name
                        );
                    }
                    let artifact: Arc<dyn CompiledFunction> =
                        backend.compile(&node.function, module, opts)?.into();
                    self.artifacts
                        .lock()
                        .insert(node.name.clone(), Arc::clone(&artifact));
                    compiled.push(node.name.clone());

                    for &device_id in node.device_runtime_infos.keys() {
                        let device = self.device(device_id)?;
                        device.load_function(&node.name, Arc::clone(&artifact))?;
                        loaded.push((node.name.clone(), device_id));
                    }
                }
            }
            Ok(())
        })();

        if result.is_err() {
            for (name, device_id) in loaded.into_iter().rev() {
                if let Ok(device) = self.device(device_id) {
                    if let Err(err) = device.evict_function(&name) {
                        tracing::warn!("rollback eviction of '{name}' failed: {err}");
                    }
                }
            }
            let mut artifacts = self.artifacts.lock();
            for name in compiled {
                artifacts.remove(&name);
            }
        }
        result
    }

    /// Evicts one node's artifact from one device.
    pub fn evict_function(&self, name: &str, device_id: DeviceId) -> Result<(), HostError> {
        self.device(device_id)?.evict_function(name)?;
        Ok(())
    }

    /// Drops the compiled artifact held for `name`.
    pub fn remove_function(&self, name: &str) -> Result<(), HostError> {
        match self.artifacts.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(HostError::Runtime(format!(
                "no compiled function named '{name}'"
            ))),
        }
    }

    /// Returns `true` if an artifact is held for `name`.
    pub fn has_function(&self, name: &str) -> bool {
        self.artifacts.lock().contains_key(name)
    }

    fn device(&self, device_id: DeviceId) -> Result<&Arc<dyn DeviceManager>, HostError> {
        self.devices
            .get(&device_id)
            .ok_or_else(|| HostError::Runtime(format!("unknown device {device_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_manager::{create_device_manager, DeviceConfig, DeviceInfo};
    use graph_ir::{ElemKind, Function, Module, NodeDef, OpKind, Shape, TensorTy};
    use partition_planner::Partitioner;

    fn fty(n: usize) -> TensorTy {
        TensorTy::new(ElemKind::Float, Shape::vector(n))
    }

    fn passthrough_module() -> Module {
        let mut module = Module::new();
        let mut f = Function::new("f");
        f.add_input("in", fty(4));
        f.add_node(NodeDef::new(
            "out",
            OpKind::Save,
            vec!["in".into()],
            vec![fty(4)],
            vec![fty(4)],
        ));
        f.add_output("out", fty(4));
        module.add_function(f).unwrap();
        module
    }

    fn setup(memory: u64) -> (Provisioner, Vec<DeviceInfo>) {
        let device = create_device_manager(
            DeviceConfig::new("cpu", memory).with_name("dev0"),
        )
        .unwrap();
        device.init().unwrap();
        let info = device.device_info();
        let mut devices = BTreeMap::new();
        devices.insert(0usize, device);
        (Provisioner::new(devices).unwrap(), vec![info])
    }

    #[test]
    fn test_provision_and_teardown() {
        let module = passthrough_module();
        let (provisioner, infos) = setup(1 << 20);
        let partitioner = Partitioner::new(&module, infos, provisioner.backends().clone());
        let dags = partitioner.partition().unwrap();

        provisioner
            .provision(&dags, &module, &BackendOptions::new(), false)
            .unwrap();
        assert!(provisioner.has_function("f_part0"));

        provisioner.evict_function("f_part0", 0).unwrap();
        provisioner.remove_function("f_part0").unwrap();
        assert!(!provisioner.has_function("f_part0"));
    }

    #[test]
    fn test_provision_rolls_back_on_load_failure() {
        let module = passthrough_module();
        // Enough memory to plan, but none to load onto the device.
        let (provisioner, mut infos) = setup(8);
        infos[0].available_memory = 1 << 20; // Lie to the planner.
        let partitioner = Partitioner::new(&module, infos, provisioner.backends().clone());
        let dags = partitioner.partition().unwrap();

        let err = provisioner
            .provision(&dags, &module, &BackendOptions::new(), false)
            .unwrap_err();
        assert!(matches!(err, HostError::Device(_)));
        assert!(!provisioner.has_function("f_part0"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let module = passthrough_module();
        let (provisioner, _) = setup(1 << 20);
        assert!(provisioner.get_backend("cpu").is_ok());
        assert!(provisioner.get_backend("npu").is_err());
        let _ = module;
    }

    #[test]
    fn test_remove_unknown_function_errors() {
        let (provisioner, _) = setup(1 << 20);
        assert!(provisioner.remove_function("ghost").is_err());
    }
}
