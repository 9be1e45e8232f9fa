// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The partitioner: assigns each function's nodes to devices.
//!
//! Planning is greedy over the topologically ordered node list. A function
//! that fits whole on one admitting device becomes a single DAG node;
//! otherwise consecutive nodes are packed into the same segment while the
//! current device both admits them (operator-support gate plus per-device
//! allow/deny lists) and has memory for the accumulated footprint. Each
//! segment closes when either constraint breaks, and the next segment
//! starts on the admitting device with the most room left.
//!
//! # Memory Model
//!
//! A segment's footprint is its referenced constants (counted once) plus
//! `context_count` copies of its activations, since that many runs may be
//! in flight against the same resident artifact:
//!
//! ```text
//! segment_mem = sum(constant_bytes) + context_count * sum(output_bytes)
//! ```

use crate::{CompiledDag, DagNode, DeviceRuntimeInfo, PlannerError};
use backend_core::Backend;
use device_manager::{DeviceId, DeviceInfo};
use graph_ir::{Function, Module, NodeDef};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Plans per-device DAGs for a module's functions.
pub struct Partitioner<'a> {
    module: &'a Module,
    devices: Vec<DeviceInfo>,
    backends: BTreeMap<String, Arc<dyn Backend>>,
    context_count: usize,
}

impl<'a> Partitioner<'a> {
    /// Creates a partitioner over `module` with the given device snapshot
    /// and backend registry. The context count defaults to 2.
    pub fn new(
        module: &'a Module,
        devices: Vec<DeviceInfo>,
        backends: BTreeMap<String, Arc<dyn Backend>>,
    ) -> Self {
        Self {
            module,
            devices,
            backends,
            context_count: 2,
        }
    }

    /// Sets how many concurrent execution contexts the plan must hold
    /// memory for.
    pub fn set_context_count(&mut self, count: usize) {
        self.context_count = count.max(1);
    }

    /// Plans one DAG per module function.
    pub fn partition(&self) -> Result<Vec<CompiledDag>, PlannerError> {
        if self.module.functions().is_empty() {
            return Err(PlannerError::EmptyModule);
        }
        if self.devices.is_empty() {
            return Err(PlannerError::NoDevices);
        }

        // Memory is committed across functions of the same module.
        let mut remaining: BTreeMap<DeviceId, u64> = self
            .devices
            .iter()
            .map(|d| (d.device_id, d.available_memory))
            .collect();

        let mut dags = Vec::with_capacity(self.module.functions().len());
        for function in self.module.functions() {
            let dag = self.partition_function(function, &mut remaining)?;
            dag.validate()?;
            tracing::info!("{}", dag.summary());
            dags.push(dag);
        }
        Ok(dags)
    }

    /// Returns `true` if `device` admits `node`: the explicit allow/deny
    /// parameter lists win over the backend gate.
    fn device_admits(&self, device: &DeviceInfo, node: &NodeDef) -> bool {
        let kind = node.kind.as_str();
        if device.non_supported_nodes.iter().any(|k| k == kind) {
            return false;
        }
        if !device.supported_nodes.is_empty()
            && !device.supported_nodes.iter().any(|k| k == kind)
        {
            return false;
        }
        match self.backends.get(&device.backend_name) {
            Some(backend) => backend.is_op_supported(&node.info()),
            None => false,
        }
    }

    /// Incremental footprint of adding `node` to a segment that already
    /// references `seen_constants`.
    fn node_cost(&self, node: &NodeDef, seen_constants: &mut HashSet<String>) -> u64 {
        let constants = self.module.constants();
        let mut bytes = 0u64;
        for input in &node.inputs {
            if let Some(constant) = constants.get(input) {
                if seen_constants.insert(input.clone()) {
                    bytes += constant.size_bytes() as u64;
                }
            }
        }
        let activations: usize = node.out_tys.iter().map(|t| t.size_bytes()).sum();
        bytes + (self.context_count * activations) as u64
    }

    fn partition_function(
        &self,
        function: &Function,
        remaining: &mut BTreeMap<DeviceId, u64>,
    ) -> Result<CompiledDag, PlannerError> {
        let nodes = function.nodes();

        // Fail early if some node is admitted nowhere.
        for node in nodes {
            if !self.devices.iter().any(|d| self.device_admits(d, node)) {
                return Err(PlannerError::NodeUnsupported {
                    function: function.name().to_string(),
                    node: node.name.clone(),
                    kind: node.kind.as_str().to_string(),
                });
            }
        }

        // Whole-function fit on a single admitting device?
        let mut whole_constants = HashSet::new();
        let whole_bytes: u64 = nodes
            .iter()
            .map(|n| self.node_cost(n, &mut whole_constants))
            .sum();
        let whole_fit = self.devices.iter().find(|d| {
            nodes.iter().all(|n| self.device_admits(d, n))
                && remaining.get(&d.device_id).copied().unwrap_or(0) >= whole_bytes
        });
        let segments: Vec<(DeviceId, Vec<usize>, u64)> = if let Some(device) = whole_fit {
            vec![(device.device_id, (0..nodes.len()).collect(), whole_bytes)]
        } else {
            self.segment_greedily(function, remaining)?
        };

        // Commit memory and build the DAG chain.
        let mut dag = CompiledDag::new(function.name());
        let mut prev = None;
        for (k, (device_id, node_indices, size_bytes)) in segments.iter().enumerate() {
            let budget = remaining
                .get_mut(device_id)
                .ok_or_else(|| PlannerError::Internal(format!("unknown device {device_id}")))?;
            *budget = budget.saturating_sub(*size_bytes);

            let device = self
                .devices
                .iter()
                .find(|d| d.device_id == *device_id)
                .ok_or_else(|| PlannerError::Internal(format!("unknown device {device_id}")))?;
            let segment_name = format!("{}_part{k}", function.name());
            let segment_fn = carve_segment(function, node_indices, &segment_name)?;

            let mut infos = BTreeMap::new();
            infos.insert(
                *device_id,
                DeviceRuntimeInfo {
                    size_bytes: *size_bytes,
                },
            );
            let idx = dag.add_node(DagNode {
                name: segment_name,
                backend_name: device.backend_name.clone(),
                device_runtime_infos: infos,
                size_bytes: *size_bytes,
                function: segment_fn,
                children: Vec::new(),
                parents: Vec::new(),
            });
            dag.add_edge(prev, idx);
            prev = Some(idx);
        }
        Ok(dag)
    }

    /// Packs consecutive nodes into device segments, greedily.
    fn segment_greedily(
        &self,
        function: &Function,
        remaining: &BTreeMap<DeviceId, u64>,
    ) -> Result<Vec<(DeviceId, Vec<usize>, u64)>, PlannerError> {
        let nodes = function.nodes();
        // Planned against a local copy; the caller commits afterwards.
        let mut budget = remaining.clone();
        let mut segments: Vec<(DeviceId, Vec<usize>, u64)> = Vec::new();

        let mut current: Option<(DeviceId, Vec<usize>, u64, HashSet<String>)> = None;
        for (i, node) in nodes.iter().enumerate() {
            // Try to extend the open segment.
            if let Some((device_id, indices, bytes, seen)) = current.as_mut() {
                let device = self
                    .devices
                    .iter()
                    .find(|d| d.device_id == *device_id)
                    .expect("segment device exists");
                let cost = {
                    let mut probe = seen.clone();
                    self.node_cost(node, &mut probe)
                };
                if self.device_admits(device, node)
                    && *bytes + cost <= budget.get(device_id).copied().unwrap_or(0)
                {
                    self.node_cost(node, seen);
                    *bytes += cost;
                    indices.push(i);
                    continue;
                }
                // Close the segment and charge its memory.
                *budget.get_mut(device_id).expect("device budget") -= *bytes;
                segments.push((*device_id, std::mem::take(indices), *bytes));
                current = None;
            }

            // Open a new segment on the admitting device with most room.
            let mut seen = HashSet::new();
            let cost = self.node_cost(node, &mut seen);
            let best = self
                .devices
                .iter()
                .filter(|d| self.device_admits(d, node))
                .filter(|d| budget.get(&d.device_id).copied().unwrap_or(0) >= cost)
                .max_by_key(|d| budget.get(&d.device_id).copied().unwrap_or(0));
            let Some(device) = best else {
                return Err(PlannerError::OutOfMemory {
                    function: function.name().to_string(),
                    node: node.name.clone(),
                    needed: cost,
                });
            };
            current = Some((device.device_id, vec![i], cost, seen));
        }
        if let Some((device_id, indices, bytes, _)) = current {
            segments.push((device_id, indices, bytes));
        }
        Ok(segments)
    }
}

/// Builds the sub-function for one segment.
///
/// Values produced outside the segment become inputs; values consumed by
/// later segments or captured by the original function's outputs become
/// outputs.
fn carve_segment(
    function: &Function,
    node_indices: &[usize],
    segment_name: &str,
) -> Result<Function, PlannerError> {
    let nodes = function.nodes();
    let index_set: HashSet<usize> = node_indices.iter().copied().collect();

    let mut produced: HashSet<String> = HashSet::new();
    for &i in node_indices {
        for k in 0..nodes[i].out_tys.len() {
            produced.insert(nodes[i].output_name(k));
        }
    }

    let mut segment = Function::new(segment_name);

    // Inputs: values consumed here but produced elsewhere (and not module
    // constants, which resolve by name at compile time).
    let producers = function.producer_map();
    let mut added_inputs: HashSet<&str> = HashSet::new();
    for &i in node_indices {
        let node = &nodes[i];
        for (value, ty) in node.inputs.iter().zip(&node.in_tys) {
            if produced.contains(value) || added_inputs.contains(value.as_str()) {
                continue;
            }
            let is_constant =
                producers.get(value).is_none() && !function.inputs().iter().any(|p| p.name == *value);
            if is_constant {
                continue;
            }
            segment.add_input(value.clone(), ty.clone());
            added_inputs.insert(value.as_str());
        }
    }

    for &i in node_indices {
        segment.add_node(nodes[i].clone());
    }

    // Outputs: values needed downstream or captured by the function.
    let mut added_outputs: HashSet<String> = HashSet::new();
    for (i, node) in nodes.iter().enumerate() {
        if index_set.contains(&i) {
            continue;
        }
        for (value, ty) in node.inputs.iter().zip(&node.in_tys) {
            if produced.contains(value) && added_outputs.insert(value.clone()) {
                segment.add_output(value.clone(), ty.clone());
            }
        }
    }
    for out in function.outputs() {
        if produced.contains(&out.name) && added_outputs.insert(out.name.clone()) {
            segment.add_output(out.name.clone(), out.ty.clone());
        }
    }

    if segment.outputs().is_empty() {
        return Err(PlannerError::Internal(format!(
            "segment '{segment_name}' produces nothing downstream"
        )));
    }
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_core::create_backend;
    use graph_ir::{ElemKind, NodeDef, OpKind, Shape, TensorTy};

    fn fty(n: usize) -> TensorTy {
        TensorTy::new(ElemKind::Float, Shape::vector(n))
    }

    /// A chain of `n` tanh nodes ending in a save.
    fn chain_module(n: usize, width: usize) -> Module {
        let mut module = Module::new();
        let mut f = Function::new("f");
        f.add_input("in", fty(width));
        let mut prev = "in".to_string();
        for i in 0..n {
            let name = format!("t{i}");
            f.add_node(NodeDef::new(
                &name,
                OpKind::Tanh,
                vec![prev.clone()],
                vec![fty(width)],
                vec![fty(width)],
            ));
            prev = name;
        }
        f.add_node(NodeDef::new(
            "out",
            OpKind::Save,
            vec![prev],
            vec![fty(width)],
            vec![fty(width)],
        ));
        f.add_output("out", fty(width));
        module.add_function(f).unwrap();
        module
    }

    fn cpu_backends() -> BTreeMap<String, Arc<dyn Backend>> {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), create_backend("cpu").unwrap());
        map
    }

    fn device(id: DeviceId, memory: u64) -> DeviceInfo {
        DeviceInfo {
            device_id: id,
            device_name: format!("dev{id}"),
            backend_name: "cpu".to_string(),
            maximum_memory: memory,
            available_memory: memory,
            supported_nodes: Vec::new(),
            non_supported_nodes: Vec::new(),
        }
    }

    #[test]
    fn test_whole_fit_single_node() {
        let module = chain_module(4, 8);
        let partitioner = Partitioner::new(&module, vec![device(0, 1 << 20)], cpu_backends());
        let dags = partitioner.partition().unwrap();
        assert_eq!(dags.len(), 1);
        assert_eq!(dags[0].num_nodes(), 1);
        assert_eq!(dags[0].root_name(), "f");
        assert_eq!(dags[0].nodes()[0].name, "f_part0");
        assert_eq!(dags[0].nodes()[0].primary_device(), Some(0));
    }

    #[test]
    fn test_memory_pressure_splits_across_devices() {
        // 6 tanh nodes of 32 floats (128 bytes each), context count 2:
        // each node costs 256 bytes; the save adds another. A 700-byte
        // device holds two nodes, so the chain must split.
        let module = chain_module(6, 32);
        let devices = vec![device(0, 700), device(1, 700), device(2, 700), device(3, 700)];
        let partitioner = Partitioner::new(&module, devices, cpu_backends());
        let dags = partitioner.partition().unwrap();
        let dag = &dags[0];
        assert!(dag.num_nodes() > 1, "expected a split, got {}", dag.summary());

        // Segments chain in execution order and cover all 7 nodes.
        let covered: usize = dag.nodes().iter().map(|n| n.function.num_nodes()).sum();
        assert_eq!(covered, 7);
        for node in dag.nodes() {
            assert!(node.size_bytes <= 700);
        }
    }

    #[test]
    fn test_unsupported_everywhere_fails() {
        let mut module = Module::new();
        let mut f = Function::new("f");
        f.add_input("in", fty(4));
        // FullyConnected has no arm in the cpu gate.
        f.add_node(NodeDef::new(
            "fc",
            OpKind::FullyConnected,
            vec!["in".into()],
            vec![fty(4)],
            vec![fty(4)],
        ));
        f.add_output("fc", fty(4));
        module.add_function(f).unwrap();

        let partitioner = Partitioner::new(&module, vec![device(0, 1 << 20)], cpu_backends());
        assert!(matches!(
            partitioner.partition(),
            Err(PlannerError::NodeUnsupported { .. })
        ));
    }

    #[test]
    fn test_non_supported_param_overrides_gate() {
        let module = chain_module(2, 8);
        let mut dev = device(0, 1 << 20);
        dev.non_supported_nodes = vec!["tanh".to_string()];
        let partitioner = Partitioner::new(&module, vec![dev], cpu_backends());
        assert!(matches!(
            partitioner.partition(),
            Err(PlannerError::NodeUnsupported { .. })
        ));
    }

    #[test]
    fn test_supported_list_restricts() {
        let module = chain_module(2, 8);
        let mut dev = device(0, 1 << 20);
        dev.supported_nodes = vec!["save".to_string()];
        let partitioner = Partitioner::new(&module, vec![dev], cpu_backends());
        assert!(partitioner.partition().is_err());
    }

    #[test]
    fn test_out_of_memory() {
        let module = chain_module(2, 1024);
        let partitioner = Partitioner::new(&module, vec![device(0, 64)], cpu_backends());
        assert!(matches!(
            partitioner.partition(),
            Err(PlannerError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_context_count_scales_memory() {
        let module = chain_module(4, 32);
        let mut small = Partitioner::new(&module, vec![device(0, 100_000)], cpu_backends());
        small.set_context_count(2);
        let one_node = small.partition().unwrap()[0].total_size_bytes();

        let mut large = Partitioner::new(&module, vec![device(0, 100_000)], cpu_backends());
        large.set_context_count(8);
        let scaled = large.partition().unwrap()[0].total_size_bytes();
        assert_eq!(scaled, one_node * 4);
    }

    #[test]
    fn test_segment_functions_validate() {
        let module = chain_module(6, 32);
        let devices = vec![device(0, 700), device(1, 700), device(2, 700), device(3, 700)];
        let partitioner = Partitioner::new(&module, devices, cpu_backends());
        let dags = partitioner.partition().unwrap();
        for node in dags[0].nodes() {
            node.function.validate(module.constants()).unwrap();
        }
    }

    #[test]
    fn test_empty_module() {
        let module = Module::new();
        let partitioner = Partitioner::new(&module, vec![device(0, 100)], cpu_backends());
        assert!(matches!(
            partitioner.partition(),
            Err(PlannerError::EmptyModule)
        ));
    }

    #[test]
    fn test_no_devices() {
        let module = chain_module(1, 4);
        let partitioner = Partitioner::new(&module, Vec::new(), cpu_backends());
        assert!(matches!(partitioner.partition(), Err(PlannerError::NoDevices)));
    }
}
