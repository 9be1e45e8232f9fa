// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The compiled DAG: the partitioner's output and the executor's input.
//!
//! A [`CompiledDag`] is a rooted acyclic graph with one synthetic root per
//! network. Each [`DagNode`] is one subgraph assigned to exactly one
//! device; nodes reference each other by arena index, so the structure is
//! plain data that can be shared, walked, and serialized without pointer
//! chasing.

use crate::PlannerError;
use device_manager::DeviceId;
use graph_ir::Function;
use std::collections::BTreeMap;

/// Per-device runtime placement of one DAG node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceRuntimeInfo {
    /// Resident bytes claimed on the device for this node.
    pub size_bytes: u64,
}

/// One partitioned subgraph, assigned to one device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DagNode {
    /// Node name; also the name the artifact is loaded under on devices.
    pub name: String,
    /// Backend that compiles this node.
    pub backend_name: String,
    /// Devices this node is resident on. Exactly one entry today; the map
    /// shape matches replicated placements.
    pub device_runtime_infos: BTreeMap<DeviceId, DeviceRuntimeInfo>,
    /// Estimated resident bytes (constants + scaled activations).
    pub size_bytes: u64,
    /// The subgraph this node executes.
    pub function: Function,
    /// Arena indices of downstream nodes.
    pub children: Vec<usize>,
    /// Arena indices of upstream nodes.
    pub parents: Vec<usize>,
}

impl DagNode {
    /// The device this node runs on.
    pub fn primary_device(&self) -> Option<DeviceId> {
        self.device_runtime_infos.keys().next().copied()
    }
}

/// A rooted DAG of per-device subgraphs for one network.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompiledDag {
    /// Root (network) name: the originating function's name.
    name: String,
    nodes: Vec<DagNode>,
    /// Children of the synthetic root.
    root_children: Vec<usize>,
}

impl CompiledDag {
    /// Creates an empty DAG rooted at `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            root_children: Vec::new(),
        }
    }

    /// The network name.
    pub fn root_name(&self) -> &str {
        &self.name
    }

    /// Appends a node, returning its arena index.
    pub fn add_node(&mut self, node: DagNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Links `child` under `parent`, or under the root when `parent` is
    /// `None`.
    pub fn add_edge(&mut self, parent: Option<usize>, child: usize) {
        match parent {
            None => self.root_children.push(child),
            Some(p) => {
                self.nodes[p].children.push(child);
                self.nodes[child].parents.push(p);
            }
        }
    }

    /// Returns the nodes.
    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    /// Returns the nodes mutably.
    pub fn nodes_mut(&mut self) -> &mut [DagNode] {
        &mut self.nodes
    }

    /// Returns the number of nodes, excluding the synthetic root.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Total estimated resident bytes across all nodes.
    pub fn total_size_bytes(&self) -> u64 {
        self.nodes.iter().map(|n| n.size_bytes).sum()
    }

    /// Returns node indices in topological order, parents before children.
    pub fn topo_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut ready: Vec<usize> = self.root_children.clone();
        ready.retain(|&i| in_degree[i] == 0);
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop() {
            order.push(i);
            for &child in &self.nodes[i].children {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(child);
                }
            }
        }
        order
    }

    /// Validates the DAG.
    ///
    /// # Checks
    /// - At least one node, all reachable from the root.
    /// - Every edge index in range, parent/child lists consistent.
    /// - Acyclic (the topological order covers every node).
    /// - Every node is assigned to exactly one device.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.nodes.is_empty() {
            return Err(PlannerError::InvalidDag(format!(
                "network '{}' has no nodes",
                self.name
            )));
        }
        let in_range = |i: usize| i < self.nodes.len();
        if !self.root_children.iter().copied().all(in_range) {
            return Err(PlannerError::InvalidDag("root edge out of range".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.children.iter().copied().all(in_range)
                || !node.parents.iter().copied().all(in_range)
            {
                return Err(PlannerError::InvalidDag(format!(
                    "edge out of range at node '{}'",
                    node.name
                )));
            }
            if node.device_runtime_infos.len() != 1 {
                return Err(PlannerError::InvalidDag(format!(
                    "node '{}' is assigned to {} device(s), expected 1",
                    node.name,
                    node.device_runtime_infos.len()
                )));
            }
            for &child in &node.children {
                if !self.nodes[child].parents.contains(&i) {
                    return Err(PlannerError::InvalidDag(format!(
                        "edge {i} -> {child} has no matching parent link"
                    )));
                }
            }
        }
        if self.topo_order().len() != self.nodes.len() {
            return Err(PlannerError::InvalidDag(format!(
                "network '{}' has a cycle or unreachable nodes",
                self.name
            )));
        }
        Ok(())
    }

    /// Returns a human-readable summary of the DAG.
    pub fn summary(&self) -> String {
        let placements: Vec<String> = self
            .nodes
            .iter()
            .map(|n| {
                format!(
                    "{}@dev{}",
                    n.name,
                    n.primary_device().map(|d| d.to_string()).unwrap_or_default()
                )
            })
            .collect();
        format!(
            "DAG '{}': {} node(s), {} bytes total, [{}]",
            self.name,
            self.num_nodes(),
            self.total_size_bytes(),
            placements.join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, device: DeviceId, size: u64) -> DagNode {
        let mut infos = BTreeMap::new();
        infos.insert(device, DeviceRuntimeInfo { size_bytes: size });
        DagNode {
            name: name.to_string(),
            backend_name: "cpu".to_string(),
            device_runtime_infos: infos,
            size_bytes: size,
            function: Function::new(name),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    fn chain(names: &[&str]) -> CompiledDag {
        let mut dag = CompiledDag::new("net");
        let mut prev = None;
        for name in names {
            let idx = dag.add_node(node(name, 0, 100));
            dag.add_edge(prev, idx);
            prev = Some(idx);
        }
        dag
    }

    #[test]
    fn test_chain_topo_order() {
        let dag = chain(&["a", "b", "c"]);
        assert_eq!(dag.topo_order(), vec![0, 1, 2]);
        dag.validate().unwrap();
        assert_eq!(dag.total_size_bytes(), 300);
    }

    #[test]
    fn test_fanout_topo_order_covers_all() {
        // root -> a -> {b, c}
        let mut dag = CompiledDag::new("net");
        let a = dag.add_node(node("a", 0, 1));
        let b = dag.add_node(node("b", 1, 1));
        let c = dag.add_node(node("c", 0, 1));
        dag.add_edge(None, a);
        dag.add_edge(Some(a), b);
        dag.add_edge(Some(a), c);
        dag.validate().unwrap();

        let order = dag.topo_order();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], a);
    }

    #[test]
    fn test_validate_empty() {
        let dag = CompiledDag::new("net");
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_validate_cycle() {
        let mut dag = chain(&["a", "b"]);
        // Manufacture a back edge b -> a.
        dag.nodes[1].children.push(0);
        dag.nodes[0].parents.push(1);
        assert!(matches!(dag.validate(), Err(PlannerError::InvalidDag(_))));
    }

    #[test]
    fn test_validate_device_assignment() {
        let mut dag = chain(&["a"]);
        dag.nodes[0].device_runtime_infos.clear();
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_summary() {
        let dag = chain(&["a", "b"]);
        let s = dag.summary();
        assert!(s.contains("DAG 'net'"));
        assert!(s.contains("2 node(s)"));
        assert!(s.contains("a@dev0"));
    }
}
