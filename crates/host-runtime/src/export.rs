// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled-DAG export and the post-partition optimizer hook.
//!
//! Both are injected collaborators: model encoding and DAG-level
//! optimization live outside this crate, so the host manager only holds a
//! trait object for each. The default exporter persists the partition
//! layout as JSON under the conventional `<root-name>.onnx` artifact name;
//! producing a full model payload is the external exporter's job.

use crate::HostError;
use graph_ir::{FoldRecord, Module};
use partition_planner::CompiledDag;
use std::path::{Path, PathBuf};

/// Rewrites partitioned DAGs before provisioning.
pub trait DagOptimizer: Send + Sync {
    fn optimize(&self, dags: &mut [CompiledDag], module: &Module) -> Result<(), HostError>;
}

/// Persists a compiled DAG.
pub trait DagExporter: Send + Sync {
    /// Writes `dag` (with the constant-folding record of its add) and
    /// returns the written path.
    fn export(&self, dag: &CompiledDag, fold: &FoldRecord) -> Result<PathBuf, HostError>;
}

/// Default exporter: JSON layout next to the process, or under a chosen
/// directory.
#[derive(Debug, Clone, Default)]
pub struct JsonDagExporter {
    dir: PathBuf,
}

impl JsonDagExporter {
    /// Exports into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The target path for a given root name.
    pub fn path_for(&self, root_name: &str) -> PathBuf {
        self.dir.join(format!("{root_name}.onnx"))
    }
}

impl DagExporter for JsonDagExporter {
    fn export(&self, dag: &CompiledDag, fold: &FoldRecord) -> Result<PathBuf, HostError> {
        #[derive(serde::Serialize)]
        struct Payload<'a> {
            dag: &'a CompiledDag,
            constant_folding: &'a FoldRecord,
        }
        let path = self.path_for(dag.root_name());
        write_json(&path, &Payload {
            dag,
            constant_folding: fold,
        })?;
        tracing::info!("serialized compiled DAG to {}", path.display());
        Ok(path)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), HostError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| HostError::Runtime(format!("cannot encode DAG: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| HostError::Runtime(format!("cannot write '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_manager::DeviceId;
    use graph_ir::Function;
    use partition_planner::{DagNode, DeviceRuntimeInfo};
    use std::collections::BTreeMap;

    fn small_dag() -> CompiledDag {
        let mut dag = CompiledDag::new("net");
        let mut infos = BTreeMap::new();
        infos.insert(0 as DeviceId, DeviceRuntimeInfo { size_bytes: 8 });
        let idx = dag.add_node(DagNode {
            name: "net_part0".to_string(),
            backend_name: "cpu".to_string(),
            device_runtime_infos: infos,
            size_bytes: 8,
            function: Function::new("net_part0"),
            children: Vec::new(),
            parents: Vec::new(),
        });
        dag.add_edge(None, idx);
        dag
    }

    #[test]
    fn test_export_writes_named_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = JsonDagExporter::new(dir.path());
        let path = exporter
            .export(&small_dag(), &FoldRecord::default())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "net.onnx");

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["dag"]["nodes"][0]["name"], "net_part0");
    }

    #[test]
    fn test_export_unwritable_dir_errors() {
        let exporter = JsonDagExporter::new("/no/such/dir");
        assert!(exporter
            .export(&small_dag(), &FoldRecord::default())
            .is_err());
    }
}
