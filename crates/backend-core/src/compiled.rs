// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled artifacts: what a backend hands to device managers.
//!
//! Execution of the operator kernels themselves belongs to the kernel
//! library; the [`CompiledFunction`] contract only requires that a run
//! materializes the function's outputs into the caller's bindings.

use crate::BackendError;
use graph_ir::{Bindings, Function, OpKind, Placeholder, Tensor};
use std::collections::HashMap;

/// A function compiled for one backend, loadable onto a device.
pub trait CompiledFunction: Send + Sync {
    /// The compiled function's name (the DAG node name).
    fn name(&self) -> &str;

    /// Resident size of the artifact plus its runtime state, in bytes.
    fn size_bytes(&self) -> usize;

    /// Runs the function against `bindings`. Inputs are read from the
    /// bindings; every function output is bound on return.
    fn execute(&self, bindings: &mut Bindings) -> Result<(), BackendError>;
}

/// The CPU backend's artifact.
///
/// Kernel dispatch happens behind the kernel-library boundary; at this
/// layer the artifact knows its output placeholders and which of them are
/// plain forwards of an input, so it can materialize results.
pub struct CpuFunction {
    name: String,
    outputs: Vec<Placeholder>,
    /// Output name → input name, for outputs that are a pure forward of a
    /// function input through `Save`/`Reshape` chains.
    passthrough: HashMap<String, String>,
    size_bytes: usize,
}

impl CpuFunction {
    /// Builds an artifact for `function`, precomputing the passthrough map.
    pub fn new(function: &Function, size_bytes: usize) -> Self {
        let passthrough = passthrough_map(function);
        Self {
            name: function.name().to_string(),
            outputs: function.outputs().to_vec(),
            passthrough,
            size_bytes,
        }
    }
}

impl CompiledFunction for CpuFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn execute(&self, bindings: &mut Bindings) -> Result<(), BackendError> {
        for output in &self.outputs {
            let forwarded = self
                .passthrough
                .get(&output.name)
                .and_then(|src| bindings.get(src))
                .cloned();
            let tensor = match forwarded {
                Some(t) if *t.ty() == output.ty => t,
                _ => Tensor::zeroed(output.ty.clone()),
            };
            bindings.insert(output.name.clone(), tensor);
        }
        Ok(())
    }
}

/// For each function output, finds the function input it forwards, if the
/// chain between them is shape/copy only.
fn passthrough_map(function: &Function) -> HashMap<String, String> {
    let producers = function.producer_map();
    let input_names: Vec<&str> = function.inputs().iter().map(|p| p.name.as_str()).collect();
    let mut map = HashMap::new();

    for output in function.outputs() {
        let mut value = output.name.clone();
        loop {
            if input_names.contains(&value.as_str()) {
                map.insert(output.name.clone(), value);
                break;
            }
            let Some(&node_idx) = producers.get(&value) else {
                break;
            };
            let node = &function.nodes()[node_idx];
            let forwards = matches!(node.kind, OpKind::Save | OpKind::Reshape);
            if !forwards || node.inputs.len() != 1 {
                break;
            }
            value = node.inputs[0].clone();
        }
    }
    map
}
