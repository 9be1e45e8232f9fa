// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Functions: named, topologically ordered node lists with typed
//! input/output placeholders.
//!
//! Nodes are stored in execution order; a node may only consume values
//! produced by earlier nodes, function inputs, or module constants.
//! Structural validation checks exactly that, plus that every denormalized
//! input type still agrees with its producer.

use crate::module::Constant;
use crate::{GraphError, NodeDef, TensorTy};
use std::collections::{BTreeMap, HashMap};

/// A typed input or output slot of a function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Placeholder {
    pub name: String,
    pub ty: TensorTy,
}

impl Placeholder {
    pub fn new(name: impl Into<String>, ty: TensorTy) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A single network function: inputs, ordered nodes, outputs.
///
/// An output placeholder's name is the name of the produced value it
/// captures, so execution can materialize results directly into the
/// caller's bindings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Function {
    name: String,
    inputs: Vec<Placeholder>,
    outputs: Vec<Placeholder>,
    nodes: Vec<NodeDef>,
}

impl Function {
    /// Creates an empty function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Returns the function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the function. Used when carving partition segments.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Adds an input placeholder.
    pub fn add_input(&mut self, name: impl Into<String>, ty: TensorTy) {
        self.inputs.push(Placeholder::new(name, ty));
    }

    /// Adds an output placeholder capturing the value `name`.
    pub fn add_output(&mut self, name: impl Into<String>, ty: TensorTy) {
        self.outputs.push(Placeholder::new(name, ty));
    }

    /// Appends a node. Order is execution order.
    pub fn add_node(&mut self, node: NodeDef) {
        self.nodes.push(node);
    }

    /// Returns the input placeholders.
    pub fn inputs(&self) -> &[Placeholder] {
        &self.inputs
    }

    /// Returns the output placeholders.
    pub fn outputs(&self) -> &[Placeholder] {
        &self.outputs
    }

    /// Returns the nodes in execution order.
    pub fn nodes(&self) -> &[NodeDef] {
        &self.nodes
    }

    /// Returns the nodes mutably. Order must be preserved by callers.
    pub fn nodes_mut(&mut self) -> &mut Vec<NodeDef> {
        &mut self.nodes
    }

    /// Returns the number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Maps every produced value name to the index of its producing node.
    pub fn producer_map(&self) -> HashMap<String, usize> {
        let mut map = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for k in 0..node.out_tys.len() {
                map.insert(node.output_name(k), i);
            }
        }
        map
    }

    /// Sum of all node output sizes in bytes. The partitioner scales this
    /// by its context count when estimating per-device footprints.
    pub fn activation_bytes(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.out_tys.iter())
            .map(|t| t.size_bytes())
            .sum()
    }

    /// Validates structure against the given module constants.
    ///
    /// # Checks
    /// - At least one node and at least one output.
    /// - No duplicate input, node, or value names.
    /// - Every node input resolves to a function input, a constant, or an
    ///   earlier node's output, with a matching type.
    /// - Every output placeholder captures a produced value of matching
    ///   type.
    pub fn validate(&self, constants: &BTreeMap<String, Constant>) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::InvalidGraph(format!(
                "function '{}' contains no nodes",
                self.name
            )));
        }
        if self.outputs.is_empty() {
            return Err(GraphError::InvalidGraph(format!(
                "function '{}' has no outputs",
                self.name
            )));
        }

        // Known values, populated in execution order.
        let mut values: HashMap<String, &TensorTy> = HashMap::new();
        for input in &self.inputs {
            if values.insert(input.name.clone(), &input.ty).is_some() {
                return Err(GraphError::DuplicateName {
                    function: self.name.clone(),
                    name: input.name.clone(),
                });
            }
        }

        for node in &self.nodes {
            if node.inputs.len() != node.in_tys.len() {
                return Err(GraphError::InvalidNode {
                    function: self.name.clone(),
                    node: node.name.clone(),
                    detail: format!(
                        "{} input names but {} input types",
                        node.inputs.len(),
                        node.in_tys.len()
                    ),
                });
            }
            for (value, declared) in node.inputs.iter().zip(&node.in_tys) {
                let produced = constants
                    .get(value.as_str())
                    .map(|c| &c.ty)
                    .or_else(|| values.get(value.as_str()).copied());
                match produced {
                    None => {
                        return Err(GraphError::UnknownValue {
                            function: self.name.clone(),
                            node: node.name.clone(),
                            value: value.clone(),
                        })
                    }
                    Some(ty) if ty != declared => {
                        return Err(GraphError::TypeMismatch {
                            function: self.name.clone(),
                            node: node.name.clone(),
                            detail: format!(
                                "input '{value}' declared as {declared} but produced as {ty}"
                            ),
                        })
                    }
                    Some(_) => {}
                }
            }
            for (k, ty) in node.out_tys.iter().enumerate() {
                let vname = node.output_name(k);
                if values.insert(vname.clone(), ty).is_some() {
                    return Err(GraphError::DuplicateName {
                        function: self.name.clone(),
                        name: vname,
                    });
                }
            }
        }

        for out in &self.outputs {
            match values.get(out.name.as_str()) {
                None => {
                    return Err(GraphError::UnknownValue {
                        function: self.name.clone(),
                        node: "<output>".to_string(),
                        value: out.name.clone(),
                    })
                }
                Some(ty) if **ty != out.ty => {
                    return Err(GraphError::TypeMismatch {
                        function: self.name.clone(),
                        node: "<output>".to_string(),
                        detail: format!(
                            "output '{}' declared as {} but produced as {}",
                            out.name, out.ty, ty
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Renders the function in Graphviz dot form, for debug dumps.
    pub fn to_dot(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.name);
        for input in &self.inputs {
            let _ = writeln!(
                out,
                "  \"{}\" [shape=ellipse, label=\"{}\\n{}\"];",
                input.name, input.name, input.ty
            );
        }
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  \"{}\" [shape=box, label=\"{}\\n{}\"];",
                node.name, node.name, node.kind
            );
            for value in &node.inputs {
                // Edge source is the producing node (strip any `:k` output
                // suffix) or an input/constant name.
                let src = value.split(':').next().unwrap_or(value);
                let _ = writeln!(out, "  \"{src}\" -> \"{}\";", node.name);
            }
        }
        let _ = writeln!(out, "}}");
        out
    }

    /// Returns a one-line description of the function.
    pub fn summary(&self) -> String {
        format!(
            "Function '{}': {} nodes, {} inputs, {} outputs, {} activation bytes",
            self.name,
            self.nodes.len(),
            self.inputs.len(),
            self.outputs.len(),
            self.activation_bytes(),
        )
    }
}
