// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Target-independent graph cleanup.
//!
//! This is the boundary to the external optimizer pipeline. Two passes are
//! implemented here because the lifecycle coordinator depends on them:
//! dead-node elimination before partitioning, and splat folding when
//! constant modification was delayed. Anything heavier belongs to the
//! optimizer collaborator, not this crate.

use crate::module::Constant;
use crate::{Function, GraphError, Module, OpKind, Tensor};
use std::collections::HashSet;

/// Names of constants materialized by a folding pass. Consumed by DAG
/// serialization so exported models can embed the folded subgraphs.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FoldRecord {
    pub folded: Vec<String>,
}

impl FoldRecord {
    /// Merges another record into this one.
    pub fn merge(&mut self, other: FoldRecord) {
        self.folded.extend(other.folded);
    }
}

/// Removes nodes whose outputs reach no function output.
///
/// Returns the number of nodes removed. Output reachability is computed
/// backwards over value names, so multi-output nodes stay alive as long as
/// any one of their outputs is used.
pub fn optimize_function(function: &mut Function) -> Result<usize, GraphError> {
    let mut live: HashSet<String> = function
        .outputs()
        .iter()
        .map(|p| p.name.clone())
        .collect();

    // Nodes are topologically ordered, so one backwards sweep suffices.
    let mut keep = vec![false; function.num_nodes()];
    for (i, node) in function.nodes().iter().enumerate().rev() {
        let produces_live = (0..node.out_tys.len()).any(|k| live.contains(&node.output_name(k)));
        if produces_live {
            keep[i] = true;
            for input in &node.inputs {
                live.insert(input.clone());
            }
        }
    }

    let before = function.num_nodes();
    let mut idx = 0;
    function.nodes_mut().retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
    let removed = before - function.num_nodes();
    if removed > 0 {
        tracing::debug!(
            "dead-node elimination removed {removed} node(s) from '{}'",
            function.name()
        );
    }
    Ok(removed)
}

/// Folds `Splat` nodes into module constants.
///
/// Each splat becomes a zero-filled constant named after the node's output
/// value; downstream references then resolve against the constant instead.
/// Returns the record of materialized constants.
pub fn constant_fold_function(
    function: &mut Function,
    module: &mut Module,
) -> Result<FoldRecord, GraphError> {
    let mut record = FoldRecord::default();
    let mut folded: Vec<Constant> = Vec::new();

    function.nodes_mut().retain(|node| {
        if node.kind != OpKind::Splat || node.out_tys.len() != 1 {
            return true;
        }
        let ty = node.out_tys[0].clone();
        let payload = Tensor::zeroed(ty.clone()).as_bytes().to_vec();
        folded.push(Constant::with_payload(node.output_name(0), ty, payload));
        record.folded.push(node.output_name(0));
        false
    });

    for constant in folded {
        module.add_constant(constant);
    }
    if !record.folded.is_empty() {
        tracing::debug!(
            "constant folding materialized {} constant(s) in '{}'",
            record.folded.len(),
            function.name()
        );
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElemKind, NodeDef, Shape, TensorTy};

    fn fty(n: usize) -> TensorTy {
        TensorTy::new(ElemKind::Float, Shape::vector(n))
    }

    /// in -> tanh -> save "out", plus a dangling sigmoid.
    fn fn_with_dead_node() -> Function {
        let mut f = Function::new("f");
        f.add_input("in", fty(4));
        f.add_node(NodeDef::new(
            "t",
            OpKind::Tanh,
            vec!["in".into()],
            vec![fty(4)],
            vec![fty(4)],
        ));
        f.add_node(NodeDef::new(
            "dead",
            OpKind::Sigmoid,
            vec!["in".into()],
            vec![fty(4)],
            vec![fty(4)],
        ));
        f.add_node(NodeDef::new(
            "out",
            OpKind::Save,
            vec!["t".into()],
            vec![fty(4)],
            vec![fty(4)],
        ));
        f.add_output("out", fty(4));
        f
    }

    #[test]
    fn test_dce_removes_dangling() {
        let mut f = fn_with_dead_node();
        let removed = optimize_function(&mut f).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(f.num_nodes(), 2);
        assert!(f.nodes().iter().all(|n| n.name != "dead"));
        f.validate(&std::collections::BTreeMap::new()).unwrap();
    }

    #[test]
    fn test_dce_is_idempotent() {
        let mut f = fn_with_dead_node();
        optimize_function(&mut f).unwrap();
        let removed = optimize_function(&mut f).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_splat_folds_into_constant() {
        let mut module = Module::new();
        let mut f = Function::new("f");
        f.add_input("in", fty(4));
        f.add_node(NodeDef::new(
            "ones",
            OpKind::Splat,
            vec![],
            vec![],
            vec![fty(4)],
        ));
        f.add_node(NodeDef::new(
            "out",
            OpKind::Add,
            vec!["in".into(), "ones".into()],
            vec![fty(4), fty(4)],
            vec![fty(4)],
        ));
        f.add_output("out", fty(4));

        let record = constant_fold_function(&mut f, &mut module).unwrap();
        assert_eq!(record.folded, vec!["ones".to_string()]);
        assert_eq!(f.num_nodes(), 1);
        assert!(module.constants().contains_key("ones"));
        // The add's reference now resolves through the constant.
        f.validate(module.constants()).unwrap();
    }
}
