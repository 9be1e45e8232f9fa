// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! IR verification: per-kind operand checks over a function.
//!
//! One exhaustive `match` on the operator kind with a small decision table
//! per family. Kinds without entries only get the structural checks
//! (resolution, declared-type agreement), which [`Function::validate`]
//! already performs; [`verify_function`] runs those first.

use crate::module::Constant;
use crate::node::idx;
use crate::{ElemKind, Function, GraphError, NodeDef, OpKind};
use std::collections::BTreeMap;

/// Computes the spatial output size of a convolution/pooling window.
///
/// Returns `None` when the window does not fit.
pub fn conv_output_dims(
    h: usize,
    w: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
) -> Option<(usize, usize)> {
    if stride == 0 || kernel == 0 {
        return None;
    }
    let fit = |dim: usize| {
        let padded = dim + 2 * pad;
        if padded < kernel {
            None
        } else {
            Some((padded - kernel) / stride + 1)
        }
    };
    Some((fit(h)?, fit(w)?))
}

/// Verifies every node of `function` against the per-kind operand rules.
///
/// Structural validation (value resolution, declared input types matching
/// producers, output capture) runs first; per-kind checks assume it passed.
pub fn verify_function(
    function: &Function,
    constants: &BTreeMap<String, Constant>,
) -> Result<(), GraphError> {
    function.validate(constants)?;
    for node in function.nodes() {
        verify_node(function.name(), node)?;
    }
    Ok(())
}

fn type_err(function: &str, node: &NodeDef, detail: String) -> GraphError {
    GraphError::TypeMismatch {
        function: function.to_string(),
        node: node.name.clone(),
        detail,
    }
}

fn shape_err(function: &str, node: &NodeDef, detail: String) -> GraphError {
    GraphError::ShapeMismatch {
        function: function.to_string(),
        node: node.name.clone(),
        detail,
    }
}

fn arity_err(function: &str, node: &NodeDef, ins: usize, outs: usize) -> GraphError {
    GraphError::InvalidNode {
        function: function.to_string(),
        node: node.name.clone(),
        detail: format!(
            "expected {ins} input(s) and {outs} output(s), got {} and {}",
            node.in_tys.len(),
            node.out_tys.len()
        ),
    }
}

fn required_attr(node: &NodeDef, attr: &str) -> Result<usize, GraphError> {
    node.attr(attr)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| GraphError::MissingAttr {
            node: node.name.clone(),
            attr: attr.to_string(),
        })
}

fn verify_node(fname: &str, node: &NodeDef) -> Result<(), GraphError> {
    use OpKind::*;

    let require = |ins: usize, outs: usize| -> Result<(), GraphError> {
        if node.in_tys.len() != ins || node.out_tys.len() != outs {
            Err(arity_err(fname, node, ins, outs))
        } else {
            Ok(())
        }
    };

    match node.kind {
        // Binary elementwise: both inputs and the result share one type.
        Add | Sub | Mul | Div | Max | Min | Pow | Modulo | And | Or | Xor => {
            require(2, 1)?;
            if node.in_tys[0] != node.in_tys[1] || node.in_tys[0] != node.out_tys[0] {
                return Err(type_err(
                    fname,
                    node,
                    "operands of a binary elementwise op must share one type".into(),
                ));
            }
        }

        // Unary elementwise: result type equals input type.
        Sigmoid | Tanh | Exp | Log | Abs | Neg | Floor | Ceil | Round | Sqrt | Rsqrt
        | Reciprocal | Sin | Cos | Not | Save => {
            require(1, 1)?;
            if node.in_tys[0] != node.out_tys[0] {
                return Err(type_err(
                    fname,
                    node,
                    format!(
                        "result type {} must equal input type {}",
                        node.out_tys[0], node.in_tys[0]
                    ),
                ));
            }
        }

        // Comparisons: numeric operands of one type, boolean result of the
        // same dims.
        CmpEq | CmpNeq | CmpLt | CmpLte => {
            require(2, 1)?;
            if node.in_tys[0] != node.in_tys[1] {
                return Err(type_err(fname, node, "comparison operands differ".into()));
            }
            let out = &node.out_tys[idx::cmp::RESULT];
            if out.elem != ElemKind::Bool || out.shape != node.in_tys[0].shape {
                return Err(type_err(
                    fname,
                    node,
                    "comparison result must be bool with the operand dims".into(),
                ));
            }
        }

        IsNaN => {
            require(1, 1)?;
            let out = &node.out_tys[0];
            if out.elem != ElemKind::Bool || out.shape != node.in_tys[0].shape {
                return Err(type_err(fname, node, "is_nan result must be bool".into()));
            }
        }

        Select => {
            require(3, 1)?;
            if node.in_tys[idx::select::COND].elem != ElemKind::Bool {
                return Err(type_err(fname, node, "select condition must be bool".into()));
            }
            if node.in_tys[idx::select::LHS] != node.in_tys[idx::select::RHS]
                || node.in_tys[idx::select::LHS] != node.out_tys[0]
            {
                return Err(type_err(
                    fname,
                    node,
                    "select branches and result must share one type".into(),
                ));
            }
            if node.in_tys[idx::select::COND].shape != node.out_tys[0].shape {
                return Err(shape_err(fname, node, "condition dims differ from result".into()));
            }
        }

        // Element count is preserved; element kind is preserved.
        Reshape | Transpose | Flip => {
            require(1, 1)?;
            let (src, dst) = (&node.in_tys[0], &node.out_tys[0]);
            if src.elem != dst.elem {
                return Err(type_err(fname, node, "element kind changed".into()));
            }
            if src.shape.num_elements() != dst.shape.num_elements() {
                return Err(shape_err(
                    fname,
                    node,
                    format!(
                        "element count changed: {} -> {}",
                        src.shape.num_elements(),
                        dst.shape.num_elements()
                    ),
                ));
            }
        }

        Concat => {
            if node.in_tys.is_empty() || node.out_tys.len() != 1 {
                return Err(arity_err(fname, node, 1, 1));
            }
            let out = &node.out_tys[0];
            let mut total = 0usize;
            for ty in &node.in_tys {
                if ty.elem != out.elem {
                    return Err(type_err(fname, node, "concat operand kind differs".into()));
                }
                total += ty.shape.num_elements();
            }
            if total != out.shape.num_elements() {
                return Err(shape_err(
                    fname,
                    node,
                    format!(
                        "concat of {total} elements into {}",
                        out.shape.num_elements()
                    ),
                ));
            }
        }

        Quantize => {
            require(1, 1)?;
            let (src, dst) = (&node.in_tys[0], &node.out_tys[idx::quantize::RESULT]);
            if src.elem != ElemKind::Float || !dst.elem.is_quantized() {
                return Err(type_err(
                    fname,
                    node,
                    "quantize takes float and produces a quantized kind".into(),
                ));
            }
            if src.shape != dst.shape {
                return Err(shape_err(fname, node, "quantize changes dims".into()));
            }
        }

        Dequantize => {
            require(1, 1)?;
            let (src, dst) = (&node.in_tys[0], &node.out_tys[0]);
            if !src.elem.is_quantized() || dst.elem != ElemKind::Float {
                return Err(type_err(
                    fname,
                    node,
                    "dequantize takes a quantized kind and produces float".into(),
                ));
            }
            if src.shape != dst.shape {
                return Err(shape_err(fname, node, "dequantize changes dims".into()));
            }
        }

        RescaleQuantized => {
            require(1, 1)?;
            let (src, dst) = (&node.in_tys[0], &node.out_tys[0]);
            if !src.elem.is_quantized() || !dst.elem.is_quantized() {
                return Err(type_err(fname, node, "rescale requires quantized operands".into()));
            }
            if src.shape != dst.shape {
                return Err(shape_err(fname, node, "rescale changes dims".into()));
            }
        }

        Conv => {
            require(3, 1)?;
            let kernel = required_attr(node, "kernel")?;
            let stride = required_attr(node, "stride")?;
            let pad = required_attr(node, "pad")?;
            let src = &node.in_tys[idx::conv::INPUT];
            let filter = &node.in_tys[idx::conv::FILTER];
            let bias = &node.in_tys[idx::conv::BIAS];
            let dst = &node.out_tys[idx::conv::RESULT];
            let (idim, odim) = (src.shape.dims(), dst.shape.dims());
            if idim.len() != 4 || odim.len() != 4 {
                return Err(shape_err(fname, node, "conv operands must be rank-4 NHWC".into()));
            }
            let depth = filter.shape.dims().first().copied().unwrap_or(0);
            if filter.shape.dims() != [depth, kernel, kernel, idim[3]] {
                return Err(shape_err(fname, node, "invalid filter dims".into()));
            }
            if bias.shape.dims() != [depth] {
                return Err(shape_err(fname, node, "invalid bias dims".into()));
            }
            let (oh, ow) = conv_output_dims(idim[1], idim[2], kernel, stride, pad)
                .ok_or_else(|| shape_err(fname, node, "window does not fit input".into()))?;
            if odim != [idim[0], oh, ow, depth] {
                return Err(shape_err(
                    fname,
                    node,
                    format!("expected output [{} x {oh} x {ow} x {depth}]", idim[0]),
                ));
            }
        }

        MaxPool | AvgPool => {
            let kernel = required_attr(node, "kernel")?;
            let stride = required_attr(node, "stride")?;
            let pad = required_attr(node, "pad")?;
            let src = node
                .in_tys
                .first()
                .ok_or_else(|| arity_err(fname, node, 1, 1))?;
            let dst = node
                .out_tys
                .first()
                .ok_or_else(|| arity_err(fname, node, 1, 1))?;
            let (idim, odim) = (src.shape.dims(), dst.shape.dims());
            if idim.len() != 4 || odim.len() != 4 {
                return Err(shape_err(fname, node, "pool operands must be rank-4 NHWC".into()));
            }
            let (oh, ow) = conv_output_dims(idim[1], idim[2], kernel, stride, pad)
                .ok_or_else(|| shape_err(fname, node, "window does not fit input".into()))?;
            if odim != [idim[0], oh, ow, idim[3]] {
                return Err(shape_err(
                    fname,
                    node,
                    format!("expected output [{} x {oh} x {ow} x {}]", idim[0], idim[3]),
                ));
            }
        }

        MatMul => {
            require(2, 1)?;
            let (lhs, rhs, dst) = (&node.in_tys[0], &node.in_tys[1], &node.out_tys[0]);
            let (l, r, d) = (lhs.shape.dims(), rhs.shape.dims(), dst.shape.dims());
            if l.len() != 2 || r.len() != 2 || d.len() != 2 {
                return Err(shape_err(fname, node, "mat_mul operands must be rank-2".into()));
            }
            if l[1] != r[0] || d != [l[0], r[1]] {
                return Err(shape_err(
                    fname,
                    node,
                    format!("invalid matrix dims {l:?} x {r:?} -> {d:?}"),
                ));
            }
        }

        FullyConnected => {
            require(3, 1)?;
            let input = node.in_tys[idx::fully_connected::INPUT].shape.dims();
            let weights = node.in_tys[idx::fully_connected::WEIGHTS].shape.dims();
            let bias = node.in_tys[idx::fully_connected::BIAS].shape.dims();
            let out = node.out_tys[0].shape.dims();
            if input.len() != 2 || weights.len() != 2 {
                return Err(shape_err(fname, node, "fully_connected operands must be rank-2".into()));
            }
            if input[1] != weights[0] || bias != [weights[1]] || out != [input[0], weights[1]] {
                return Err(shape_err(fname, node, "invalid fully_connected dims".into()));
            }
        }

        BatchedAdd => {
            require(2, 1)?;
            let batch = &node.in_tys[idx::batched_add::BATCH];
            let slice = &node.in_tys[idx::batched_add::SLICE];
            if batch.shape.dims().get(1..) != Some(slice.shape.dims()) {
                return Err(shape_err(
                    fname,
                    node,
                    "slice dims must equal batch dims without the leading axis".into(),
                ));
            }
            if batch.shape != node.out_tys[0].shape || batch.elem != node.out_tys[0].elem {
                return Err(type_err(fname, node, "result must match batch".into()));
            }
        }

        BatchedReduceAdd | BatchedReduceMin => {
            if node
                .in_tys
                .first()
                .map(|t| t.shape.rank())
                .unwrap_or(0)
                <= 1
            {
                return Err(shape_err(fname, node, "batch must have rank > 1".into()));
            }
        }

        TopK => {
            require(1, 2)?;
            let k = required_attr(node, "k")?;
            let values = &node.out_tys[idx::top_k::VALUES];
            let indices = &node.out_tys[idx::top_k::INDICES];
            if values.elem != node.in_tys[idx::top_k::INPUT].elem {
                return Err(type_err(fname, node, "top_k values kind differs from input".into()));
            }
            if !indices.elem.is_index() {
                return Err(type_err(fname, node, "top_k indices must be an index kind".into()));
            }
            if values.shape.dims().last() != Some(&k) {
                return Err(shape_err(fname, node, format!("last value dim must be k={k}")));
            }
        }

        Gather => {
            require(2, 1)?;
            if node.in_tys[idx::gather::DATA].elem != node.out_tys[0].elem {
                return Err(type_err(fname, node, "gather result kind differs from data".into()));
            }
            if !node.in_tys[idx::gather::INDICES].elem.is_index() {
                return Err(type_err(fname, node, "gather indices must be an index kind".into()));
            }
        }

        SparseLengthsSum | SparseLengthsWeightedSum => {
            let (indices, lengths) = if node.kind == SparseLengthsSum {
                (idx::sls::INDICES, idx::sls::LENGTHS)
            } else {
                (idx::slws::INDICES, idx::slws::LENGTHS)
            };
            let indices_ok = node
                .in_tys
                .get(indices)
                .map(|t| t.elem.is_index())
                .unwrap_or(false);
            let lengths_ok = node
                .in_tys
                .get(lengths)
                .map(|t| t.elem == ElemKind::Int32I)
                .unwrap_or(false);
            if !indices_ok || !lengths_ok {
                return Err(type_err(
                    fname,
                    node,
                    "indices must be an index kind and lengths i32".into(),
                ));
            }
        }

        Splat | Touch => {
            if !node.in_tys.is_empty() || node.out_tys.len() != 1 {
                return Err(arity_err(fname, node, 0, 1));
            }
        }

        TraceEvent => {
            let data_ok = node
                .in_tys
                .get(idx::trace_event::DATA)
                .map(|t| t.elem == ElemKind::Int64I)
                .unwrap_or(false);
            if !data_ok {
                return Err(type_err(fname, node, "trace data must be i64".into()));
            }
        }

        // Remaining kinds carry no extra structural rules beyond what the
        // support gate enforces per backend.
        _ => {}
    }
    Ok(())
}
