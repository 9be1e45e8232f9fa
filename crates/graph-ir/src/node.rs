// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator kinds, graph nodes, and the read-only [`NodeInfo`] view that
//! backend support gates are queried with.
//!
//! `OpKind` is a closed enumeration. Support gates match on it
//! exhaustively and fail closed on kinds they do not list, so the
//! partitioner can never hand a backend an operator the backend has not
//! declared.

use crate::{ElemKind, TensorTy};
use std::collections::BTreeMap;

/// The kind of computation a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    // Elementwise arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
    Modulo,
    // Batched forms and matrix product.
    BatchedAdd,
    BatchedReduceAdd,
    BatchedReduceMin,
    MatMul,
    // Fully connected.
    FullyConnected,
    RowwiseQuantizedFullyConnected,
    // Convolution family.
    Conv,
    ChannelwiseQuantizedConv,
    ConvTranspose,
    // Pooling.
    MaxPool,
    AvgPool,
    AdaptiveAvgPool,
    // Reductions with index outputs.
    ArgMax,
    ArgMin,
    TopK,
    // Normalization.
    Softmax,
    LocalResponseNormalization,
    // Elementwise unary (float).
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Abs,
    Neg,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Rsqrt,
    Reciprocal,
    Sin,
    Cos,
    // Logical.
    Not,
    And,
    Or,
    Xor,
    IsNaN,
    // Comparison and selection.
    CmpEq,
    CmpNeq,
    CmpLt,
    CmpLte,
    Select,
    // Shape and layout.
    Reshape,
    Transpose,
    Flip,
    Slice,
    Concat,
    InsertTensor,
    SpaceToDepth,
    ResizeNearest,
    ResizeBilinear,
    Splat,
    Touch,
    Save,
    // Gather / scatter.
    Gather,
    GatherRanges,
    ScatterData,
    // Quantization and conversion.
    Quantize,
    Dequantize,
    RescaleQuantized,
    IntLookupTable,
    ConvertTo,
    // Sparse-lengths family.
    SparseLengthsSum,
    SparseLengthsWeightedSum,
    RowwiseQuantizedSparseLengthsWeightedSum,
    FusedRowwiseQuantizedSparseLengthsSum,
    FusedRowwiseQuantizedSparseLengthsWeightedSum,
    // Embedding bags.
    EmbeddingBag,
    EmbeddingBagByteRowwiseOffsets,
    // Lengths utilities.
    LengthsSum,
    LengthsToRanges,
    LengthsRangeFill,
    // Sparse to dense.
    SparseToDense,
    SparseToDenseMask,
    // Misc.
    NonMaxSuppression,
    AudioSpectrogram,
    Mfcc,
    TraceEvent,
}

impl OpKind {
    /// Returns the snake_case name of this kind, matching the serde form
    /// and the names accepted in device `supportedNodes` parameter lists.
    pub fn as_str(self) -> &'static str {
        use OpKind::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Max => "max",
            Min => "min",
            Pow => "pow",
            Modulo => "modulo",
            BatchedAdd => "batched_add",
            BatchedReduceAdd => "batched_reduce_add",
            BatchedReduceMin => "batched_reduce_min",
            MatMul => "mat_mul",
            FullyConnected => "fully_connected",
            RowwiseQuantizedFullyConnected => "rowwise_quantized_fully_connected",
            Conv => "conv",
            ChannelwiseQuantizedConv => "channelwise_quantized_conv",
            ConvTranspose => "conv_transpose",
            MaxPool => "max_pool",
            AvgPool => "avg_pool",
            AdaptiveAvgPool => "adaptive_avg_pool",
            ArgMax => "arg_max",
            ArgMin => "arg_min",
            TopK => "top_k",
            Softmax => "softmax",
            LocalResponseNormalization => "local_response_normalization",
            Sigmoid => "sigmoid",
            Tanh => "tanh",
            Exp => "exp",
            Log => "log",
            Abs => "abs",
            Neg => "neg",
            Floor => "floor",
            Ceil => "ceil",
            Round => "round",
            Sqrt => "sqrt",
            Rsqrt => "rsqrt",
            Reciprocal => "reciprocal",
            Sin => "sin",
            Cos => "cos",
            Not => "not",
            And => "and",
            Or => "or",
            Xor => "xor",
            IsNaN => "is_nan",
            CmpEq => "cmp_eq",
            CmpNeq => "cmp_neq",
            CmpLt => "cmp_lt",
            CmpLte => "cmp_lte",
            Select => "select",
            Reshape => "reshape",
            Transpose => "transpose",
            Flip => "flip",
            Slice => "slice",
            Concat => "concat",
            InsertTensor => "insert_tensor",
            SpaceToDepth => "space_to_depth",
            ResizeNearest => "resize_nearest",
            ResizeBilinear => "resize_bilinear",
            Splat => "splat",
            Touch => "touch",
            Save => "save",
            Gather => "gather",
            GatherRanges => "gather_ranges",
            ScatterData => "scatter_data",
            Quantize => "quantize",
            Dequantize => "dequantize",
            RescaleQuantized => "rescale_quantized",
            IntLookupTable => "int_lookup_table",
            ConvertTo => "convert_to",
            SparseLengthsSum => "sparse_lengths_sum",
            SparseLengthsWeightedSum => "sparse_lengths_weighted_sum",
            RowwiseQuantizedSparseLengthsWeightedSum => {
                "rowwise_quantized_sparse_lengths_weighted_sum"
            }
            FusedRowwiseQuantizedSparseLengthsSum => {
                "fused_rowwise_quantized_sparse_lengths_sum"
            }
            FusedRowwiseQuantizedSparseLengthsWeightedSum => {
                "fused_rowwise_quantized_sparse_lengths_weighted_sum"
            }
            EmbeddingBag => "embedding_bag",
            EmbeddingBagByteRowwiseOffsets => "embedding_bag_byte_rowwise_offsets",
            LengthsSum => "lengths_sum",
            LengthsToRanges => "lengths_to_ranges",
            LengthsRangeFill => "lengths_range_fill",
            SparseToDense => "sparse_to_dense",
            SparseToDenseMask => "sparse_to_dense_mask",
            NonMaxSuppression => "non_max_suppression",
            AudioSpectrogram => "audio_spectrogram",
            Mfcc => "mfcc",
            TraceEvent => "trace_event",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand positions for multi-operand kinds.
///
/// Support gates and the verifier address operands by these names instead
/// of bare numbers.
pub mod idx {
    pub mod conv {
        pub const INPUT: usize = 0;
        pub const FILTER: usize = 1;
        pub const BIAS: usize = 2;
        pub const RESULT: usize = 0;
    }
    pub mod channelwise_conv {
        pub const INPUT: usize = 0;
        pub const FILTER: usize = 1;
        pub const BIAS: usize = 2;
        pub const FILTER_SCALES: usize = 3;
        pub const FILTER_OFFSETS: usize = 4;
        pub const BIAS_SCALES: usize = 5;
        pub const BIAS_OFFSETS: usize = 6;
        pub const RESULT: usize = 0;
    }
    pub mod fully_connected {
        pub const INPUT: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const BIAS: usize = 2;
        pub const RESULT: usize = 0;
    }
    pub mod rowwise_fc {
        pub const INPUT: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const SCALES: usize = 2;
        pub const OFFSETS: usize = 3;
        pub const BIAS: usize = 4;
        pub const RESULT: usize = 0;
    }
    pub mod batched_add {
        pub const BATCH: usize = 0;
        pub const SLICE: usize = 1;
    }
    pub mod max_pool {
        pub const INPUT: usize = 0;
        pub const RESULT: usize = 0;
        pub const ARGMAX: usize = 1;
    }
    pub mod arg_max {
        pub const INPUT: usize = 0;
        pub const RESULT: usize = 0;
    }
    pub mod top_k {
        pub const INPUT: usize = 0;
        pub const VALUES: usize = 0;
        pub const INDICES: usize = 1;
    }
    pub mod softmax {
        pub const INPUT: usize = 0;
        pub const SELECTED: usize = 1;
    }
    pub mod cmp {
        pub const RESULT: usize = 0;
    }
    pub mod select {
        pub const COND: usize = 0;
        pub const LHS: usize = 1;
        pub const RHS: usize = 2;
    }
    pub mod gather {
        pub const DATA: usize = 0;
        pub const INDICES: usize = 1;
    }
    pub mod gather_ranges {
        pub const DATA: usize = 0;
        pub const RANGES: usize = 1;
        pub const OUTPUT: usize = 0;
        pub const LENGTHS: usize = 1;
    }
    pub mod scatter_data {
        pub const DATA: usize = 0;
        pub const INDICES: usize = 1;
        pub const SLICES: usize = 2;
    }
    pub mod quantize {
        pub const INPUT: usize = 0;
        pub const RESULT: usize = 0;
    }
    pub mod sls {
        pub const DATA: usize = 0;
        pub const INDICES: usize = 1;
        pub const LENGTHS: usize = 2;
    }
    pub mod slws {
        pub const DATA: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const INDICES: usize = 2;
        pub const LENGTHS: usize = 3;
    }
    pub mod rowwise_slws {
        pub const DATA: usize = 0;
        pub const SCALES: usize = 1;
        pub const OFFSETS: usize = 2;
        pub const WEIGHTS: usize = 3;
        pub const INDICES: usize = 4;
        pub const LENGTHS: usize = 5;
        pub const RESULT: usize = 0;
    }
    pub mod fused_sls {
        pub const DATA: usize = 0;
        pub const INDICES: usize = 1;
        pub const LENGTHS: usize = 2;
        pub const RESULT: usize = 0;
    }
    pub mod fused_slws {
        pub const DATA: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const INDICES: usize = 2;
        pub const LENGTHS: usize = 3;
        pub const RESULT: usize = 0;
    }
    pub mod embedding_bag {
        pub const DATA: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const INDICES: usize = 2;
        pub const OFFSETS: usize = 3;
    }
    pub mod embedding_bag_bro {
        pub const DATA: usize = 0;
        pub const WEIGHTS: usize = 1;
        pub const INDICES: usize = 2;
        pub const OFFSETS: usize = 3;
        pub const RESULT: usize = 0;
    }
    pub mod lengths_sum {
        pub const DATA: usize = 0;
        pub const LENGTHS: usize = 1;
    }
    pub mod sparse_to_dense {
        pub const INDICES: usize = 0;
        pub const VALUES: usize = 1;
    }
    pub mod nms {
        pub const BOXES: usize = 0;
        pub const SCORES: usize = 1;
        pub const INDICES: usize = 0;
        pub const NUM_SELECTED: usize = 1;
    }
    pub mod audio_spectrogram {
        pub const INPUT: usize = 0;
        pub const SPECTROGRAM: usize = 0;
    }
    pub mod mfcc {
        pub const SPECTROGRAM: usize = 0;
        pub const COEFFICIENTS: usize = 0;
    }
    pub mod trace_event {
        pub const DATA: usize = 0;
    }
    pub mod convert_to {
        pub const INPUT: usize = 0;
        pub const RESULT: usize = 0;
    }
}

/// A single graph node.
///
/// Input types are denormalized: `in_tys[i]` is the type of the value named
/// `inputs[i]`, resolved when the node was built. [`crate::Function`]
/// validation checks they still agree with the producers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub kind: OpKind,
    /// Names of the values consumed, in operand order.
    pub inputs: Vec<String>,
    /// Types of the consumed values, parallel to `inputs`.
    pub in_tys: Vec<TensorTy>,
    /// Types of the produced values.
    pub out_tys: Vec<TensorTy>,
    /// Integer attributes (kernel, stride, pad, k, ...), by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, i64>,
}

impl NodeDef {
    /// Creates a node with no attributes.
    pub fn new(
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<String>,
        in_tys: Vec<TensorTy>,
        out_tys: Vec<TensorTy>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            in_tys,
            out_tys,
            attrs: BTreeMap::new(),
        }
    }

    /// Sets an integer attribute, builder style.
    pub fn with_attr(mut self, key: &str, value: i64) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// Returns an integer attribute.
    pub fn attr(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).copied()
    }

    /// Returns the name of the `k`-th produced value.
    ///
    /// Output 0 is named after the node itself; further outputs get a
    /// `:k` suffix.
    pub fn output_name(&self, k: usize) -> String {
        if k == 0 {
            self.name.clone()
        } else {
            format!("{}:{k}", self.name)
        }
    }

    /// Returns the read-only view the support gate is queried with.
    pub fn info(&self) -> NodeInfo<'_> {
        NodeInfo {
            kind: self.kind,
            in_tys: &self.in_tys,
            out_tys: &self.out_tys,
        }
    }
}

/// Read-only view of a node's operator kind and operand types.
///
/// This is the entire surface a backend sees when deciding whether it
/// admits a node; it is pure data, so gate results are a function of the
/// view alone.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo<'a> {
    kind: OpKind,
    in_tys: &'a [TensorTy],
    out_tys: &'a [TensorTy],
}

impl<'a> NodeInfo<'a> {
    /// Creates a view from borrowed operand types.
    pub fn new(kind: OpKind, in_tys: &'a [TensorTy], out_tys: &'a [TensorTy]) -> Self {
        Self {
            kind,
            in_tys,
            out_tys,
        }
    }

    /// Returns the operator kind.
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Returns the number of inputs.
    pub fn num_inputs(&self) -> usize {
        self.in_tys.len()
    }

    /// Returns the number of outputs.
    pub fn num_outputs(&self) -> usize {
        self.out_tys.len()
    }

    /// Returns the full type descriptor of input `i`.
    pub fn in_ty(&self, i: usize) -> Option<&'a TensorTy> {
        self.in_tys.get(i)
    }

    /// Returns the full type descriptor of output `j`.
    pub fn out_ty(&self, j: usize) -> Option<&'a TensorTy> {
        self.out_tys.get(j)
    }

    /// Returns the element kind of input `i`.
    pub fn in_elem(&self, i: usize) -> Option<ElemKind> {
        self.in_tys.get(i).map(|t| t.elem)
    }

    /// Returns the element kind of output `j`.
    pub fn out_elem(&self, j: usize) -> Option<ElemKind> {
        self.out_tys.get(j).map(|t| t.elem)
    }

    /// Returns `true` if input `i` exists and has element kind `kind`.
    pub fn in_is(&self, i: usize, kind: ElemKind) -> bool {
        self.in_elem(i) == Some(kind)
    }

    /// Returns `true` if output `j` exists and has element kind `kind`.
    pub fn out_is(&self, j: usize, kind: ElemKind) -> bool {
        self.out_elem(j) == Some(kind)
    }

    /// Returns `true` if input `i` exists and its kind is one of `kinds`.
    pub fn in_one_of(&self, i: usize, kinds: &[ElemKind]) -> bool {
        self.in_elem(i).is_some_and(|k| kinds.contains(&k))
    }

    /// Returns `true` if output `j` exists and its kind is one of `kinds`.
    pub fn out_one_of(&self, j: usize, kinds: &[ElemKind]) -> bool {
        self.out_elem(j).is_some_and(|k| kinds.contains(&k))
    }

    /// Returns `true` if every non-exempt input and output shares a single
    /// element kind drawn from `allowed`.
    ///
    /// `except_in`/`except_out` list operand positions exempt from the
    /// homogeneity check; they usually carry their own per-index
    /// constraints at the call site.
    pub fn all_in_out_same_elem(
        &self,
        allowed: &[ElemKind],
        except_in: &[usize],
        except_out: &[usize],
    ) -> bool {
        let mut seen: Option<ElemKind> = None;
        let candidates = self
            .in_tys
            .iter()
            .enumerate()
            .filter(|(i, _)| !except_in.contains(i))
            .map(|(_, t)| t.elem)
            .chain(
                self.out_tys
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| !except_out.contains(j))
                    .map(|(_, t)| t.elem),
            );
        for kind in candidates {
            match seen {
                None => {
                    if !allowed.contains(&kind) {
                        return false;
                    }
                    seen = Some(kind);
                }
                Some(first) => {
                    if kind != first {
                        return false;
                    }
                }
            }
        }
        true
    }
}
