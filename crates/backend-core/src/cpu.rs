// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The CPU backend.
//!
//! The heart of this file is [`CpuBackend::is_op_supported`]: one
//! exhaustive match on the operator kind that declares, per operator, the
//! admissible element-kind combinations of its inputs and outputs. The
//! partitioner consults this gate before placing a subgraph, so the table
//! must fail closed: kinds without an arm are not supported.
//!
//! The kernel library is compiled to LLVM bitcode ahead of time and
//! embedded below as a read-only byte image; code generation consumes it
//! through [`CpuBackend::libjit_bitcode`].

use crate::{Backend, BackendError, BackendOptions, CompiledFunction, CpuFunction, PrecisionConfig};
use graph_ir::node::idx;
use graph_ir::{verify_function, ElemKind, Function, Module, NodeDef, NodeInfo, OpKind};

/// The kernel-library bitcode image, generated at build time.
static LIBJIT_BC: &[u8] = include_bytes!("libjit.bc");

/// The CPU backend: JIT-compiled kernels from the embedded library.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn is_op_supported(&self, ni: &NodeInfo<'_>) -> bool {
        use ElemKind::*;
        match ni.kind() {
            OpKind::BatchedReduceMin => {
                ni.all_in_out_same_elem(&[Float, Int32I, Int64I], &[], &[])
            }

            OpKind::Add | OpKind::Mul => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int32I, Int64I], &[], &[])
            }

            OpKind::Sub
            | OpKind::Max
            | OpKind::Min
            | OpKind::BatchedReduceAdd
            | OpKind::MatMul
            | OpKind::AvgPool => ni.all_in_out_same_elem(&[Float, Int8Q], &[], &[]),

            OpKind::AdaptiveAvgPool => ni.all_in_out_same_elem(&[Float], &[], &[]),

            OpKind::MaxPool => {
                // A second output, when present, is the argmax tensor.
                let argmax_ok = ni.num_outputs() < 2
                    || ni.out_one_of(idx::max_pool::ARGMAX, &[Int64I, Int32I]);
                ni.all_in_out_same_elem(&[Float, Int8Q], &[], &[idx::max_pool::ARGMAX])
                    && argmax_ok
            }

            OpKind::ArgMax | OpKind::ArgMin => {
                ni.all_in_out_same_elem(&[Float, Int8Q], &[], &[idx::arg_max::RESULT])
                    && ni.out_one_of(idx::arg_max::RESULT, &[Int64I, Int32I])
            }

            OpKind::ResizeNearest | OpKind::ResizeBilinear => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int32Q, Int32I, Int64I], &[], &[])
            }

            // Both land on a plain copy kernel.
            OpKind::Save | OpKind::Reshape => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int32Q, Int32I, Int64I, Bool], &[], &[])
            }

            // Concat lowers to splat + insert, so all three share a table.
            OpKind::InsertTensor | OpKind::Concat | OpKind::Splat | OpKind::Touch => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int64I, Int32I, Bool], &[], &[])
            }

            OpKind::Slice => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int32Q, Int32I, Int64I], &[], &[])
            }

            OpKind::SpaceToDepth | OpKind::Div => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int64I, Int32I], &[], &[])
            }

            OpKind::Transpose => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int64I, Bool], &[], &[])
            }

            OpKind::Flip => ni.all_in_out_same_elem(
                &[Float, Int8Q, Int16Q, Int32Q, Int32I, Int64I, Bool],
                &[],
                &[],
            ),

            OpKind::SparseLengthsSum => {
                ni.all_in_out_same_elem(&[Float], &[idx::sls::INDICES, idx::sls::LENGTHS], &[])
                    && ni.in_one_of(idx::sls::INDICES, &[Int64I, Int32I])
                    && ni.in_is(idx::sls::LENGTHS, Int32I)
            }

            OpKind::SparseLengthsWeightedSum => {
                ni.all_in_out_same_elem(&[Float], &[idx::slws::INDICES, idx::slws::LENGTHS], &[])
                    && ni.in_one_of(idx::slws::INDICES, &[Int64I, Int32I])
                    && ni.in_is(idx::slws::LENGTHS, Int32I)
            }

            OpKind::EmbeddingBag => {
                ni.all_in_out_same_elem(
                    &[Float],
                    &[idx::embedding_bag::INDICES, idx::embedding_bag::OFFSETS],
                    &[],
                ) && ni.in_is(idx::embedding_bag::INDICES, Int64I)
                    && ni.in_is(idx::embedding_bag::OFFSETS, Int64I)
            }

            OpKind::RowwiseQuantizedSparseLengthsWeightedSum => {
                ni.in_is(idx::rowwise_slws::DATA, UInt8Q)
                    && ni.in_is(idx::rowwise_slws::SCALES, Float)
                    && ni.in_is(idx::rowwise_slws::OFFSETS, Float)
                    && ni.in_is(idx::rowwise_slws::WEIGHTS, Float)
                    && ni.in_one_of(idx::rowwise_slws::INDICES, &[Int64I, Int32I])
                    && ni.in_is(idx::rowwise_slws::LENGTHS, Int32I)
                    && ni.out_is(idx::rowwise_slws::RESULT, Float)
            }

            OpKind::LengthsRangeFill | OpKind::LengthsToRanges => {
                ni.all_in_out_same_elem(&[Int32I], &[], &[])
            }

            OpKind::IntLookupTable | OpKind::RescaleQuantized => {
                ni.all_in_out_same_elem(&[Int8Q], &[], &[])
            }

            OpKind::Pow
            | OpKind::LocalResponseNormalization
            | OpKind::Log
            | OpKind::Tanh
            | OpKind::Sigmoid
            | OpKind::Exp => ni.all_in_out_same_elem(&[Float], &[], &[]),

            OpKind::Modulo => ni.all_in_out_same_elem(&[Int32I, Int64I], &[], &[]),

            OpKind::Conv => {
                let quantized = ni
                    .in_ty(idx::conv::INPUT)
                    .map(|t| t.is_quantized())
                    .unwrap_or(false);
                if !quantized {
                    return ni.all_in_out_same_elem(&[Float], &[], &[]);
                }
                // Quantized conv admits a wider bias than its activations.
                ni.all_in_out_same_elem(&[Int8Q], &[idx::conv::BIAS], &[])
                    && ni.in_one_of(idx::conv::BIAS, &[Int8Q, Int32Q])
            }

            OpKind::ChannelwiseQuantizedConv => {
                ni.in_is(idx::channelwise_conv::INPUT, Int8Q)
                    && ni.in_is(idx::channelwise_conv::FILTER, Int8Q)
                    && ni.in_one_of(idx::channelwise_conv::BIAS, &[Int8Q, Int32Q])
                    && ni.in_is(idx::channelwise_conv::FILTER_SCALES, Float)
                    && ni.in_is(idx::channelwise_conv::FILTER_OFFSETS, Int32I)
                    && ni.in_is(idx::channelwise_conv::BIAS_SCALES, Float)
                    && ni.in_is(idx::channelwise_conv::BIAS_OFFSETS, Int32I)
                    && ni.out_is(idx::channelwise_conv::RESULT, Int8Q)
            }

            // No quantized kernels yet.
            OpKind::ConvTranspose => ni.all_in_out_same_elem(&[Float], &[], &[]),

            OpKind::BatchedAdd => {
                let quantized = ni
                    .in_ty(idx::batched_add::BATCH)
                    .map(|t| t.is_quantized())
                    .unwrap_or(false);
                if !quantized {
                    return ni.all_in_out_same_elem(&[Float], &[], &[]);
                }
                ni.all_in_out_same_elem(&[Int8Q], &[idx::batched_add::SLICE], &[])
                    && ni.in_one_of(idx::batched_add::SLICE, &[Int8Q, Int32Q])
            }

            OpKind::Gather => {
                ni.all_in_out_same_elem(
                    &[Float, Int8Q, Int64I, Int32I],
                    &[idx::gather::INDICES],
                    &[],
                ) && ni.in_one_of(idx::gather::INDICES, &[Int32I, Int64I])
            }

            OpKind::GatherRanges => {
                ni.all_in_out_same_elem(
                    &[Float, Int8Q, Int64I, Int32I],
                    &[idx::gather_ranges::RANGES],
                    &[idx::gather_ranges::LENGTHS],
                ) && ni.in_elem(idx::gather_ranges::RANGES)
                    == ni.out_elem(idx::gather_ranges::LENGTHS)
                    && ni.out_one_of(idx::gather_ranges::LENGTHS, &[Int32I, Int64I])
            }

            OpKind::ScatterData => {
                ni.all_in_out_same_elem(&[Float, Int8Q], &[idx::scatter_data::INDICES], &[])
                    && ni.in_one_of(idx::scatter_data::INDICES, &[Int64I, Int32I])
            }

            OpKind::Select => {
                ni.all_in_out_same_elem(&[Float, Int8Q, Int32I], &[idx::select::COND], &[])
                    && ni.in_is(idx::select::COND, Bool)
            }

            OpKind::Not | OpKind::And | OpKind::Or | OpKind::Xor => {
                ni.all_in_out_same_elem(&[Bool], &[], &[])
            }

            OpKind::Abs
            | OpKind::Neg
            | OpKind::Floor
            | OpKind::Ceil
            | OpKind::Round
            | OpKind::Sqrt
            | OpKind::Rsqrt
            | OpKind::Reciprocal
            | OpKind::Sin
            | OpKind::Cos => ni.all_in_out_same_elem(&[Float], &[], &[]),

            OpKind::CmpEq | OpKind::CmpNeq | OpKind::CmpLt | OpKind::CmpLte => {
                ni.all_in_out_same_elem(
                    &[Float, Int8Q, Int32I, Int64I],
                    &[],
                    &[idx::cmp::RESULT],
                ) && ni.out_is(idx::cmp::RESULT, Bool)
            }

            OpKind::IsNaN => {
                ni.all_in_out_same_elem(&[Float], &[], &[0]) && ni.out_is(0, Bool)
            }

            OpKind::TopK => {
                ni.all_in_out_same_elem(&[Float, Int8Q], &[], &[idx::top_k::INDICES])
                    && ni.out_one_of(idx::top_k::INDICES, &[Int64I, Int32I])
            }

            OpKind::Quantize => {
                ni.in_is(idx::quantize::INPUT, Float)
                    && ni.out_one_of(idx::quantize::RESULT, &[Int8Q, Int32Q])
            }

            OpKind::Dequantize => {
                ni.in_is(idx::quantize::INPUT, Int8Q) && ni.out_is(idx::quantize::RESULT, Float)
            }

            OpKind::Softmax => {
                // Softmax with a selected-label operand; labels are indices.
                let selected_ok = ni.num_inputs() < 2
                    || ni.in_one_of(idx::softmax::SELECTED, &[Int64I, Int32I]);
                ni.all_in_out_same_elem(&[Float], &[idx::softmax::SELECTED], &[]) && selected_ok
            }

            OpKind::LengthsSum => {
                ni.all_in_out_same_elem(&[Float], &[idx::lengths_sum::LENGTHS], &[])
                    && ni.in_is(idx::lengths_sum::LENGTHS, Int32I)
            }

            OpKind::EmbeddingBagByteRowwiseOffsets => {
                ni.in_is(idx::embedding_bag_bro::DATA, UInt8FusedQ)
                    && ni.in_is(idx::embedding_bag_bro::WEIGHTS, Float)
                    && ni.in_is(idx::embedding_bag_bro::INDICES, Int64I)
                    && ni.in_is(idx::embedding_bag_bro::OFFSETS, Int64I)
                    && ni.out_is(idx::embedding_bag_bro::RESULT, Float)
            }

            OpKind::FusedRowwiseQuantizedSparseLengthsWeightedSum => {
                ni.in_is(idx::fused_slws::DATA, UInt8FusedQ)
                    && ni.in_is(idx::fused_slws::WEIGHTS, Float)
                    && ni.in_one_of(idx::fused_slws::INDICES, &[Int64I, Int32I])
                    && ni.in_is(idx::fused_slws::LENGTHS, Int32I)
                    && ni.out_is(idx::fused_slws::RESULT, Float)
            }

            OpKind::FusedRowwiseQuantizedSparseLengthsSum => {
                ni.in_is(idx::fused_sls::DATA, UInt8FusedQ)
                    && ni.in_one_of(idx::fused_sls::INDICES, &[Int64I, Int32I])
                    && ni.in_is(idx::fused_sls::LENGTHS, Int32I)
                    && ni.out_is(idx::fused_sls::RESULT, Float)
            }

            OpKind::RowwiseQuantizedFullyConnected => {
                ni.in_is(idx::rowwise_fc::INPUT, Int8Q)
                    && ni.in_is(idx::rowwise_fc::WEIGHTS, Int8Q)
                    && ni.in_is(idx::rowwise_fc::SCALES, Float)
                    && ni.in_is(idx::rowwise_fc::OFFSETS, Int32I)
                    && ni.in_one_of(idx::rowwise_fc::BIAS, &[Int8Q, Int32Q])
                    && ni.out_is(idx::rowwise_fc::RESULT, Int8Q)
            }

            OpKind::SparseToDense => {
                ni.all_in_out_same_elem(&[Float], &[idx::sparse_to_dense::INDICES], &[])
                    && ni.in_one_of(idx::sparse_to_dense::INDICES, &[Int64I, Int32I])
            }

            OpKind::TraceEvent => ni.in_is(idx::trace_event::DATA, Int64I),

            OpKind::NonMaxSuppression => {
                ni.in_is(idx::nms::BOXES, Float)
                    && ni.in_is(idx::nms::SCORES, Float)
                    && ni.out_one_of(idx::nms::INDICES, &[Int32I, Int64I])
                    && ni.out_one_of(idx::nms::NUM_SELECTED, &[Int32I, Int64I])
            }

            OpKind::AudioSpectrogram => {
                ni.in_is(idx::audio_spectrogram::INPUT, Float)
                    && ni.out_is(idx::audio_spectrogram::SPECTROGRAM, Float)
            }

            OpKind::Mfcc => {
                ni.in_is(idx::mfcc::SPECTROGRAM, Float)
                    && ni.out_is(idx::mfcc::COEFFICIENTS, Float)
            }

            OpKind::ConvertTo => {
                let pair = (
                    ni.in_elem(idx::convert_to::INPUT),
                    ni.out_elem(idx::convert_to::RESULT),
                );
                matches!(
                    pair,
                    (Some(Int32I), Some(Float))
                        | (Some(Bool), Some(Float))
                        | (Some(Int64I), Some(Int32I))
                        | (Some(Int32I), Some(Int64I))
                )
            }

            // Everything else fails closed.
            _ => false,
        }
    }

    fn should_lower(&self, node: &NodeDef) -> bool {
        // Keep the fused kernels for these instead of pre-lowering them.
        !matches!(node.kind, OpKind::Conv | OpKind::SparseLengthsSum)
    }

    fn can_do_index_type_demotion(
        &self,
        from: ElemKind,
        to: ElemKind,
        prec: &mut PrecisionConfig,
    ) -> bool {
        prec.kind_exclusions.insert(OpKind::EmbeddingBag);
        prec.kind_exclusions
            .insert(OpKind::EmbeddingBagByteRowwiseOffsets);
        prec.kind_exclusions
            .insert(OpKind::FusedRowwiseQuantizedSparseLengthsSum);
        prec.kind_exclusions
            .insert(OpKind::FusedRowwiseQuantizedSparseLengthsWeightedSum);
        prec.kind_exclusions.insert(OpKind::SparseToDenseMask);
        from == ElemKind::Int64I && to == ElemKind::Int32I
    }

    fn verify(
        &self,
        function: &Function,
        module: &Module,
        verbose: bool,
    ) -> Result<(), BackendError> {
        verify_function(function, module.constants()).map_err(|source| BackendError::Verify {
            function: function.name().to_string(),
            source,
        })?;
        for node in function.nodes() {
            if !self.is_op_supported(&node.info()) {
                if verbose {
                    tracing::warn!(
                        "cpu backend rejects node '{}' ({}) in '{}'",
                        node.name,
                        node.kind,
                        function.name()
                    );
                }
                return Err(BackendError::UnsupportedNode {
                    function: function.name().to_string(),
                    node: node.name.clone(),
                    kind: node.kind.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    fn compile(
        &self,
        function: &Function,
        module: &Module,
        _opts: &BackendOptions,
    ) -> Result<Box<dyn CompiledFunction>, BackendError> {
        let size_bytes = module.function_constant_bytes(function) + function.activation_bytes();
        tracing::debug!(
            "cpu compile '{}': {} node(s), {} byte(s)",
            function.name(),
            function.num_nodes(),
            size_bytes,
        );
        Ok(Box::new(CpuFunction::new(function, size_bytes)))
    }

    fn libjit_bitcode(&self) -> Option<&'static [u8]> {
        Some(LIBJIT_BC)
    }

    fn num_devices(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
