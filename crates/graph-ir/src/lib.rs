// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! A lightweight intermediate representation for partitioned
//! neural-network graphs.
//!
//! Rather than depending on a heavy framework IR, this crate defines the
//! minimum the host runtime needs:
//!
//! - [`ElemKind`] / [`TensorTy`] — element kinds and full tensor type
//!   descriptors, including affine and fused quantization.
//! - [`OpKind`] / [`NodeDef`] / [`NodeInfo`] — a closed operator
//!   enumeration, graph nodes, and the read-only view backend support
//!   gates are queried with.
//! - [`Function`] / [`Module`] — topologically ordered node lists with
//!   typed placeholders, bundled with shared constants.
//! - [`verify_function`] — per-kind operand verification as one exhaustive
//!   match.
//! - [`Tensor`] / [`Bindings`] / [`ExecutionContext`] — the data that
//!   flows through a run.
//!
//! # Example
//! ```
//! use graph_ir::{ElemKind, Function, NodeDef, OpKind, Shape, TensorTy};
//!
//! let ty = TensorTy::new(ElemKind::Float, Shape::vector(8));
//! let mut f = Function::new("f");
//! f.add_input("in", ty.clone());
//! f.add_node(NodeDef::new(
//!     "out",
//!     OpKind::Save,
//!     vec!["in".into()],
//!     vec![ty.clone()],
//!     vec![ty.clone()],
//! ));
//! f.add_output("out", ty);
//! f.validate(&std::collections::BTreeMap::new()).unwrap();
//! ```

mod context;
mod elem;
mod error;
mod function;
pub mod module;
pub mod node;
mod optimize;
mod tensor;
mod types;
pub mod verify;

pub use context::{ExecutionContext, TraceContext, TraceEvent};
pub use elem::ElemKind;
pub use error::GraphError;
pub use function::{Function, Placeholder};
pub use module::{Constant, FrozenConstants, Module};
pub use node::{idx, NodeDef, NodeInfo, OpKind};
pub use optimize::{constant_fold_function, optimize_function, FoldRecord};
pub use tensor::{Bindings, Tensor};
pub use types::{Shape, TensorTy};
pub use verify::{conv_output_dims, verify_function};
