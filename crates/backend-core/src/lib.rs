// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # backend-core
//!
//! The backend contract of the host runtime, and the CPU backend that
//! implements it.
//!
//! A [`Backend`] answers three questions for the rest of the system:
//!
//! 1. **Which operators do you admit?** — [`Backend::is_op_supported`],
//!    a pure predicate over a node's operand element kinds. The
//!    partitioner consults it before placing any subgraph.
//! 2. **Is this function valid for you?** — [`Backend::verify`], run
//!    after graph transformations that might have introduced nodes the
//!    backend cannot compile.
//! 3. **Compile it.** — [`Backend::compile`] produces a
//!    [`CompiledFunction`] the provisioner loads onto a device.
//!
//! Backends are registered by name through [`create_backend`]; the
//! profiling flow recompiles everything on [`PROFILING_BACKEND`].

mod compiled;
pub mod cpu;
mod error;
mod precision;

pub use compiled::{CompiledFunction, CpuFunction};
pub use cpu::CpuBackend;
pub use error::BackendError;
pub use precision::{PrecisionConfig, QuantizationMode};

use graph_ir::{ElemKind, Function, Module, NodeDef, NodeInfo};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Backend-specific string options forwarded into compilation.
pub type BackendOptions = BTreeMap<String, String>;

/// The backend used for quantization profiling runs.
pub const PROFILING_BACKEND: &str = "cpu";

/// One compilation target: support gate, verifier, and code generation.
pub trait Backend: Send + Sync {
    /// The backend's registry name.
    fn name(&self) -> &str;

    /// Pure predicate: does this backend admit the node described by `ni`?
    ///
    /// Unlisted operator kinds must return `false`.
    fn is_op_supported(&self, ni: &NodeInfo<'_>) -> bool;

    /// Returns `false` for operators the graph layer should hand over
    /// unlowered, preserving fused implementations.
    fn should_lower(&self, _node: &NodeDef) -> bool {
        true
    }

    /// Declares whether narrowing index tensors from `from` to `to` is
    /// legal, registering operator kinds that must be excluded from the
    /// demotion in `prec`.
    fn can_do_index_type_demotion(
        &self,
        _from: ElemKind,
        _to: ElemKind,
        _prec: &mut PrecisionConfig,
    ) -> bool {
        false
    }

    /// Verifies `function` structurally and against the support gate.
    fn verify(&self, function: &Function, module: &Module, verbose: bool)
        -> Result<(), BackendError>;

    /// Compiles `function` into a loadable artifact.
    fn compile(
        &self,
        function: &Function,
        module: &Module,
        opts: &BackendOptions,
    ) -> Result<Box<dyn CompiledFunction>, BackendError>;

    /// The embedded kernel-library bitcode, if this backend carries one.
    fn libjit_bitcode(&self) -> Option<&'static [u8]> {
        None
    }

    /// Number of devices this backend can reasonably drive on this host.
    fn num_devices(&self) -> usize;
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}

/// Creates the backend registered under `name`.
pub fn create_backend(name: &str) -> Result<Arc<dyn Backend>, BackendError> {
    match name {
        "cpu" => Ok(Arc::new(CpuBackend::new())),
        other => Err(BackendError::UnknownBackend(other.to_string())),
    }
}
