// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Precision configuration shared between the lifecycle coordinator and
//! the backends.

use graph_ir::OpKind;
use std::collections::BTreeSet;

/// How the compilation pipeline treats quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationMode {
    /// No quantization handling.
    #[default]
    None,
    /// Quantize using previously collected profiles.
    Quantize,
    /// One-shot instrumented compilation that records value ranges.
    /// Incompatible with pre-existing networks on the host.
    Profile,
}

/// Precision settings consumed by backends.
///
/// `kind_exclusions` collects operator kinds a backend has declared exempt
/// from precision transforms such as index-type demotion; backends insert
/// into it from
/// [`crate::Backend::can_do_index_type_demotion`].
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PrecisionConfig {
    pub quant_mode: QuantizationMode,
    pub kind_exclusions: BTreeSet<OpKind>,
}

impl PrecisionConfig {
    /// Returns `true` if `kind` is excluded from precision transforms.
    pub fn is_excluded(&self, kind: OpKind) -> bool {
        self.kind_exclusions.contains(&kind)
    }
}
