// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host configuration and the per-add compilation context.
//!
//! # TOML Format
//! ```toml
//! executor_threads = 3
//! max_active_requests = 48
//! max_queue_size = 100
//! enable_p2p = false
//! enable_drt = false
//! ```

use crate::HostError;
use backend_core::{BackendOptions, PrecisionConfig};
use std::collections::BTreeMap;

/// Process-wide host settings, fixed at construction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Worker count for the executor pool.
    pub executor_threads: usize,
    /// Upper bound on concurrent executions.
    pub max_active_requests: usize,
    /// Backpressure threshold for admission.
    pub max_queue_size: usize,
    /// Host-wide peer-to-peer default, OR-ed with the per-add setting.
    pub enable_p2p: bool,
    /// Host-wide device-resident-tensor default, OR-ed with the per-add
    /// setting.
    pub enable_drt: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executor_threads: 3,
            max_active_requests: 48,
            max_queue_size: 100,
            enable_p2p: false,
            enable_drt: false,
        }
    }
}

impl HostConfig {
    /// Parses a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, HostError> {
        toml::from_str(toml_str)
            .map_err(|e| HostError::Runtime(format!("TOML parse error: {e}")))
    }

    /// Serialises the config to TOML.
    pub fn to_toml(&self) -> Result<String, HostError> {
        toml::to_string_pretty(self)
            .map_err(|e| HostError::Runtime(format!("TOML serialise error: {e}")))
    }
}

/// Options for the graph-optimization phase of an add.
#[derive(Debug, Clone, Default)]
pub struct OptimizationOptions {
    /// Swap constants for placeholders during partitioning and fold them
    /// only afterwards, recording what was folded.
    pub delay_and_record_constant_modification: bool,
}

/// Backend-facing options for an add.
#[derive(Debug, Clone, Default)]
pub struct BackendCompileOptions {
    /// Free-form options forwarded into `Backend::compile`. The key
    /// `load_backend_specific_options` names a TOML file whose map
    /// replaces this one.
    pub backend_specific_opts: BackendOptions,
    /// Per-function, per-node backend hints. Non-empty hints mean the
    /// functions were already optimized, so the pre-partition pass is
    /// skipped.
    pub backend_specific_node_info: BTreeMap<String, BTreeMap<String, String>>,
}

/// Everything `add_network` consumes besides the module itself.
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    /// Dump each function's DAG in dot form if the add fails.
    pub dump_final_graph: bool,
    pub optimization_opts: OptimizationOptions,
    pub backend_opts: BackendCompileOptions,
    pub precision_config: PrecisionConfig,
    /// Peer-to-peer tensor transfers for this network.
    pub enable_p2p: bool,
    /// Device-resident tensors for this network.
    pub enable_drt: bool,
    /// Run the registered DAG optimizer after partitioning.
    pub call_dag_optimizer: bool,
    /// Serialize the compiled DAG through the registered exporter.
    pub serialize_compiled_dag: bool,
    /// Keep constant payloads in the module after provisioning.
    pub skip_module_strip: bool,
    /// Verbose logging during backend verification and compilation.
    pub verbose_compile: bool,
}

/// The key that redirects backend options to a file.
pub const LOAD_BACKEND_SPECIFIC_OPTIONS_KEY: &str = "load_backend_specific_options";

/// Resolves `backend_specific_opts`: when the redirect key is present, the
/// referenced TOML file (a flat string map) replaces the inline map.
pub fn resolve_backend_specific_opts(cctx: &mut CompilationContext) -> Result<(), HostError> {
    let Some(path) = cctx
        .backend_opts
        .backend_specific_opts
        .get(LOAD_BACKEND_SPECIFIC_OPTIONS_KEY)
        .cloned()
    else {
        return Ok(());
    };
    if cctx.backend_opts.backend_specific_opts.len() > 1 {
        tracing::warn!(
            "backend-specific options set inline and via '{path}'; the file wins"
        );
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| HostError::Runtime(format!("cannot read backend options '{path}': {e}")))?;
    let map: BTreeMap<String, String> = toml::from_str(&content)
        .map_err(|e| HostError::Runtime(format!("cannot parse backend options '{path}': {e}")))?;
    cctx.backend_opts.backend_specific_opts = map;
    Ok(())
}
