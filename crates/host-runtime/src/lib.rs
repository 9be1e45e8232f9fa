// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # host-runtime
//!
//! The host-side runtime of the heterogeneous execution engine.
//!
//! [`HostManager`] owns the lifecycle of networks on devices:
//!
//! - `add_network` partitions a module across devices (memory and
//!   operator-support constrained), provisions compiled artifacts, and
//!   publishes the networks atomically, with rollback on any failure.
//! - `run_network` admits a request into a bounded priority queue and
//!   dispatches up to `max_active_requests` concurrent executions;
//!   outcomes always arrive through the completion callback.
//! - `remove_network` refuses while runs are in flight or an add is in
//!   progress, then evicts the network from every backing device.
//! - `clear_host` drains traffic and stops every device.
//!
//! # Example
//! ```no_run
//! use device_manager::DeviceConfig;
//! use host_runtime::{CompilationContext, HostConfig, HostManager};
//! # fn demo(module: graph_ir::Module) -> Result<(), host_runtime::HostError> {
//! let host = HostManager::new(
//!     vec![DeviceConfig::new("cpu", 512 << 20)],
//!     HostConfig::default(),
//! )?;
//! host.add_network(module, &mut CompilationContext::default())?;
//!
//! let mut bindings = graph_ir::Bindings::new();
//! host.run_network_blocking("main", &mut bindings)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod executor;
mod export;
mod manager;
mod provisioner;
mod queue;
mod registry;
mod stats;

pub use config::{
    resolve_backend_specific_opts, BackendCompileOptions, CompilationContext, HostConfig,
    OptimizationOptions, LOAD_BACKEND_SPECIFIC_OPTIONS_KEY,
};
pub use error::{FirstErr, HostError};
pub use executor::{RunCallback, RunId, ThreadPoolExecutor};
pub use export::{DagExporter, DagOptimizer, JsonDagExporter};
pub use manager::{HostCollaborators, HostManager};
pub use provisioner::Provisioner;
pub use queue::{InferQueue, InferRequest};
pub use registry::{NetworkEntry, NetworkRegistry};
pub use stats::{keys, InMemoryStats, StatsExporter};
