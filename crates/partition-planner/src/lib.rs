// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # partition-planner
//!
//! Splits a module's functions into per-device DAGs subject to memory and
//! operator-support constraints.
//!
//! The planner consumes three things:
//! - the [`graph_ir::Module`] being added to the host,
//! - a snapshot of [`device_manager::DeviceInfo`] per device (available
//!   memory plus per-device operator allow/deny lists), and
//! - the [`backend_core::Backend`] registry, whose support gates decide
//!   which operators may land on which backend.
//!
//! The output is one [`CompiledDag`] per function: a rooted chain of
//! [`DagNode`] segments, each assigned to exactly one device, ready for
//! the provisioner to compile and load.
//!
//! # Example
//! ```no_run
//! use partition_planner::Partitioner;
//! # fn demo(module: &graph_ir::Module,
//! #         devices: Vec<device_manager::DeviceInfo>,
//! #         backends: std::collections::BTreeMap<String, std::sync::Arc<dyn backend_core::Backend>>) {
//! let mut partitioner = Partitioner::new(module, devices, backends);
//! partitioner.set_context_count(4);
//! let dags = partitioner.partition().unwrap();
//! for dag in &dags {
//!     println!("{}", dag.summary());
//! }
//! # }
//! ```

mod dag;
mod error;
mod partition;

pub use dag::{CompiledDag, DagNode, DeviceRuntimeInfo};
pub use error::PlannerError;
pub use partition::Partitioner;
