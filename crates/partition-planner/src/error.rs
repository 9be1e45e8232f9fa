// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for partitioning.

/// Errors that can occur while planning a partition.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The module has no functions to partition.
    #[error("module contains no functions")]
    EmptyModule,

    /// No devices were offered to the planner.
    #[error("no devices available for partitioning")]
    NoDevices,

    /// A node is admitted by no device.
    #[error("no device supports node '{node}' ({kind}) in function '{function}'")]
    NodeUnsupported {
        function: String,
        node: String,
        kind: String,
    },

    /// A segment cannot fit on any admitting device.
    #[error("function '{function}' needs {needed} bytes for node '{node}', no device has room")]
    OutOfMemory {
        function: String,
        node: String,
        needed: u64,
    },

    /// The produced DAG failed its own validation.
    #[error("partition produced an invalid DAG: {0}")]
    InvalidDag(String),

    /// Internal inconsistency.
    #[error("partitioner error: {0}")]
    Internal(String),
}
