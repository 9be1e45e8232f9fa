// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device configuration and management.

/// Errors that can occur in device configuration or at the device boundary.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A device-config file could not be read.
    #[error("cannot read device config '{path}': {detail}")]
    ConfigRead { path: String, detail: String },

    /// A device-config file is malformed.
    #[error("cannot parse device config: {0}")]
    ConfigParse(String),

    /// A memory-size string is malformed.
    #[error("invalid memory size '{0}'")]
    InvalidMemorySize(String),

    /// No device manager is registered for the requested backend.
    #[error("no device manager for backend '{0}'")]
    UnknownBackend(String),

    /// The device cannot hold another artifact of the requested size.
    #[error("device '{device}' out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        device: String,
        requested: u64,
        available: u64,
    },

    /// The requested function is not resident on the device.
    #[error("function '{function}' is not loaded on device '{device}'")]
    FunctionNotFound { device: String, function: String },

    /// The device is stopped.
    #[error("device '{0}' is stopped")]
    Stopped(String),

    /// A run failed inside the backend artifact.
    #[error("device '{device}' failed to run '{function}': {source}")]
    RunFailed {
        device: String,
        function: String,
        #[source]
        source: backend_core::BackendError,
    },
}
