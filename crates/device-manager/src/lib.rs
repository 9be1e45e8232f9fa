// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-manager
//!
//! Device configuration and the per-device management contract.
//!
//! - [`DeviceConfig`] — immutable description of one device (backend,
//!   name, params, memory), loadable from TOML.
//! - [`DeviceManager`] — the contract the host consumes: init/stop,
//!   artifact residency with memory accounting, execution, tracing.
//! - [`DeviceInfo`] — the snapshot the partitioner plans against.
//! - [`CpuDeviceManager`] — the host-memory implementation used for the
//!   CPU backend and for profiling runs.
//!
//! # Example
//! ```
//! use device_manager::{create_device_manager, DeviceConfig};
//!
//! let dm = create_device_manager(DeviceConfig::new("cpu", 64 << 20)).unwrap();
//! dm.init().unwrap();
//! assert_eq!(dm.available_memory(), 64 << 20);
//! ```

mod config;
mod error;
mod manager;

pub use config::{
    generate_device_configs, load_device_configs, parse_memory_size, DeviceConfig, DeviceId,
};
pub use error::DeviceError;
pub use manager::{create_device_manager, CpuDeviceManager, DeviceInfo, DeviceManager};
