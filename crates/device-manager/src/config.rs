// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device configuration, loadable from TOML files or constructed
//! programmatically.
//!
//! # TOML Format
//! ```toml
//! [[devices]]
//! backend = "cpu"
//! name = "cpu0"
//! memory = "512M"
//!
//! [devices.params]
//! supportedNodes = "add,mul"
//! ```
//!
//! Unnamed configs are assigned `configN` by insertion order when the host
//! initializes its devices.

use crate::DeviceError;
use std::collections::BTreeMap;
use std::path::Path;

/// Identifies one device within a host.
pub type DeviceId = usize;

/// Immutable description of one device.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceConfig {
    /// The backend that compiles for and drives this device.
    pub backend_name: String,
    /// Device name; assigned deterministically (`configN`) if omitted.
    pub name: Option<String>,
    /// Free-form backend parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Usable device memory in bytes.
    pub memory_bytes: u64,
    /// Host-assigned identifier.
    #[serde(default)]
    pub device_id: DeviceId,
}

impl DeviceConfig {
    /// Creates a config with default memory and no name.
    pub fn new(backend_name: impl Into<String>, memory_bytes: u64) -> Self {
        Self {
            backend_name: backend_name.into(),
            name: None,
            params: BTreeMap::new(),
            memory_bytes,
            device_id: 0,
        }
    }

    /// Sets the device name, builder style.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets a backend parameter, builder style.
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns `true` if the config carries an explicit name.
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// Returns the device name, or `configN` for the given insertion index
    /// when none was set.
    pub fn resolved_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("config{index}"))
    }
}

/// On-disk form of a device-config list.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct DeviceConfigFile {
    devices: Vec<DeviceConfigEntry>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct DeviceConfigEntry {
    backend: String,
    name: Option<String>,
    /// Human-readable memory size (`"512M"`, `"2G"`, plain bytes).
    memory: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

/// Parses a human-readable memory size: plain bytes or a `K`/`M`/`G`
/// suffix.
pub fn parse_memory_size(s: &str) -> Result<u64, DeviceError> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, 'K' | 'k')) => (&s[..i], 1u64 << 10),
        Some((i, 'M' | 'm')) => (&s[..i], 1u64 << 20),
        Some((i, 'G' | 'g')) => (&s[..i], 1u64 << 30),
        _ => (s, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| DeviceError::InvalidMemorySize(s.to_string()))
}

/// Loads a device-config list from a TOML file.
///
/// `default_memory` applies to entries without an explicit `memory` field.
pub fn load_device_configs(
    path: &Path,
    default_memory: u64,
) -> Result<Vec<DeviceConfig>, DeviceError> {
    let content = std::fs::read_to_string(path).map_err(|e| DeviceError::ConfigRead {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let file: DeviceConfigFile =
        toml::from_str(&content).map_err(|e| DeviceError::ConfigParse(e.to_string()))?;

    let mut configs = Vec::with_capacity(file.devices.len());
    for (i, entry) in file.devices.into_iter().enumerate() {
        let memory_bytes = match &entry.memory {
            Some(s) => parse_memory_size(s)?,
            None => default_memory,
        };
        configs.push(DeviceConfig {
            backend_name: entry.backend,
            name: entry.name,
            params: entry.params,
            memory_bytes,
            device_id: i,
        });
    }
    Ok(configs)
}

/// Generates `num_devices` uniform configs for `backend_name`.
pub fn generate_device_configs(
    num_devices: usize,
    backend_name: &str,
    memory_bytes: u64,
) -> Vec<DeviceConfig> {
    (0..num_devices)
        .map(|i| {
            let mut config = DeviceConfig::new(backend_name, memory_bytes);
            config.device_id = i;
            config
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_memory_size() {
        assert_eq!(parse_memory_size("1024").unwrap(), 1024);
        assert_eq!(parse_memory_size("4K").unwrap(), 4096);
        assert_eq!(parse_memory_size("512M").unwrap(), 512 << 20);
        assert_eq!(parse_memory_size("2G").unwrap(), 2 << 30);
        assert_eq!(parse_memory_size(" 8m ").unwrap(), 8 << 20);
        assert!(parse_memory_size("lots").is_err());
        assert!(parse_memory_size("").is_err());
    }

    #[test]
    fn test_resolved_name() {
        let unnamed = DeviceConfig::new("cpu", 1 << 20);
        assert!(!unnamed.has_name());
        assert_eq!(unnamed.resolved_name(3), "config3");

        let named = DeviceConfig::new("cpu", 1 << 20).with_name("accel0");
        assert_eq!(named.resolved_name(3), "accel0");
    }

    #[test]
    fn test_generate_device_configs() {
        let configs = generate_device_configs(3, "cpu", 64 << 20);
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[2].device_id, 2);
        assert!(configs.iter().all(|c| c.backend_name == "cpu"));
        assert!(configs.iter().all(|c| c.memory_bytes == 64 << 20));
    }

    #[test]
    fn test_load_from_file() {
        let toml = r#"
[[devices]]
backend = "cpu"
name = "cpu0"
memory = "64M"

[devices.params]
supportedNodes = "add,mul"

[[devices]]
backend = "cpu"
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let configs = load_device_configs(file.path(), 32 << 20).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name.as_deref(), Some("cpu0"));
        assert_eq!(configs[0].memory_bytes, 64 << 20);
        assert_eq!(
            configs[0].params.get("supportedNodes").map(String::as_str),
            Some("add,mul")
        );
        // Second entry: unnamed, default memory, id by order.
        assert!(configs[1].name.is_none());
        assert_eq!(configs[1].memory_bytes, 32 << 20);
        assert_eq!(configs[1].device_id, 1);
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"devices = 3").unwrap();
        assert!(matches!(
            load_device_configs(file.path(), 0),
            Err(DeviceError::ConfigParse(_))
        ));
    }
}
