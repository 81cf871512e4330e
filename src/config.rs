// SPDX-License-Identifier: MIT

//! Broker configuration.
//!
//! Loaded from a JSON file.  Every field has a default, so a missing file or
//! a partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::args::ArgumentBuilder;
use crate::comm::frame::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::error::BrokerError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub container: ContainerConfig,
    pub ipc: IpcConfig,
    pub game: GameConfig,
}

/// The sandbox container identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Pipe name on Windows, socket path elsewhere.
    pub endpoint: String,
    pub max_payload_size: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub executable: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub arguments: Vec<ArgumentPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentPair {
    pub key: String,
    pub value: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            name: "Dalamud.Broker.Sandbox".to_string(),
            display_name: "Dalamud Sandbox".to_string(),
            description: "Isolated container for the game client".to_string(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            endpoint: default_endpoint(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

#[cfg(target_os = "windows")]
fn default_endpoint() -> String {
    r"\\.\pipe\dalamud-broker".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_endpoint() -> String {
    std::env::temp_dir().join("dalamud-broker.sock").to_string_lossy().to_string()
}

impl BrokerConfig {
    /// Load the configuration file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        match std::fs::read(path) {
            Ok(data) => Self::from_json(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(BrokerError::Config(format!("reading {}: {}", path.display(), e))),
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self, BrokerError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl GameConfig {
    /// The configured arguments, in file order.
    pub fn argument_builder(&self) -> ArgumentBuilder {
        self.arguments.iter().map(|p| (p.key.as_str(), p.value.as_str())).collect()
    }
}
