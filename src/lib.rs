// SPDX-License-Identifier: MIT

//! # sandbox-broker
//!
//! Starts the game client inside an AppContainer sandbox, hands it its
//! launch arguments as an encrypted envelope, and serves it a local control
//! channel that only the broker and the sandbox may connect to.
//!
//! The argument codec, the wire format and the channel are portable; the
//! sandbox and the launcher exist only on Windows.

pub mod args;
pub mod comm;
pub mod config;
pub mod error;
pub mod ipc;

#[cfg(target_os = "windows")]
pub mod launcher;
#[cfg(target_os = "windows")]
pub mod sandbox;


pub use args::ArgumentBuilder;
pub use config::BrokerConfig;
pub use error::{BrokerError, OsError};
pub use ipc::{Identity, IpcChannel, MethodSet, ServiceError};

#[cfg(target_os = "windows")]
pub use launcher::{LaunchOptions, ProcessLauncher, SandboxedProcess};
#[cfg(target_os = "windows")]
pub use sandbox::{CapabilitySet, SandboxProfile, SidHandle};
