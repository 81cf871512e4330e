// SPDX-License-Identifier: MIT

//! # Sandboxed Launch
//!
//! Resolves the container profile, builds the capability and attribute
//! lists, encrypts the arguments, and creates the process.  Each launch owns
//! everything it allocates; nothing is shared between launches.

pub mod launch;
pub mod monitor;

pub use launch::{LaunchOptions, ProcessLauncher, resolve_executable};
pub use monitor::SandboxedProcess;
