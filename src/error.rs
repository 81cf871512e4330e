// SPDX-License-Identifier: MIT

//! Common error type.
//!
//! Every failure carries the originating OS error code and message where the
//! OS produced one.  Platform specific conversions live next to the platform
//! code that needs them.

use std::fmt::Display;

/// An error code and message reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    /// Raw code; an HRESULT on Windows, an errno value elsewhere.
    pub code: i32,
    pub message: String,
}

impl OsError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        OsError { code, message: message.into() }
    }

    /// An error that did not originate from an OS call.
    pub fn message(message: impl Into<String>) -> Self {
        OsError { code: 0, message: message.into() }
    }

    /// Capture the calling thread's last OS error.
    pub fn last() -> Self {
        std::io::Error::last_os_error().into()
    }
}

impl Display for OsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code == 0 {
            f.write_str(&self.message)
        } else {
            write!(f, "{} (0x{:08X})", self.message, self.code as u32)
        }
    }
}

impl std::error::Error for OsError {}

impl From<std::io::Error> for OsError {
    fn from(e: std::io::Error) -> Self {
        OsError {
            code: e.raw_os_error().unwrap_or(0),
            message: e.to_string(),
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for OsError {
    fn from(e: windows::core::Error) -> Self {
        OsError {
            code: e.code().0,
            message: e.message(),
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::Win32::Foundation::WIN32_ERROR> for OsError {
    fn from(e: windows::Win32::Foundation::WIN32_ERROR) -> Self {
        windows::core::Error::from(e.to_hresult()).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A security identifier buffer could not be allocated or populated.
    #[error("SID allocation failed: {0}")]
    Allocation(OsError),

    /// The process attribute list could not be initialized.
    #[error("attribute list initialization failed: {0}")]
    Initialization(OsError),

    /// The OS rejected an attribute added to the attribute list.
    #[error("attribute rejected: {0}")]
    Attribute(OsError),

    /// The sandbox container could not be created or resolved.
    #[error("sandbox container creation failed: {0}")]
    SandboxCreation(OsError),

    /// Reading, merging or writing an access control list failed.
    #[error("access control update failed for {path}: {source}")]
    Acl { path: String, source: OsError },

    /// The sandboxed process could not be started.
    #[error("launch failed: {0}")]
    Launch(OsError),

    /// The IPC endpoint could not be created or used.
    #[error("channel error: {0}")]
    Channel(OsError),

    /// More entries were added to a fixed-capacity set than it was declared with.
    #[error("capacity of {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    /// An argument envelope could not be produced or parsed.
    #[error("argument codec error: {0}")]
    Codec(String),

    /// The broker configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    pub fn acl(path: impl Display, source: impl Into<OsError>) -> Self {
        BrokerError::Acl { path: path.to_string(), source: source.into() }
    }

    pub fn channel_message(reason: &str) -> Self {
        BrokerError::Channel(OsError::message(reason))
    }

    pub fn launch_message(reason: &str) -> Self {
        BrokerError::Launch(OsError::message(reason))
    }
}

impl From<which::Error> for BrokerError {
    fn from(e: which::Error) -> Self {
        BrokerError::Launch(OsError::message(format!("executable not found: {e}")))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Config(e.to_string())
    }
}

impl From<BrokerError> for std::io::Error {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Io(e) => e,
            BrokerError::Channel(e) => std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()),
            BrokerError::Codec(e) => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            BrokerError::Config(e) => std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            e => std::io::Error::other(e.to_string()),
        }
    }
}
