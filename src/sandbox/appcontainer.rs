// SPDX-License-Identifier: MIT

//! Wrapper for the AppContainer profile.
//! Because much of windows requires explicit add/remove actions,
//! wrapping it in a single struct that implements Drop will make code maintenance easier.
//!
//! The profile itself is persistent OS state and is never deleted here; only
//! the SID this process holds is released.

use std::ffi::OsStr;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use windows::Win32::Foundation::ERROR_ALREADY_EXISTS;
use windows::Win32::Security::{self, Isolation};
use windows::Win32::System::{Com::CoTaskMemFree, Threading};

use super::acl::{self, FileAccess, IntegrityLevel};
use super::attribute_list::ThreadAttribute;
use super::capabilities::CapabilitySet;
use super::conv::{from_wide_ptr, to_wide_os};
use super::sid::SidHandle;
use crate::error::{BrokerError, OsError};

pub struct SandboxProfile {
    name: String,
    sid: SidHandle,
}

impl SandboxProfile {
    /// Create the named container profile, or resolve it if it already exists.
    ///
    /// An existing profile is reused as is; its display name and description
    /// are not compared or updated.
    pub fn get_or_create(name: &str, display_name: &str, description: &str) -> Result<Self, BrokerError> {
        let w_name = to_wide_os(OsStr::new(name));
        let w_display = to_wide_os(OsStr::new(display_name));
        let w_description = to_wide_os(OsStr::new(description));
        let created = unsafe {
            Isolation::CreateAppContainerProfile(
                windows::core::PCWSTR(w_name.as_ptr()),        // identifies the container profile
                windows::core::PCWSTR(w_display.as_ptr()),     // human-readable
                windows::core::PCWSTR(w_description.as_ptr()),
                None, // capabilities are chosen per launch
            )
        };
        let sid = match created {
            Ok(sid) => {
                info!(name, "created sandbox profile");
                sid
            }
            Err(e) if e.code() == ERROR_ALREADY_EXISTS.into() => {
                debug!(name, "sandbox profile exists; deriving its SID");
                unsafe { Isolation::DeriveAppContainerSidFromAppContainerName(windows::core::PCWSTR(w_name.as_ptr())) }
                    .map_err(|e| BrokerError::SandboxCreation(e.into()))?
            }
            Err(e) => return Err(BrokerError::SandboxCreation(e.into())),
        };
        Ok(SandboxProfile {
            name: name.to_string(),
            // Both calls hand back a SID that must be released with FreeSid.
            sid: unsafe { SidHandle::from_os(sid) },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sid(&self) -> &SidHandle {
        &self.sid
    }

    /// The container's private storage folder.
    pub fn folder_path(&self) -> Result<PathBuf, BrokerError> {
        let sid = self.sid.to_string_sid().map_err(BrokerError::SandboxCreation)?;
        let w_sid = to_wide_os(OsStr::new(&sid));
        let path = unsafe { Isolation::GetAppContainerFolderPath(windows::core::PCWSTR(w_sid.as_ptr())) }
            .map_err(|e| BrokerError::SandboxCreation(e.into()))?;
        if path.is_null() {
            return Err(BrokerError::SandboxCreation(OsError::message("no folder path returned")));
        }
        let ret = unsafe { from_wide_ptr(path.0) };
        unsafe { CoTaskMemFree(Some(path.0 as *const _)) };
        Ok(PathBuf::from(ret))
    }

    /// Allow the container `access` on `path` and everything below it.
    pub fn grant_file_access(&self, path: &Path, access: FileAccess) -> Result<(), BrokerError> {
        acl::grant_access(path, &self.sid, access)
    }

    /// Deny the container `access` on `path` and everything below it.
    pub fn deny_file_access(&self, path: &Path, access: FileAccess) -> Result<(), BrokerError> {
        acl::deny_access(path, &self.sid, access)
    }

    /// Label `path` with a mandatory integrity level.  Not specific to this
    /// container, but sandboxed processes run at low integrity, so the label
    /// decides whether they may write.
    pub fn set_integrity_level(&self, path: &Path, level: IntegrityLevel) -> Result<(), BrokerError> {
        acl::set_integrity_level(path, level)
    }

    /// The security capabilities attribute that starts a process inside this container.
    pub fn security_capabilities<'a>(&'a self, capabilities: &'a CapabilitySet) -> SecurityCapabilities<'a> {
        SecurityCapabilities::new(&self.sid, capabilities)
    }
}

/// `SECURITY_CAPABILITIES` borrowing its container SID and capability entries.
pub struct SecurityCapabilities<'a> {
    raw: Security::SECURITY_CAPABILITIES,
    _borrowed: PhantomData<&'a CapabilitySet>,
}

impl<'a> SecurityCapabilities<'a> {
    pub fn new(container: &'a SidHandle, capabilities: &'a CapabilitySet) -> Self {
        let entries = capabilities.entries();
        SecurityCapabilities {
            raw: Security::SECURITY_CAPABILITIES {
                AppContainerSid: container.as_psid(),
                // The OS only reads through this pointer.
                Capabilities: entries.as_ptr() as *mut _,
                CapabilityCount: entries.len() as u32,
                Reserved: 0,
            },
            _borrowed: PhantomData,
        }
    }
}

impl ThreadAttribute for SecurityCapabilities<'_> {
    fn attribute(&self) -> usize {
        Threading::PROC_THREAD_ATTRIBUTE_SECURITY_CAPABILITIES as usize
    }

    fn lp_value(&self) -> *const core::ffi::c_void {
        (&self.raw as *const Security::SECURITY_CAPABILITIES).cast()
    }

    fn cb_size(&self) -> usize {
        std::mem::size_of::<Security::SECURITY_CAPABILITIES>()
    }
}
