// SPDX-License-Identifier: MIT

//! Filesystem access control edits.
//!
//! Each edit reads the current DACL, merges one explicit entry into a new
//! ACL, and writes the new ACL back with a single call.  A failure at any
//! step leaves the object's security untouched.

use std::path::Path;

use tracing::debug;
use windows::Win32::Foundation::{HLOCAL, LocalFree, WIN32_ERROR};
use windows::Win32::Security::Authorization::{
    ACCESS_MODE, DENY_ACCESS, EXPLICIT_ACCESS_W, GRANT_ACCESS, GetNamedSecurityInfoW, NO_MULTIPLE_TRUSTEE,
    SE_FILE_OBJECT, SetEntriesInAclW, SetNamedSecurityInfoW, TRUSTEE_IS_SID, TRUSTEE_IS_UNKNOWN, TRUSTEE_W,
};
use windows::Win32::Security::{
    self, ACL, ACL_REVISION, CONTAINER_INHERIT_ACE, DACL_SECURITY_INFORMATION, LABEL_SECURITY_INFORMATION,
    OBJECT_INHERIT_ACE, PSECURITY_DESCRIPTOR, SUB_CONTAINERS_AND_OBJECTS_INHERIT, SYSTEM_MANDATORY_LABEL_ACE,
};
use windows::Win32::System::SystemServices::SYSTEM_MANDATORY_LABEL_NO_WRITE_UP;

use super::conv::to_wide_os;
use super::sid::SidHandle;
use crate::error::{BrokerError, OsError};

/// File access rights, in the combinations the sandbox policy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess(u32);

impl FileAccess {
    /// Read data, attributes, extended attributes and permissions.
    pub const READ: FileAccess = FileAccess(0x0002_0089);
    /// Write and append data, attributes and extended attributes.
    pub const WRITE: FileAccess = FileAccess(0x0000_0116);
    pub const EXECUTE: FileAccess = FileAccess(0x0000_0020);
    pub const READ_EXECUTE: FileAccess = Self::READ.union(Self::EXECUTE);
    pub const READ_WRITE_EXECUTE: FileAccess = Self::READ.union(Self::WRITE).union(Self::EXECUTE);

    /// Needed to wait on a handle; added to every allow entry, never denied.
    const SYNCHRONIZE: u32 = 0x0010_0000;

    pub const fn union(self, other: FileAccess) -> FileAccess {
        FileAccess(self.0 | other.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Mandatory integrity levels a label can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityLevel {
    Low,
    Medium,
}

impl IntegrityLevel {
    fn sid(self) -> Result<SidHandle, BrokerError> {
        SidHandle::well_known(match self {
            IntegrityLevel::Low => Security::WinLowLabelSid,
            IntegrityLevel::Medium => Security::WinMediumLabelSid,
        })
    }
}

/// Memory the OS allocated with `LocalAlloc`.
struct LocalGuard(*mut core::ffi::c_void);

impl Drop for LocalGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            let _ = unsafe { LocalFree(Some(HLOCAL(self.0))) };
        }
    }
}

fn check(path: &Path, status: WIN32_ERROR) -> Result<(), BrokerError> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(BrokerError::acl(path.display(), OsError::from(status)))
    }
}

/// Allow `sid` the given access, inherited by everything below `path`.
pub fn grant_access(path: &Path, sid: &SidHandle, access: FileAccess) -> Result<(), BrokerError> {
    merge_entry(path, sid, access.bits() | FileAccess::SYNCHRONIZE, GRANT_ACCESS)
}

/// Deny `sid` the given access, inherited by everything below `path`.
pub fn deny_access(path: &Path, sid: &SidHandle, access: FileAccess) -> Result<(), BrokerError> {
    merge_entry(path, sid, access.bits(), DENY_ACCESS)
}

fn merge_entry(path: &Path, sid: &SidHandle, mask: u32, mode: ACCESS_MODE) -> Result<(), BrokerError> {
    let wide_path = to_wide_os(path.as_os_str());
    let pcwstr_path = windows::core::PCWSTR(wide_path.as_ptr());

    // 1. Read the existing DACL.  It points into the descriptor.
    let mut old_acl: *mut ACL = std::ptr::null_mut();
    let mut descriptor = PSECURITY_DESCRIPTOR::default();
    let status = unsafe {
        GetNamedSecurityInfoW(
            pcwstr_path,
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION,
            None,
            None,
            Some(&raw mut old_acl),
            None,
            &mut descriptor,
        )
    };
    let _descriptor = LocalGuard(descriptor.0);
    check(path, status)?;

    // 2. Merge the new entry into a fresh ACL.
    let entry = EXPLICIT_ACCESS_W {
        grfAccessPermissions: mask,
        grfAccessMode: mode,
        grfInheritance: SUB_CONTAINERS_AND_OBJECTS_INHERIT,
        Trustee: TRUSTEE_W {
            pMultipleTrustee: std::ptr::null_mut(),
            MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
            TrusteeForm: TRUSTEE_IS_SID,
            TrusteeType: TRUSTEE_IS_UNKNOWN,
            ptstrName: windows::core::PWSTR(sid.as_psid().0.cast()),
        },
    };
    let mut new_acl: *mut ACL = std::ptr::null_mut();
    let status = unsafe { SetEntriesInAclW(Some(&[entry]), Some(old_acl as *const ACL), &mut new_acl) };
    let _new_acl = LocalGuard(new_acl.cast());
    check(path, status)?;

    // 3. Write it back in one call.
    let status = unsafe {
        SetNamedSecurityInfoW(pcwstr_path, SE_FILE_OBJECT, DACL_SECURITY_INFORMATION, None, None, Some(new_acl as *const ACL), None)
    };
    check(path, status)?;
    debug!(path = %path.display(), mask = format_args!("{mask:#x}"), ?mode, "merged access entry");
    Ok(())
}

/// Replace the mandatory label on `path` with a no-write-up label at `level`,
/// inherited by files and sub-directories.
pub fn set_integrity_level(path: &Path, level: IntegrityLevel) -> Result<(), BrokerError> {
    let label = level.sid()?;

    let acl_size = std::mem::size_of::<ACL>() + std::mem::size_of::<SYSTEM_MANDATORY_LABEL_ACE>()
        - std::mem::size_of::<u32>()
        + label.len() as usize;
    let mut buf = vec![0u32; acl_size.div_ceil(4)];
    let acl: *mut ACL = buf.as_mut_ptr().cast();
    unsafe {
        Security::InitializeAcl(acl, (buf.len() * 4) as u32, ACL_REVISION)
            .map_err(|e| BrokerError::acl(path.display(), e))?;
        Security::AddMandatoryAce(
            acl,
            ACL_REVISION,
            OBJECT_INHERIT_ACE | CONTAINER_INHERIT_ACE,
            SYSTEM_MANDATORY_LABEL_NO_WRITE_UP,
            label.as_psid(),
        )
        .map_err(|e| BrokerError::acl(path.display(), e))?;
    }

    let wide_path = to_wide_os(path.as_os_str());
    let status = unsafe {
        SetNamedSecurityInfoW(
            windows::core::PCWSTR(wide_path.as_ptr()),
            SE_FILE_OBJECT,
            LABEL_SECURITY_INFORMATION,
            None,
            None,
            None,
            Some(acl as *const ACL),
        )
    };
    check(path, status)?;
    debug!(path = %path.display(), ?level, "set integrity label");
    Ok(())
}
