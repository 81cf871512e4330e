// SPDX-License-Identifier: MIT

//! Owned security identifiers.
//!
//! A SID either lives in a buffer this crate allocated, or was handed out by
//! the OS and must be returned with `FreeSid`.  Either way the handle owns it
//! and releases it exactly once.

use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError};
use windows::Win32::Security::{self, PSID, WELL_KNOWN_SID_TYPE};

use super::conv::from_wide_ptr;
use crate::error::{BrokerError, OsError};

enum Storage {
    /// Word-aligned buffer holding the SID bytes.
    Owned(Vec<u32>),
    /// Allocated by the OS; released with `FreeSid`.
    Os(PSID),
}

pub struct SidHandle {
    storage: Storage,
}

impl SidHandle {
    /// Create one of the fixed, machine independent SIDs.
    pub fn well_known(kind: WELL_KNOWN_SID_TYPE) -> Result<Self, BrokerError> {
        // First call reports the required size.
        let mut size: u32 = 0;
        if let Err(e) = unsafe { Security::CreateWellKnownSid(kind, None, None, &mut size) } {
            if unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
                return Err(BrokerError::Allocation(e.into()));
            }
        }
        if size == 0 {
            return Err(BrokerError::Allocation(OsError::message("zero length SID reported")));
        }

        let mut buf = vec![0u32; (size as usize).div_ceil(4)];
        unsafe { Security::CreateWellKnownSid(kind, None, Some(PSID(buf.as_mut_ptr().cast())), &mut size) }
            .map_err(|e| BrokerError::Allocation(e.into()))?;
        Ok(SidHandle { storage: Storage::Owned(buf) })
    }

    /// Copy a SID owned by someone else into a new buffer.
    ///
    /// # Safety
    ///
    /// `sid` must point at a valid SID for the duration of the call.
    pub unsafe fn copy_from(sid: PSID) -> Result<Self, BrokerError> {
        if !unsafe { Security::IsValidSid(sid) }.as_bool() {
            return Err(BrokerError::Allocation(OsError::message("invalid SID")));
        }
        let size = unsafe { Security::GetLengthSid(sid) };
        let mut buf = vec![0u32; (size as usize).div_ceil(4)];
        unsafe { Security::CopySid(size, PSID(buf.as_mut_ptr().cast()), sid) }
            .map_err(|e| BrokerError::Allocation(e.into()))?;
        Ok(SidHandle { storage: Storage::Owned(buf) })
    }

    /// Take ownership of a SID the OS allocated.
    ///
    /// # Safety
    ///
    /// `sid` must be valid and must be released with `FreeSid`; nothing else may free it.
    pub(crate) unsafe fn from_os(sid: PSID) -> Self {
        SidHandle { storage: Storage::Os(sid) }
    }

    /// Borrow the raw pointer.  Valid only while `self` is alive.
    pub fn as_psid(&self) -> PSID {
        match &self.storage {
            Storage::Owned(buf) => PSID(buf.as_ptr() as *mut _),
            Storage::Os(sid) => *sid,
        }
    }

    /// Length of the SID in bytes.
    pub fn len(&self) -> u32 {
        unsafe { Security::GetLengthSid(self.as_psid()) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `S-1-...` string form.
    pub fn to_string_sid(&self) -> Result<String, OsError> {
        // The windows crate does not expose this conversion cleanly, so use
        // the raw call.  The OS allocates the string; it is released with LocalFree.
        let mut buf_ptr: *mut u16 = std::ptr::null_mut();
        let result = unsafe { winapi::shared::sddl::ConvertSidToStringSidW(self.as_psid().0 as _, &mut buf_ptr) };
        if result == 0 {
            return Err(OsError::last());
        }
        let s = unsafe { from_wide_ptr(buf_ptr) };
        unsafe { winapi::um::winbase::LocalFree(buf_ptr as *mut _) };
        Ok(s.to_string_lossy().to_string())
    }
}

#[cfg(test)]
impl SidHandle {
    /// A buffer whose revision byte no SID can have.
    pub(crate) fn malformed() -> Self {
        SidHandle { storage: Storage::Owned(vec![0xFFFF_FFFF; 4]) }
    }
}

impl PartialEq for SidHandle {
    fn eq(&self, other: &Self) -> bool {
        unsafe { Security::EqualSid(self.as_psid(), other.as_psid()) }.is_ok()
    }
}

impl std::fmt::Debug for SidHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_string_sid() {
            Ok(s) => write!(f, "SidHandle({s})"),
            Err(_) => f.write_str("SidHandle(<invalid>)"),
        }
    }
}

impl Drop for SidHandle {
    fn drop(&mut self) {
        if let Storage::Os(sid) = self.storage {
            let _ = unsafe { Security::FreeSid(sid) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_capability_sids() {
        let sid = SidHandle::well_known(Security::WinCapabilityInternetClientSid).unwrap();
        assert_eq!(sid.to_string_sid().unwrap(), "S-1-15-3-1");
        let sid = SidHandle::well_known(Security::WinCapabilityPrivateNetworkClientServerSid).unwrap();
        assert_eq!(sid.to_string_sid().unwrap(), "S-1-15-3-3");
    }

    #[test]
    fn copy_is_equal() {
        let sid = SidHandle::well_known(Security::WinLocalSystemSid).unwrap();
        let copy = unsafe { SidHandle::copy_from(sid.as_psid()) }.unwrap();
        drop(sid);
        assert_eq!(copy.to_string_sid().unwrap(), "S-1-5-18");
        assert_eq!(copy, SidHandle::well_known(Security::WinLocalSystemSid).unwrap());
    }

    #[test]
    fn malformed_sid_is_rejected_by_copy() {
        let bad = SidHandle::malformed();
        assert!(unsafe { SidHandle::copy_from(bad.as_psid()) }.is_err());
    }
}
