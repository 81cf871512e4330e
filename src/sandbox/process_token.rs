// SPDX-License-Identifier: MIT

//! Get the current process token.
//! Because much of windows requires explicit add/remove actions,
//! wrapping it in a single struct that implements Drop will make code maintenance easier.

use windows::Win32::{
    Foundation::{CloseHandle, ERROR_INSUFFICIENT_BUFFER, GetLastError, HANDLE},
    Security,
    System::Threading,
};

use super::sid::SidHandle;
use crate::error::{BrokerError, OsError};

pub struct ProcessToken {
    token: Option<HANDLE>,
}

impl ProcessToken {
    /// Open the current process token for querying.
    pub fn current_process() -> Result<Self, OsError> {
        let mut h_process_token = HANDLE::default();
        unsafe { Threading::OpenProcessToken(Threading::GetCurrentProcess(), Security::TOKEN_QUERY, &mut h_process_token) }?;
        Ok(Self { token: Some(h_process_token) })
    }

    /// The SID of the user the token runs as, copied into a broker owned buffer.
    pub fn user_sid(&self) -> Result<SidHandle, BrokerError> {
        let Some(h) = self.token else {
            return Err(BrokerError::Allocation(OsError::message("token already closed")));
        };

        // The first call reports the buffer size needed for the TOKEN_USER record.
        let mut size: u32 = 0;
        if let Err(e) = unsafe { Security::GetTokenInformation(h, Security::TokenUser, None, 0, &mut size) } {
            if unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
                return Err(BrokerError::Allocation(e.into()));
            }
        }
        let mut buf = vec![0usize; (size as usize).div_ceil(std::mem::size_of::<usize>())];
        unsafe { Security::GetTokenInformation(h, Security::TokenUser, Some(buf.as_mut_ptr().cast()), size, &mut size) }
            .map_err(|e| BrokerError::Allocation(e.into()))?;

        // The SID points inside `buf`, so copy it out before the buffer goes away.
        let user = unsafe { &*(buf.as_ptr() as *const Security::TOKEN_USER) };
        unsafe { SidHandle::copy_from(user.User.Sid) }
    }

    pub fn close(&mut self) -> Result<(), OsError> {
        match self.token.take() {
            None => Ok(()),
            Some(h) => Ok(unsafe { CloseHandle(h) }?),
        }
    }
}

impl Drop for ProcessToken {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
