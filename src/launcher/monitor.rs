// SPDX-License-Identifier: MIT

use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;
use windows::Win32::{
    Foundation::{CloseHandle, HANDLE, STILL_ACTIVE, WAIT_OBJECT_0, WAIT_TIMEOUT},
    System::Threading::{self, GetExitCodeProcess, INFINITE, PROCESS_INFORMATION},
};

use crate::error::{BrokerError, OsError};

/// A process started inside the sandbox.
///
/// Dropping it closes the process and thread handles; the process keeps running.
pub struct SandboxedProcess {
    process: HANDLE,
    thread: HANDLE,
    pid: u32,
    exit_code: Mutex<Option<u32>>,
}

// Process and thread handles may be used from any thread.
unsafe impl Send for SandboxedProcess {}
unsafe impl Sync for SandboxedProcess {}

impl SandboxedProcess {
    pub(crate) fn new(info: PROCESS_INFORMATION) -> Self {
        SandboxedProcess {
            process: info.hProcess,
            thread: info.hThread,
            pid: info.dwProcessId,
            exit_code: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Let a suspended process start running.
    pub fn resume(&self) -> Result<(), BrokerError> {
        let previous = unsafe { Threading::ResumeThread(self.thread) };
        if previous == u32::MAX {
            return Err(BrokerError::Launch(OsError::last()));
        }
        debug!(pid = self.pid, previous, "resumed main thread");
        Ok(())
    }

    /// Get the exit code for the process, or None if it hasn't exited yet.
    pub fn exit_code(&self) -> Result<Option<u32>, BrokerError> {
        let mut guard = self
            .exit_code
            .lock()
            .map_err(|_| BrokerError::launch_message("exit code lock poisoned"))?;
        if guard.is_none() {
            let mut code = 0u32;
            unsafe { GetExitCodeProcess(self.process, &mut code) }.map_err(|e| BrokerError::Launch(e.into()))?;
            if code != STILL_ACTIVE.0 as u32 {
                *guard = Some(code);
            }
        }
        Ok(*guard)
    }

    /// Wait for the process to exit.  Returns None if the timeout passed first.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Option<u32>, BrokerError> {
        let millis = match timeout {
            None => INFINITE,
            Some(t) => u32::try_from(t.as_millis()).unwrap_or(INFINITE - 1),
        };
        let event = unsafe { Threading::WaitForSingleObject(self.process, millis) };
        if event == WAIT_OBJECT_0 {
            self.exit_code()
        } else if event == WAIT_TIMEOUT {
            Ok(None)
        } else {
            Err(BrokerError::Launch(OsError::last()))
        }
    }

    /// Force the process to exit with `exit_code`.
    pub fn terminate(&self, exit_code: u32) -> Result<(), BrokerError> {
        unsafe { Threading::TerminateProcess(self.process, exit_code) }.map_err(|e| BrokerError::Launch(e.into()))
    }
}

impl Drop for SandboxedProcess {
    fn drop(&mut self) {
        // Note: ignoring errors inside the drop.
        unsafe {
            if !self.thread.is_invalid() {
                let _ = CloseHandle(self.thread);
            }
            if !self.process.is_invalid() {
                let _ = CloseHandle(self.process);
            }
        }
    }
}
