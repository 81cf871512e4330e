// SPDX-License-Identifier: MIT

//! Named pipe transport.
//!
//! Every pipe instance carries a protected DACL granting access only to the
//! broker's own user and the allowed identities, plus a low mandatory label
//! so sandboxed clients can open it.  The first instance is created with
//! `FILE_FLAG_FIRST_PIPE_INSTANCE`, so a name collision fails `bind`.

use std::fs::File;
use std::io::{Read, Write};
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
use std::time::Duration;

use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_PIPE_CONNECTED, GetLastError, HANDLE, INVALID_HANDLE_VALUE, LocalFree,
};
use windows_sys::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorW;
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{FILE_FLAG_FIRST_PIPE_INSTANCE, PIPE_ACCESS_DUPLEX};
use windows_sys::Win32::System::IO::{CancelIoEx, CancelSynchronousIo};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, GetNamedPipeClientProcessId,
    PIPE_READMODE_BYTE, PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};

use super::Identity;
use crate::args::launch_quote::to_wide;
use crate::error::{BrokerError, OsError};
use crate::sandbox::process_token::ProcessToken;

const SDDL_REVISION_1: u32 = 1;
const PIPE_BUFFER_SIZE: u32 = 64 * 1024;
const WAKE_ATTEMPTS: u32 = 5;

/// Self-relative security descriptor allocated by the OS.
struct SecurityDescriptor(*mut core::ffi::c_void);

// The descriptor is immutable after creation.
unsafe impl Send for SecurityDescriptor {}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { LocalFree(self.0) };
        }
    }
}

/// An owned pipe instance handle.
struct PipeInstance(HANDLE);

unsafe impl Send for PipeInstance {}

impl PipeInstance {
    fn into_raw(self) -> HANDLE {
        let h = self.0;
        std::mem::forget(self);
        h
    }
}

impl Drop for PipeInstance {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

pub(crate) struct Listener {
    name: String,
    wide_name: Vec<u16>,
    security: SecurityDescriptor,
    pending: Option<PipeInstance>,
}

pub(crate) struct Connection {
    pipe: File,
    pid: Option<u32>,
}

pub(crate) struct Waker {
    name: String,
}

pub(crate) struct AbortHandle {
    // Raw handle value; stays valid until the owning session drops its connection,
    // which only happens after the session has left the session table.
    handle: usize,
}

/// Build the SDDL for the pipe: a protected DACL with one generic-all entry per
/// identity, and a low integrity label that allows low-IL writers.
pub(crate) fn pipe_sddl(broker_sid: &str, allowed: &[String]) -> String {
    let mut sddl = format!("D:P(A;;GA;;;{broker_sid})");
    for sid in allowed {
        if sid != broker_sid {
            sddl.push_str(&format!("(A;;GA;;;{sid})"));
        }
    }
    sddl.push_str("S:(ML;;NW;;;LW)");
    sddl
}

impl Listener {
    pub fn bind(endpoint: &str, allowed: &[Identity]) -> Result<Self, BrokerError> {
        let mut sids = Vec::with_capacity(allowed.len());
        for id in allowed {
            match id {
                Identity::Sid(sid) => sids.push(sid.clone()),
                Identity::Uid(uid) => {
                    return Err(BrokerError::Channel(OsError::message(format!(
                        "user id {uid} cannot restrict a named pipe"
                    ))));
                }
            }
        }
        let broker_sid = ProcessToken::current_process()
            .map_err(BrokerError::Channel)?
            .user_sid()?
            .to_string_sid()
            .map_err(BrokerError::Channel)?;
        let sddl = pipe_sddl(&broker_sid, &sids);
        debug!(endpoint, %sddl, "creating named pipe");

        let wide_sddl = to_wide(&sddl);
        let mut descriptor: *mut core::ffi::c_void = std::ptr::null_mut();
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide_sddl.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(BrokerError::Channel(OsError::last()));
        }

        let mut listener = Listener {
            name: endpoint.to_string(),
            wide_name: to_wide(endpoint),
            security: SecurityDescriptor(descriptor),
            pending: None,
        };
        listener.pending = Some(listener.create_instance(true).map_err(BrokerError::Channel)?);
        Ok(listener)
    }

    fn create_instance(&self, first: bool) -> Result<PipeInstance, OsError> {
        let attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: self.security.0,
            bInheritHandle: 0,
        };
        let mut open_mode = PIPE_ACCESS_DUPLEX;
        if first {
            open_mode |= FILE_FLAG_FIRST_PIPE_INSTANCE;
        }
        let h = unsafe {
            CreateNamedPipeW(
                self.wide_name.as_ptr(),
                open_mode,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
                PIPE_UNLIMITED_INSTANCES,
                PIPE_BUFFER_SIZE,
                PIPE_BUFFER_SIZE,
                0,
                &attributes,
            )
        };
        if h == INVALID_HANDLE_VALUE {
            return Err(OsError::last());
        }
        Ok(PipeInstance(h))
    }

    /// Wait for the next client.
    pub fn accept(&mut self) -> Result<Connection, std::io::Error> {
        let instance = match self.pending.take() {
            Some(i) => i,
            None => self.create_instance(false).map_err(to_io)?,
        };
        let ok = unsafe { ConnectNamedPipe(instance.0, std::ptr::null_mut()) };
        let failed = match ok {
            0 => match unsafe { GetLastError() } {
                ERROR_PIPE_CONNECTED => None,
                err => Some(err),
            },
            _ => None,
        };

        // The replacement must exist before `instance` closes, or the name
        // is briefly free for another process to claim.
        self.refill();
        if let Some(err) = failed {
            return Err(std::io::Error::from_raw_os_error(err as i32));
        }

        let mut pid = 0u32;
        let pid = if unsafe { GetNamedPipeClientProcessId(instance.0, &mut pid) } != 0 {
            Some(pid)
        } else {
            None
        };
        let pipe = unsafe { File::from_raw_handle(instance.into_raw() as RawHandle) };
        Ok(Connection { pipe, pid })
    }

    /// Keep an instance listening so clients do not see the name vanish.
    fn refill(&mut self) {
        match self.create_instance(false) {
            Ok(next) => self.pending = Some(next),
            Err(e) => warn!(error = %e, "could not pre-create the next pipe instance"),
        }
    }

    pub fn waker(&self) -> Waker {
        Waker { name: self.name.clone() }
    }
}

impl Waker {
    /// Connect to the pipe as a client so a blocked `ConnectNamedPipe` returns.
    /// Falls back to cancelling the accept thread's synchronous I/O.
    pub fn wake(&self, accept_thread: &std::thread::JoinHandle<()>) {
        for _ in 0..WAKE_ATTEMPTS {
            match std::fs::OpenOptions::new().read(true).write(true).open(&self.name) {
                Ok(_) => return,
                Err(e) => {
                    debug!(error = %e, "wake connection failed; retrying");
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        warn!("could not connect to own pipe; cancelling the pending accept");
        unsafe { CancelSynchronousIo(accept_thread.as_raw_handle() as HANDLE) };
    }
}

impl Connection {
    pub fn peer_pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn abort_handle(&self) -> Result<AbortHandle, std::io::Error> {
        Ok(AbortHandle { handle: self.pipe.as_raw_handle() as usize })
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.pipe.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pipe.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.pipe.flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.pipe.flush();
        unsafe { DisconnectNamedPipe(self.pipe.as_raw_handle() as HANDLE) };
    }
}

impl AbortHandle {
    /// Cancel whatever I/O is pending on the session's pipe.
    ///
    /// Disconnecting here could queue behind a pending synchronous read, so
    /// the session disconnects its own end once the read fails.
    pub fn abort(&self) {
        unsafe { CancelIoEx(self.handle as HANDLE, std::ptr::null()) };
    }
}

/// Cancel a blocking read on a session thread.  Repeated until the thread exits,
/// since a session between reads only blocks once it starts the next one.
pub(crate) fn interrupt(session_thread: &std::thread::JoinHandle<()>) {
    unsafe { CancelSynchronousIo(session_thread.as_raw_handle() as HANDLE) };
}

fn to_io(e: OsError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}
