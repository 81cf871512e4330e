// SPDX-License-Identifier: MIT

//! Unix domain socket transport.
//!
//! The socket file is created by `bind`, which fails if the path already
//! exists.  Each accepted peer's uid is read with `SO_PEERCRED` and checked
//! against the allowed set before the connection is handed out.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use nix::sys::socket::{getsockopt, sockopt};
use tracing::{debug, warn};

use super::Identity;
use crate::error::{BrokerError, OsError};

pub(crate) struct Listener {
    path: PathBuf,
    listener: UnixListener,
    allowed: Vec<u32>,
}

pub(crate) struct Connection {
    stream: UnixStream,
    pid: Option<u32>,
}

/// Unblocks a pending `accept`.
pub(crate) struct Waker {
    path: PathBuf,
}

/// Severs a connection from another thread.
pub(crate) struct AbortHandle {
    stream: UnixStream,
}

impl Listener {
    pub fn bind(endpoint: &str, allowed: &[Identity]) -> Result<Self, BrokerError> {
        let mut uids = vec![nix::unistd::geteuid().as_raw()];
        for id in allowed {
            match id {
                Identity::Uid(uid) => {
                    if !uids.contains(uid) {
                        uids.push(*uid);
                    }
                }
                Identity::Sid(sid) => {
                    return Err(BrokerError::Channel(OsError::message(format!(
                        "security identifier {sid} cannot restrict a unix socket"
                    ))));
                }
            }
        }

        let path = PathBuf::from(endpoint);
        let listener = UnixListener::bind(&path).map_err(|e| BrokerError::Channel(e.into()))?;
        // Only the owner may connect unless other users were allowed.
        let mode = if uids.len() == 1 { 0o600 } else { 0o666 };
        if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)) {
            let _ = std::fs::remove_file(&path);
            return Err(BrokerError::Channel(e.into()));
        }
        debug!(endpoint, ?uids, "bound unix socket");
        Ok(Listener { path, listener, allowed: uids })
    }

    /// Wait for the next permitted peer.
    ///
    /// Peers outside the allowed set are dropped without a reply.
    pub fn accept(&mut self) -> Result<Connection, std::io::Error> {
        loop {
            if let Some(conn) = self.accept_one()? {
                return Ok(conn);
            }
        }
    }

    /// Accept one peer; `None` when it was not allowed and has been dropped.
    fn accept_one(&mut self) -> Result<Option<Connection>, std::io::Error> {
        let (stream, _) = self.listener.accept()?;
        match getsockopt(&stream, sockopt::PeerCredentials) {
            Ok(creds) if self.allowed.contains(&creds.uid()) => {
                Ok(Some(Connection { stream, pid: u32::try_from(creds.pid()).ok() }))
            }
            Ok(creds) => {
                warn!(uid = creds.uid(), pid = creds.pid(), "rejected connection from unlisted user");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "could not read peer credentials; dropping connection");
                Ok(None)
            }
        }
    }

    pub fn waker(&self) -> Waker {
        Waker { path: self.path.clone() }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Waker {
    pub fn wake(&self, _accept_thread: &std::thread::JoinHandle<()>) {
        if let Err(e) = UnixStream::connect(&self.path) {
            warn!(error = %e, "could not wake the accept thread");
        }
    }
}

impl Connection {
    pub fn peer_pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn abort_handle(&self) -> Result<AbortHandle, std::io::Error> {
        Ok(AbortHandle { stream: self.stream.try_clone()? })
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Nothing to do: after `abort`, every read on the socket returns end of stream.
pub(crate) fn interrupt(_session_thread: &std::thread::JoinHandle<()>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let endpoint = path.to_str().unwrap();
        let _first = Listener::bind(endpoint, &[]).unwrap();
        assert!(matches!(Listener::bind(endpoint, &[]), Err(BrokerError::Channel(_))));
        assert!(path.exists());
    }

    #[test]
    fn bind_rejects_sid_identities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let r = Listener::bind(path.to_str().unwrap(), &[Identity::Sid("S-1-5-18".to_string())]);
        assert!(matches!(r, Err(BrokerError::Channel(_))));
        assert!(!path.exists());
    }

    #[test]
    fn owner_may_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let mut listener = Listener::bind(path.to_str().unwrap(), &[]).unwrap();
        let _client = UnixStream::connect(&path).unwrap();
        let conn = listener.accept().unwrap();
        assert_eq!(conn.peer_pid(), Some(std::process::id()));
    }

    #[test]
    fn allowed_set_always_holds_the_broker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let me = nix::unistd::geteuid().as_raw();
        let other = me.wrapping_add(4242);
        let listener = Listener::bind(path.to_str().unwrap(), &[Identity::Uid(other), Identity::Uid(me)]).unwrap();
        assert_eq!(listener.allowed, vec![me, other]);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let _owner_only = Listener::bind(path.to_str().unwrap(), &[]).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn unlisted_peer_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let me = nix::unistd::geteuid().as_raw();
        let mut listener = Listener::bind(path.to_str().unwrap(), &[]).unwrap();

        // Treat this process's own uid as a stranger.
        listener.allowed = vec![me.wrapping_add(4242)];
        let mut stranger = UnixStream::connect(&path).unwrap();
        stranger.set_read_timeout(Some(std::time::Duration::from_secs(10))).unwrap();
        assert!(listener.accept_one().unwrap().is_none());
        let mut buf = [0u8; 1];
        assert_eq!(stranger.read(&mut buf).unwrap(), 0);

        listener.allowed.push(me);
        let _friend = UnixStream::connect(&path).unwrap();
        let conn = listener.accept_one().unwrap().expect("listed peer accepted");
        assert_eq!(conn.peer_pid(), Some(std::process::id()));
    }

    #[test]
    fn drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        drop(Listener::bind(path.to_str().unwrap(), &[]).unwrap());
        assert!(!path.exists());
    }
}
