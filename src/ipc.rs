// SPDX-License-Identifier: MIT

//! # Restricted IPC Channel
//!
//! A local endpoint that serves registered services to a fixed set of
//! identities.  On Windows the endpoint is a named pipe whose DACL names the
//! allowed security identifiers; elsewhere it is a unix socket that checks
//! each peer's uid.
//!
//! Lifecycle: `open` creates the endpoint, `register_service` adds services,
//! `start` begins accepting, and `stop` (or drop) closes every session and
//! waits for all threads to finish.  Services cannot be added once started.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::comm::frame::{DEFAULT_MAX_PAYLOAD_SIZE, FrameReader};
use crate::error::{BrokerError, OsError};

pub mod registry;
mod session;

#[cfg(not(target_os = "windows"))]
mod socket_linux;
#[cfg(not(target_os = "windows"))]
use socket_linux::{AbortHandle, Listener, Waker, interrupt};

#[cfg(target_os = "windows")]
mod pipe_windows;
#[cfg(target_os = "windows")]
use pipe_windows::{AbortHandle, Listener, Waker, interrupt};

pub use registry::{MethodResult, MethodSet, ServiceError, ServiceRegistry};

/// Name of the service every channel registers for itself.
pub const BROKER_SERVICE: &str = "broker";

/// Someone allowed to connect to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A security identifier in its `S-1-...` string form.
    Sid(String),
    /// A user id.
    Uid(u32),
}

/// The `broker` service: liveness and version queries.
pub fn broker_service() -> MethodSet {
    MethodSet::new()
        .method("ping", |args: Value| Ok(json!({ "pong": args })))
        .method("version", |_| Ok(json!(env!("CARGO_PKG_VERSION"))))
}

pub struct IpcChannel {
    endpoint: String,
    listener: Option<Listener>,
    waker: Waker,
    registry: ServiceRegistry,
    reader: FrameReader,
    running: Option<Running>,
}

struct Running {
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

struct Shared {
    stopping: AtomicBool,
    /// Cleared when the accept loop gives up.
    accepting: AtomicBool,
    next_session: AtomicU64,
    sessions: Mutex<HashMap<u64, SessionSlot>>,
}

struct SessionSlot {
    abort: AbortHandle,
    thread: Option<JoinHandle<()>>,
}

impl IpcChannel {
    /// Create the endpoint.  Fails with a channel error if the name is taken.
    pub fn open(endpoint: &str, allowed: &[Identity]) -> Result<Self, BrokerError> {
        let listener = Listener::bind(endpoint, allowed)?;
        let waker = listener.waker();
        let mut registry = ServiceRegistry::new();
        registry.register(BROKER_SERVICE, broker_service());
        info!(endpoint, allowed = allowed.len(), "opened channel");
        Ok(IpcChannel {
            endpoint: endpoint.to_string(),
            listener: Some(listener),
            waker,
            registry,
            reader: FrameReader::new(DEFAULT_MAX_PAYLOAD_SIZE),
            running: None,
        })
    }

    /// Limit the size of request frames.  Applies to sessions started afterwards.
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.reader = FrameReader::new(max);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Started, not stopped, and still accepting clients.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.shared.accepting.load(Ordering::SeqCst))
    }

    /// Add a service.  Only allowed before `start`.
    pub fn register_service(&mut self, name: &str, methods: MethodSet) -> Result<(), BrokerError> {
        if self.listener.is_none() {
            return Err(BrokerError::channel_message("services cannot be registered after start"));
        }
        self.registry.register(name, methods);
        Ok(())
    }

    /// Begin accepting clients on a background thread.
    pub fn start(&mut self) -> Result<(), BrokerError> {
        let Some(listener) = self.listener.take() else {
            return Err(BrokerError::channel_message("channel already started"));
        };
        let registry = Arc::new(std::mem::take(&mut self.registry));
        let shared = Arc::new(Shared {
            stopping: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            next_session: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        });
        let reader = self.reader;
        let accept_shared = shared.clone();
        let accept = thread::Builder::new()
            .name("ipc-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared, registry, reader))
            .map_err(|e| BrokerError::Channel(e.into()))?;
        self.running = Some(Running { shared, accept });
        info!(endpoint = %self.endpoint, "channel started");
        Ok(())
    }

    /// Number of sessions currently connected.
    pub fn session_count(&self) -> usize {
        match &self.running {
            None => 0,
            Some(r) => r.shared.sessions.lock().map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Stop accepting, close every session, and wait for all threads.
    ///
    /// Calling it again, or on a channel that never started, does nothing.
    pub fn stop(&mut self) -> Result<(), BrokerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.shared.stopping.store(true, Ordering::SeqCst);
        self.waker.wake(&running.accept);
        let accept_result = running.accept.join();

        // Abort under the lock, join outside it; sessions take the lock to leave.
        let threads: Vec<JoinHandle<()>> = match running.shared.sessions.lock() {
            Ok(mut sessions) => sessions
                .drain()
                .filter_map(|(_, mut slot)| {
                    slot.abort.abort();
                    slot.thread.take()
                })
                .collect(),
            Err(_) => {
                error!("session table lock poisoned");
                Vec::new()
            }
        };
        for t in threads {
            while !t.is_finished() {
                interrupt(&t);
                thread::sleep(INTERRUPT_INTERVAL);
            }
            if t.join().is_err() {
                warn!("session thread panicked");
            }
        }
        info!(endpoint = %self.endpoint, "channel stopped");
        accept_result.map_err(|_| BrokerError::channel_message("accept thread panicked"))
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "channel did not stop cleanly");
        }
    }
}

/// Pause between attempts to unblock a session that is still running during `stop`.
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(10);

/// Consecutive accept failures tolerated before the loop gives up.
const MAX_ACCEPT_FAILURES: u32 = 16;

/// Wait after the first failed accept; doubles with each further failure.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(20);

const MAX_ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Paces retries after consecutive accept failures.
#[derive(Debug, Default)]
struct AcceptBackoff {
    failures: u32,
}

impl AcceptBackoff {
    fn succeeded(&mut self) {
        self.failures = 0;
    }

    /// Delay before the next attempt, or `None` once it is time to give up.
    fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_ACCEPT_FAILURES {
            return None;
        }
        let delay = ACCEPT_RETRY_DELAY.saturating_mul(1 << (self.failures - 1).min(16));
        Some(delay.min(MAX_ACCEPT_RETRY_DELAY))
    }
}

/// Sleep for `delay`, returning early once the channel is stopping.
fn pause(shared: &Shared, delay: Duration) {
    let deadline = std::time::Instant::now() + delay;
    while !shared.stopping.load(Ordering::SeqCst) {
        let now = std::time::Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(INTERRUPT_INTERVAL));
    }
}

fn accept_loop(mut listener: Listener, shared: Arc<Shared>, registry: Arc<ServiceRegistry>, reader: FrameReader) {
    let mut backoff = AcceptBackoff::default();
    loop {
        let accepted = listener.accept();
        if shared.stopping.load(Ordering::SeqCst) {
            debug!("accept loop stopping");
            return;
        }
        let conn = match accepted {
            Ok(c) => {
                backoff.succeeded();
                c
            }
            Err(e) => {
                warn!(error = %e, failures = backoff.failures + 1, "accept failed");
                match backoff.failed() {
                    Some(delay) => {
                        pause(&shared, delay);
                        continue;
                    }
                    None => {
                        error!("too many accept failures; no longer accepting clients");
                        shared.accepting.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        };
        let abort = match conn.abort_handle() {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "could not prepare connection; dropping it");
                continue;
            }
        };

        let id = shared.next_session.fetch_add(1, Ordering::SeqCst);
        debug!(session = id, pid = ?conn.peer_pid(), "client connected");

        // Hold the table lock across the spawn so the session cannot leave
        // before its slot exists.
        let mut sessions = match shared.sessions.lock() {
            Ok(s) => s,
            Err(_) => {
                error!("session table lock poisoned");
                return;
            }
        };
        let session_shared = shared.clone();
        let session_registry = registry.clone();
        let spawned = thread::Builder::new().name(format!("ipc-session-{id}")).spawn(move || {
            let mut conn = conn;
            session::serve(id, &mut conn, &session_registry, reader);
            if let Ok(mut sessions) = session_shared.sessions.lock() {
                sessions.remove(&id);
            }
            // The connection closes only after the slot and its abort handle are gone.
            drop(conn);
        });
        match spawned {
            Ok(thread) => {
                sessions.insert(id, SessionSlot { abort, thread: Some(thread) });
            }
            Err(e) => warn!(session = id, error = %OsError::from(e), "could not start session thread"),
        }
    }
}
