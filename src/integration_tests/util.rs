//! Utility helpers for running the tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::comm::frame::{DEFAULT_MAX_PAYLOAD_SIZE, FrameReader, FrameWriter};
use crate::comm::message::{Request, Response};

static ENDPOINT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A fresh endpoint name.  The returned guard keeps any backing directory alive.
#[cfg(not(target_os = "windows"))]
pub fn endpoint() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let n = ENDPOINT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = dir.path().join(format!("broker-{n}.sock"));
    (path.to_string_lossy().to_string(), dir)
}

/// A fresh endpoint name.  The returned guard keeps any backing directory alive.
#[cfg(target_os = "windows")]
pub fn endpoint() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let n = ENDPOINT_COUNTER.fetch_add(1, Ordering::SeqCst);
    (format!(r"\\.\pipe\sandbox-broker-test-{}-{n}", std::process::id()), dir)
}

#[cfg(not(target_os = "windows"))]
type Stream = std::os::unix::net::UnixStream;

#[cfg(target_os = "windows")]
type Stream = std::fs::File;

/// The client side of a channel.
pub struct Client {
    stream: Stream,
    reader: FrameReader,
    writer: FrameWriter,
    next_id: u64,
}

impl Client {
    #[cfg(not(target_os = "windows"))]
    pub fn connect(endpoint: &str) -> Client {
        let stream = std::os::unix::net::UnixStream::connect(endpoint).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Client::wrap(stream)
    }

    #[cfg(target_os = "windows")]
    pub fn connect(endpoint: &str) -> Client {
        // The server re-creates its pipe instance after each accept.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match std::fs::OpenOptions::new().read(true).write(true).open(endpoint) {
                Ok(f) => return Client::wrap(f),
                Err(e) if Instant::now() < deadline => {
                    eprintln!("retrying pipe open: {e}");
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => panic!("could not open {endpoint}: {e}"),
            }
        }
    }

    fn wrap(stream: Stream) -> Client {
        Client {
            stream,
            reader: FrameReader::new(DEFAULT_MAX_PAYLOAD_SIZE),
            writer: FrameWriter::new(),
            next_id: 1,
        }
    }

    /// Send a raw frame payload.
    pub fn send_raw(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write(&mut self.stream, payload)
    }

    /// Write bytes with no framing at all.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    /// Read the next response; `None` means the server closed the connection.
    pub fn receive(&mut self) -> std::io::Result<Option<Response>> {
        match self.reader.read(&mut self.stream)? {
            None => Ok(None),
            Some(payload) => Ok(Some(Response::decode(&payload).unwrap())),
        }
    }

    /// Make one call and wait for its response.
    pub fn call(&mut self, service: &str, method: &str, args: Value) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        let request = Request::new(id, service, method, args);
        self.send_raw(&request.encode().unwrap()).unwrap();
        let response = self.receive().unwrap().expect("server closed the connection");
        assert_eq!(response.id, id);
        response
    }

    /// True once the server has closed its end.
    pub fn is_closed(&mut self) -> bool {
        // A reset counts as closed too.
        !matches!(self.reader.read(&mut self.stream), Ok(Some(_)))
    }
}

/// Poll `check` until it holds or the timeout passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Run `f` on another thread and fail the test if it has not finished in time.
pub fn finishes_within<T: Send + 'static>(timeout: Duration, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).expect("operation did not finish in time")
}

#[cfg(target_os = "windows")]
const EXEC_SUFFIX: &str = ".exe";

#[cfg(not(target_os = "windows"))]
const EXEC_SUFFIX: &str = "";

/// Find the executable for the given test program.
#[allow(dead_code)]
pub fn find_exec(exec_name: &str) -> PathBuf {
    // Find the 'tests' directory off the root.
    let test_dir = std::path::Path::new("tests");
    assert!(test_dir.is_dir());

    // Build up the path one part at a time, so a missing build gets a useful message.
    let mut exec: PathBuf = test_dir.into();
    exec.push(exec_name);
    assert!(exec.is_dir(), "did not find test directory ({})?", exec.display());
    exec.push("target");
    exec.push("debug");
    assert!(
        exec.is_dir(),
        "could not find {}; did you remember to run 'cargo build' on it?",
        exec.display(),
    );
    exec.push(format!("{exec_name}{EXEC_SUFFIX}"));
    assert!(
        exec.is_file(),
        "could not find {}; did you remember to run 'cargo build' on it?",
        exec.display(),
    );
    exec.canonicalize().unwrap()
}
