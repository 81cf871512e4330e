// SPDX-License-Identifier: MIT

//! One client connection: read a request frame, dispatch, write the response.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use super::registry::ServiceRegistry;
use crate::comm::frame::{FrameReader, FrameWriter};
use crate::comm::message::Request;

/// Serve requests until the peer disconnects or the transport fails.
///
/// Malformed requests and handler failures are answered with an error
/// response and the session continues.  Transport errors, including an
/// oversized frame, end the session.
pub(crate) fn serve<S: Read + Write>(id: u64, stream: &mut S, registry: &ServiceRegistry, reader: FrameReader) {
    let writer = FrameWriter::new();
    loop {
        let payload = match reader.read(stream) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(session = id, "peer closed the connection");
                return;
            }
            Err(e) => {
                warn!(session = id, error = %e, "transport error; closing session");
                return;
            }
        };

        let response = match Request::decode(&payload) {
            Ok(request) => {
                debug!(session = id, request = request.id, service = %request.service, method = %request.method, "dispatching");
                registry.dispatch(request)
            }
            Err(response) => response,
        };
        if let Some(e) = &response.error {
            warn!(session = id, request = response.id, kind = ?e.kind, message = %e.message, "request failed");
        }

        let encoded = match response.encode() {
            Ok(b) => b,
            Err(e) => {
                error!(session = id, error = %e, "could not encode response");
                return;
            }
        };
        if let Err(e) = writer.write(stream, &encoded) {
            warn!(session = id, error = %e, "transport error; closing session");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::message::{ErrorKind, Response};
    use crate::ipc::registry::MethodSet;
    use serde_json::json;

    /// Scripted input, captured output.
    struct Duplex {
        input: std::io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            FrameWriter::new().write(&mut out, p).unwrap();
        }
        out
    }

    fn responses(out: &[u8]) -> Vec<Response> {
        let reader = FrameReader::new(1024);
        let mut src = out;
        let mut ret = Vec::new();
        while let Some(p) = reader.read(&mut src).unwrap() {
            ret.push(Response::decode(&p).unwrap());
        }
        ret
    }

    fn registry() -> ServiceRegistry {
        let mut r = ServiceRegistry::new();
        r.register("echo", MethodSet::new().method("say", Ok));
        r
    }

    #[test]
    fn malformed_request_does_not_end_session() {
        let good = Request::new(2, "echo", "say", json!("hi")).encode().unwrap();
        let mut d = Duplex {
            input: std::io::Cursor::new(frames(&[b"{garbage", &good])),
            output: Vec::new(),
        };
        serve(1, &mut d, &registry(), FrameReader::new(1024));

        let got = responses(&d.output);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].error.as_ref().unwrap().kind, ErrorKind::MalformedRequest);
        assert_eq!(got[1], Response::ok(2, json!("hi")));
    }

    #[test]
    fn oversized_frame_ends_session() {
        let good = Request::new(3, "echo", "say", json!("hi")).encode().unwrap();
        let big = vec![b' '; 64];
        let mut d = Duplex {
            input: std::io::Cursor::new(frames(&[&big, &good])),
            output: Vec::new(),
        };
        serve(1, &mut d, &registry(), FrameReader::new(32));
        assert!(d.output.is_empty());
    }
}
