//! Length prefixed frames: a 4 byte big endian payload size, then the payload.

use super::rwutil;

const _HEADER_SIZE_START: usize = 0;
const _HEADER_SIZE_LEN: usize = rwutil::U32_SIZE;
const _HEADER_SIZE_END: usize = _HEADER_SIZE_START + _HEADER_SIZE_LEN;

/// Number of octets in the frame header.
pub const HEADER_LEN: usize = _HEADER_SIZE_END;

/// Maximum payload size the header can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Practical payload cap used when the configuration does not set one.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

const FRAME_BUFFER_SIZE: usize = 8 * 1024;

/// Reads frames, refusing any payload over the configured maximum.
///
/// An oversized frame leaves the stream positioned inside its payload, so the
/// caller must treat it as a transport failure.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    max_payload_size: usize,
}

impl FrameReader {
    pub fn new(max_payload_size: usize) -> Self {
        FrameReader { max_payload_size: std::cmp::min(max_payload_size, MAX_PAYLOAD_SIZE) }
    }

    /// Read the next frame's payload.
    ///
    /// Returns `None` when the stream closed cleanly between frames.
    pub fn read<R: std::io::Read>(&self, source: &mut R) -> Result<Option<Vec<u8>>, std::io::Error> {
        let mut header_buff = [0u8; HEADER_LEN];
        if !rwutil::read_exact_or_eof(source, &mut header_buff)? {
            return Ok(None);
        }
        let size = rwutil::get_be_u32(&header_buff) as usize;
        if size > self.max_payload_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("payload size {size} exceeded frame maximum {}", self.max_payload_size),
            ));
        }
        let mut buff = [0u8; FRAME_BUFFER_SIZE];
        rwutil::read_chunked_bytes(source, size, &mut buff).map(Some)
    }
}

/// Writes frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameWriter {}

impl FrameWriter {
    pub fn new() -> Self {
        FrameWriter {}
    }

    /// Write one frame, then flush the writer.
    pub fn write<W: std::io::Write>(&self, out: &mut W, payload: &[u8]) -> Result<(), std::io::Error> {
        let size = u32::try_from(payload.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        out.write_all(&size.to_be_bytes())?;
        rwutil::write_chunked::<W, FRAME_BUFFER_SIZE>(out, payload)?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_SIZE_FRAME: &[u8] = &[
        // Payload size: 4 bytes
        0x00, 0x00, 0x00, 0x00,
        //
        // Payload: 0 bytes
        //
        // Some extra data to ensure EOF isn't incorrectly handled.
        0x99,
    ];

    #[test]
    fn read_zero_bytes() {
        let mut src = ZERO_SIZE_FRAME;
        let data = FrameReader::new(10).read(&mut src).unwrap();
        assert_eq!(data, Some(vec![]));
        assert_eq!(src, &[0x99]);
    }

    #[test]
    fn write_zero_bytes() {
        let mut out: Vec<u8> = Vec::new();
        FrameWriter::new().write(&mut out, &[]).unwrap();
        assert_eq!(out, &ZERO_SIZE_FRAME[0..HEADER_LEN]);
    }

    #[test]
    fn frames_are_read_in_order() {
        let mut out: Vec<u8> = Vec::new();
        let w = FrameWriter::new();
        w.write(&mut out, b"first").unwrap();
        w.write(&mut out, b"second").unwrap();

        let r = FrameReader::new(100);
        let mut src = out.as_slice();
        assert_eq!(r.read(&mut src).unwrap().unwrap(), b"first");
        assert_eq!(r.read(&mut src).unwrap().unwrap(), b"second");
        assert_eq!(r.read(&mut src).unwrap(), None);
    }

    #[test]
    fn oversized_frame_rejected() {
        let data = [0x00, 0x00, 0x01, 0x00, 0xAA];
        let err = FrameReader::new(16).read(&mut &data[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_error() {
        let data = [0x00, 0x00, 0x00, 0x04, 0xAA];
        let err = FrameReader::new(16).read(&mut &data[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
