//! Read & Write utility functions.

/// Number of octets (bytes) in a u32.
pub const U32_SIZE: usize = size_of::<u32>();

/// Convert U32_SIZE octets into a u32, using big endian encoding.
#[inline]
pub fn get_be_u32(buff: &[u8; U32_SIZE]) -> u32 {
    u32::from_be_bytes(*buff)
}

/// Fill the buffer from the reader.
///
/// Returns false when the reader was already at EOF before the first byte,
/// and an `UnexpectedEof` error when it ended part way through the buffer.
pub fn read_exact_or_eof<R: std::io::Read>(
    source: &mut R,
    buff: &mut [u8],
) -> Result<bool, std::io::Error> {
    let mut filled = 0;
    while filled < buff.len() {
        match source.read(&mut buff[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Read the `count` number of bytes from the reader in chunks.
///
/// Reading in chunks keeps a bogus size from allocating the whole amount up front.
pub fn read_chunked_bytes<R: std::io::Read, const COUNT: usize>(
    source: &mut R,
    count: usize,
    buff: &mut [u8; COUNT],
) -> Result<Vec<u8>, std::io::Error> {
    let mut payload = Vec::with_capacity(std::cmp::min(count, COUNT));
    let mut count = count;
    while count > 0 {
        let read_count = std::cmp::min(COUNT, count);
        source.read_exact(&mut buff[0..read_count])?;
        payload.extend_from_slice(&buff[0..read_count]);
        count -= read_count;
    }
    Ok(payload)
}

/// Write the data to the stream in chunks.
pub fn write_chunked<W: std::io::Write, const COUNT: usize>(
    out: &mut W,
    data: &[u8],
) -> Result<(), std::io::Error> {
    for chunk in data.chunks(COUNT) {
        out.write_all(chunk)?;
    }
    Ok(())
}
