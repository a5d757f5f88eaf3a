//! Raw TCP framing
//!
//! # Frames (server → client)
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JPEG image or JSON status│
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! # Commands (client → server)
//!
//! Single bytes, interleaved with the frame stream on a best-effort basis:
//!
//! | Byte | Meaning | Reply |
//! |------|---------|-------|
//! | `0x00` | Ping | `0x00` |
//! | `0x01` | Status request | length-prefixed JSON status |
//!
//! Any other byte is ignored.

use std::io::{self, Read, Write};

pub const CMD_PING: u8 = 0x00;
pub const CMD_STATUS: u8 = 0x01;

/// Largest payload a reader accepts
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Write one length-prefixed payload
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one length-prefixed payload
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_length_prefix_is_big_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, &[0xAB; 258]).unwrap();
        assert_eq!(&out[..4], &[0, 0, 1, 2]);
        assert_eq!(out.len(), 262);
        assert_eq!(read_frame(&mut Cursor::new(out)).unwrap(), vec![0xAB; 258]);
    }

    #[test]
    fn test_oversized_and_truncated_frames() {
        let huge = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        let err = read_frame(&mut Cursor::new(huge.to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let short = vec![0, 0, 0, 5, 1, 2];
        let err = read_frame(&mut Cursor::new(short)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
