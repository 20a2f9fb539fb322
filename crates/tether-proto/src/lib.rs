//! # tether-proto
//!
//! Wire protocol shared by the TetherFS client and server: a compact frame
//! header, bincode-encoded operation messages, and frame I/O helpers in both
//! blocking (`frame_sync`) and tokio (`frame_async`) flavors.

use serde::{Deserialize, Serialize};

mod message;

pub use message::{Attributes, RemoteError, Request, Response};

/// Protocol version - bump when making breaking changes
/// v1: Initial protocol (current)
pub const PROTOCOL_VERSION: u32 = 1;

/// Default server port when none is configured.
pub const DEFAULT_PORT: u16 = 50051;

/// Magic number for wire frames: "TF" (TetherFs)
pub const FRAME_MAGIC: [u8; 2] = *b"TF";

/// Frame types (stored in high 4 bits of type_ver byte)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Request from client to server
    Request = 0,
    /// Response from server to client
    Response = 1,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Request),
            1 => Ok(FrameType::Response),
            _ => Err(()),
        }
    }
}

/// Frame header (12 bytes)
///
/// Wire format:
/// ```text
/// ┌──────────┬────────────┬─────────┬───────────┬───────────┐
/// │Magic (2B)│Type+Ver(1B)│Flags(1B)│Length (4B)│ SeqID (4B)│
/// │  "TF"    │ hi4=type   │reserved │ LE u32    │ LE u32    │
/// │          │ lo4=version│         │           │           │
/// └──────────┴────────────┴─────────┴───────────┴───────────┘
/// ```
///
/// Length is 32 bits because a single buffered WRITE carries the kernel's
/// full write payload (up to 128 KiB plus envelope).
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Magic number: "TF"
    pub magic: [u8; 2],
    /// Type (high 4 bits) + protocol version (low 4 bits)
    pub type_ver: u8,
    /// Flags (reserved)
    pub flags: u8,
    /// Payload length in bytes
    pub length: u32,
    /// Sequence ID for request-response matching
    pub seq_id: u32,
}

impl FrameHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 12;

    /// Maximum accepted payload length (guards the pre-allocation on read)
    pub const MAX_LENGTH: usize = 16 * 1024 * 1024;

    pub fn new(frame_type: FrameType, length: u32, seq_id: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            type_ver: ((frame_type as u8) << 4) | (PROTOCOL_VERSION as u8 & 0x0F),
            flags: 0,
            length,
            seq_id,
        }
    }

    pub fn new_request(length: u32, seq_id: u32) -> Self {
        Self::new(FrameType::Request, length, seq_id)
    }

    pub fn new_response(length: u32, seq_id: u32) -> Self {
        Self::new(FrameType::Response, length, seq_id)
    }

    /// Validate the header magic
    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_MAGIC
    }

    /// Get frame type from high 4 bits
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::try_from(self.type_ver >> 4).ok()
    }

    /// Get protocol version from low 4 bits
    pub fn version(&self) -> u8 {
        self.type_ver & 0x0F
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.magic);
        bytes[2] = self.type_ver;
        bytes[3] = self.flags;
        bytes[4..8].copy_from_slice(&self.length.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.seq_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1]],
            type_ver: bytes[2],
            flags: bytes[3],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            seq_id: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

use std::sync::atomic::{AtomicU32, Ordering};

/// Global sequence ID counter for request-response matching
static NEXT_SEQ_ID: AtomicU32 = AtomicU32::new(1);

/// Get next sequence ID (thread-safe, wraps at u32::MAX)
pub fn next_seq_id() -> u32 {
    NEXT_SEQ_ID.fetch_add(1, Ordering::Relaxed)
}

fn encode<T: Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    let payload = bincode::serialize(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if payload.len() > FrameHeader::MAX_LENGTH {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "payload too large: {} > {}",
                payload.len(),
                FrameHeader::MAX_LENGTH
            ),
        ));
    }
    Ok(payload)
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> std::io::Result<T> {
    bincode::deserialize(payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

fn check_header(header: &FrameHeader) -> std::io::Result<()> {
    if !header.is_valid() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid frame magic",
        ));
    }
    if header.length as usize > FrameHeader::MAX_LENGTH {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame length exceeds limit",
        ));
    }
    Ok(())
}

/// Blocking frame I/O (used by the client from kernel upcall threads)
pub mod frame_sync {
    use super::*;
    use std::io::{Read, Write};

    /// Send a request frame (header + bincode payload)
    pub fn send_request<W: Write>(writer: &mut W, request: &Request) -> std::io::Result<u32> {
        let payload = encode(request)?;
        let seq_id = next_seq_id();
        let header = FrameHeader::new_request(payload.len() as u32, seq_id);

        writer.write_all(&header.to_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;

        Ok(seq_id)
    }

    /// Send a response frame
    pub fn send_response<W: Write>(
        writer: &mut W,
        response: &Response,
        seq_id: u32,
    ) -> std::io::Result<()> {
        let payload = encode(response)?;
        let header = FrameHeader::new_response(payload.len() as u32, seq_id);

        writer.write_all(&header.to_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;

        Ok(())
    }

    /// Read a frame header
    pub fn read_header<R: Read>(reader: &mut R) -> std::io::Result<FrameHeader> {
        let mut buf = [0u8; FrameHeader::SIZE];
        reader.read_exact(&mut buf)?;

        let header = FrameHeader::from_bytes(&buf);
        check_header(&header)?;
        Ok(header)
    }

    /// Read frame payload and deserialize as request
    pub fn read_request<R: Read>(reader: &mut R) -> std::io::Result<(FrameHeader, Request)> {
        let header = read_header(reader)?;

        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload)?;

        Ok((header, decode(&payload)?))
    }

    /// Read frame payload and deserialize as response
    pub fn read_response<R: Read>(reader: &mut R) -> std::io::Result<(FrameHeader, Response)> {
        let header = read_header(reader)?;

        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload)?;

        Ok((header, decode(&payload)?))
    }
}

/// Async frame I/O (used by the server under tokio)
#[cfg(feature = "tokio")]
pub mod frame_async {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Send a request frame (header + bincode payload)
    pub async fn send_request<W: AsyncWriteExt + Unpin>(
        writer: &mut W,
        request: &Request,
    ) -> std::io::Result<u32> {
        let payload = encode(request)?;
        let seq_id = next_seq_id();
        let header = FrameHeader::new_request(payload.len() as u32, seq_id);

        writer.write_all(&header.to_bytes()).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;

        Ok(seq_id)
    }

    /// Send a response frame
    pub async fn send_response<W: AsyncWriteExt + Unpin>(
        writer: &mut W,
        response: &Response,
        seq_id: u32,
    ) -> std::io::Result<()> {
        let payload = encode(response)?;
        let header = FrameHeader::new_response(payload.len() as u32, seq_id);

        writer.write_all(&header.to_bytes()).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;

        Ok(())
    }

    /// Read a frame header
    pub async fn read_header<R: AsyncReadExt + Unpin>(
        reader: &mut R,
    ) -> std::io::Result<FrameHeader> {
        let mut buf = [0u8; FrameHeader::SIZE];
        reader.read_exact(&mut buf).await?;

        let header = FrameHeader::from_bytes(&buf);
        check_header(&header)?;
        Ok(header)
    }

    /// Read frame payload and deserialize as request
    pub async fn read_request<R: AsyncReadExt + Unpin>(
        reader: &mut R,
    ) -> std::io::Result<(FrameHeader, Request)> {
        let header = read_header(reader).await?;

        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload).await?;

        Ok((header, decode(&payload)?))
    }

    /// Read frame payload and deserialize as response
    pub async fn read_response<R: AsyncReadExt + Unpin>(
        reader: &mut R,
    ) -> std::io::Result<(FrameHeader, Response)> {
        let header = read_header(reader).await?;

        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload).await?;

        Ok((header, decode(&payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_size() {
        assert_eq!(FrameHeader::SIZE, 12);
    }

    #[test]
    fn test_frame_header_roundtrip() {
        let header = FrameHeader::new_request(1234, 42);
        let bytes = header.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes);

        assert_eq!(decoded.magic, FRAME_MAGIC);
        assert_eq!(decoded.length, 1234);
        assert_eq!(decoded.seq_id, 42);
        assert_eq!(decoded.frame_type(), Some(FrameType::Request));
        assert_eq!(decoded.version(), PROTOCOL_VERSION as u8);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_frame_header_types() {
        let req = FrameHeader::new_request(100, 1);
        assert_eq!(req.frame_type(), Some(FrameType::Request));

        let resp = FrameHeader::new_response(200, 2);
        assert_eq!(resp.frame_type(), Some(FrameType::Response));
    }

    #[test]
    fn test_frame_header_invalid_magic() {
        let mut bytes = FrameHeader::new_request(100, 1).to_bytes();
        bytes[0] = b'X'; // corrupt magic
        let decoded = FrameHeader::from_bytes(&bytes);
        assert!(!decoded.is_valid());
    }

    #[test]
    fn test_frame_sync_request_roundtrip() {
        use std::io::Cursor;

        let request = Request::Write {
            path: "/f".to_string(),
            offset: 4,
            data: b"BBBB".to_vec(),
        };
        let mut buf = Vec::new();
        let seq_id = frame_sync::send_request(&mut buf, &request).unwrap();

        let mut cursor = Cursor::new(&buf);
        let (header, decoded) = frame_sync::read_request(&mut cursor).unwrap();

        assert_eq!(header.seq_id, seq_id);
        assert_eq!(header.frame_type(), Some(FrameType::Request));
        match decoded {
            Request::Write { path, offset, data } => {
                assert_eq!(path, "/f");
                assert_eq!(offset, 4);
                assert_eq!(data, b"BBBB");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_frame_sync_response_roundtrip() {
        use std::io::Cursor;

        let response = Response::Written {
            bytes_written: 4,
            write_verifier: "1718000000".to_string(),
        };
        let mut buf = Vec::new();
        frame_sync::send_response(&mut buf, &response, 7).unwrap();

        let mut cursor = Cursor::new(&buf);
        let (header, decoded) = frame_sync::read_response(&mut cursor).unwrap();

        assert_eq!(header.seq_id, 7);
        assert_eq!(header.frame_type(), Some(FrameType::Response));
        assert!(matches!(decoded, Response::Written { bytes_written: 4, .. }));
    }

    #[test]
    fn test_frame_sync_rejects_corrupt_magic() {
        use std::io::Cursor;

        let mut buf = Vec::new();
        frame_sync::send_response(&mut buf, &Response::Done, 1).unwrap();
        buf[1] = b'!';

        let mut cursor = Cursor::new(&buf);
        let err = frame_sync::read_response(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_frame_sync_rejects_oversized_length() {
        use std::io::Cursor;

        let header = FrameHeader::new_response((FrameHeader::MAX_LENGTH + 1) as u32, 1);
        let mut cursor = Cursor::new(header.to_bytes().to_vec());
        let err = frame_sync::read_header(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
