//! Binary frame format for protocol v1.
//!
//! Frame layout (8-byte header + body):
//!
//! ```text
//! +---------+--------+-----------+--------+-------------+
//! | version | flags  | stream id | opcode | body length |
//! | 1 byte  | 1 byte |  1 byte   | 1 byte |   4 bytes   |
//! +---------+--------+-----------+--------+-------------+
//! | body (body length bytes)                            |
//! +-----------------------------------------------------+
//! ```
//!
//! The version byte is 0x01 for requests and 0x81 for responses; any
//! other value is a protocol violation. The stream id is a signed byte:
//! clients allocate 1..=127, 0 is reserved for unsolicited server
//! messages and -1 (0xFF) for server events.

use crate::error::ProtocolError;
use crate::opcode::Opcode;
use crate::{REQUEST_VERSION, RESPONSE_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum body length this implementation will accept (256 MiB).
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Flag bit reserved for compressed bodies. Never set by this
/// implementation; compression is not negotiated.
pub const FLAG_COMPRESSION: u8 = 0x01;

/// A parsed protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Protocol version byte, direction included.
    pub version: u8,
    /// Header flags.
    pub flags: u8,
    /// Stream id correlating requests with responses.
    pub stream: i8,
    /// Message kind.
    pub opcode: Opcode,
    /// Frame body.
    pub body: Bytes,
}

impl Frame {
    /// Creates a request frame on the given stream.
    pub fn request(stream: i8, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: REQUEST_VERSION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }

    /// Encodes the frame into header + body bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.body.len(),
                max: MAX_BODY_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_i8(self.stream);
        buf.put_u8(self.opcode as u8);
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes one frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if fewer than header + body-length bytes are buffered,
    /// or `Err` on protocol violations. Nothing is consumed until a
    /// whole message is available.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming
        let version = buf[0];
        if version != REQUEST_VERSION && version != RESPONSE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let flags = buf[1];
        let stream = buf[2] as i8;
        let opcode = Opcode::from_u8(buf[3])?;
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        if length > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_BODY_SIZE,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(length).freeze();

        Ok(Some(Self {
            version,
            flags,
            stream,
            opcode,
            body,
        }))
    }

    pub fn is_request(&self) -> bool {
        self.version == REQUEST_VERSION
    }

    pub fn is_response(&self) -> bool {
        self.version == RESPONSE_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let body = Bytes::from_static(b"body bytes");
        let frame = Frame::request(5, Opcode::Query, body.clone());

        let mut encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&mut encoded).unwrap().unwrap();

        assert_eq!(decoded.version, REQUEST_VERSION);
        assert_eq!(decoded.flags, 0);
        assert_eq!(decoded.stream, 5);
        assert_eq!(decoded.opcode, Opcode::Query);
        assert_eq!(decoded.body, body);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_startup_wire_form() {
        // STARTUP with CQL_VERSION=3.0.0 on stream 1
        let mut body = crate::CqlBuffer::new();
        let mut options = std::collections::BTreeMap::new();
        options.insert("CQL_VERSION".to_string(), "3.0.0".to_string());
        body.pack_string_map(&options).unwrap();

        let frame = Frame::request(1, Opcode::Startup, body.into_bytes());
        let encoded = frame.encode().unwrap();

        let expected: &[u8] = &[
            0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x16, 0x00, 0x01, 0x00, 0x0b, 0x43, 0x51,
            0x4c, 0x5f, 0x56, 0x45, 0x52, 0x53, 0x49, 0x4f, 0x4e, 0x00, 0x05, 0x33, 0x2e, 0x30,
            0x2e, 0x30,
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn test_ready_wire_form() {
        let mut buf = BytesMut::from(&[0x81, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00][..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();

        assert!(frame.is_response());
        assert_eq!(frame.stream, 1);
        assert_eq!(frame.opcode, Opcode::Ready);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_incomplete_header() {
        let mut buf = BytesMut::from(&[0x81, 0x00, 0x01][..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_incomplete_body() {
        let mut buf = BytesMut::from(&[0x81, 0x00, 0x01, 0x08, 0x00, 0x00, 0x00, 0x04, 0xAA][..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_bad_version() {
        let mut buf = BytesMut::from(&[0x82, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::UnsupportedVersion(0x82))
        ));
    }

    #[test]
    fn test_event_stream_id() {
        let mut buf = BytesMut::from(&[0x81, 0x00, 0xFF, 0x0C, 0x00, 0x00, 0x00, 0x00][..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.stream, -1);
        assert_eq!(frame.opcode, Opcode::Event);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let first = Frame::request(1, Opcode::Options, Bytes::new());
        let second = Frame::request(2, Opcode::Options, Bytes::new());

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.encode().unwrap());
        buf.extend_from_slice(&second.encode().unwrap());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().stream, 1);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().stream, 2);
        assert!(buf.is_empty());
    }
}
