//! Typed big-endian primitives over a byte buffer.
//!
//! One `CqlBuffer` serves both directions of the protocol: `pack_*`
//! methods append to the tail while a message body is being built, and
//! `unpack_*` methods consume from the front while one is being parsed.
//! All multi-byte integers are big-endian, as the native protocol
//! requires.
//!
//! Wire primitives (protocol v1 naming):
//!
//! ```text
//! short            u16
//! int              i32
//! long             i64
//! string           short length + UTF-8 bytes
//! long string      int length + UTF-8 bytes
//! bytes            int length + bytes, length -1 encodes null
//! short bytes      short length + bytes, never null
//! string list      short count + strings
//! string map       short count + {string, string} pairs
//! string multimap  short count + {string, string list} pairs
//! inet             u8 address length + address + int port
//! ```

use crate::consistency::Consistency;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

/// A byte buffer with typed pack/unpack accessors for the protocol's
/// primitive wire types.
#[derive(Debug, Default, Clone)]
pub struct CqlBuffer {
    buf: BytesMut,
}

impl CqlBuffer {
    /// Creates an empty buffer for building a message body.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Wraps existing bytes for parsing.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
        }
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freezes the buffer into its final byte form.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn check(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < needed {
            return Err(ProtocolError::Underflow {
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fixed-width integers
    // ------------------------------------------------------------------

    pub fn pack_byte(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn unpack_byte(&mut self) -> Result<u8, ProtocolError> {
        self.check(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn pack_short(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn unpack_short(&mut self) -> Result<u16, ProtocolError> {
        self.check(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn pack_int(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn unpack_int(&mut self) -> Result<i32, ProtocolError> {
        self.check(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn pack_long(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn unpack_long(&mut self) -> Result<i64, ProtocolError> {
        self.check(8)?;
        Ok(self.buf.get_i64())
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Packs a `string`: short length prefix, then the bytes.
    pub fn pack_string(&mut self, s: &str) -> Result<(), ProtocolError> {
        if s.len() > u16::MAX as usize {
            return Err(ProtocolError::StringTooLong {
                len: s.len(),
                max: u16::MAX as usize,
            });
        }
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    pub fn unpack_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.unpack_short()? as usize;
        self.check(len)?;
        let raw = self.buf.split_to(len);
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// Packs a `long string`: int length prefix, then the bytes.
    pub fn pack_lstring(&mut self, s: &str) -> Result<(), ProtocolError> {
        if s.len() > i32::MAX as usize {
            return Err(ProtocolError::StringTooLong {
                len: s.len(),
                max: i32::MAX as usize,
            });
        }
        self.buf.put_i32(s.len() as i32);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    pub fn unpack_lstring(&mut self) -> Result<String, ProtocolError> {
        let len = self.unpack_int()?;
        if len < 0 {
            return Err(ProtocolError::NegativeCount(len));
        }
        let len = len as usize;
        self.check(len)?;
        let raw = self.buf.split_to(len);
        Ok(String::from_utf8(raw.to_vec())?)
    }

    // ------------------------------------------------------------------
    // Byte values
    // ------------------------------------------------------------------

    /// Packs a `bytes` value. `None` is the wire null marker, length -1.
    pub fn pack_bytes(&mut self, v: Option<&[u8]>) -> Result<(), ProtocolError> {
        match v {
            None => self.buf.put_i32(-1),
            Some(bytes) => {
                if bytes.len() > i32::MAX as usize {
                    return Err(ProtocolError::BytesTooLong {
                        len: bytes.len(),
                        max: i32::MAX as usize,
                    });
                }
                self.buf.put_i32(bytes.len() as i32);
                self.buf.put_slice(bytes);
            }
        }
        Ok(())
    }

    /// Unpacks a `bytes` value. Any negative length decodes as null.
    pub fn unpack_bytes(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let len = self.unpack_int()?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        self.check(len)?;
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Packs a `short bytes` value. Never null.
    pub fn pack_short_bytes(&mut self, v: &[u8]) -> Result<(), ProtocolError> {
        if v.len() > u16::MAX as usize {
            return Err(ProtocolError::BytesTooLong {
                len: v.len(),
                max: u16::MAX as usize,
            });
        }
        self.buf.put_u16(v.len() as u16);
        self.buf.put_slice(v);
        Ok(())
    }

    pub fn unpack_short_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.unpack_short()? as usize;
        self.check(len)?;
        Ok(self.buf.split_to(len).freeze())
    }

    // ------------------------------------------------------------------
    // Collections of strings
    // ------------------------------------------------------------------

    pub fn pack_string_list(&mut self, list: &[&str]) -> Result<(), ProtocolError> {
        self.buf.put_u16(list.len() as u16);
        for s in list {
            self.pack_string(s)?;
        }
        Ok(())
    }

    pub fn unpack_string_list(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.unpack_short()? as usize;
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(self.unpack_string()?);
        }
        Ok(list)
    }

    /// Packs a `string map`. Keys go out in sorted order, which is why
    /// this takes a `BTreeMap`: the emitted bytes are stable.
    pub fn pack_string_map(&mut self, map: &BTreeMap<String, String>) -> Result<(), ProtocolError> {
        self.buf.put_u16(map.len() as u16);
        for (k, v) in map {
            self.pack_string(k)?;
            self.pack_string(v)?;
        }
        Ok(())
    }

    pub fn unpack_string_map(&mut self) -> Result<HashMap<String, String>, ProtocolError> {
        let count = self.unpack_short()? as usize;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let k = self.unpack_string()?;
            let v = self.unpack_string()?;
            map.insert(k, v);
        }
        Ok(map)
    }

    pub fn pack_string_multimap(
        &mut self,
        map: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), ProtocolError> {
        self.buf.put_u16(map.len() as u16);
        for (k, vs) in map {
            self.pack_string(k)?;
            let refs: Vec<&str> = vs.iter().map(String::as_str).collect();
            self.pack_string_list(&refs)?;
        }
        Ok(())
    }

    pub fn unpack_string_multimap(
        &mut self,
    ) -> Result<HashMap<String, Vec<String>>, ProtocolError> {
        let count = self.unpack_short()? as usize;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let k = self.unpack_string()?;
            let vs = self.unpack_string_list()?;
            map.insert(k, vs);
        }
        Ok(map)
    }

    // ------------------------------------------------------------------
    // Addresses and enums
    // ------------------------------------------------------------------

    /// Packs an `inet`: one-byte address length, the address octets,
    /// then an int port.
    pub fn pack_inet(&mut self, addr: &SocketAddr) {
        match addr.ip() {
            IpAddr::V4(ip) => {
                self.buf.put_u8(4);
                self.buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                self.buf.put_u8(16);
                self.buf.put_slice(&ip.octets());
            }
        }
        self.buf.put_i32(addr.port() as i32);
    }

    pub fn unpack_inet(&mut self) -> Result<SocketAddr, ProtocolError> {
        let len = self.unpack_byte()?;
        let ip = match len {
            4 => {
                self.check(4)?;
                let mut octets = [0u8; 4];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            16 => {
                self.check(16)?;
                let mut octets = [0u8; 16];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            other => return Err(ProtocolError::InvalidInetLength(other)),
        };
        let port = self.unpack_int()?;
        Ok(SocketAddr::new(ip, port as u16))
    }

    pub fn pack_consistency(&mut self, consistency: Consistency) {
        self.buf.put_u16(consistency as u16);
    }

    pub fn unpack_consistency(&mut self) -> Result<Consistency, ProtocolError> {
        Consistency::from_u16(self.unpack_short()?)
    }
}

impl From<Bytes> for CqlBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(&bytes)
    }
}
