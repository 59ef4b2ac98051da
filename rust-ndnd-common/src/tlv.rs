//! TLV (Type-Length-Value) encoding and decoding utilities.
//!
//! This module provides functions for encoding and decoding NDN TLV packets,
//! plus the framing probe used by every transport to delimit blocks in a
//! byte stream or validate a datagram.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// NDN TLV packet types
pub const TLV_INTEREST: u32 = 0x05;
pub const TLV_DATA: u32 = 0x06;
pub const TLV_LP_PACKET: u32 = 0x64;
pub const TLV_NAME: u32 = 0x07;
pub const TLV_COMPONENT: u32 = 0x08;
pub const TLV_CAN_BE_PREFIX: u32 = 0x21;
pub const TLV_MUST_BE_FRESH: u32 = 0x12;
pub const TLV_NONCE: u32 = 0x0A;
pub const TLV_INTEREST_LIFETIME: u32 = 0x0C;
pub const TLV_HOP_LIMIT: u32 = 0x22;
pub const TLV_META_INFO: u32 = 0x14;
pub const TLV_CONTENT_TYPE: u32 = 0x18;
pub const TLV_FRESHNESS_PERIOD: u32 = 0x19;
pub const TLV_CONTENT: u32 = 0x15;
pub const TLV_SIGNATURE_INFO: u32 = 0x16;
pub const TLV_SIGNATURE_TYPE: u32 = 0x1B;
pub const TLV_SIGNATURE_VALUE: u32 = 0x17;

/// NDNLPv2 link-layer TLV types
pub const TLV_LP_FRAGMENT: u32 = 0x50;
pub const TLV_LP_SEQUENCE: u32 = 0x51;
pub const TLV_LP_NACK: u32 = 0x0320;
pub const TLV_LP_NACK_REASON: u32 = 0x0321;

/// Maximum size of an NDN packet.
pub const MAX_NDN_PACKET_SIZE: usize = 8800;

/// Encodes a TLV type field.
///
/// Uses the same variable-length encoding as TLV lengths.
pub fn encode_tlv_type(tlv_type: u32, buf: &mut BytesMut) {
    encode_tlv_number(tlv_type as u64, buf);
}

/// Encodes a TLV length field.
///
/// Supports variable-length encoding:
/// - If the number < 253, uses 1 byte
/// - If the number <= 65535, uses 3 bytes (253 + 2 bytes)
/// - If the number > 65535, uses 5 bytes (254 + 4 bytes)
pub fn encode_tlv_length(length: usize, buf: &mut BytesMut) {
    encode_tlv_number(length as u64, buf);
}

fn encode_tlv_number(value: u64, buf: &mut BytesMut) {
    if value < 253 {
        buf.put_u8(value as u8);
    } else if value <= 65535 {
        buf.put_u8(253);
        buf.put_u16(value as u16);
    } else {
        buf.put_u8(254);
        buf.put_u32(value as u32);
    }
}

/// Decodes a TLV type field.
///
/// TLV type 0 is reserved and rejected.
pub fn decode_tlv_type(buf: &mut impl Buf) -> Result<u32, Error> {
    let value = decode_tlv_number(buf, "TLV type")?;
    if value == 0 {
        return Err(Error::Tlv("TLV type 0 is reserved".into()));
    }
    if value > u32::MAX as u64 {
        return Err(Error::Tlv("TLV type exceeds 32 bits".into()));
    }
    Ok(value as u32)
}

/// Decodes a TLV length field.
///
/// Handles variable-length encoding as per NDN spec.
pub fn decode_tlv_length(buf: &mut impl Buf) -> Result<usize, Error> {
    Ok(decode_tlv_number(buf, "TLV length")? as usize)
}

fn decode_tlv_number(buf: &mut impl Buf, what: &str) -> Result<u64, Error> {
    if !buf.has_remaining() {
        return Err(Error::Tlv(format!("Buffer underflow when decoding {what}")));
    }

    let first_byte = buf.get_u8();

    match first_byte {
        // Small number (< 253)
        0..=252 => Ok(first_byte as u64),

        // Medium number (16 bits)
        253 => {
            if buf.remaining() < 2 {
                return Err(Error::Tlv(format!(
                    "Buffer underflow when decoding 16-bit {what}"
                )));
            }
            Ok(buf.get_u16() as u64)
        }

        // Large number (32 bits)
        254 => {
            if buf.remaining() < 4 {
                return Err(Error::Tlv(format!(
                    "Buffer underflow when decoding 32-bit {what}"
                )));
            }
            Ok(buf.get_u32() as u64)
        }

        // Very large number (64 bits) - not supported in this implementation
        255 => Err(Error::Tlv(format!("64-bit {what}s not supported"))),
    }
}

/// Returns the number of bytes needed to encode the given number.
pub fn tlv_number_size(value: u64) -> usize {
    if value < 253 {
        1
    } else if value <= 65535 {
        3
    } else {
        5
    }
}

/// A generic TLV element consisting of a type, length, and value.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement {
    pub tlv_type: u32,
    pub value: Bytes,
}

impl TlvElement {
    /// Creates a new TLV element.
    pub fn new(tlv_type: u32, value: impl Into<Bytes>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }

    /// Returns the total length of this TLV element when encoded.
    pub fn len(&self) -> usize {
        let value_len = self.value.len();
        tlv_number_size(self.tlv_type as u64) + tlv_number_size(value_len as u64) + value_len
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Encodes this TLV element into the provided buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_tlv_type(self.tlv_type, buf);
        encode_tlv_length(self.value.len(), buf);
        buf.extend_from_slice(&self.value);
    }

    /// Decodes a TLV element from the provided buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        let tlv_type = decode_tlv_type(buf)?;
        let length = decode_tlv_length(buf)?;

        if buf.remaining() < length {
            return Err(Error::Tlv(format!(
                "Buffer underflow: TLV value requires {} bytes but only {} available",
                length,
                buf.remaining()
            )));
        }

        Ok(Self {
            tlv_type,
            value: buf.copy_to_bytes(length),
        })
    }

    /// Interprets the value as a non-negative integer (NDN big-endian form).
    pub fn value_as_uint(&self) -> Result<u64, Error> {
        match self.value.len() {
            1 => Ok(self.value[0] as u64),
            2 => Ok(u16::from_be_bytes([self.value[0], self.value[1]]) as u64),
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.value);
                Ok(u32::from_be_bytes(b) as u64)
            }
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&self.value);
                Ok(u64::from_be_bytes(b))
            }
            n => Err(Error::Tlv(format!("Invalid NonNegativeInteger length {n}"))),
        }
    }

    /// Builds an element holding a non-negative integer in its shortest form.
    pub fn from_uint(tlv_type: u32, value: u64) -> Self {
        let mut buf = BytesMut::new();
        if value <= u8::MAX as u64 {
            buf.put_u8(value as u8);
        } else if value <= u16::MAX as u64 {
            buf.put_u16(value as u16);
        } else if value <= u32::MAX as u64 {
            buf.put_u32(value as u32);
        } else {
            buf.put_u64(value);
        }
        Self {
            tlv_type,
            value: buf.freeze(),
        }
    }
}

/// Outcome of probing a buffer for one top-level TLV block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A full block of `size` bytes sits at offset 0.
    Complete { tlv_type: u32, size: usize },
    /// More bytes are needed. `declared` carries the total block size when
    /// the TLV header itself was already readable.
    Incomplete { declared: Option<usize> },
    /// The buffer cannot begin a well-formed TLV block.
    Malformed,
}

/// Probes `buf` for one top-level TLV block starting at offset 0.
///
/// This never consumes bytes; stream transports use it to delimit blocks and
/// datagram transports use it to validate that a datagram holds exactly one
/// block.
pub fn peek_block(buf: &[u8]) -> FrameStatus {
    let mut cursor = buf;

    let tlv_type = match peek_tlv_number(&mut cursor) {
        Ok(Some(0)) => return FrameStatus::Malformed,
        Ok(Some(t)) if t > u32::MAX as u64 => return FrameStatus::Malformed,
        Ok(Some(t)) => t as u32,
        Ok(None) => return FrameStatus::Incomplete { declared: None },
        Err(()) => return FrameStatus::Malformed,
    };

    let length = match peek_tlv_number(&mut cursor) {
        Ok(Some(l)) => l as usize,
        Ok(None) => return FrameStatus::Incomplete { declared: None },
        Err(()) => return FrameStatus::Malformed,
    };

    let header = buf.len() - cursor.len();
    let size = header + length;
    if cursor.len() >= length {
        FrameStatus::Complete { tlv_type, size }
    } else {
        FrameStatus::Incomplete {
            declared: Some(size),
        }
    }
}

/// Reads one TLV varint without failing on truncation.
///
/// Ok(None) means the buffer ended mid-number; Err(()) means the encoding
/// can never be valid.
fn peek_tlv_number(cursor: &mut &[u8]) -> Result<Option<u64>, ()> {
    if cursor.is_empty() {
        return Ok(None);
    }
    let first = cursor[0];
    match first {
        0..=252 => {
            *cursor = &cursor[1..];
            Ok(Some(first as u64))
        }
        253 => {
            if cursor.len() < 3 {
                return Ok(None);
            }
            let v = u16::from_be_bytes([cursor[1], cursor[2]]) as u64;
            *cursor = &cursor[3..];
            Ok(Some(v))
        }
        254 => {
            if cursor.len() < 5 {
                return Ok(None);
            }
            let v = u32::from_be_bytes([cursor[1], cursor[2], cursor[3], cursor[4]]) as u64;
            *cursor = &cursor[5..];
            Ok(Some(v))
        }
        255 => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_small_length() {
        let mut buf = BytesMut::new();
        encode_tlv_length(42, &mut buf);
        assert_eq!(buf.as_ref(), &[42]);
        let mut b = buf.freeze();
        assert_eq!(decode_tlv_length(&mut b).unwrap(), 42);
    }

    #[test]
    fn encode_decode_medium_length() {
        let mut buf = BytesMut::new();
        encode_tlv_length(1000, &mut buf);
        assert_eq!(buf.len(), 3);
        let mut b = buf.freeze();
        assert_eq!(decode_tlv_length(&mut b).unwrap(), 1000);
    }

    #[test]
    fn encode_decode_wide_type() {
        let mut buf = BytesMut::new();
        encode_tlv_type(TLV_LP_NACK, &mut buf);
        assert_eq!(buf.len(), 3);
        let mut b = buf.freeze();
        assert_eq!(decode_tlv_type(&mut b).unwrap(), TLV_LP_NACK);
    }

    #[test]
    fn element_round_trip() {
        let element = TlvElement::new(TLV_CONTENT, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        element.encode(&mut buf);
        assert_eq!(buf.len(), element.len());
        let mut b = buf.freeze();
        let decoded = TlvElement::decode(&mut b).unwrap();
        assert_eq!(decoded, element);
    }

    #[test]
    fn uint_round_trip() {
        for value in [0u64, 1, 255, 256, 65535, 65536, u32::MAX as u64 + 1] {
            let element = TlvElement::from_uint(TLV_NONCE, value);
            assert_eq!(element.value_as_uint().unwrap(), value);
        }
    }

    #[test]
    fn peek_complete_block() {
        let mut buf = BytesMut::new();
        TlvElement::new(TLV_INTEREST, Bytes::from_static(b"abc")).encode(&mut buf);
        buf.extend_from_slice(b"trailing");
        assert_eq!(
            peek_block(&buf),
            FrameStatus::Complete {
                tlv_type: TLV_INTEREST,
                size: 5
            }
        );
    }

    #[test]
    fn peek_incomplete_value() {
        // Declares 10 bytes of value but only 2 are present.
        let buf = [0x05u8, 10, 1, 2];
        assert_eq!(
            peek_block(&buf),
            FrameStatus::Incomplete { declared: Some(12) }
        );
    }

    #[test]
    fn peek_incomplete_header() {
        assert_eq!(peek_block(&[]), FrameStatus::Incomplete { declared: None });
        assert_eq!(
            peek_block(&[253]),
            FrameStatus::Incomplete { declared: None }
        );
    }

    #[test]
    fn peek_malformed() {
        assert_eq!(peek_block(&[0x00, 1, 1]), FrameStatus::Malformed);
        assert_eq!(peek_block(&[255, 0, 0]), FrameStatus::Malformed);
    }
}
