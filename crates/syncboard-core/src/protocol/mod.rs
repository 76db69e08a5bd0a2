//! Wire message framing.
//!
//! Every clipboard update travels as one frame on a plain TCP stream.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────────┬──────────┐
//! │  Magic   │ Version  │   Type   │   UID    │   Sequence   │  Length  │
//! │ 4 bytes  │ 2 bytes  │  1 byte  │ 4 bytes  │   8 bytes    │ 4 bytes  │
//! ├──────────┴──────────┴──────────┴──────────┴──────────────┴──────────┤
//! │                        Payload (variable length)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x53 0x59 0x4E 0x42` ("SYNB")
//! - Version: `0x01 0x00` (1.0)
//! - Type: clipboard data type byte
//! - UID: sender's generation identifier (big-endian)
//! - Sequence: sender's message counter (big-endian)
//! - Length: payload length in bytes (big-endian)
//!
//! UID and sequence are carried for future conflict resolution; nothing
//! reads them yet and updates apply in arrival order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Protocol magic bytes: "SYNB"
pub const MAGIC: [u8; 4] = [0x53, 0x59, 0x4E, 0x42];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 23;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Kind of data on the shared clipboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Plain text
    #[default]
    Text = 0x01,
}

impl DataType {
    /// Parse a data type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Text),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("Text"),
        }
    }
}

/// Envelope carrying one clipboard payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Clipboard bytes
    pub payload: Vec<u8>,
    /// Kind of payload
    pub data_type: DataType,
    /// Sender's generation identifier
    pub uid: u32,
    /// Sender's message counter
    pub sequence_number: u64,
}

impl WireMessage {
    /// Create a text message with zeroed uid and sequence number.
    #[must_use]
    pub fn new(payload: Vec<u8>, data_type: DataType) -> Self {
        Self {
            payload,
            data_type,
            uid: 0,
            sequence_number: 0,
        }
    }

    /// Stamp the sender's uid and sequence number.
    #[must_use]
    pub fn stamped(mut self, uid: u32, sequence_number: u64) -> Self {
        self.uid = uid;
        self.sequence_number = sequence_number;
        self
    }

    /// Serialize into one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload length does not fit
    /// in the header's length field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_length = u32::try_from(self.payload.len())
            .map_err(|_| Error::PayloadTooLarge(self.payload.len()))?;

        let header = FrameHeader {
            version: crate::PROTOCOL_VERSION,
            data_type: self.data_type,
            uid: self.uid,
            sequence_number: self.sequence_number,
            payload_length,
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

/// A protocol frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Payload data type
    pub data_type: DataType,
    /// Sender's generation identifier
    pub uid: u32,
    /// Sender's message counter
    pub sequence_number: u64,
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6] = self.data_type as u8;
        buf[7..11].copy_from_slice(&self.uid.to_be_bytes());
        buf[11..19].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[19..23].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or announces a payload
    /// larger than `max_payload`.
    pub fn decode(buf: &[u8; HEADER_SIZE], max_payload: usize) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::ProtocolError("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);
        if version.0 != crate::PROTOCOL_VERSION.0 {
            return Err(Error::ProtocolError(format!(
                "unsupported protocol version: {}.{}",
                version.0, version.1
            )));
        }

        let data_type = DataType::from_byte(buf[6])
            .ok_or_else(|| Error::ProtocolError(format!("unknown data type: {:#x}", buf[6])))?;

        let uid = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);
        let sequence_number = u64::from_be_bytes([
            buf[11], buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18],
        ]);
        let payload_length = u32::from_be_bytes([buf[19], buf[20], buf[21], buf[22]]);

        if payload_length as usize > max_payload {
            return Err(Error::PayloadTooLarge(payload_length as usize));
        }

        Ok(Self {
            version,
            data_type,
            uid,
            sequence_number,
            payload_length,
        })
    }
}

/// Take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the buffered bytes do not yet hold a whole
/// frame; the buffer is left untouched in that case. Bytes past the end of
/// the returned frame stay buffered.
///
/// # Errors
///
/// Returns an error if the buffered header is invalid. The stream cannot be
/// resynchronized after that.
pub fn decode_frame(buf: &mut Vec<u8>, max_payload: usize) -> Result<Option<WireMessage>> {
    let Some(header_bytes) = buf.get(..HEADER_SIZE) else {
        return Ok(None);
    };

    let mut header_buf = [0u8; HEADER_SIZE];
    header_buf.copy_from_slice(header_bytes);
    let header = FrameHeader::decode(&header_buf, max_payload)?;

    let frame_len = HEADER_SIZE + header.payload_length as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }

    let payload = buf[HEADER_SIZE..frame_len].to_vec();
    buf.drain(..frame_len);

    Ok(Some(WireMessage {
        payload,
        data_type: header.data_type,
        uid: header.uid,
        sequence_number: header.sequence_number,
    }))
}
