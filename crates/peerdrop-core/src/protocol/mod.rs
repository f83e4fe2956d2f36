//! Wire protocol for Peerdrop transfers.
//!
//! Two independently ordered message streams cross the data channel:
//!
//! - **Binary chunk frames** carrying file payload
//! - **Control messages** (JSON) carrying transfer metadata and signals
//!
//! ## Chunk Frame Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Chunk Frame                        │
//! ├──────────────┬──────────────┬───────────────────────┤
//! │  ChunkIndex  │  TransferId  │       Payload         │
//! │   4 bytes    │   8 bytes    │  (≤ chunk size)       │
//! ├──────────────┴──────────────┴───────────────────────┤
//! │  index: u32 big-endian, 0-based                     │
//! │  id: ASCII, NUL-padded to 8 bytes                   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Chunks of concurrent transfers share one binary channel; the embedded
//! transfer id routes each frame to its reassembly state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::MAX_CHUNK_SIZE;

/// Wire width of a transfer id, in bytes
pub const TRANSFER_ID_LEN: usize = 8;

/// Chunk frame header size in bytes (4-byte index + 8-byte id)
pub const FRAME_HEADER_LEN: usize = 12;

/// The character set used for generated transfer ids.
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// An opaque token identifying one transfer within a session.
///
/// Ids are 1 to 8 ASCII bytes with no NULs, so they fit the fixed 8-byte
/// NUL-padded header field. Generated ids are always 8 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransferId(String);

impl TransferId {
    /// Parse and validate a transfer id from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, longer than 8 bytes, non-ASCII,
    /// or contains NUL bytes.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::InvalidTransferId("empty id".to_string()));
        }
        if input.len() > TRANSFER_ID_LEN {
            return Err(Error::InvalidTransferId(format!(
                "id must be at most {TRANSFER_ID_LEN} bytes, got {}",
                input.len()
            )));
        }
        if !input.is_ascii() {
            return Err(Error::InvalidTransferId(format!(
                "id must be ASCII: {input:?}"
            )));
        }
        if input.bytes().any(|b| b == 0) {
            return Err(Error::InvalidTransferId("id contains NUL".to_string()));
        }
        Ok(Self(input.to_string()))
    }

    /// Generate a random 8-character transfer id.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let id: String = (0..TRANSFER_ID_LEN)
            .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
            .collect();
        Self(id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode the id into its fixed-width NUL-padded wire form.
    #[must_use]
    pub fn to_wire(&self) -> [u8; TRANSFER_ID_LEN] {
        let mut buf = [0u8; TRANSFER_ID_LEN];
        buf[..self.0.len()].copy_from_slice(self.0.as_bytes());
        buf
    }

    /// Decode an id from its fixed-width wire form, stripping trailing NULs.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoded id is empty or invalid.
    pub fn from_wire(bytes: &[u8; TRANSFER_ID_LEN]) -> Result<Self> {
        let end = bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        let id = std::str::from_utf8(&bytes[..end])
            .map_err(|_| Error::InvalidTransferId(format!("non-UTF-8 id field: {bytes:?}")))?;
        Self::parse(id)
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TransferId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TransferId> for String {
    fn from(id: TransferId) -> Self {
        id.0
    }
}

/// A decoded binary chunk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// 0-based index of this chunk within its transfer
    pub index: u32,
    /// Transfer the chunk belongs to
    pub id: TransferId,
    /// Raw chunk payload
    pub payload: Vec<u8>,
}

/// Encode a chunk frame: 4-byte big-endian index, 8-byte id, payload.
#[must_use]
pub fn encode_chunk_frame(index: u32, id: &TransferId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(&id.to_wire());
    buf.extend_from_slice(payload);
    buf
}

/// Decode a chunk frame.
///
/// # Errors
///
/// Returns an error if the frame is shorter than the header, the payload
/// exceeds [`MAX_CHUNK_SIZE`], or the id field is invalid.
pub fn decode_chunk_frame(frame: &[u8]) -> Result<ChunkFrame> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(Error::FrameTooShort(frame.len()));
    }

    let payload_len = frame.len() - FRAME_HEADER_LEN;
    if payload_len > MAX_CHUNK_SIZE {
        return Err(Error::PayloadTooLarge {
            len: payload_len,
            max: MAX_CHUNK_SIZE,
        });
    }

    let index = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);

    let mut id_bytes = [0u8; TRANSFER_ID_LEN];
    id_bytes.copy_from_slice(&frame[4..FRAME_HEADER_LEN]);
    let id = TransferId::from_wire(&id_bytes)?;

    Ok(ChunkFrame {
        index,
        id,
        payload: frame[FRAME_HEADER_LEN..].to_vec(),
    })
}

/// Metadata announcing a transfer, sent once before any chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    /// Transfer id
    pub id: TransferId,
    /// Original file name
    pub name: String,
    /// Total file size in bytes
    pub size: u64,
    /// Number of chunks the file splits into
    pub total_chunks: u32,
}

/// Control messages exchanged out-of-band from the binary chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Transfer metadata, sent by the sender before the first chunk
    Meta(TransferMeta),
    /// The sender has emitted every chunk of the transfer
    Done {
        /// Transfer id
        id: TransferId,
    },
    /// Receiver acknowledgement that a file was fully received.
    /// Informational only; completion never depends on it.
    Downloaded {
        /// Transfer id
        id: TransferId,
    },
}

/// Encode a control message to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a control message from JSON bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode_control(data: &[u8]) -> Result<ControlMessage> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Number of chunks a file of `size` bytes splits into at `chunk_size`.
///
/// # Errors
///
/// Returns an error if the chunk count would not fit a u32 index.
pub fn chunk_count(size: u64, chunk_size: usize) -> Result<u32> {
    let count = size.div_ceil(chunk_size as u64);
    u32::try_from(count).map_err(|_| Error::FileTooLarge { size, chunk_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_parse_valid() {
        let id = TransferId::parse("a7k9x2m4").expect("parse");
        assert_eq!(id.as_str(), "a7k9x2m4");

        let short = TransferId::parse("ab").expect("parse short");
        assert_eq!(short.as_str(), "ab");
    }

    #[test]
    fn test_id_parse_invalid() {
        assert!(TransferId::parse("").is_err());
        assert!(TransferId::parse("ninechars").is_err());
        assert!(TransferId::parse("abc\0def").is_err());
        assert!(TransferId::parse("über").is_err());
    }

    #[test]
    fn test_id_generate_shape() {
        for _ in 0..32 {
            let id = TransferId::generate();
            assert_eq!(id.as_str().len(), TRANSFER_ID_LEN);
            assert!(id.as_str().bytes().all(|b| ID_CHARSET.contains(&b)));
        }
    }

    #[test]
    fn test_id_wire_roundtrip_padded() {
        let id = TransferId::parse("ab3").expect("parse");
        let wire = id.to_wire();
        assert_eq!(&wire[..3], b"ab3");
        assert_eq!(&wire[3..], &[0u8; 5]);

        let decoded = TransferId::from_wire(&wire).expect("decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_id_wire_all_nul_rejected() {
        let wire = [0u8; TRANSFER_ID_LEN];
        assert!(TransferId::from_wire(&wire).is_err());
    }

    #[test]
    fn test_id_wire_interior_nul_rejected() {
        let wire = *b"ab\0cd\0\0\0";
        assert!(TransferId::from_wire(&wire).is_err());
    }

    #[test]
    fn test_chunk_frame_roundtrip() {
        let id = TransferId::parse("xfer0001").expect("parse");
        let payload = vec![1u8, 2, 3, 4, 5];
        let frame = encode_chunk_frame(42, &id, &payload);

        assert_eq!(frame.len(), FRAME_HEADER_LEN + payload.len());
        assert_eq!(&frame[0..4], &42u32.to_be_bytes());

        let decoded = decode_chunk_frame(&frame).expect("decode");
        assert_eq!(decoded.index, 42);
        assert_eq!(decoded.id, id);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_chunk_frame_empty_payload() {
        let id = TransferId::parse("abc").expect("parse");
        let frame = encode_chunk_frame(0, &id, &[]);
        let decoded = decode_chunk_frame(&frame).expect("decode");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_chunk_frame_too_short() {
        let err = decode_chunk_frame(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, Error::FrameTooShort(11)));
    }

    #[test]
    fn test_chunk_frame_payload_too_large() {
        let id = TransferId::parse("big").expect("parse");
        let payload = vec![0u8; MAX_CHUNK_SIZE + 1];
        let frame = encode_chunk_frame(0, &id, &payload);
        let err = decode_chunk_frame(&frame).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_control_meta_wire_shape() {
        let msg = ControlMessage::Meta(TransferMeta {
            id: TransferId::parse("a7k9x2m4").expect("parse"),
            name: "photo.jpg".to_string(),
            size: 123_456,
            total_chunks: 2,
        });
        let encoded = encode_control(&msg).expect("encode");
        let json: serde_json::Value = serde_json::from_slice(&encoded).expect("json");

        assert_eq!(json["type"], "meta");
        assert_eq!(json["id"], "a7k9x2m4");
        assert_eq!(json["name"], "photo.jpg");
        assert_eq!(json["size"], 123_456);
        assert_eq!(json["totalChunks"], 2);
    }

    #[test]
    fn test_control_decode_external_json() {
        let data = br#"{"type":"meta","id":"q1w2e3r4","name":"a.bin","size":10,"totalChunks":3}"#;
        let msg = decode_control(data).expect("decode");
        match msg {
            ControlMessage::Meta(meta) => {
                assert_eq!(meta.id.as_str(), "q1w2e3r4");
                assert_eq!(meta.size, 10);
                assert_eq!(meta.total_chunks, 3);
            }
            other => panic!("expected meta, got {other:?}"),
        }

        let done = decode_control(br#"{"type":"done","id":"q1w2e3r4"}"#).expect("decode done");
        assert!(matches!(done, ControlMessage::Done { .. }));
    }

    #[test]
    fn test_control_decode_invalid_id_rejected() {
        let data = br#"{"type":"done","id":"way-too-long-id"}"#;
        assert!(decode_control(data).is_err());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 1024).expect("count"), 0);
        assert_eq!(chunk_count(1, 1024).expect("count"), 1);
        assert_eq!(chunk_count(1024, 1024).expect("count"), 1);
        assert_eq!(chunk_count(1025, 1024).expect("count"), 2);
        assert_eq!(chunk_count(10, 4).expect("count"), 3);
    }

    #[test]
    fn test_chunk_count_overflow() {
        let err = chunk_count(u64::MAX, 1).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { .. }));
    }
}
