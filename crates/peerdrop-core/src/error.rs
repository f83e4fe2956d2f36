//! Error types for Peerdrop.
//!
//! This module provides a unified error type for all Peerdrop operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Peerdrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Peerdrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Transfer id is empty, too long, or contains invalid bytes
    #[error("invalid transfer id: {0}")]
    InvalidTransferId(String),

    /// Binary frame is shorter than the fixed header
    #[error("frame too short: {0} bytes, need at least {min}", min = crate::protocol::FRAME_HEADER_LEN)]
    FrameTooShort(usize),

    /// Chunk payload exceeds the maximum accepted on the wire
    #[error("chunk payload too large: {len} bytes, maximum {max}")]
    PayloadTooLarge {
        /// Payload length in the offending frame
        len: usize,
        /// Maximum accepted payload length
        max: usize,
    },

    /// File needs more chunks than a u32 index can address
    #[error("file too large: {size} bytes cannot be addressed with {chunk_size}-byte chunks")]
    FileTooLarge {
        /// File size in bytes
        size: u64,
        /// Chunk size in use
        chunk_size: usize,
    },

    /// File shrank between being measured and being read
    #[error("file truncated mid-transfer: expected {expected} bytes, got {actual}")]
    FileTruncated {
        /// Size the transfer was announced with
        expected: u64,
        /// Bytes actually readable
        actual: u64,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidConfig {
        /// Configuration field
        field: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// The transport's peer end has gone away
    #[error("transport channel closed")]
    ChannelClosed,

    /// No peer is connected
    #[error("no peer connected")]
    NotConnected,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns whether this error is recoverable by retrying the transfer
    /// from scratch with a fresh transfer id.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::FileTruncated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let io = Error::Io(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert!(io.is_recoverable());

        let truncated = Error::FileTruncated {
            expected: 100,
            actual: 64,
        };
        assert!(truncated.is_recoverable());

        assert!(!Error::ChannelClosed.is_recoverable());
        assert!(!Error::NotConnected.is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::PayloadTooLarge {
            len: 300 * 1024,
            max: 256 * 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("307200"));
        assert!(msg.contains("262144"));
    }
}
