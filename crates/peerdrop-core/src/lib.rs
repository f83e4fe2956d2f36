//! # Peerdrop Core Library
//!
//! `peerdrop-core` provides the core functionality for Peerdrop, a
//! serverless peer-to-peer file drop tool built on WebRTC-style data
//! channels.
//!
//! ## Features
//!
//! - **Chunked transfers**: Files are split into fixed-size binary chunks
//!   framed with a compact 12-byte header
//! - **Backpressure-aware sending**: Transmission pauses against the
//!   transport's buffered-amount watermarks, event-driven rather than polled
//! - **Order-tolerant reassembly**: Chunks may arrive out of order,
//!   duplicated, or interleaved across concurrent transfers and are
//!   reassembled exactly once per transfer
//! - **No server**: Payload bytes only ever travel between the two peers
//!
//! ## Modules
//!
//! - [`error`] - Error types
//! - [`mod@file`] - Incremental file chunk reading
//! - [`protocol`] - Wire framing and control messages
//! - [`session`] - Peer session state machine and outbound queue
//! - [`transfer`] - Chunked sender and receive-side reassembly
//! - [`transport`] - Transport seam and in-memory channel transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerdrop_core::session::Session;
//! use peerdrop_core::transfer::TransferConfig;
//!
//! let (mut session, mut events) = Session::new(transport, TransferConfig::default())?;
//! session.peer_joined();
//! session.queue_file("document.pdf");
//! session.send_queued().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod error;
pub mod file;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for file transfers (64 KiB).
///
/// Safe across data-channel implementations; larger chunks favor LAN
/// throughput but trip message-size limits on some transports.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum chunk size accepted on the wire (256 KiB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Default outbound buffer level above which sending pauses (8 MiB)
pub const DEFAULT_BUFFER_HIGH: usize = 8 * 1024 * 1024;

/// Default outbound buffer level at which sending resumes (1 MiB)
pub const DEFAULT_BUFFER_LOW: usize = 1024 * 1024;

/// Number of chunks sent between unconditional scheduler yields
pub const SEND_YIELD_BATCH: u32 = 64;

/// Default minimum interval between non-terminal progress updates
pub const DEFAULT_PROGRESS_INTERVAL: std::time::Duration =
    std::time::Duration::from_millis(16);
