//! File access for Peerdrop transfers.
//!
//! This module handles:
//! - Incremental chunk reads (a file is never materialized in memory whole)
//! - File name extraction for transfer metadata
//! - Size formatting for display
//!
//! Reading incrementally is a design requirement, not an optimization:
//! transferred files may exceed available memory, and a synchronous
//! whole-file read would stall the event loop for the duration.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Incremental reader yielding fixed-size chunks of a file.
///
/// Every chunk except the last is exactly `chunk_size` bytes long; slot
/// offsets on the receiving side depend on that, so partial reads from the
/// underlying file are looped until the chunk fills.
#[derive(Debug)]
pub struct ChunkReader {
    file: tokio::fs::File,
    size: u64,
    chunk_size: usize,
    offset: u64,
}

impl ChunkReader {
    /// Open a file for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or stat'd.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;

        Ok(Self {
            file,
            size: metadata.len(),
            chunk_size,
            offset: 0,
        })
    }

    /// Total file size in bytes, as measured at open time.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk, or `None` once the measured size is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileTruncated`] if the file hits EOF before the
    /// size measured at open time — the announced chunk count would no
    /// longer match, so the transfer must abort rather than ship a short
    /// file.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.size {
            return Ok(None);
        }

        let remaining = self.size - self.offset;
        #[allow(clippy::cast_possible_truncation)]
        let want = remaining.min(self.chunk_size as u64) as usize;

        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::FileTruncated {
                    expected: self.size,
                    actual: self.offset + filled as u64,
                });
            }
            filled += n;
        }

        self.offset += want as u64;
        Ok(Some(buf))
    }
}

/// Extract a display file name from a path.
#[must_use]
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
