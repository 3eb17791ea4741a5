//! Order-invariant content digest
//!
//! Each item is hashed on its own and the 32 digest bytes are summed
//! position-wise into counters. Addition commutes, so the final digest over
//! the counters is the same regardless of the order items arrive in, which
//! makes it comparable across runs with different worker interleavings.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::model::FieldStream;

const DIGEST_LEN: usize = 32;
const READ_CHUNK: usize = 10 * 1024;

/// Collects per-item SHA-256 digests into one order-invariant digest
///
/// All methods take `&self` and may be called from several tasks at once.
pub struct HashCollector {
    totals: [AtomicU64; DIGEST_LEN],
}

impl HashCollector {
    pub fn new() -> Self {
        Self {
            totals: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Add an inline text value
    ///
    /// # Returns
    /// * `u64` - Number of bytes hashed
    pub fn add_text(&self, text: &str) -> u64 {
        self.accumulate(&Sha256::digest(text.as_bytes()));
        text.len() as u64
    }

    /// Add the remaining content of a stream
    ///
    /// Streams carry UTF-8 text, so the same text gives the same item digest
    /// whether it arrived inline or streamed.
    ///
    /// # Returns
    /// * `io::Result<u64>` - Number of bytes hashed
    pub async fn add_stream(&self, stream: &mut FieldStream) -> io::Result<u64> {
        let reader = stream
            .reader()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream is closed"))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        let mut total = 0u64;

        loop {
            let count = reader.read(&mut buffer).await?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
            total += count as u64;
        }

        self.accumulate(&hasher.finalize());
        Ok(total)
    }

    /// Hex digest over everything added so far
    pub fn digest(&self) -> String {
        let counters: String = self
            .totals
            .iter()
            .map(|t| t.load(Ordering::Relaxed).to_string())
            .collect();
        hex::encode(Sha256::digest(counters.as_bytes()))
    }

    fn accumulate(&self, digest: &[u8]) {
        for (total, &byte) in self.totals.iter().zip(digest) {
            total.fetch_add(u64::from(byte), Ordering::Relaxed);
        }
    }
}

impl Default for HashCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HashCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest())
    }
}
