//! Byte-stream handles for long-text fields
//!
//! A [`FieldStream`] is the open handle that replaces a sentinel marker once
//! the stream stage has fetched the field separately. The handle owns its
//! reader, so it can only be closed once: either explicitly via
//! [`FieldStream::close`] or implicitly when it is dropped.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Open byte stream for one long-text field of one record
pub struct FieldStream {
    artifact_id: i64,
    field: String,
    reader: Option<BoxedReader>,
}

impl FieldStream {
    /// Wrap a reader as the stream for `field` of record `artifact_id`
    pub fn new<R>(artifact_id: i64, field: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            artifact_id,
            field: field.into(),
            reader: Some(Box::new(reader)),
        }
    }

    /// Stream over an in-memory buffer
    pub fn from_bytes(artifact_id: i64, field: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(artifact_id, field, io::Cursor::new(bytes))
    }

    pub fn artifact_id(&self) -> i64 {
        self.artifact_id
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Borrow the underlying reader, if the stream is still open
    pub fn reader(&mut self) -> Option<&mut (dyn AsyncRead + Send + Unpin + 'static)> {
        self.reader.as_deref_mut()
    }

    /// Read the remaining content of the stream
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Read the remaining content of the stream as UTF-8 text
    pub async fn read_to_string(&mut self) -> io::Result<String> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await?;
        Ok(buf)
    }

    /// Close the stream, releasing the underlying connection
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) -> bool {
        match self.reader.take() {
            Some(reader) => {
                drop(reader);
                trace!(
                    artifact_id = self.artifact_id,
                    field = %self.field,
                    "closed long text stream"
                );
                true
            }
            None => false,
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream already closed")
}

impl Drop for FieldStream {
    fn drop(&mut self) {
        if self.reader.is_some() {
            debug!(
                artifact_id = self.artifact_id,
                field = %self.field,
                "FieldStream dropped without explicit close"
            );
            self.release();
        }
    }
}

impl fmt::Debug for FieldStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStream")
            .field("artifact_id", &self.artifact_id)
            .field("field", &self.field)
            .field("open", &self.is_open())
            .finish()
    }
}
