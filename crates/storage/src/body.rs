//! Streaming upload bodies.
//!
//! A [`Body`] is an owned, `'static` async byte stream handed to
//! [`ObjectStore::put`](crate::ObjectStore::put). Sources that only offer a
//! blocking [`Read`] (zip entries, libssh2 file handles) are driven on Tokio's
//! blocking pool and bridged through a bounded channel, so at most a few
//! chunks are ever held in memory and a slow upload applies backpressure to
//! the producer.

use bytes::{Bytes, BytesMut};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{self, Cursor, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// Size of each chunk sent from a blocking producer.
const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks buffered between a blocking producer and the async reader.
const CHANNEL_DEPTH: usize = 4;

type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// An owned byte stream destined for a single object.
pub struct Body {
    reader: BoxAsyncRead,
    size_hint: Option<u64>,
}

impl Body {
    /// A body backed by bytes already in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size_hint = Some(bytes.len() as u64);
        Self { reader: Box::pin(Cursor::new(bytes)), size_hint }
    }

    /// A body backed by any async reader.
    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self { reader: Box::pin(reader), size_hint: None }
    }

    /// A body produced by blocking code.
    ///
    /// `produce` runs on the blocking pool once the body is created and
    /// writes the content into the supplied writer. An error returned from
    /// `produce` is delivered to the reader as a read error *after* any
    /// bytes already written, so a failed producer can never look like a
    /// short but successful body.
    ///
    /// If the body is dropped before the producer finishes, the producer's
    /// next write fails with [`BrokenPipe`](io::ErrorKind::BrokenPipe).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_blocking<F>(produce: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            let outcome = produce(&mut writer).and_then(|()| writer.flush());
            if let Err(err) = outcome {
                // Receiver may already be gone, in which case there is nobody left to tell.
                _ = writer.tx.blocking_send(Err(err));
            }
        });
        let chunks = async_stream::stream! {
            let mut rx = rx;
            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }
        };
        Self::from_reader(StreamReader::new(Box::pin(chunks)))
    }

    /// A body read from a blocking [`Read`] implementation.
    ///
    /// Convenience wrapper over [`from_blocking`](Self::from_blocking).
    pub fn from_sync_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::from_blocking(move |writer| {
            let mut reader = reader;
            io::copy(&mut reader, writer).map(|_| ())
        })
    }

    /// Attach the expected length, if known ahead of time.
    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    /// Read the entire body into memory.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buffer = Vec::with_capacity(self.size_hint.unwrap_or(0).min(CHUNK_SIZE as u64) as usize);
        self.reader.read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

impl AsyncRead for Body {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.get_mut().reader.as_mut().poll_read(cx, buf)
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Body").field("size_hint", &self.size_hint).finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }
}

/// Blocking [`Write`] half of [`Body::from_blocking`].
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buffer: BytesMut,
}
impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx, buffer: BytesMut::with_capacity(CHUNK_SIZE) }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.buffer.reserve(CHUNK_SIZE);
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "body reader was dropped"))
    }
}
impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buffer.len();
        let n = buf.len().min(room);
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test]
    async fn test_from_bytes() {
        let body = Body::from_bytes(&b"hello"[..]);
        assert_eq!(body.size_hint(), Some(5));
        assert_eq!(body.into_bytes().await.unwrap(), &b"hello"[..]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_from_blocking_spans_many_chunks() {
        let expected: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let source = expected.clone();
        let body = Body::from_sync_reader(Cursor::new(source));
        assert_eq!(body.size_hint(), None);
        assert_eq!(body.into_bytes().await.unwrap(), expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_from_blocking_empty() {
        let body = Body::from_blocking(|_| Ok(()));
        assert!(body.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_producer_error_surfaces_after_data() {
        let body = Body::from_blocking(|writer| {
            writer.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch"))
        });
        let err = body.into_bytes().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_body_stops_producer() {
        let (done_tx, done_rx) = std_mpsc::channel();
        let body = Body::from_blocking(move |writer| {
            let chunk = [0u8; 1024];
            let result = loop {
                if let Err(e) = writer.write_all(&chunk) {
                    break e;
                }
            };
            let kind = result.kind();
            _ = done_tx.send(kind);
            Err(result)
        });
        drop(body);
        let kind = tokio::task::spawn_blocking(move || done_rx.recv()).await.unwrap().unwrap();
        assert_eq!(kind, io::ErrorKind::BrokenPipe);
    }
}
