//! I/O seams between the index and the installer.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncWrite};

/// A random-access byte store backing one target file.
///
/// The installer owns one store per target and serializes writes to it;
/// part verification reads through the same handle. Files are the usual
/// implementation, but any seekable in-memory store works (tests use
/// `std::io::Cursor<Vec<u8>>`).
pub trait TargetStore: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin + ?Sized> TargetStore for T {}

/// A strictly forward-reading source byte stream.
///
/// Part reconstruction pulls exactly the bytes it needs from the current
/// position. Skipping is the only way to move forward without consuming
/// into an output buffer; there is no way back.
#[async_trait]
pub trait SourceRead: Send {
    /// Read exactly `buf.len()` bytes, failing with `UnexpectedEof` if the
    /// stream ends first.
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Discard the next `n` bytes.
    async fn skip(&mut self, n: u64) -> io::Result<()>;
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> SourceRead for R {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        AsyncReadExt::read_exact(self, buf).await.map(|_| ())
    }

    async fn skip(&mut self, n: u64) -> io::Result<()> {
        let mut scratch = [0u8; 8192];
        let mut remaining = n;
        while remaining > 0 {
            let take = remaining.min(scratch.len() as u64) as usize;
            AsyncReadExt::read_exact(self, &mut scratch[..take]).await?;
            remaining -= take as u64;
        }
        Ok(())
    }
}
