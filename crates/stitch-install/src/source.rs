//! Position-tracking cursor over a forward-readable source stream.

use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll};

use stitch_index::SourceRead;
use tokio::io::{AsyncRead, ReadBuf};

/// Wraps a local source stream (file, pipe, in-memory reader) so install
/// tasks can position it at a part's source offset. Strictly forward:
/// skipping reads and discards.
#[derive(Debug)]
pub struct SourceCursor<R> {
    inner: R,
    pos: u64,
}

impl<R: AsyncRead + Send + Unpin> SourceCursor<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Advance to `offset`, discarding intermediate bytes.
    pub async fn skip_to(&mut self, offset: u64) -> io::Result<()> {
        if offset < self.pos {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot seek a forward stream backwards",
            ));
        }
        SourceRead::skip(self, offset - self.pos).await
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SourceCursor<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            self.pos += (buf.filled().len() - before) as u64;
        }
        result
    }
}
