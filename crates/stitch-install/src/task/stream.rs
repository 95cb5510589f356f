//! Install task reading from a pre-opened local source stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::source::SourceCursor;
use crate::task::{TaskContext, checked};

pub(crate) struct StreamInstallTask {
    source_index: usize,
    source: SourceCursor<Box<dyn AsyncRead + Send + Unpin>>,
    pending: Vec<(usize, usize)>,
    progress: Arc<AtomicU64>,
    progress_max: u64,
}

impl StreamInstallTask {
    /// `parts` must already be sorted by source offset; a forward stream
    /// cannot revisit earlier offsets.
    pub fn new(
        source_index: usize,
        source: Box<dyn AsyncRead + Send + Unpin>,
        parts: Vec<(usize, usize)>,
        progress_max: u64,
    ) -> Self {
        Self {
            source_index,
            source: SourceCursor::new(source),
            pending: parts,
            progress: Arc::new(AtomicU64::new(0)),
            progress_max,
        }
    }

    pub fn source_index(&self) -> usize {
        self.source_index
    }

    pub fn progress_max(&self) -> u64 {
        self.progress_max
    }

    pub fn progress_counter(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    /// Reconstruct pending parts in source order; reads advance the
    /// stream naturally and gaps are skipped.
    pub async fn repair(mut self, ctx: Arc<TaskContext>, cancel: CancellationToken) -> Result<()> {
        for &(t, p) in &self.pending {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let part = ctx.index.target(t).part(p);
            if part.source_offset() > self.source.position() {
                checked(&cancel, self.source.skip_to(part.source_offset())).await??;
            }

            let mut buf = ctx.pool.acquire(part.target_size());
            checked(&cancel, part.reconstruct(&mut self.source, buf.as_mut())).await??;
            ctx.registry
                .write_to_target(t, part.target_offset(), buf.as_ref())
                .await?;
            self.progress
                .fetch_add(part.target_size() as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}
