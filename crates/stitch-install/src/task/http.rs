//! HTTP install task: coalesced ranged GETs against one source patch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::multipart::MultipartReader;
use crate::ranges::{ByteRange, coalesce, range_header_value};
use crate::task::{TaskContext, checked};

const PATCH_UNIQUE_ID_HEADER: &str = "X-Patch-Unique-Id";

pub(crate) struct HttpInstallTask {
    source_index: usize,
    url: String,
    sid: Option<String>,
    client: reqwest::Client,
    pending: VecDeque<(usize, usize)>,
    progress: Arc<AtomicU64>,
    progress_max: u64,
    response: Option<MultipartReader>,
    failed: u32,
    last_error: Option<Error>,
}

impl HttpInstallTask {
    /// `parts` must already be sorted by source offset.
    pub fn new(
        source_index: usize,
        url: String,
        sid: Option<String>,
        client: reqwest::Client,
        parts: Vec<(usize, usize)>,
        progress_max: u64,
    ) -> Self {
        Self {
            source_index,
            url,
            sid,
            client,
            pending: parts.into(),
            progress: Arc::new(AtomicU64::new(0)),
            progress_max,
            response: None,
            failed: 0,
            last_error: None,
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

    /// Reconstruct every pending part, retrying transient fetch failures
    /// with exponential backoff. Consecutive failures beyond the attempt
    /// budget surface as [`Error::ExhaustedRetries`].
    pub async fn repair(mut self, ctx: Arc<TaskContext>, cancel: CancellationToken) -> Result<()> {
        while !self.pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.failed >= ctx.options.max_attempts {
                let cause = self.last_error.take().unwrap_or(Error::UnexpectedEndOfStream);
                return Err(Error::ExhaustedRetries {
                    source: self.source_index,
                    attempts: self.failed,
                    cause: Box::new(cause),
                });
            }
            if let Some(delay) = backoff_delay(self.failed, ctx.options.backoff_base) {
                checked(&cancel, tokio::time::sleep(delay)).await?;
            }

            match self.repair_round(&ctx, &cancel).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    self.response = None;
                    self.failed += 1;
                    warn!(
                        source = self.source_index,
                        failed = self.failed,
                        error = %e,
                        "source fetch failed, will retry"
                    );
                    self.last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Obtain the next ranged part and reconstruct every pending part
    /// whose source bytes it covers.
    async fn repair_round(&mut self, ctx: &TaskContext, cancel: &CancellationToken) -> Result<()> {
        let mut reader = self.next_stream(ctx, cancel).await?;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(&(t, p)) = self.pending.front() else {
                break;
            };
            let part = ctx.index.target(t).part(p);
            if part.source_offset() >= reader.available_to_offset() {
                break;
            }

            checked(cancel, reader.skip_to(part.source_offset())).await??;
            let mut buf = ctx.pool.acquire(part.target_size());
            checked(cancel, part.reconstruct(&mut reader, buf.as_mut())).await??;
            ctx.registry
                .write_to_target(t, part.target_offset(), buf.as_ref())
                .await?;

            self.pending.pop_front();
            self.failed = 0;
            self.progress
                .fetch_add(part.target_size() as u64, Ordering::Relaxed);
        }
        self.response = Some(reader);
        Ok(())
    }

    /// Next part of the open response, or the first part of a fresh
    /// request covering the remaining pending ranges.
    async fn next_stream(
        &mut self,
        ctx: &TaskContext,
        cancel: &CancellationToken,
    ) -> Result<MultipartReader> {
        if let Some(mut reader) = self.response.take() {
            if checked(cancel, reader.next_part()).await??.is_some() {
                return Ok(reader);
            }
            // Exhausted; fall through to a fresh request.
        }

        let ranges = self.request_ranges(ctx);
        debug!(
            source = self.source_index,
            ranges = ranges.len(),
            pending = self.pending.len(),
            "requesting source ranges"
        );
        let mut request = self
            .client
            .get(&self.url)
            .header(header::RANGE, range_header_value(&ranges))
            .header(header::USER_AGENT, ctx.options.user_agent.as_str())
            .header(header::CONNECTION, "Keep-Alive");
        if let Some(sid) = &self.sid {
            request = request.header(PATCH_UNIQUE_ID_HEADER, sid.as_str());
        }
        let response = checked(cancel, request.send()).await??;
        let mut reader = MultipartReader::from_response(response)?;
        match checked(cancel, reader.next_part()).await?? {
            Some(_) => Ok(reader),
            None => Err(Error::UnexpectedEndOfStream),
        }
    }

    /// Coalesced byte ranges covering every pending part, clamped to the
    /// per-request range limit.
    fn request_ranges(&self, ctx: &TaskContext) -> Vec<ByteRange> {
        let last_ptr = ctx.index.source_last_ptr(self.source_index);
        let mut ranges: Vec<ByteRange> = self
            .pending
            .iter()
            .map(|&(t, p)| {
                let part = ctx.index.target(t).part(p);
                ByteRange::new(part.source_offset(), part.max_source_end().min(last_ptr))
            })
            .filter(|r| r.end > r.start)
            .collect();
        coalesce(
            &mut ranges,
            ctx.options.coalesce_gap,
            ctx.options.max_ranges_per_request,
        );
        ranges
    }
}

/// Delay before the next attempt: none for the first two failures, then
/// `base · 2^min(5, failed − 2)`.
fn backoff_delay(failed: u32, base: Duration) -> Option<Duration> {
    if failed < 2 {
        return None;
    }
    let exponent = (failed - 2).min(5);
    Some(base.saturating_mul(2u32.saturating_pow(exponent)))
}
