//! Concurrent verification of target files against the index.

use std::io::{self, SeekFrom};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use stitch_index::{PatchIndex, VerifyOutcome};
use tokio::io::AsyncSeekExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::InstallEvents;
use crate::installer::PatchInstaller;
use crate::ledger::Ledger;
use crate::registry::TargetRegistry;

impl PatchInstaller {
    /// Verify every target with an attached readable stream, rebuilding
    /// the missing-parts ledger for those targets.
    ///
    /// Runs up to `verify_concurrency` per-target checks in parallel and
    /// emits `on_verify_progress` every `progress_interval`. A part the
    /// index cannot verify aborts with [`Error::UnverifiablePart`]; a part
    /// that fails verification is recorded and reported through
    /// `on_corruption_found`.
    pub async fn verify_files(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut attached = Vec::new();
        for t in 0..self.index.target_count() {
            if self.registry.is_attached(t).await {
                attached.push(t);
            }
        }

        let total: u64 = attached
            .iter()
            .map(|&t| {
                let target = self.index.target(t);
                (0..target.part_count())
                    .map(|p| target.part(p).target_size() as u64)
                    .sum::<u64>()
            })
            .sum();
        let done = Arc::new(AtomicU64::new(0));
        let current = Arc::new(AtomicUsize::new(attached.first().copied().unwrap_or(0)));
        self.verify_done = done.clone();
        self.verify_total.store(total, Ordering::Relaxed);

        debug!(targets = attached.len(), bytes = total, "verifying targets");

        let local = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.options.verify_concurrency.max(1)));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for &t in &attached {
            let index = self.index.clone();
            let registry = self.registry.clone();
            let ledger = self.ledger.clone();
            let events = self.events.clone();
            let semaphore = semaphore.clone();
            let done = done.clone();
            let current = current.clone();
            let token = local.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(());
                };
                verify_target(&*index, &registry, &ledger, &events, &done, &current, &token, t)
                    .await
            });
        }

        let mut interval = interval_at(
            Instant::now() + self.options.progress_interval,
            self.options.progress_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                _ = interval.tick() => {
                    self.events.emit_verify_progress(
                        current.load(Ordering::Relaxed),
                        done.load(Ordering::Relaxed),
                        total,
                    );
                }
                joined = tasks.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => break Err(Error::Io(io::Error::other(e))),
                },
            }
        };

        // Stop stragglers cooperatively and wait them out; their errors
        // are secondary to `result`.
        local.cancel();
        while tasks.join_next().await.is_some() {}
        result
    }
}

#[allow(clippy::too_many_arguments)]
async fn verify_target(
    index: &dyn PatchIndex,
    registry: &TargetRegistry,
    ledger: &StdMutex<Ledger>,
    events: &InstallEvents,
    done: &AtomicU64,
    current: &AtomicUsize,
    cancel: &CancellationToken,
    t: usize,
) -> Result<()> {
    let mut slot = registry.slot(t).lock().await;
    let Some(stream) = slot.as_mut() else {
        return Ok(());
    };
    current.store(t, Ordering::Relaxed);

    let target = index.target(t);
    let len = stream.seek(SeekFrom::End(0)).await?;
    {
        let mut ledger = ledger.lock().expect("ledger lock poisoned");
        ledger.clear_target(t);
        if len != target.file_size() {
            ledger.mark_size_mismatch(t);
        }
    }

    for p in 0..target.part_count() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let part = target.part(p);
        match part.verify(stream.as_mut()).await? {
            VerifyOutcome::Pass => {}
            VerifyOutcome::Unverifiable => {
                return Err(Error::UnverifiablePart { target: t, part: p });
            }
            outcome => {
                ledger
                    .lock()
                    .expect("ledger lock poisoned")
                    .mark_part_missing(index, t, p);
                events.emit_corruption_found(t, p, outcome);
            }
        }
        done.fetch_add(part.target_size() as u64, Ordering::Relaxed);
    }
    Ok(())
}
