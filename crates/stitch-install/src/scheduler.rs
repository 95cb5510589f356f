//! Install scheduling: bounded-concurrency task drive loop.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::installer::PatchInstaller;
use crate::task::{InstallTask, TaskContext};

impl PatchInstaller {
    /// Run the queued install tasks with at most `concurrency` in flight,
    /// then fill index-only parts via the non-patch reconstructor.
    ///
    /// The first faulted task cancels its siblings and its error
    /// propagates; already-written parts stay written, so a later
    /// verify/install cycle only re-requests what is still missing.
    pub async fn install(&mut self, concurrency: usize, cancel: &CancellationToken) -> Result<()> {
        let concurrency = concurrency.max(1);
        let tasks = std::mem::take(&mut self.queue);
        if tasks.is_empty() {
            return self.repair_non_patch_data(cancel).await;
        }

        let progress_max: u64 = tasks.iter().map(InstallTask::progress_max).sum();
        let counters: Vec<_> = tasks.iter().map(InstallTask::progress_counter).collect();
        self.install_done.store(0, Ordering::Relaxed);
        self.install_total.store(progress_max, Ordering::Relaxed);

        let ctx = Arc::new(TaskContext {
            index: self.index.clone(),
            registry: self.registry.clone(),
            pool: self.pool.clone(),
            options: self.options.clone(),
        });
        let local = cancel.child_token();
        let current_source = Arc::new(AtomicUsize::new(tasks[0].source_index()));

        let mut queue: VecDeque<InstallTask> = tasks.into();
        let mut running: JoinSet<Result<()>> = JoinSet::new();
        let mut interval = interval_at(
            Instant::now() + self.options.progress_interval,
            self.options.progress_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tasks = queue.len(), bytes = progress_max, "starting install");

        let result = loop {
            while running.len() < concurrency {
                let Some(task) = queue.pop_front() else {
                    break;
                };
                current_source.store(task.source_index(), Ordering::Relaxed);
                running.spawn(task.repair(ctx.clone(), local.clone()));
            }
            if running.is_empty() {
                break Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                _ = interval.tick() => {
                    let done: u64 = counters.iter().map(|c| c.load(Ordering::Relaxed)).sum();
                    self.install_done.store(done, Ordering::Relaxed);
                    self.events.emit_install_progress(
                        current_source.load(Ordering::Relaxed),
                        done,
                        progress_max,
                    );
                }
                joined = running.join_next() => match joined {
                    None => {}
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => break Err(Error::Io(io::Error::other(e))),
                },
            }
        };

        // Terminate any siblings cooperatively and await them; the first
        // error (or cancellation) wins.
        local.cancel();
        while running.join_next().await.is_some() {}
        let done: u64 = counters.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        self.install_done.store(done, Ordering::Relaxed);
        result?;

        self.repair_non_patch_data(cancel).await
    }
}
