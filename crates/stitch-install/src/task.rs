//! Install tasks: one per source patch chunk.

mod http;
mod stream;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use stitch_index::PatchIndex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::options::InstallerOptions;
use crate::pool::BufferPool;
use crate::registry::TargetRegistry;

pub(crate) use http::HttpInstallTask;
pub(crate) use stream::StreamInstallTask;

/// Shared, read-only surroundings of a running install task.
pub(crate) struct TaskContext {
    pub index: Arc<dyn PatchIndex>,
    pub registry: Arc<TargetRegistry>,
    pub pool: Arc<BufferPool>,
    pub options: InstallerOptions,
}

/// A queued unit of repair work for one source patch.
pub(crate) enum InstallTask {
    Http(HttpInstallTask),
    Stream(StreamInstallTask),
}

impl InstallTask {
    pub fn source_index(&self) -> usize {
        match self {
            InstallTask::Http(task) => task.source_index(),
            InstallTask::Stream(task) => task.source_index(),
        }
    }

    pub fn progress_max(&self) -> u64 {
        match self {
            InstallTask::Http(task) => task.progress_max(),
            InstallTask::Stream(task) => task.progress_max(),
        }
    }

    pub fn progress_counter(&self) -> Arc<AtomicU64> {
        match self {
            InstallTask::Http(task) => task.progress_counter(),
            InstallTask::Stream(task) => task.progress_counter(),
        }
    }

    pub async fn repair(self, ctx: Arc<TaskContext>, cancel: CancellationToken) -> Result<()> {
        match self {
            InstallTask::Http(task) => task.repair(ctx, cancel).await,
            InstallTask::Stream(task) => task.repair(ctx, cancel).await,
        }
    }
}

/// Race a future against cancellation.
pub(crate) async fn checked<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

/// Order `(target, part)` pairs by where their bytes live in the source.
pub(crate) fn sort_by_source_offset(index: &dyn PatchIndex, parts: &mut [(usize, usize)]) {
    parts.sort_by_key(|&(t, p)| index.target(t).part(p).source_offset());
}

pub(crate) fn total_target_size(index: &dyn PatchIndex, parts: &[(usize, usize)]) -> u64 {
    parts
        .iter()
        .map(|&(t, p)| index.target(t).part(p).target_size() as u64)
        .sum()
}
