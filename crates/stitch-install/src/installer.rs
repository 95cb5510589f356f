//! The installer facade.

use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use stitch_index::{PatchIndex, TargetStore};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::events::InstallEvents;
use crate::ledger::Ledger;
use crate::options::InstallerOptions;
use crate::pool::BufferPool;
use crate::registry::TargetRegistry;
use crate::task::{
    HttpInstallTask, InstallTask, StreamInstallTask, sort_by_source_offset, total_target_size,
};

/// Repairs or constructs a set of target files to match a patch index.
///
/// The expected cycle: attach target streams, [`verify_files`] to find
/// missing parts, attach writable streams for damaged targets, queue one
/// or more install tasks per source patch, then [`install`]. The cycle is
/// re-drivable: a partial install keeps completed parts, and the next
/// verification only re-requests what is still missing.
///
/// [`verify_files`]: PatchInstaller::verify_files
/// [`install`]: PatchInstaller::install
pub struct PatchInstaller {
    pub(crate) index: Arc<dyn PatchIndex>,
    pub(crate) registry: Arc<TargetRegistry>,
    pub(crate) ledger: Arc<StdMutex<Ledger>>,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) events: Arc<InstallEvents>,
    pub(crate) options: InstallerOptions,
    pub(crate) queue: Vec<InstallTask>,
    client: reqwest::Client,
    fast_extend: bool,
    pub(crate) verify_done: Arc<AtomicU64>,
    pub(crate) verify_total: AtomicU64,
    pub(crate) install_done: AtomicU64,
    pub(crate) install_total: AtomicU64,
}

impl PatchInstaller {
    pub fn new(index: Arc<dyn PatchIndex>) -> Self {
        let registry = Arc::new(TargetRegistry::new(index.target_count()));
        let ledger = Arc::new(StdMutex::new(Ledger::for_index(&*index)));
        Self {
            index,
            registry,
            ledger,
            pool: Arc::new(BufferPool::new()),
            events: Arc::new(InstallEvents::new()),
            options: InstallerOptions::default(),
            queue: Vec::new(),
            client: reqwest::Client::new(),
            fast_extend: false,
            verify_done: Arc::new(AtomicU64::new(0)),
            verify_total: AtomicU64::new(0),
            install_done: AtomicU64::new(0),
            install_total: AtomicU64::new(0),
        }
    }

    pub fn with_options(mut self, options: InstallerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: InstallEvents) -> Self {
        self.events = Arc::new(events);
        self
    }

    // ------------------------------------------------------------------
    // Target stream attachment
    // ------------------------------------------------------------------

    /// Attach an already-open random-access store as the read stream of
    /// `target`.
    pub async fn attach_for_read(
        &self,
        target: usize,
        stream: impl TargetStore + 'static,
    ) -> Result<()> {
        self.registry.attach(target, Box::new(stream)).await
    }

    /// Open (or create) the target's backing file read/write and size it
    /// to the expected length, then attach it.
    pub async fn attach_for_write_from_file(&self, target: usize, path: &Path) -> Result<()> {
        if target >= self.index.target_count() {
            return Err(Error::InvalidArgument("target index out of range"));
        }
        stitch_fs::create_parent_dirs(path)?;
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        let expected = self.index.target(target).file_size();
        let len = file.metadata().await?.len();
        let file = if len == expected {
            file
        } else {
            let fast = self.fast_extend;
            let std_file = file.into_std().await;
            let std_file = tokio::task::spawn_blocking(move || {
                stitch_fs::preallocate(&std_file, expected, fast).map(|()| std_file)
            })
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;
            tokio::fs::File::from_std(std_file)
        };
        self.registry.attach(target, Box::new(file)).await
    }

    /// Attach every existing target file under `root` read-only; targets
    /// with no file are recorded as entirely missing.
    pub async fn attach_all_for_read(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        self.registry.detach_all().await;
        for t in 0..self.index.target_count() {
            let path = root.join(self.index.target(t).relative_path());
            match tokio::fs::File::open(&path).await {
                Ok(file) => self.registry.attach(t, Box::new(file)).await?,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.ledger
                        .lock()
                        .expect("ledger lock poisoned")
                        .mark_file_missing(&*self.index, t);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// Reopen for writing every target that has missing parts or a size
    /// mismatch, preallocating to the expected size. Attempts to acquire
    /// the fast-extend privilege first; without it, extension zero-fills.
    pub async fn attach_missing_for_write(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        self.registry.detach_all().await;
        self.fast_extend = stitch_fs::acquire_fast_extend_privilege();

        let damaged: Vec<usize> = {
            let ledger = self.ledger.lock().expect("ledger lock poisoned");
            (0..self.index.target_count())
                .filter(|&t| ledger.needs_write(t))
                .collect()
        };
        info!(
            targets = damaged.len(),
            fast_extend = self.fast_extend,
            "opening damaged targets for write"
        );
        for t in damaged {
            let path = root.join(self.index.target(t).relative_path());
            self.attach_for_write_from_file(t, &path).await?;
        }
        Ok(())
    }

    /// Close every attached target stream.
    pub async fn detach_all(&self) {
        self.registry.detach_all().await;
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    /// Record every part of `target` as missing.
    pub fn mark_file_missing(&self, target: usize) -> Result<()> {
        if target >= self.index.target_count() {
            return Err(Error::InvalidArgument("target index out of range"));
        }
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .mark_file_missing(&*self.index, target);
        Ok(())
    }

    /// Missing part indices of one target, ascending.
    pub fn missing_parts(&self, target: usize) -> Vec<usize> {
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .missing_parts(target)
            .iter()
            .copied()
            .collect()
    }

    /// `(target, part)` pairs whose reconstruction needs `source`.
    pub fn missing_for_source(&self, source: usize) -> Vec<(usize, usize)> {
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .missing_for_source(source)
            .iter()
            .copied()
            .collect()
    }

    /// Targets whose on-disk length differed from the index.
    pub fn size_mismatch_targets(&self) -> Vec<usize> {
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .size_mismatch_targets()
            .iter()
            .copied()
            .collect()
    }

    /// True when verification left no part missing anywhere.
    pub fn is_clean(&self) -> bool {
        self.ledger.lock().expect("ledger lock poisoned").is_empty()
    }

    // ------------------------------------------------------------------
    // Install queue
    // ------------------------------------------------------------------

    /// Queue HTTP install tasks for every missing part of `source`,
    /// split into `split_by` roughly equal chunks.
    pub fn queue_http_install(
        &mut self,
        source: usize,
        url: impl Into<String>,
        sid: Option<&str>,
    ) -> Result<()> {
        let parts = self.missing_for_source_checked(source)?;
        if parts.is_empty() {
            return Ok(());
        }
        let url = url.into();
        let chunk_size = parts.len().div_ceil(self.options.split_by.max(1));
        for chunk in parts.chunks(chunk_size) {
            self.queue_http_install_parts(source, url.clone(), sid, chunk.to_vec())?;
        }
        Ok(())
    }

    /// Queue one HTTP install task over an explicit part list.
    pub fn queue_http_install_parts(
        &mut self,
        source: usize,
        url: impl Into<String>,
        sid: Option<&str>,
        mut parts: Vec<(usize, usize)>,
    ) -> Result<()> {
        if source >= self.index.source_count() {
            return Err(Error::InvalidArgument("source index out of range"));
        }
        if parts.is_empty() {
            return Ok(());
        }
        sort_by_source_offset(&*self.index, &mut parts);
        let progress_max = total_target_size(&*self.index, &parts);
        self.queue.push(InstallTask::Http(HttpInstallTask::new(
            source,
            url.into(),
            sid.map(str::to_string),
            self.client.clone(),
            parts,
            progress_max,
        )));
        Ok(())
    }

    /// Queue a single task repairing every missing part of `source` from
    /// a pre-opened forward-readable stream.
    pub fn queue_stream_install(
        &mut self,
        source: usize,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Result<()> {
        let parts = self.missing_for_source_checked(source)?;
        self.queue_stream_install_parts(source, reader, parts)
    }

    /// Queue one stream install task over an explicit part list.
    pub fn queue_stream_install_parts(
        &mut self,
        source: usize,
        reader: impl AsyncRead + Send + Unpin + 'static,
        mut parts: Vec<(usize, usize)>,
    ) -> Result<()> {
        if source >= self.index.source_count() {
            return Err(Error::InvalidArgument("source index out of range"));
        }
        if parts.is_empty() {
            return Ok(());
        }
        sort_by_source_offset(&*self.index, &mut parts);
        let progress_max = total_target_size(&*self.index, &parts);
        self.queue.push(InstallTask::Stream(StreamInstallTask::new(
            source,
            Box::new(reader),
            parts,
            progress_max,
        )));
        Ok(())
    }

    pub fn queued_task_count(&self) -> usize {
        self.queue.len()
    }

    fn missing_for_source_checked(&self, source: usize) -> Result<Vec<(usize, usize)>> {
        if source >= self.index.source_count() {
            return Err(Error::InvalidArgument("source index out of range"));
        }
        Ok(self.missing_for_source(source))
    }

    // ------------------------------------------------------------------
    // Non-patch reconstruction and sidecars
    // ------------------------------------------------------------------

    /// Rewrite every missing part whose data comes from the index alone.
    pub async fn repair_non_patch_data(&self, cancel: &CancellationToken) -> Result<()> {
        for t in 0..self.index.target_count() {
            let missing = self.missing_parts(t);
            if missing.is_empty() {
                continue;
            }
            let target = self.index.target(t);
            for p in missing {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let part = target.part(p);
                if part.is_from_source() {
                    continue;
                }
                let mut buf = self.pool.acquire(part.target_size());
                part.reconstruct_without_source(buf.as_mut());
                self.registry
                    .write_to_target(t, part.target_offset(), buf.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    /// Write the installed version name into both sidecar files under
    /// `root`.
    pub async fn write_version_files(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        let version = self.index.version_name();
        for name in [self.index.version_file_ver(), self.index.version_file_bck()] {
            let path = root.join(name);
            stitch_fs::create_parent_dirs(&path)?;
            tokio::fs::write(&path, version).await?;
        }
        info!(version, "wrote version sidecar files");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Progress snapshots
    // ------------------------------------------------------------------

    /// `(bytes_done, bytes_total)` of the current or last verification.
    pub fn verify_progress(&self) -> (u64, u64) {
        (
            self.verify_done.load(Ordering::Relaxed),
            self.verify_total.load(Ordering::Relaxed),
        )
    }

    /// `(bytes_done, bytes_total)` of the current or last install.
    pub fn install_progress(&self) -> (u64, u64) {
        (
            self.install_done.load(Ordering::Relaxed),
            self.install_total.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for PatchInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchInstaller")
            .field("version", &self.index.version_name())
            .field("targets", &self.index.target_count())
            .field("sources", &self.index.source_count())
            .field("queued_tasks", &self.queue.len())
            .finish()
    }
}
