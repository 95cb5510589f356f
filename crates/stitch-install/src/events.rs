//! Progress and corruption callbacks.

use stitch_index::VerifyOutcome;

type ProgressFn = dyn Fn(usize, u64, u64) + Send + Sync;
type CorruptionFn = dyn Fn(usize, usize, VerifyOutcome) + Send + Sync;

/// Capability set of optional installer callbacks. Each is independent;
/// embedders register only what they surface.
#[derive(Default)]
pub struct InstallEvents {
    verify_progress: Option<Box<ProgressFn>>,
    install_progress: Option<Box<ProgressFn>>,
    corruption_found: Option<Box<CorruptionFn>>,
}

impl InstallEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called periodically during verification with
    /// `(target_index, bytes_done, bytes_total)`.
    pub fn on_verify_progress(
        mut self,
        f: impl Fn(usize, u64, u64) + Send + Sync + 'static,
    ) -> Self {
        self.verify_progress = Some(Box::new(f));
        self
    }

    /// Called periodically during install with
    /// `(source_index, bytes_done, bytes_total)`.
    pub fn on_install_progress(
        mut self,
        f: impl Fn(usize, u64, u64) + Send + Sync + 'static,
    ) -> Self {
        self.install_progress = Some(Box::new(f));
        self
    }

    /// Called when verification finds a corrupt or short part, with
    /// `(target_index, part_index, outcome)`.
    pub fn on_corruption_found(
        mut self,
        f: impl Fn(usize, usize, VerifyOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.corruption_found = Some(Box::new(f));
        self
    }

    pub(crate) fn emit_verify_progress(&self, target: usize, done: u64, total: u64) {
        if let Some(f) = &self.verify_progress {
            f(target, done, total);
        }
    }

    pub(crate) fn emit_install_progress(&self, source: usize, done: u64, total: u64) {
        if let Some(f) = &self.install_progress {
            f(source, done, total);
        }
    }

    pub(crate) fn emit_corruption_found(&self, target: usize, part: usize, outcome: VerifyOutcome) {
        if let Some(f) = &self.corruption_found {
            f(target, part, outcome);
        }
    }
}

impl std::fmt::Debug for InstallEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallEvents")
            .field("verify_progress", &self.verify_progress.is_some())
            .field("install_progress", &self.install_progress.is_some())
            .field("corruption_found", &self.corruption_found.is_some())
            .finish()
    }
}
