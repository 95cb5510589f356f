//! Per-target stream slots.
//!
//! One slot per target file, each holding an optional random-access store
//! behind its own mutex. The mutex serializes seek+write+flush for install
//! tasks and gives the verifier exclusive read access to a target while it
//! checks parts. Slots outlive every handle into them.

use std::io::SeekFrom;

use stitch_index::TargetStore;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

type Slot = Mutex<Option<Box<dyn TargetStore>>>;

pub(crate) struct TargetRegistry {
    slots: Vec<Slot>,
}

impl TargetRegistry {
    pub fn new(target_count: usize) -> Self {
        let mut slots = Vec::with_capacity(target_count);
        slots.resize_with(target_count, || Mutex::new(None));
        Self { slots }
    }

    pub fn slot(&self, target: usize) -> &Slot {
        &self.slots[target]
    }

    pub async fn attach(&self, target: usize, stream: Box<dyn TargetStore>) -> Result<()> {
        let slot = self
            .slots
            .get(target)
            .ok_or(Error::InvalidArgument("target index out of range"))?;
        *slot.lock().await = Some(stream);
        Ok(())
    }

    pub async fn detach_all(&self) {
        for slot in &self.slots {
            *slot.lock().await = None;
        }
    }

    pub async fn is_attached(&self, target: usize) -> bool {
        self.slots[target].lock().await.is_some()
    }

    /// Write `data` at `offset` of the target. A detached slot makes this
    /// a no-op; otherwise the slot lock is held for the whole
    /// seek+write+flush so the triple lands atomically.
    pub async fn write_to_target(&self, target: usize, offset: u64, data: &[u8]) -> Result<()> {
        let mut slot = self.slots[target].lock().await;
        let Some(stream) = slot.as_mut() else {
            return Ok(());
        };
        stream.seek(SeekFrom::Start(offset)).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.slots.len())
            .finish()
    }
}
