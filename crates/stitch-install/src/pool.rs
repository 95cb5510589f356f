//! Shared size-keyed buffer pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// Buffers kept per size class; beyond this, returns are dropped.
const MAX_PER_SIZE: usize = 8;

/// Reusable reconstruction buffers, keyed by exact size. Handles return
/// their buffer on drop, so release happens on every exit path.
#[derive(Debug, Default)]
pub struct BufferPool {
    shelves: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(self: &Arc<Self>, size: usize) -> PooledBuf {
        let reused = self
            .shelves
            .lock()
            .expect("buffer pool lock poisoned")
            .get_mut(&size)
            .and_then(Vec::pop);
        PooledBuf {
            buf: reused.unwrap_or_else(|| vec![0u8; size]),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut shelves = self.shelves.lock().expect("buffer pool lock poisoned");
        let shelf = shelves.entry(buf.len()).or_default();
        if shelf.len() < MAX_PER_SIZE {
            shelf.push(buf);
        }
    }
}

/// Scoped handle to a pooled buffer.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    pub fn as_ref(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_buffers() {
        let pool = Arc::new(BufferPool::new());
        {
            let mut buf = pool.acquire(512);
            buf.as_mut()[0] = 0xff;
        }
        assert_eq!(pool.shelves.lock().unwrap().get(&512).unwrap().len(), 1);

        let buf = pool.acquire(512);
        assert_eq!(buf.as_ref().len(), 512);
        assert!(pool.shelves.lock().unwrap().get(&512).unwrap().is_empty());
    }

    #[test]
    fn distinct_sizes_do_not_mix() {
        let pool = Arc::new(BufferPool::new());
        drop(pool.acquire(16));
        let buf = pool.acquire(32);
        assert_eq!(buf.as_ref().len(), 32);
    }
}
