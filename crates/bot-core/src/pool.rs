use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Capacity of every pooled block: the smallest power of two that holds at
/// least two maximum-size frames, so a single read can accumulate across a
/// message boundary.
pub const BUFFER_CAPACITY: usize = 2 * 65536;

/// Recyclable byte blocks shared by the transport's read and encode paths.
///
/// Blocks are handed out as plain [`BytesMut`]. Frame views split off a
/// block keep its allocation alive through the `bytes` reference counts, so
/// a block only re-enters the free list once nothing references it anymore;
/// until then [`BufferPool::put`] simply releases the handle and the
/// allocation is freed when the last view drops.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<Mutex<PoolState>>,
}

#[derive(Default)]
struct PoolState {
    free: Vec<BytesMut>,
    outstanding: usize,
    watermark: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    /// Take a block from the pool, allocating a fresh one when the free
    /// list is empty.
    pub fn get(&self) -> BytesMut {
        let mut state = self.shared.lock().unwrap();
        state.outstanding += 1;
        state.watermark = state.watermark.max(state.outstanding);
        state
            .free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(BUFFER_CAPACITY))
    }

    /// Return a block to the pool.
    pub fn put(&self, mut block: BytesMut) {
        block.clear();
        let recyclable = block.try_reclaim(BUFFER_CAPACITY);

        let mut state = self.shared.lock().unwrap();
        state.outstanding = state.outstanding.saturating_sub(1);
        if recyclable {
            state.free.push(block);
        }
    }

    /// Largest number of blocks ever handed out at the same time.
    pub fn watermark(&self) -> usize {
        self.shared.lock().unwrap().watermark
    }

    /// Blocks currently resting in the free list.
    pub fn free_blocks(&self) -> usize {
        self.shared.lock().unwrap().free.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
