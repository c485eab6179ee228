//! Packet/Buffer Pool: fixed-capacity reusable buffers with
//! grow-on-demand, shared by all three protocol engines. A channel of
//! pre-allocated buffers: receive to allocate, send to release. No
//! intrusive-linked-list chaining for scatter/gather payloads here;
//! a single contiguous `Vec<u8>` is enough for every caller.

use tokio::sync::mpsc;

use crate::error::EngineError;

/// A pooled buffer. Dropping it without calling [`BufferPool::release`]
/// simply leaks it back to the allocator rather than the pool — still
/// safe, just forfeits reuse, which is acceptable on the error paths
/// that drop a buffer early.
pub struct PooledBuffer {
    data: Vec<u8>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resize(&mut self, new_len: usize) {
        self.data.resize(new_len, 0);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Fixed-size pool of pre-allocated buffers, plus a bounded dynamic
/// overflow budget for allocations the pool can't satisfy directly.
pub struct BufferPool {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    buffer_size: usize,
    dynamic_budget: std::sync::atomic::AtomicUsize,
}

impl BufferPool {
    /// `count` buffers of `buffer_size` bytes each are pre-allocated.
    /// `dynamic_budget` additional bytes may be handed out beyond the
    /// pool before `allocate` starts failing with `OutOfCapacity`.
    pub fn new(buffer_size: usize, count: usize, dynamic_budget: usize) -> Self {
        let (sender, receiver) = mpsc::channel(count);
        for _ in 0..count {
            // Best-effort: a full channel here would mean `count` was
            // zero, in which case there is nothing to pre-fill anyway.
            let _ = sender.try_send(vec![0u8; buffer_size]);
        }
        BufferPool {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            buffer_size,
            dynamic_budget: std::sync::atomic::AtomicUsize::new(dynamic_budget),
        }
    }

    /// Returns a buffer with capacity >= `min_size`. Prefers a pooled
    /// buffer (grown in place if needed); falls back to the dynamic
    /// budget; fails with `OutOfCapacity` when both are exhausted.
    pub async fn allocate(&self, min_size: usize) -> Result<PooledBuffer, EngineError> {
        let mut receiver = self.receiver.lock().await;
        if let Ok(mut buf) = receiver.try_recv() {
            if buf.len() < min_size {
                buf.resize(min_size, 0);
            }
            return Ok(PooledBuffer { data: buf });
        }
        drop(receiver);

        self.take_dynamic(min_size).map(|data| PooledBuffer { data })
    }

    fn take_dynamic(&self, min_size: usize) -> Result<Vec<u8>, EngineError> {
        use std::sync::atomic::Ordering;
        let size = min_size.max(self.buffer_size);
        let mut current = self.dynamic_budget.load(Ordering::Relaxed);
        loop {
            if current < size {
                return Err(EngineError::OutOfCapacity);
            }
            match self.dynamic_budget.compare_exchange_weak(
                current,
                current - size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(vec![0u8; size]),
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns a buffer to the pool, or back to the dynamic budget if
    /// the pool is already full.
    pub fn release(&self, buf: PooledBuffer) {
        use std::sync::atomic::Ordering;
        let len = buf.data.len();
        if self.sender.try_send(buf.data).is_err() {
            self.dynamic_budget.fetch_add(len, Ordering::Relaxed);
        }
    }
}

/// Doubling growth strategy for a per-session command buffer (the FTP
/// control channel's line reader): starts at 1 KB, doubles on partial
/// reads, caps at 64 KB. Beyond the cap the caller drains the socket
/// and drops the oversize command rather than growing further.
pub struct GrowingBuffer {
    data: Vec<u8>,
    filled: usize,
}

impl GrowingBuffer {
    pub const INITIAL: usize = 1024;
    pub const MAX: usize = 64 * 1024;

    pub fn new() -> Self {
        GrowingBuffer { data: vec![0u8; Self::INITIAL], filled: 0 }
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn consume(&mut self, n: usize) {
        self.data.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    pub fn is_at_cap(&self) -> bool {
        self.data.len() >= Self::MAX
    }

    /// Space available to read into; `None` once at `MAX` and already
    /// full (caller should switch to draining).
    pub fn spare_capacity(&mut self) -> Option<&mut [u8]> {
        if self.filled == self.data.len() {
            if self.data.len() >= Self::MAX {
                return None;
            }
            let new_len = (self.data.len() * 2).min(Self::MAX);
            self.data.resize(new_len, 0);
        }
        Some(&mut self.data[self.filled..])
    }

    pub fn mark_filled(&mut self, n: usize) {
        self.filled += n;
    }
}

impl Default for GrowingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_prefers_a_pooled_buffer_and_release_returns_it() {
        let pool = BufferPool::new(4096, 2, 0);
        let buf = pool.allocate(1024).await.unwrap();
        assert_eq!(buf.len(), 4096);
        pool.release(buf);
        // The pool only held 2 buffers; both should still be reachable.
        let a = pool.allocate(4096).await.unwrap();
        let b = pool.allocate(4096).await.unwrap();
        pool.release(a);
        pool.release(b);
    }

    #[tokio::test]
    async fn allocate_grows_a_pooled_buffer_too_small_for_min_size() {
        let pool = BufferPool::new(64, 1, 0);
        let buf = pool.allocate(1024).await.unwrap();
        assert_eq!(buf.len(), 1024);
    }

    #[tokio::test]
    async fn allocate_falls_back_to_the_dynamic_budget_once_the_pool_is_empty() {
        let pool = BufferPool::new(1024, 1, 2048);
        let first = pool.allocate(1024).await.unwrap();
        let second = pool.allocate(1024).await.unwrap();
        assert_eq!(second.len(), 1024);
        pool.release(first);
        pool.release(second);
    }

    #[tokio::test]
    async fn allocate_fails_with_out_of_capacity_once_both_are_exhausted() {
        let pool = BufferPool::new(1024, 1, 512);
        let _first = pool.allocate(1024).await.unwrap();
        let err = pool.allocate(1024).await.unwrap_err();
        assert!(matches!(err, EngineError::OutOfCapacity));
    }

    #[test]
    fn pooled_buffer_resize_and_slice_access() {
        let mut buf = PooledBuffer { data: vec![1, 2, 3] };
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        buf.as_mut_slice()[0] = 9;
        assert_eq!(buf.as_slice(), &[9, 2, 3]);
        buf.resize(5);
        assert_eq!(buf.len(), 5);
        assert!(!buf.is_empty());
        assert_eq!(buf.into_vec().len(), 5);
    }

    #[test]
    fn growing_buffer_doubles_until_the_cap_then_stops() {
        let mut buf = GrowingBuffer::new();
        assert_eq!(buf.spare_capacity().unwrap().len(), GrowingBuffer::INITIAL);

        // Drive it to full by always consuming exactly the spare slice
        // handed back, the same way `next_command_line` does.
        while !buf.is_at_cap() {
            let len = buf.spare_capacity().unwrap().len();
            buf.mark_filled(len);
        }
        assert!(buf.is_at_cap());
        assert!(buf.spare_capacity().is_none());
    }

    #[test]
    fn growing_buffer_consume_shifts_remaining_bytes_to_the_front() {
        let mut buf = GrowingBuffer::new();
        let spare = buf.spare_capacity().unwrap();
        spare[..5].copy_from_slice(b"abcde");
        buf.mark_filled(5);
        buf.consume(2);
        assert_eq!(buf.filled(), b"cde");
    }
}
