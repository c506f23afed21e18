use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// A thread-safe pool of block payload buffers.
///
/// The engine reads every block into a pooled buffer, unlaces it into
/// queued frames and hands the buffer back once the last frame of that
/// block has been returned to the caller.
#[derive(Debug, Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    max_size: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Creates a new buffer pool with the specified parameters.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum number of buffers to keep in the pool
    /// * `buffer_capacity` - Initial capacity for each buffer
    pub fn new(max_size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
            buffer_capacity,
        }
    }

    /// Acquires a buffer from the pool or creates a new one if none available.
    pub fn acquire(&self) -> Vec<u8> {
        let mut pool = self.pool.lock();
        pool.pop_front()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer to the pool for reuse.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();

        let mut pool = self.pool.lock();
        if pool.len() < self.max_size {
            pool.push_back(buffer);
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16, 64 * 1024)
    }
}

#[test]
fn released_buffers_are_reused_and_cleared() {
    let pool = BufferPool::new(2, 8);
    let mut buf = pool.acquire();
    buf.extend_from_slice(b"payload");
    let ptr = buf.as_ptr();
    pool.release(buf);
    assert_eq!(pool.pooled(), 1);

    let again = pool.acquire();
    assert!(again.is_empty());
    assert_eq!(again.as_ptr(), ptr);
}

#[test]
fn pool_is_bounded() {
    let pool = BufferPool::new(1, 8);
    pool.release(Vec::new());
    pool.release(Vec::new());
    assert_eq!(pool.pooled(), 1);
}
