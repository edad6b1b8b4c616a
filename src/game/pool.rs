//! Object pools for snapshots and I/O buffers
//!
//! `release` takes the value by move, so a released buffer cannot be touched
//! again by the caller. Values are reset before they go back on the free list.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::wire::GameStateSnapshot;

/// Size of a UDP receive buffer
pub const DATAGRAM_SIZE: usize = 2048;

/// Initial capacity of a pooled encode buffer
pub const ENCODE_BUFFER_CAPACITY: usize = 4096;

/// Values that can be returned to a [`Pool`]
pub trait Recycle: Send {
    /// Build a fresh value for a pool miss
    fn fresh() -> Self;

    /// Clear the value so the next `acquire` sees a blank one
    fn reset(&mut self);
}

impl Recycle for GameStateSnapshot {
    fn fresh() -> Self {
        GameStateSnapshot::default()
    }

    fn reset(&mut self) {
        self.tick = 0;
        self.entities.clear();
    }
}

impl Recycle for BytesMut {
    fn fresh() -> Self {
        BytesMut::with_capacity(ENCODE_BUFFER_CAPACITY)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// Fixed-size receive buffer, zero-filled on release
pub struct Datagram(pub Vec<u8>);

impl Recycle for Datagram {
    fn fresh() -> Self {
        Datagram(vec![0; DATAGRAM_SIZE])
    }

    fn reset(&mut self) {
        self.0.resize(DATAGRAM_SIZE, 0);
        self.0.fill(0);
    }
}

impl std::ops::Deref for Datagram {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::DerefMut for Datagram {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Pool hit/miss counters
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub idle: usize,
}

/// Bounded free list of reusable values
pub struct Pool<T: Recycle> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Recycle> Pool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle.min(1024))),
            max_idle,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take a recycled value, or build one on a miss
    pub fn acquire(&self) -> T {
        let recycled = self.free.lock().pop();
        match recycled {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                T::fresh()
            }
        }
    }

    /// Reset `value` and keep it for reuse, dropping it if the pool is full
    pub fn release(&self, mut value: T) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(value);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

pub type SnapshotPool = Pool<GameStateSnapshot>;
pub type BufferPool = Pool<BytesMut>;
pub type DatagramPool = Pool<Datagram>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EntityState;

    #[test]
    fn test_snapshot_is_reset_on_reacquire() {
        let pool = SnapshotPool::new(4);
        let mut snap = pool.acquire();
        snap.tick = 99;
        snap.entities.push(EntityState::at("sentinel", 1, 2, 3));
        pool.release(snap);

        let snap = pool.acquire();
        assert_eq!(snap.tick, 0);
        assert!(snap.entities.is_empty());

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_datagram_is_zeroed_on_reacquire() {
        let pool = DatagramPool::new(2);
        let mut buf = pool.acquire();
        assert_eq!(buf.len(), DATAGRAM_SIZE);
        buf[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        pool.release(buf);

        let buf = pool.acquire();
        assert_eq!(buf.len(), DATAGRAM_SIZE);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_buffer_is_cleared_on_reacquire() {
        let pool = BufferPool::new(2);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"stale");
        pool.release(buf);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_release_beyond_cap_drops_value() {
        let pool = SnapshotPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().idle, 1);
    }
}
