// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Per-request scratch buffers.
//!
//! Every request copies the caller's bytes into a private buffer before anything else looks at
//! them. The buffer is acquired right before use and handed back to its pool when the
//! [`ScratchBuf`] guard is dropped, so every exit path releases it exactly once.

use std::ops::{Deref, DerefMut};

use super::{Error, Result};

/// Source of scratch buffers.
pub trait ScratchPool {
    /// Acquire a zero-filled buffer of exactly `len` bytes.
    fn acquire(&self, len: usize) -> Result<Vec<u8>>;

    /// Give back a buffer obtained from [`acquire`](ScratchPool::acquire).
    fn release(&self, buf: Vec<u8>);
}

/// Scratch buffers straight from the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapPool;

impl ScratchPool for HeapPool {
    fn acquire(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory { size: len })?;
        buf.resize(len, 0);
        Ok(buf)
    }

    fn release(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

impl<P: ScratchPool + ?Sized> ScratchPool for &P {
    fn acquire(&self, len: usize) -> Result<Vec<u8>> {
        (**self).acquire(len)
    }

    fn release(&self, buf: Vec<u8>) {
        (**self).release(buf)
    }
}

/// A scratch buffer on loan from a [`ScratchPool`].
pub struct ScratchBuf<'a, P: ScratchPool + ?Sized> {
    pool: &'a P,
    // Only `None` once dropped.
    buf: Option<Vec<u8>>,
}

impl<'a, P: ScratchPool + ?Sized> ScratchBuf<'a, P> {
    /// Acquire `len` zeroed bytes from `pool`.
    pub fn acquire(pool: &'a P, len: usize) -> Result<Self> {
        let buf = pool.acquire(len)?;
        Ok(ScratchBuf {
            pool,
            buf: Some(buf),
        })
    }
}

impl<'a, P: ScratchPool + ?Sized> Deref for ScratchBuf<'a, P> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl<'a, P: ScratchPool + ?Sized> DerefMut for ScratchBuf<'a, P> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<'a, P: ScratchPool + ?Sized> Drop for ScratchBuf<'a, P> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts acquisitions and releases, and can be told to fail the next acquisition.
    #[derive(Default)]
    pub(crate) struct TrackingPool {
        pub acquired: AtomicUsize,
        pub released: AtomicUsize,
        pub fail: AtomicBool,
        pub sizes: Mutex<Vec<usize>>,
    }

    impl TrackingPool {
        pub fn failing() -> Self {
            let pool = TrackingPool::default();
            pool.fail.store(true, Ordering::SeqCst);
            pool
        }

        pub fn acquired(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        pub fn balanced(&self) -> bool {
            self.acquired() == self.released()
        }
    }

    impl ScratchPool for TrackingPool {
        fn acquire(&self, len: usize) -> Result<Vec<u8>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::OutOfMemory { size: len });
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().push(len);
            Ok(vec![0; len])
        }

        fn release(&self, buf: Vec<u8>) {
            assert!(self.sizes.lock().unwrap().contains(&buf.len()));
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_heap_pool() {
        let buf = HeapPool.acquire(64).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|b| *b == 0));
        HeapPool.release(buf);

        match HeapPool.acquire(usize::max_value()) {
            Err(Error::OutOfMemory { size }) => assert_eq!(size, usize::max_value()),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_scratch_buf_released_once() {
        let pool = TrackingPool::default();
        {
            let mut buf = ScratchBuf::acquire(&pool, 8).unwrap();
            assert_eq!(buf.len(), 8);
            buf[7] = 1;
            assert_eq!(pool.acquired(), 1);
            assert_eq!(pool.released(), 0);
        }
        assert_eq!(pool.released(), 1);
        assert!(pool.balanced());
    }

    #[test]
    fn test_scratch_buf_acquire_failure() {
        let pool = TrackingPool::failing();
        assert!(matches!(
            ScratchBuf::acquire(&pool, 8),
            Err(Error::OutOfMemory { size: 8 })
        ));
        assert_eq!(pool.acquired(), 0);
        assert_eq!(pool.released(), 0);
    }
}
