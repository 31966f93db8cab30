//! Fixed-capacity sample channel shared between one sampling thread and the
//! renderer.
//!
//! Writers (push, pop, resize) serialize on a mutex. The renderer never takes
//! that mutex: [`RingBuffer::read_snapshot`] copies the samples optimistically
//! and validates the copy against a version stamp and the ring indices,
//! retrying a bounded number of times. Slots are stored as `f64` bit patterns
//! in atomics so that a torn read is detected rather than undefined.
//!
//! The slot array lives behind an `RwLock` that only `resize` takes
//! exclusively; push and snapshot both hold it shared, so they never wait on
//! each other.

use std::hint;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use thiserror::Error;

/// Number of optimistic read attempts before a snapshot gives up.
pub const MAX_SNAPSHOT_ATTEMPTS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("snapshot still inconsistent after {attempts} attempts")]
    Inconsistent { attempts: u32 },
}

pub struct RingBuffer {
    slots: RwLock<Box<[AtomicU64]>>,
    head: AtomicU32,
    tail: AtomicU32,
    count: AtomicU32,
    /// Odd while a writer is mutating slots or indices.
    version: AtomicU64,
    write_lock: Mutex<()>,
    resize_lock: Mutex<()>,
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn zeroed(capacity: usize) -> Box<[AtomicU64]> {
    (0..capacity).map(|_| AtomicU64::new(0.0f64.to_bits())).collect()
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        Ok(Self {
            slots: RwLock::new(zeroed(capacity)),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            count: AtomicU32::new(0),
            version: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            resize_lock: Mutex::new(()),
        })
    }

    fn slots(&self) -> RwLockReadGuard<'_, Box<[AtomicU64]>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_write(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    fn end_write(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Append a sample, overwriting the oldest one when full.
    pub fn push(&self, value: f64) {
        let _write = lock(&self.write_lock);
        let slots = self.slots();
        let capacity = slots.len() as u32;

        let head = self.head.load(Ordering::Relaxed);
        let count = self.count.load(Ordering::Relaxed);

        self.begin_write();
        slots[head as usize].store(value.to_bits(), Ordering::Relaxed);
        self.head.store((head + 1) % capacity, Ordering::Relaxed);
        if count < capacity {
            self.count.store(count + 1, Ordering::Relaxed);
        } else {
            let tail = self.tail.load(Ordering::Relaxed);
            self.tail.store((tail + 1) % capacity, Ordering::Relaxed);
        }
        self.end_write();
    }

    /// Remove and return the oldest sample.
    pub fn pop(&self) -> Option<f64> {
        let _write = lock(&self.write_lock);
        let slots = self.slots();
        let capacity = slots.len() as u32;

        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);

        self.begin_write();
        let value = f64::from_bits(slots[tail as usize].load(Ordering::Relaxed));
        self.tail.store((tail + 1) % capacity, Ordering::Relaxed);
        self.count.store(count - 1, Ordering::Relaxed);
        self.end_write();

        Some(value)
    }

    /// Copy up to `max_elems` samples, oldest first.
    pub fn read_snapshot(&self, max_elems: usize) -> Result<Vec<f64>, RingBufferError> {
        let mut buffer = vec![0.0; max_elems.min(self.capacity())];
        let copied = self.read_snapshot_into(&mut buffer)?;
        buffer.truncate(copied);
        Ok(buffer)
    }

    /// Copy up to `buffer.len()` samples, oldest first, into `buffer` and
    /// return how many were written. Never blocks the producer.
    pub fn read_snapshot_into(&self, buffer: &mut [f64]) -> Result<usize, RingBufferError> {
        let slots = self.slots();
        let capacity = slots.len() as u32;

        for _ in 0..MAX_SNAPSHOT_ATTEMPTS {
            let version = self.version.load(Ordering::Acquire);
            if version & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            let count = self.count.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Relaxed);

            if count == 0 {
                return Ok(0);
            }

            let copy_count = (count as usize).min(buffer.len());
            for (i, out) in buffer.iter_mut().take(copy_count).enumerate() {
                let idx = (tail as usize + i) % capacity as usize;
                *out = f64::from_bits(slots[idx].load(Ordering::Relaxed));
            }

            fence(Ordering::Acquire);
            let unchanged = self.version.load(Ordering::Relaxed) == version
                && self.count.load(Ordering::Relaxed) == count
                && self.head.load(Ordering::Relaxed) == head
                && self.tail.load(Ordering::Relaxed) == tail;
            if unchanged {
                return Ok(copy_count);
            }
        }

        Err(RingBufferError::Inconsistent {
            attempts: MAX_SNAPSHOT_ATTEMPTS,
        })
    }

    /// Change the capacity, keeping the most recent `min(len, new_capacity)`
    /// samples in order. Newly added slots are zeroed.
    pub fn resize(&self, new_capacity: usize) -> Result<(), RingBufferError> {
        if new_capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }

        let _resize = lock(&self.resize_lock);
        let _write = lock(&self.write_lock);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        let capacity = slots.len();
        if new_capacity == capacity {
            return Ok(());
        }

        let count = self.count.load(Ordering::Relaxed) as usize;
        let tail = self.tail.load(Ordering::Relaxed) as usize;
        let keep = count.min(new_capacity);
        let skip = count - keep;

        let resized = zeroed(new_capacity);
        for (i, slot) in resized.iter().take(keep).enumerate() {
            let src = (tail + skip + i) % capacity;
            slot.store(slots[src].load(Ordering::Relaxed), Ordering::Relaxed);
        }

        self.begin_write();
        *slots = resized;
        self.head.store((keep % new_capacity) as u32, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.count.store(keep as u32, Ordering::Relaxed);
        self.end_write();

        Ok(())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
