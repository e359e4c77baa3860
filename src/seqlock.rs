//! Single-writer/single-reader seqlock for small `Copy` snapshots.
//!
//! Used in place of a spinlock for the device-side latency/DLL group: the
//! writer (device thread) bumps a sequence counter around the write, and the
//! reader (host callback) retries if it observes a write in progress. Never
//! blocks either side.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Seqlock<T: Copy> {
    seq: AtomicU64,
    value: UnsafeCell<T>,
}

impl<T: Copy> Seqlock<T> {
    pub fn new(initial: T) -> Self {
        Self {
            seq: AtomicU64::new(0),
            value: UnsafeCell::new(initial),
        }
    }

    /// Single-writer only.
    pub fn write(&self, value: T) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        unsafe {
            *self.value.get() = value;
        }
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Safe for any number of readers; spins only while a write is in
    /// flight, which lasts O(10) instructions.
    pub fn read(&self) -> T {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let value = unsafe { *self.value.get() };
            let after = self.seq.load(Ordering::Acquire);
            if before == after {
                return value;
            }
        }
    }
}

// SAFETY: `T: Copy` and access is mediated entirely through the sequence
// counter protocol above.
unsafe impl<T: Copy + Send> Send for Seqlock<T> {}
unsafe impl<T: Copy + Send> Sync for Seqlock<T> {}
