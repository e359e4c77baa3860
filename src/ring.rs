//! Lock-free single-producer/single-consumer byte ring buffer.
//!
//! One `Ring` is shared between exactly two threads (a writer and a reader)
//! per (direction × audio/MIDI). Capacity is fixed at construction and never
//! grows; all allocation happens up front so the realtime path only touches
//! preallocated memory.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Maximum device-side latency the rings are sized to absorb, in frames.
pub const MAX_LATENCY_FRAMES: usize = 16384;

#[repr(align(64))]
struct CachePadded<T>(T);

/// Byte-granular SPSC FIFO. `capacity` must be a power of two so index
/// arithmetic can use masking instead of modulo.
pub struct Ring {
    buf: Box<[u8]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

impl Ring {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            buf: vec![0_u8; capacity].into_boxed_slice(),
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Bytes available to read. Callable from the reader thread.
    pub fn read_space(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Bytes available to write. Callable from the writer thread.
    pub fn write_space(&self) -> usize {
        self.capacity() - self.read_space()
    }

    /// Reads up to `dst.len()` bytes, returning the number actually read.
    /// Reader-side only.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.read_space());
        let tail = self.tail.0.load(Ordering::Relaxed);
        for (i, slot) in dst.iter_mut().enumerate().take(n) {
            *slot = self.buf[(tail.wrapping_add(i)) & self.mask];
        }
        self.tail.0.store(tail.wrapping_add(n), Ordering::Release);
        n
    }

    /// Discards up to `n` bytes without copying them anywhere. Reader-side
    /// only; this is the ring's `read(NULL, n)` contract.
    pub fn discard(&self, n: usize) -> usize {
        let n = n.min(self.read_space());
        let tail = self.tail.0.load(Ordering::Relaxed);
        self.tail.0.store(tail.wrapping_add(n), Ordering::Release);
        n
    }

    /// Writes up to `src.len()` bytes, returning the number actually
    /// written. Writer-side only.
    pub fn write(&self, src: &[u8]) -> usize {
        let n = src.len().min(self.write_space());
        let head = self.head.0.load(Ordering::Relaxed);
        for (i, &byte) in src.iter().enumerate().take(n) {
            self.buf[(head.wrapping_add(i)) & self.mask] = byte;
        }
        self.head.0.store(head.wrapping_add(n), Ordering::Release);
        n
    }
}

// SAFETY: `Ring` is designed for exactly one writer thread and one reader
// thread operating concurrently; the head/tail protocol never requires the
// buffer itself to be accessed by more than one side at a time for a given
// byte range.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rounds_capacity_to_power_of_two() {
        let r = Ring::new(100);
        assert_eq!(r.capacity(), 128);
    }

    #[test]
    fn fifo_ordering_single_threaded() {
        let r = Ring::new(16);
        assert_eq!(r.write(&[1, 2, 3, 4]), 4);
        let mut out = [0_u8; 4];
        assert_eq!(r.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn space_invariant_holds_after_operations() {
        let r = Ring::new(64);
        let cap = r.capacity();
        r.write(&[0_u8; 20]);
        let mut scratch = [0_u8; 8];
        r.read(&mut scratch);
        assert_eq!(r.read_space() + r.write_space(), cap);
        r.discard(5);
        assert_eq!(r.read_space() + r.write_space(), cap);
    }

    #[test]
    fn discard_advances_without_copying() {
        let r = Ring::new(16);
        r.write(&[9, 8, 7, 6]);
        assert_eq!(r.discard(2), 2);
        let mut out = [0_u8; 2];
        assert_eq!(r.read(&mut out), 2);
        assert_eq!(out, [7, 6]);
    }

    #[test]
    fn partial_write_when_nearly_full() {
        let r = Ring::new(8);
        assert_eq!(r.write(&[0_u8; 6]), 6);
        assert_eq!(r.write(&[0_u8; 6]), 2);
        assert_eq!(r.write_space(), 0);
    }

    #[test]
    fn concurrent_spsc_preserves_order_and_total() {
        let ring = Arc::new(Ring::new(4096));
        let total: usize = 200_000;
        let writer_ring = ring.clone();
        let writer = thread::spawn(move || {
            let mut sent = 0usize;
            while sent < total {
                let byte = (sent % 256) as u8;
                if writer_ring.write(&[byte]) == 1 {
                    sent += 1;
                }
            }
        });
        let mut received = Vec::with_capacity(total);
        let mut buf = [0_u8; 1];
        while received.len() < total {
            if ring.read(&mut buf) == 1 {
                received.push(buf[0]);
            }
        }
        writer.join().unwrap();
        for (i, &b) in received.iter().enumerate() {
            assert_eq!(b, (i % 256) as u8);
        }
    }
}
