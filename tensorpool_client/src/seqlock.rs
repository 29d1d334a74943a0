//! Per-slot seqlock over the `seq_commit` word.
//!
//! Writer: `begin_write(seq)` stores the odd value, the slot is written,
//! `end_write(seq)` release-stores the even value. Reader: `load()`,
//! copy the slot, `recheck()`; the copy is valid only if both observations
//! are equal and even.

use std::sync::atomic::{AtomicU64, Ordering, fence};
use tp::shm::slot::{seq_committed, seq_in_progress};

/// Seqlock view of one slot's `seq_commit` word.
#[derive(Debug, Clone, Copy)]
pub struct SlotSeqLock<'a> {
    word: &'a AtomicU64,
}

impl<'a> SlotSeqLock<'a> {
    /// Wrap a mapped `seq_commit` word.
    pub fn new(word: &'a AtomicU64) -> Self {
        Self { word }
    }

    /// Current `seq_commit` with acquire ordering (first reader observation).
    #[inline]
    pub fn load(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    /// Second reader observation, ordered after the slot copy.
    #[inline]
    pub fn recheck(&self) -> u64 {
        fence(Ordering::Acquire);
        self.word.load(Ordering::Relaxed)
    }

    /// Mark `seq` in progress; slot writes that follow are ordered after it.
    #[inline]
    pub fn begin_write(&self, seq: u64) {
        self.word.store(seq_in_progress(seq), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Publish `seq`; every slot write before this call becomes visible first.
    #[inline]
    pub fn end_write(&self, seq: u64) {
        self.word.store(seq_committed(seq), Ordering::Release);
    }

    /// Reset to the never-written state.
    #[inline]
    pub fn clear(&self) {
        self.word.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp::shm::slot::{frame_seq, is_stable};

    #[test]
    fn write_cycle() {
        let word = AtomicU64::new(0);
        let lock = SlotSeqLock::new(&word);

        lock.begin_write(5);
        assert!(!is_stable(lock.load()));
        assert_eq!(frame_seq(lock.load()), 5);

        lock.end_write(5);
        assert!(is_stable(lock.load()));
        assert_eq!(frame_seq(lock.load()), 5);
        assert_eq!(lock.recheck(), lock.load());
    }

    #[test]
    fn clear_returns_to_zero() {
        let word = AtomicU64::new(seq_committed(9));
        let lock = SlotSeqLock::new(&word);
        lock.clear();
        assert_eq!(lock.load(), 0);
    }
}
