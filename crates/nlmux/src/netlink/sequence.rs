//! Sequence number allocation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out netlink sequence numbers.
///
/// Numbers increase monotonically and wrap; 0 is never returned because the
/// kernel uses it for unsolicited multicast frames.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU32,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAllocator {
    /// Start at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start at `first` (0 is skipped).
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Next number, skipping 0 and any number `in_use` reports as taken.
    pub fn allocate(&self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let seq = self.next.fetch_add(1, Ordering::Relaxed);
            if seq != 0 && !in_use(seq) {
                return seq;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_monotonic_from_one() {
        let seqs = SequenceAllocator::new();
        assert_eq!(seqs.allocate(|_| false), 1);
        assert_eq!(seqs.allocate(|_| false), 2);
    }

    #[test]
    fn test_wrap_skips_zero_and_busy() {
        let seqs = SequenceAllocator::starting_at(u32::MAX);
        assert_eq!(seqs.allocate(|_| false), u32::MAX);
        assert_eq!(seqs.allocate(|s| s == 1), 2);
    }

    #[test]
    fn test_unique_across_threads() {
        let seqs = Arc::new(SequenceAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seqs = seqs.clone();
                std::thread::spawn(move || (0..1000).map(|_| seqs.allocate(|_| false)).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(all.insert(seq), "duplicate sequence {}", seq);
            }
        }
        assert_eq!(all.len(), 8000);
    }
}
