//! # Unit Bitmap
//!
//! One bit per unit of an arena, packed into `u64` words. A set bit marks an
//! allocated unit.
//!
//! ```text
//! word 0                                   word 1
//! ┌──────────────────────────────────────┐ ┌──────────────────────────────┐
//! │ b0 b1 b2 … b63                        │ │ b64 … (capacity-1) 0 0 0 0  │
//! └──────────────────────────────────────┘ └──────────────────────────────┘
//!                                                    padding bits stay clear ┘
//! ```
//!
//! The structure does no locking of its own; the owning region serializes all
//! access. Every scan is O(capacity) in the worst case.

use core::ops::Range;

const WORD_BITS: usize = u64::BITS as usize;

/// Mask with bits `[lo, hi)` of a single word set.
#[inline]
const fn word_mask(lo: usize, hi: usize) -> u64 {
    let width = hi - lo;
    if width == WORD_BITS {
        u64::MAX
    } else {
        ((1u64 << width) - 1) << lo
    }
}

/// Fixed-length bit vector over the unit indices of one arena.
///
/// # Invariants
/// - `words.len() == capacity.div_ceil(64)`.
/// - Bits at or beyond `capacity` are never set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitBitmap {
    words: Vec<u64>,
    capacity: usize,
}

impl UnitBitmap {
    /// Create a fully clear bitmap of `capacity` bits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
        }
    }

    /// Number of bits (units) tracked.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the bit at `index` is set.
    #[inline]
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.capacity);
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Split `[index, index + len)` into `(word, mask)` pairs.
    fn word_masks(index: usize, len: usize) -> impl Iterator<Item = (usize, u64)> {
        let end = index + len;
        let mut pos = index;
        core::iter::from_fn(move || {
            if pos >= end {
                return None;
            }
            let word = pos / WORD_BITS;
            let lo = pos % WORD_BITS;
            let hi = (end - word * WORD_BITS).min(WORD_BITS);
            pos = word * WORD_BITS + hi;
            Some((word, word_mask(lo, hi)))
        })
    }

    /// Mark `[index, index + len)` as allocated.
    ///
    /// The caller guarantees the run is in bounds and currently clear.
    pub fn set_run(&mut self, index: usize, len: usize) {
        debug_assert!(index + len <= self.capacity);
        for (word, mask) in Self::word_masks(index, len) {
            debug_assert_eq!(self.words[word] & mask, 0, "run already partly set");
            self.words[word] |= mask;
        }
    }

    /// Mark `[index, index + len)` as free.
    ///
    /// The caller guarantees the run is in bounds and currently set.
    pub fn clear_run(&mut self, index: usize, len: usize) {
        debug_assert!(index + len <= self.capacity);
        for (word, mask) in Self::word_masks(index, len) {
            debug_assert_eq!(self.words[word] & mask, mask, "run already partly clear");
            self.words[word] &= !mask;
        }
    }

    /// Whether every bit of `[index, index + len)` is set.
    #[must_use]
    pub fn is_run_set(&self, index: usize, len: usize) -> bool {
        index + len <= self.capacity
            && Self::word_masks(index, len).all(|(word, mask)| self.words[word] & mask == mask)
    }

    /// Whether every bit of `[index, index + len)` is clear.
    #[must_use]
    pub fn is_run_clear(&self, index: usize, len: usize) -> bool {
        index + len <= self.capacity
            && Self::word_masks(index, len).all(|(word, mask)| self.words[word] & mask == 0)
    }

    /// First bit in `[from, until)` for which `view(word)` has a one.
    fn scan(&self, from: usize, until: usize, view: impl Fn(u64) -> u64) -> Option<usize> {
        let until = until.min(self.capacity);
        if from >= until {
            return None;
        }
        let mut word = from / WORD_BITS;
        let mut bits = view(self.words[word]) & (u64::MAX << (from % WORD_BITS));
        loop {
            if bits != 0 {
                let found = word * WORD_BITS + bits.trailing_zeros() as usize;
                return (found < until).then_some(found);
            }
            word += 1;
            if word * WORD_BITS >= until {
                return None;
            }
            bits = view(self.words[word]);
        }
    }

    /// Index of the first set bit at or after `index`.
    #[must_use]
    pub fn find_first_set_from(&self, index: usize) -> Option<usize> {
        self.scan(index, self.capacity, |w| w)
    }

    /// Index of the first clear bit at or after `index`.
    #[must_use]
    pub fn find_first_clear_from(&self, index: usize) -> Option<usize> {
        self.scan(index, self.capacity, |w| !w)
    }

    /// First run of `length` clear bits at or after `start_hint` whose start
    /// satisfies `start & align_mask == 0`.
    ///
    /// `align_mask` must be of the form `2^n - 1`. Returns `None` if no such
    /// run fits before the end of the bitmap.
    #[must_use]
    pub fn find_free_run(&self, start_hint: usize, length: usize, align_mask: usize) -> Option<usize> {
        debug_assert_eq!(align_mask & align_mask.wrapping_add(1), 0);
        if length == 0 || length > self.capacity {
            return None;
        }
        let last_start = self.capacity - length;
        let mut start = start_hint;
        loop {
            let clear = self.find_first_clear_from(start)?;
            let index = clear.checked_add(align_mask)? & !align_mask;
            if index > last_start {
                return None;
            }
            match self.scan(index, index + length, |w| w) {
                // The run is blocked; resume right after the blocking bit.
                Some(set) => start = set + 1,
                None => return Some(index),
            }
        }
    }

    /// Iterate over the maximal clear runs inside `[from, until)`.
    #[must_use]
    pub fn clear_runs(&self, from: usize, until: usize) -> ClearRuns<'_> {
        ClearRuns {
            bitmap: self,
            cursor: from,
            until: until.min(self.capacity),
        }
    }
}

/// Iterator over clear runs, see [`UnitBitmap::clear_runs`].
#[derive(Debug)]
pub struct ClearRuns<'a> {
    bitmap: &'a UnitBitmap,
    cursor: usize,
    until: usize,
}

impl Iterator for ClearRuns<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let Some(start) = self.bitmap.scan(self.cursor, self.until, |w| !w) else {
            self.cursor = self.until;
            return None;
        };
        let end = self
            .bitmap
            .scan(start, self.until, |w| w)
            .unwrap_or(self.until);
        self.cursor = end;
        Some(start..end)
    }
}
