//! # Resource Bitmap
//!
//! Fixed-capacity occupancy tracking over 32-bit words.
//!
//! The same primitive backs both command-queue slots (any free bit will do)
//! and compute units (a free bit must also be set in the command's
//! eligibility mask).
//!
//! ```text
//!   word 0                             word 1
//!   ┌─┬─┬─┬─┬─────────────────────┬─┐  ┌─┬─┬─┬──────
//!   │1│1│0│1│        ...          │0│  │0│1│0│ ...
//!   └─┴─┴─┴─┴─────────────────────┴─┘  └─┴─┴─┴──────
//!    0 1 2 3                       31   32 33 34
//!        ▲
//!        └── first_clear_bit() == Some(2)
//! ```
//!
//! Bits at or beyond the logical length are never reported as free.

use arrayvec::ArrayVec;

use crate::error::{Error, Result};
use crate::types::{bit_of, index_of, word_of, BITMAP_WORDS, WORD_BITS};

// =============================================================================
// RESOURCE BITMAP
// =============================================================================

/// Occupancy bitmap; a set bit means the resource is held
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceBitmap {
    /// Occupancy words
    words: ArrayVec<u32, BITMAP_WORDS>,
    /// Logical number of bits
    len: usize,
}

impl ResourceBitmap {
    /// Largest supported logical size
    pub const CAPACITY: usize = BITMAP_WORDS * WORD_BITS;

    /// Create an all-free bitmap of `len` bits
    pub fn new(len: usize) -> Result<Self> {
        if len > Self::CAPACITY {
            return Err(Error::InvalidParameter);
        }

        let mut words = ArrayVec::new();
        for _ in 0..len.div_ceil(WORD_BITS) {
            words.push(0);
        }

        Ok(Self { words, len })
    }

    /// Logical number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the bitmap has no bits at all
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Occupancy words, lowest index first
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of held resources
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Bits of `word` that fall inside the logical length
    fn valid_mask(&self, word: usize) -> u32 {
        let start = index_of(word, 0);
        let remaining = self.len.saturating_sub(start);
        if remaining >= WORD_BITS {
            u32::MAX
        } else {
            (1u32 << remaining) - 1
        }
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Lowest-numbered free bit
    pub fn first_clear_bit(&self) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(w, &word)| {
            let free = !word & self.valid_mask(w);
            (free != 0).then(|| index_of(w, free.trailing_zeros() as usize))
        })
    }

    /// Lowest-numbered bit that is set in `mask` and free here
    ///
    /// `mask` is grouped into words the same way as the bitmap; mask words
    /// beyond the bitmap are ignored.
    pub fn first_set_bit_in(&self, mask: &[u32]) -> Option<usize> {
        self.words
            .iter()
            .zip(mask.iter())
            .enumerate()
            .find_map(|(w, (&busy, &eligible))| {
                let candidates = eligible & !busy & self.valid_mask(w);
                (candidates != 0).then(|| index_of(w, candidates.trailing_zeros() as usize))
            })
    }

    /// Check whether bit `index` is held
    pub fn is_set(&self, index: usize) -> Result<bool> {
        self.check(index)?;
        Ok(self.words[word_of(index)] & (1 << bit_of(index)) != 0)
    }

    /// Mark bit `index` held
    pub fn set(&mut self, index: usize) -> Result<()> {
        if self.is_set(index)? {
            return Err(Error::AlreadyHeld { index });
        }
        self.words[word_of(index)] |= 1 << bit_of(index);
        Ok(())
    }

    /// Mark bit `index` free
    pub fn clear(&mut self, index: usize) -> Result<()> {
        if !self.is_set(index)? {
            return Err(Error::NotHeld { index });
        }
        self.words[word_of(index)] &= !(1 << bit_of(index));
        Ok(())
    }

    /// Release every resource
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}
