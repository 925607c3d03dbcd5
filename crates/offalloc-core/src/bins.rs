//! Two-level bitmap over the size classes.
//!
//! The top word has one bit per exponent; each exponent owns an 8-bit leaf
//! word with one bit per mantissa step. A leaf bit is set exactly when its
//! bin has a free-list head, and a top bit exactly when its leaf word is
//! nonzero. [`BinIndex::set_head`] is the only mutator, so both bitmaps stay
//! in lockstep with the heads.

use crate::allocator::NodeIndex;
use crate::small_float::MANTISSA_BITS;

/// Number of top-level bins (one per exponent).
pub const NUM_TOP_BINS: usize = 32;

/// Number of leaf bins under each top bin (one per mantissa step).
pub const BINS_PER_LEAF: usize = 8;

/// Shift from a class index to its top bin.
pub const TOP_BINS_INDEX_SHIFT: u32 = MANTISSA_BITS;

/// Mask from a class index to its leaf bin.
pub const LEAF_BINS_INDEX_MASK: u32 = 0x7;

/// Total number of size classes.
pub const NUM_LEAF_BINS: usize = NUM_TOP_BINS * BINS_PER_LEAF;

/// Returns the lowest set bit of `mask` at or above `start`.
#[inline]
#[must_use]
pub fn find_lowest_set_bit_after(mask: u32, start: u32) -> Option<u32> {
    let bits_after = mask & u32::MAX.checked_shl(start)?;
    if bits_after == 0 {
        None
    } else {
        Some(bits_after.trailing_zeros())
    }
}

#[inline]
const fn split(bin: u32) -> (usize, u32) {
    ((bin >> TOP_BINS_INDEX_SHIFT) as usize, bin & LEAF_BINS_INDEX_MASK)
}

/// Free-list heads plus the occupancy bitmaps that index them.
#[derive(Debug, Clone)]
pub struct BinIndex {
    used_bins_top: u32,
    used_bins: [u8; NUM_TOP_BINS],
    heads: [Option<NodeIndex>; NUM_LEAF_BINS],
}

impl BinIndex {
    /// Creates an index with every bin empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used_bins_top: 0,
            used_bins: [0; NUM_TOP_BINS],
            heads: [None; NUM_LEAF_BINS],
        }
    }

    /// Empties every bin.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Head node of `bin`'s free list.
    #[inline]
    #[must_use]
    pub fn head(&self, bin: u32) -> Option<NodeIndex> {
        self.heads[bin as usize]
    }

    /// Replaces the head of `bin`, setting or clearing the bitmap bits when
    /// the bin turns non-empty or empty.
    pub fn set_head(&mut self, bin: u32, head: Option<NodeIndex>) {
        let (top, leaf) = split(bin);
        let was_empty = self.heads[bin as usize].is_none();
        self.heads[bin as usize] = head;
        match (was_empty, head.is_some()) {
            (true, true) => {
                self.used_bins[top] |= 1 << leaf;
                self.used_bins_top |= 1 << top;
            }
            (false, false) => {
                self.used_bins[top] &= !(1 << leaf);
                if self.used_bins[top] == 0 {
                    self.used_bins_top &= !(1 << top);
                }
            }
            _ => {}
        }
    }

    /// Smallest non-empty bin whose class index is `>= min_bin`.
    #[must_use]
    pub fn find_at_or_after(&self, min_bin: u32) -> Option<u32> {
        let (min_top, min_leaf) = split(min_bin);
        if min_top >= NUM_TOP_BINS {
            return None;
        }

        if self.used_bins_top & (1 << min_top) != 0 {
            let leaf = find_lowest_set_bit_after(u32::from(self.used_bins[min_top]), min_leaf);
            if let Some(leaf) = leaf {
                return Some(((min_top as u32) << TOP_BINS_INDEX_SHIFT) | leaf);
            }
        }

        let top = find_lowest_set_bit_after(self.used_bins_top, min_top as u32 + 1)?;
        // A set top bit guarantees a set leaf bit, and every leaf of a higher
        // exponent fits.
        let leaf = u32::from(self.used_bins[top as usize]).trailing_zeros();
        Some((top << TOP_BINS_INDEX_SHIFT) | leaf)
    }

    /// Largest non-empty bin, found by two reverse bit scans.
    #[must_use]
    pub fn largest(&self) -> Option<u32> {
        if self.used_bins_top == 0 {
            return None;
        }
        let top = 31 - self.used_bins_top.leading_zeros();
        let leaf = 31 - u32::from(self.used_bins[top as usize]).leading_zeros();
        Some((top << TOP_BINS_INDEX_SHIFT) | leaf)
    }

    /// True when no bin holds a free node.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used_bins_top == 0
    }

    /// Whether the leaf bit for `bin` is set.
    #[must_use]
    pub fn is_marked(&self, bin: u32) -> bool {
        let (top, leaf) = split(bin);
        self.used_bins[top] & (1 << leaf) != 0
    }

    /// Whether the top bit for `top` agrees with its leaf word.
    #[must_use]
    pub fn top_consistent(&self, top: usize) -> bool {
        let top_bit = self.used_bins_top & (1 << top) != 0;
        top_bit == (self.used_bins[top] != 0)
    }
}

impl Default for BinIndex {
    fn default() -> Self {
        Self::new()
    }
}
