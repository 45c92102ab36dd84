//! Resume points in a content stream.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A precise point in the content stream at which a page begins or ends.
///
/// Positions are ordered by progress: a position is *greater* than another
/// when it lies further along the stream. Block index dominates, then less
/// overhang counts as further along, then figure index.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ContentPosition {
    /// Next block to lay out, `usize::MAX` at the end sentinel.
    pub block: usize,
    /// Next figure to consider, `usize::MAX` at the end sentinel.
    pub figure: usize,
    /// Height of `block` still to be shown, zero when it starts fresh.
    pub overhang: f32,
}

impl ContentPosition {
    /// Position past all content.
    pub const END: Self = Self {
        block: usize::MAX,
        figure: usize::MAX,
        overhang: f32::INFINITY,
    };

    /// Start of the stream.
    pub const START: Self = Self {
        block: 0,
        figure: 0,
        overhang: 0.0,
    };

    /// Build a position. Negative or NaN overhang is read as zero.
    pub fn new(block: usize, figure: usize, overhang: f32) -> Self {
        let overhang = if overhang > 0.0 { overhang } else { 0.0 };
        Self {
            block,
            figure,
            overhang,
        }
    }

    pub fn at_beginning(&self) -> bool {
        self.block == 0 && self.figure == 0 && self.overhang == 0.0
    }

    pub fn is_end(&self) -> bool {
        self.block == usize::MAX
    }

    /// Sort key in document order: negative when `a` is further along than
    /// `b`, zero when equal, positive when `b` is further along.
    pub fn sort(a: &Self, b: &Self) -> Ordering {
        b.cmp(a)
    }

    /// True when `other` is at or ahead of `self`.
    pub fn less_or_equal(&self, other: &Self) -> bool {
        self <= other
    }

    /// True when `self` is strictly ahead of `other`.
    pub fn greater(&self, other: &Self) -> bool {
        self > other
    }
}

impl Default for ContentPosition {
    fn default() -> Self {
        Self::START
    }
}

impl Ord for ContentPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.block
            .cmp(&other.block)
            .then_with(|| other.overhang.total_cmp(&self.overhang))
            .then_with(|| self.figure.cmp(&other.figure))
    }
}

impl PartialOrd for ContentPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ContentPosition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ContentPosition {}
