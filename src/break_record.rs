//! The mutable cursor threaded through single-page construction.

extern crate alloc;

use alloc::collections::BTreeMap;

use crate::content::Content;
use crate::position::ContentPosition;

/// Placement state of one figure index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FigureStatus {
    /// Not reached yet.
    Pending,
    /// Skipped over; to be placed on a later opportunity.
    Delayed,
    /// No size variant fit during an attempt; retried later.
    Failed,
    /// Placed (or dropped as optional).
    Used,
}

/// Breaking state of the page under construction.
///
/// Figures below `figure_index` are `Used` unless recorded otherwise in the
/// status map, which only ever holds `Delayed` or `Failed` entries. Figures at
/// or past `figure_index` are `Pending`.
#[derive(Clone, Debug, Default)]
pub struct BreakRecord {
    /// Next block to consume.
    pub index: usize,
    /// High-water mark of considered figures.
    pub figure_index: usize,
    /// Height of block `index` left over from the previous column.
    pub overhang: f32,
    /// Number of the page this record is building (zero-based).
    pub page_number: usize,
    statuses: BTreeMap<usize, FigureStatus>,
}

impl BreakRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record from a finished page boundary.
    ///
    /// Delayed and failed figures are not part of a position; callers that
    /// continue a pagination pass carry the previous record instead.
    pub fn from_position(position: &ContentPosition) -> Self {
        Self {
            index: position.block,
            figure_index: position.figure,
            overhang: position.overhang,
            ..Self::default()
        }
    }

    pub fn position(&self) -> ContentPosition {
        ContentPosition::new(self.index, self.figure_index, self.overhang)
    }

    pub fn at_start(&self) -> bool {
        self.index == 0 && self.figure_index == 0 && self.overhang == 0.0
    }

    /// Current status of figure `figure`.
    pub fn status(&self, figure: usize) -> FigureStatus {
        match self.statuses.get(&figure) {
            Some(status) => *status,
            None if figure < self.figure_index => FigureStatus::Used,
            None => FigureStatus::Pending,
        }
    }

    /// Delayed figure indices, oldest first.
    pub fn delayed(&self) -> impl Iterator<Item = usize> + '_ {
        self.with_status(FigureStatus::Delayed)
    }

    /// Failed figure indices, ascending.
    pub fn failed(&self) -> impl Iterator<Item = usize> + '_ {
        self.with_status(FigureStatus::Failed)
    }

    pub fn has_delayed(&self) -> bool {
        self.delayed().next().is_some()
    }

    fn with_status(&self, wanted: FigureStatus) -> impl Iterator<Item = usize> + '_ {
        self.statuses
            .iter()
            .filter(move |(_, status)| **status == wanted)
            .map(|(idx, _)| *idx)
    }

    /// Record that `figure` has been consumed.
    ///
    /// Passing over pending figures delays them. Using a figure below the
    /// high-water mark clears its delayed or failed state.
    pub fn use_figure(&mut self, figure: usize) {
        if figure < self.figure_index {
            self.statuses.remove(&figure);
            return;
        }
        for skipped in self.figure_index..figure {
            self.statuses.insert(skipped, FigureStatus::Delayed);
        }
        self.figure_index = figure.saturating_add(1);
    }

    /// Record a placement attempt that exhausted every size variant.
    pub fn failed_figure(&mut self, figure: usize) {
        self.use_figure(figure);
        self.statuses.insert(figure, FigureStatus::Failed);
    }

    /// Defer `figure` to a later opportunity.
    pub fn delay_figure(&mut self, figure: usize) {
        if self.status(figure) != FigureStatus::Delayed {
            self.use_figure(figure);
            self.statuses.insert(figure, FigureStatus::Delayed);
        }
    }

    pub fn figure_used(&self, figure: usize) -> bool {
        self.status(figure) == FigureStatus::Used
    }

    /// True when nothing is left to show.
    ///
    /// Remaining fallback blocks count as done when their figure was used or
    /// is optional. Every required figure must be used: delayed, failed and
    /// pending required figures all keep the stream open.
    pub fn at_end(&self, content: &Content) -> bool {
        if self.overhang != 0.0 {
            return false;
        }

        let blocks = &content.blocks;
        let mut i = self.index;
        while i < blocks.len() {
            let block = &blocks[i];
            let Some(figure) = block.figure.filter(|_| block.is_fallback) else {
                return false;
            };
            let optional = content.figures.get(figure).is_none_or(|f| f.optional);
            if !self.figure_used(figure) && !optional {
                return false;
            }
            i = block.next_non_child.unwrap_or(blocks.len());
        }

        content
            .figures
            .iter()
            .enumerate()
            .all(|(idx, f)| f.optional || self.figure_used(idx))
    }

    /// Full progress equality: block, figure, overhang and deferral state.
    ///
    /// `==` compares the block index only.
    pub fn same_progress(&self, other: &Self) -> bool {
        self.index == other.index
            && self.figure_index == other.figure_index
            && self.overhang == other.overhang
            && self.statuses == other.statuses
    }
}

/// Narrow equality on the block index.
///
/// Two records with the same `index` but different figure state compare
/// equal. Use [`BreakRecord::same_progress`] to compare everything.
// TODO: decide whether figure state should join equality once no caller
// depends on the narrow form.
impl PartialEq for BreakRecord {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::figure::Figure;

    fn content_with(blocks: usize, figures: &[bool]) -> Content {
        let mut content = Content::empty(20.0, 300.0);
        for i in 0..blocks {
            let mut b = Block::leaf(i, 20.0);
            b.next_sibling = (i + 1 < blocks).then_some(i + 1);
            b.next_non_child = b.next_sibling;
            content.blocks.push(b);
        }
        for (i, optional) in figures.iter().enumerate() {
            let mut f = Figure::new(i, 0);
            f.optional = *optional;
            content.figures.push(f);
        }
        content
    }

    #[test]
    fn fresh_record_is_at_start() {
        let br = BreakRecord::new();
        assert!(br.at_start());
        assert!(br.position().at_beginning());

        let mut moved = br.clone();
        moved.index = 1;
        assert!(!moved.at_start());

        let mut used = BreakRecord::new();
        used.use_figure(0);
        assert!(!used.at_start());
    }

    #[test]
    fn use_figure_advances_and_delays() {
        let mut br = BreakRecord::new();
        br.use_figure(0);
        assert_eq!(br.figure_index, 1);
        assert_eq!(br.delayed().count(), 0);

        br.use_figure(10);
        assert_eq!(br.figure_index, 11);
        assert_eq!(br.delayed().count(), 9);

        br.use_figure(5);
        assert_eq!(br.figure_index, 11);
        assert_eq!(br.delayed().count(), 8);
        assert!(br.figure_used(5));
        assert!(!br.figure_used(4));
    }

    #[test]
    fn use_figure_twice_does_not_double_advance() {
        let mut br = BreakRecord::new();
        br.use_figure(5);
        br.use_figure(5);
        assert_eq!(br.figure_index, 6);
        assert!(br.figure_used(5));
    }

    #[test]
    fn failed_then_used_clears_failure() {
        let mut br = BreakRecord::new();
        br.failed_figure(0);
        assert_eq!(br.status(0), FigureStatus::Failed);
        assert!(!br.figure_used(0));
        assert_eq!(br.failed().collect::<Vec<_>>(), vec![0]);

        br.use_figure(0);
        assert_eq!(br.status(0), FigureStatus::Used);
        assert!(br.figure_used(0));
        assert_eq!(br.failed().count(), 0);
    }

    #[test]
    fn figure_used_cases() {
        let mut br = BreakRecord::new();
        assert!(!br.figure_used(0));
        br.use_figure(0);
        assert!(br.figure_used(0));
        assert!(!br.figure_used(1));
        br.use_figure(2);
        assert!(!br.figure_used(1));
        assert_eq!(br.status(1), FigureStatus::Delayed);
        assert_eq!(br.status(3), FigureStatus::Pending);
    }

    #[test]
    fn delay_figure_is_not_reapplied() {
        let mut br = BreakRecord::new();
        br.delay_figure(2);
        assert_eq!(br.figure_index, 3);
        assert_eq!(br.delayed().collect::<Vec<_>>(), vec![0, 1, 2]);
        br.delay_figure(2);
        assert_eq!(br.figure_index, 3);
    }

    #[test]
    fn clone_is_deep() {
        let mut br = BreakRecord::new();
        br.use_figure(2);
        let mut copy = br.clone();
        copy.use_figure(0);
        assert_eq!(br.delayed().count(), 2);
        assert_eq!(copy.delayed().count(), 1);
    }

    #[test]
    fn equality_is_narrow() {
        let mut a = BreakRecord::new();
        let b = BreakRecord::new();
        a.use_figure(3);
        assert_eq!(a, b);
        assert!(!a.same_progress(&b));
    }

    #[test]
    fn at_end_requires_blocks_and_required_figures() {
        let content = content_with(4, &[false, true]);
        let mut br = BreakRecord::new();
        assert!(!br.at_end(&content));

        br.index = 4;
        assert!(!br.at_end(&content));

        br.use_figure(1);
        assert_eq!(br.status(0), FigureStatus::Delayed);
        assert!(!br.at_end(&content));

        br.failed_figure(0);
        assert!(!br.at_end(&content));

        br.use_figure(0);
        assert!(br.at_end(&content));

        br.overhang = 20.0;
        assert!(!br.at_end(&content));
    }

    #[test]
    fn optional_figures_do_not_block_end() {
        let content = content_with(2, &[true, true]);
        let mut br = BreakRecord::new();
        br.index = 2;
        assert!(br.at_end(&content));
    }

    #[test]
    fn trailing_fallback_of_optional_figure_is_skipped() {
        let mut content = content_with(3, &[true]);
        content.blocks[2].is_fallback = true;
        content.blocks[2].figure = Some(0);
        let mut br = BreakRecord::new();
        br.index = 2;
        assert!(br.at_end(&content));

        content.figures[0].optional = false;
        assert!(!br.at_end(&content));
        br.use_figure(0);
        assert!(br.at_end(&content));
    }
}
