//! Grid normalization of a measured snapshot tree.
//!
//! Every block must stack without gaps on the baseline grid: margins,
//! border/padding and outer heights are rounded up to whole multiples of the
//! base line height. Negative or non-finite measurements are clamped first.
//! The transform is pure: it returns a new tree and never touches its input.

extern crate alloc;

use alloc::vec::Vec;

use crate::block::{has_block_children, is_replaced_element};
use crate::metrics::{round_up, Metrics};
use crate::snapshot::{ContentNode, Display};

/// Options for [`sanitize_tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Round metrics onto the baseline grid. When `false` only defect
    /// clamping is applied.
    pub auto_metrics: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self { auto_metrics: true }
    }
}

impl SanitizeOptions {
    pub fn with_auto_metrics(mut self, enabled: bool) -> Self {
        self.auto_metrics = enabled;
        self
    }
}

/// Return a sanitized copy of `node`.
///
/// Figures keep their own metrics (their sizes are chosen per container), so
/// their subtrees are only clamped. Block containers lose their direct text
/// since only element children take part in flattening.
pub fn sanitize_tree(
    node: &ContentNode,
    base_line_height: f32,
    options: SanitizeOptions,
) -> ContentNode {
    let mut out = node.clone();
    sanitize_in_place(&mut out, base_line_height, options);
    out
}

fn sanitize_in_place(node: &mut ContentNode, base_line_height: f32, options: SanitizeOptions) {
    node.attributes.remove("id");
    clamp_metrics(node);

    if node.is_figure() {
        for child in &mut node.children {
            clamp_subtree(child);
        }
        return;
    }

    let old_children_extent = children_extent(&node.children);
    if has_block_children(node) && !node.has_class("keeptogether") {
        node.text.clear();
        for child in &mut node.children {
            sanitize_in_place(child, base_line_height, options);
        }
    } else {
        for child in &mut node.children {
            clamp_subtree(child);
        }
    }

    if options.auto_metrics && base_line_height > 0.0 && node.display != Display::None {
        let grown = children_extent(&node.children) - old_children_extent;
        normalize_metrics(node, base_line_height, grown.max(0.0));
    }
}

fn clamp_metrics(node: &mut ContentNode) {
    if node.metrics.is_defective() {
        log::warn!("Clamping defective metrics on <{}>", node.tag);
    }
    node.metrics = node.metrics.sanitized();
}

fn clamp_subtree(node: &mut ContentNode) {
    node.metrics = node.metrics.sanitized();
    for child in &mut node.children {
        clamp_subtree(child);
    }
}

/// Total stacked height of visible children including margins.
fn children_extent(children: &[ContentNode]) -> f32 {
    children
        .iter()
        .filter(|c| c.display != Display::None)
        .map(|c| c.metrics.outer_height + c.metrics.margin_height())
        .sum()
}

/// Snap one element's box to the grid.
///
/// `children_growth` is how much taller the already-normalized children
/// became; it is added to the content height of block containers.
fn normalize_metrics(node: &mut ContentNode, lh: f32, children_growth: f32) {
    let keep_together = is_replaced_element(node) || node.has_class("keeptogether");
    let m = &mut node.metrics;

    m.margin_top = round_up(m.margin_top, lh);
    m.margin_bottom = round_up(m.margin_bottom, lh);

    if keep_together {
        pad_to_grid(m, lh);
        return;
    }

    if m.line_height == 0.0 {
        m.line_height = lh;
    } else if m.line_height % lh != 0.0 {
        let snapped = round_up(m.line_height, lh);
        // Text reflows at the new line pitch with the same number of lines.
        let lines = (m.height / m.line_height).round();
        if lines > 0.0 {
            m.height = lines * snapped;
        }
        m.line_height = snapped;
    }
    m.height += children_growth;

    let bp_top = m.bp_top();
    if bp_top % lh != 0.0 {
        m.padding_top = round_up(bp_top, lh) - m.border_top;
    }
    let bp_bottom = m.bp_bottom();
    if bp_bottom % lh != 0.0 {
        m.padding_bottom = round_up(bp_bottom, lh) - m.border_bottom;
    }
    m.outer_height = m.height + m.bp_height();

    if m.outer_height % lh != 0.0 {
        log::info!("Forcing bottom padding on <{}> to restore grid", node.tag);
    }
    pad_to_grid(m, lh);
}

fn pad_to_grid(m: &mut Metrics, lh: f32) {
    let rem = m.outer_height % lh;
    if rem != 0.0 {
        let pad = lh - rem;
        m.padding_bottom += pad;
        m.outer_height += pad;
    }
}

/// Sanitize a list of sibling roots (used for grid templates).
pub fn sanitize_all(
    nodes: &[ContentNode],
    base_line_height: f32,
    options: SanitizeOptions,
) -> Vec<ContentNode> {
    nodes
        .iter()
        .map(|n| sanitize_tree(n, base_line_height, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(outer: f32) -> ContentNode {
        ContentNode::element("p").with_height(outer).with_text("text")
    }

    #[test]
    fn margins_round_up_to_grid() {
        let mut p = para(40.0);
        p.metrics.margin_top = 5.0;
        p.metrics.margin_bottom = 20.0;
        let out = sanitize_tree(&p, 20.0, SanitizeOptions::default());
        assert_eq!(out.metrics.margin_top, 20.0);
        assert_eq!(out.metrics.margin_bottom, 20.0);
        assert_eq!(out.metrics.outer_height, 40.0);
    }

    #[test]
    fn replaced_elements_are_padded_not_rescaled() {
        let img = ContentNode::element("img").with_height(50.0);
        let out = sanitize_tree(&img, 20.0, SanitizeOptions::default());
        assert_eq!(out.metrics.outer_height, 60.0);
        assert_eq!(out.metrics.padding_bottom, 10.0);
        assert_eq!(out.metrics.height, 50.0);
    }

    #[test]
    fn odd_line_height_is_snapped_and_text_rescaled() {
        let mut p = para(50.0);
        p.metrics.line_height = 25.0;
        let out = sanitize_tree(&p, 20.0, SanitizeOptions::default());
        assert_eq!(out.metrics.line_height, 40.0);
        assert_eq!(out.metrics.height, 80.0);
        assert_eq!(out.metrics.outer_height, 80.0);
    }

    #[test]
    fn border_padding_snaps_to_grid() {
        let mut p = para(46.0);
        p.metrics.padding_top = 3.0;
        p.metrics.padding_bottom = 3.0;
        p.metrics.height = 40.0;
        let out = sanitize_tree(&p, 20.0, SanitizeOptions::default());
        assert_eq!(out.metrics.bp_top(), 20.0);
        assert_eq!(out.metrics.bp_bottom(), 20.0);
        assert_eq!(out.metrics.outer_height, 80.0);
    }

    #[test]
    fn defects_are_clamped_even_without_auto_metrics() {
        let mut p = para(30.0);
        p.metrics.margin_top = -10.0;
        let out = sanitize_tree(&p, 20.0, SanitizeOptions::default().with_auto_metrics(false));
        assert_eq!(out.metrics.margin_top, 0.0);
        assert_eq!(out.metrics.outer_height, 30.0);
    }

    #[test]
    fn container_grows_with_padded_children() {
        let div = ContentNode::element("div")
            .with_height(30.0)
            .with_child(ContentNode::element("img").with_height(30.0));
        let out = sanitize_tree(&div, 20.0, SanitizeOptions::default());
        assert_eq!(out.children[0].metrics.outer_height, 40.0);
        assert_eq!(out.metrics.outer_height, 40.0);
    }

    #[test]
    fn input_tree_is_untouched() {
        let p = para(30.0).with_attr("id", "x");
        let out = sanitize_tree(&p, 20.0, SanitizeOptions::default());
        assert_eq!(p.metrics.outer_height, 30.0);
        assert_eq!(p.attr("id"), Some("x"));
        assert_eq!(out.attr("id"), None);
    }
}
