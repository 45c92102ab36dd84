//! Flowable blocks and the pre-order tree walk that produces them.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Error;
use crate::figure::Figure;
use crate::metrics::Metrics;
use crate::sanitize::{sanitize_tree, SanitizeOptions};
use crate::snapshot::{ContentNode, Display};

const REPLACED_ELEMENTS: &[&str] = &[
    "img", "video", "object", "embed", "iframe", "audio", "canvas", "svg", "table",
];
const INLINE_CONTAINERS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6"];
const BLOCK_CONTAINERS: &[&str] = &["div", "article", "ul", "ol", "figure", "aside"];

/// One flowable unit of content in document (pre-)order.
///
/// Links between blocks are indices into [`Content::blocks`](crate::Content).
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub index: usize,
    pub parent: Option<usize>,
    pub next_sibling: Option<usize>,
    /// Next block not contained in this one.
    pub next_non_child: Option<usize>,
    pub has_children: bool,
    /// Can be split across columns.
    pub breakable: bool,
    pub keep_together: bool,
    pub keep_with_next: bool,
    /// Starts a new column.
    pub column_break: bool,
    /// Distance from the top border edge to the bottom of the first line.
    pub first_line: f32,
    /// Inline stand-in for a figure.
    pub is_fallback: bool,
    /// Figure owning this fallback block.
    pub figure: Option<usize>,
    /// Some descendant is a fallback block.
    pub contains_fallback: bool,
    pub metrics: Metrics,
    /// Markup of the whole element, figures removed.
    pub markup: String,
    /// Opening tag when the block has children.
    pub open_tag: Option<String>,
    /// Opening tag used when the block continues from a previous column.
    pub open_tag_zero: Option<String>,
    pub close_tag: Option<String>,
}

impl Block {
    /// A childless, breakable block of the given outer height.
    ///
    /// Links are left empty; callers wiring blocks by hand set them.
    pub fn leaf(index: usize, outer_height: f32) -> Self {
        Self {
            index,
            parent: None,
            next_sibling: None,
            next_non_child: None,
            has_children: false,
            breakable: true,
            keep_together: false,
            keep_with_next: false,
            column_break: false,
            first_line: outer_height,
            is_fallback: false,
            figure: None,
            contains_fallback: false,
            metrics: Metrics::sized(0.0, outer_height),
            markup: String::new(),
            open_tag: None,
            open_tag_zero: None,
            close_tag: None,
        }
    }
}

pub(crate) fn is_replaced_element(node: &ContentNode) -> bool {
    REPLACED_ELEMENTS.contains(&node.tag.as_str())
}

fn is_inline_container(node: &ContentNode) -> bool {
    INLINE_CONTAINERS.contains(&node.tag.as_str())
}

fn is_block_container(node: &ContentNode) -> bool {
    BLOCK_CONTAINERS.contains(&node.tag.as_str())
}

/// Whether `node` should be treated as a container of blocks.
pub(crate) fn has_block_children(node: &ContentNode) -> bool {
    if is_replaced_element(node) || is_inline_container(node) {
        return false;
    }
    if is_block_container(node) {
        return true;
    }
    if node.has_text() {
        return false;
    }
    let mut child_seen = false;
    for child in &node.children {
        if is_inline_container(child) || is_block_container(child) {
            return true;
        }
        child_seen = true;
        match child.display {
            Display::Inline => return false,
            Display::Block => return true,
            Display::None => {}
        }
    }
    child_seen
}

/// Write explicit `value` attributes on ordered list items.
pub(crate) fn renumber_lists(node: &mut ContentNode) {
    if node.tag == "ol" {
        let mut next = node
            .attr("start")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|v| *v != -1)
            .unwrap_or(1);
        for li in node.children.iter_mut().filter(|c| c.tag == "li") {
            if let Some(value) = li
                .attr("value")
                .and_then(|s| s.trim().parse::<i64>().ok())
                .filter(|v| *v != 0 && *v != -1)
            {
                next = value;
            }
            li.attributes.insert("value".into(), alloc::format!("{}", next));
            next += 1;
        }
    }
    for child in &mut node.children {
        renumber_lists(child);
    }
}

/// Copy of `node` with every figure descendant removed.
fn without_figures(node: &ContentNode) -> ContentNode {
    let mut out = node.clone();
    strip_figures(&mut out);
    out
}

fn strip_figures(node: &mut ContentNode) {
    node.children.retain(|c| !c.is_figure());
    for child in &mut node.children {
        strip_figures(child);
    }
}

#[derive(Default)]
struct ChildSummary {
    first_child: Option<usize>,
    contains_fallback: bool,
    has_figures: bool,
}

/// Accumulates blocks and figures during one walk of a sanitized tree.
pub(crate) struct Flattener {
    base_line_height: f32,
    options: SanitizeOptions,
    pub(crate) blocks: Vec<Block>,
    pub(crate) figures: Vec<Figure>,
}

impl Flattener {
    pub(crate) fn new(base_line_height: f32, options: SanitizeOptions) -> Self {
        Self {
            base_line_height,
            options,
            blocks: Vec::with_capacity(64),
            figures: Vec::new(),
        }
    }

    /// Flatten the children of a content root.
    pub(crate) fn run(mut self, root: &ContentNode) -> Result<(Vec<Block>, Vec<Figure>), Error> {
        self.process_children(root, None, false)?;
        link_next_non_child(&mut self.blocks);
        Ok((self.blocks, self.figures))
    }

    fn process_children(
        &mut self,
        node: &ContentNode,
        parent: Option<usize>,
        within_fallback: bool,
    ) -> Result<ChildSummary, Error> {
        let mut summary = ChildSummary::default();
        let mut prev: Option<usize> = None;

        for child in &node.children {
            let placed = if child.is_figure() {
                if within_fallback {
                    log::warn!("Ignoring figure nested inside a fallback");
                    continue;
                }
                summary.has_figures = true;
                let fallback = self.process_figure(child)?;
                if fallback.is_some() && parent.is_some() {
                    summary.contains_fallback = true;
                }
                fallback
            } else {
                let placed = self.build_block(child, within_fallback)?;
                if let Some(idx) = placed {
                    summary.contains_fallback |= self.blocks[idx].contains_fallback;
                }
                placed
            };

            let Some(idx) = placed else {
                continue;
            };
            self.blocks[idx].parent = parent;
            if let Some(p) = prev {
                self.blocks[p].next_sibling = Some(idx);
            }
            if summary.first_child.is_none() {
                summary.first_child = Some(idx);
            }
            prev = Some(idx);
        }
        Ok(summary)
    }

    /// Register a figure and build its fallback block, if any.
    fn process_figure(&mut self, node: &ContentNode) -> Result<Option<usize>, Error> {
        let figure_index = self.figures.len();
        let anchor_index = self.blocks.len();
        let (figure, fallback_node) = Figure::from_node(node, figure_index, anchor_index)?;
        self.figures.push(figure);

        let Some(fallback_node) = fallback_node else {
            return Ok(None);
        };
        // Figures are skipped by the sanitizer, so the fallback is sanitized here.
        let mut fallback_node = sanitize_tree(&fallback_node, self.base_line_height, self.options);
        renumber_lists(&mut fallback_node);
        let placed = self.build_block(&fallback_node, true)?;
        if let Some(idx) = placed {
            self.blocks[idx].is_fallback = true;
            self.blocks[idx].figure = Some(figure_index);
            self.figures[figure_index].fallback = Some(idx);
        }
        Ok(placed)
    }

    fn build_block(
        &mut self,
        node: &ContentNode,
        within_fallback: bool,
    ) -> Result<Option<usize>, Error> {
        if node.display == Display::None || node.metrics.outer_height <= 0.0 {
            log::warn!("Ignoring zero-height <{}> block", node.tag);
            return Ok(None);
        }

        let index = self.blocks.len();
        let replaced = is_replaced_element(node);
        let explicit_keep = node.has_class("keeptogether");
        let mut metrics = node.metrics;
        if metrics.line_height == 0.0 {
            metrics.line_height = self.base_line_height;
        }

        let mut block = Block::leaf(index, metrics.outer_height);
        block.metrics = metrics;
        block.breakable = !replaced;
        block.keep_with_next = node.has_class("keepwithnext");
        block.column_break = node.has_class("columnbreak");
        self.blocks.push(block);

        let mut summary = ChildSummary::default();
        if !replaced && !explicit_keep && has_block_children(node) {
            summary = self.process_children(node, Some(index), within_fallback)?;
        }
        let has_children = summary.first_child.is_some();

        let mut keep_together = replaced || explicit_keep;
        if !keep_together {
            keep_together = metrics.bp_height() + metrics.line_height == metrics.outer_height;
        }

        let first_line = if keep_together {
            metrics.outer_height
        } else if let Some(first) = summary.first_child {
            let child = &self.blocks[first];
            let margin = if metrics.bp_top() > 0.0 && !summary.contains_fallback {
                child.metrics.margin_top
            } else {
                0.0
            };
            metrics.bp_top() + child.first_line + margin
        } else {
            metrics.bp_top() + metrics.line_height
        };

        let markup_node = if summary.has_figures {
            without_figures(node)
        } else {
            node.clone()
        };

        let block = &mut self.blocks[index];
        block.has_children = has_children;
        block.keep_together = keep_together;
        block.first_line = first_line;
        block.contains_fallback = summary.contains_fallback;
        block.markup = markup_node.to_markup();
        if has_children {
            block.open_tag = Some(node.open_tag(&[]));
            block.close_tag = Some(node.close_tag());
            block.open_tag_zero = Some(node.open_tag(&[(
                "style",
                "margin-top:0;border-top-width:0;padding-top:0",
            )]));
        }
        Ok(Some(index))
    }
}

fn link_next_non_child(blocks: &mut [Block]) {
    for i in 0..blocks.len() {
        let inherited = blocks[i].parent.and_then(|p| blocks[p].next_non_child);
        blocks[i].next_non_child = blocks[i].next_sibling.or(inherited);
    }
}
