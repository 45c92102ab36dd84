//! The flattened block and figure stream of one document.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::block::{renumber_lists, Block, Flattener};
use crate::error::Error;
use crate::figure::Figure;
use crate::sanitize::{sanitize_tree, SanitizeOptions};
use crate::snapshot::ContentNode;

/// Structured metadata fields extracted from `itemprop` elements.
///
/// Keys keep the position of their first occurrence; a later element with
/// the same key replaces the value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.into(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only block and figure stream built once per document.
///
/// A change of column width invalidates every block height; rebuild from a
/// fresh measurement instead of patching.
#[derive(Clone, Debug, PartialEq)]
pub struct Content {
    /// Baseline grid unit.
    pub line_height: f32,
    /// Width the content was measured at.
    pub col_width: f32,
    pub blocks: Vec<Block>,
    pub figures: Vec<Figure>,
    pub fields: Fields,
}

impl Content {
    /// Content with no blocks or figures.
    ///
    /// A line height that is not a positive finite number falls back to 1.
    pub fn empty(line_height: f32, col_width: f32) -> Self {
        Self {
            line_height: if line_height.is_finite() && line_height > 0.0 {
                line_height
            } else {
                1.0
            },
            col_width: if col_width.is_finite() {
                col_width.max(0.0)
            } else {
                0.0
            },
            blocks: Vec::new(),
            figures: Vec::new(),
            fields: Fields::new(),
        }
    }

    /// Flatten a measured content root with default sanitizing.
    pub fn from_node(root: &ContentNode) -> Result<Self, Error> {
        Self::from_node_with_options(root, SanitizeOptions::default())
    }

    /// Flatten a measured content root.
    ///
    /// The root's own line height is the baseline grid unit (1 when
    /// unknown) and its outer width is the measurement width.
    pub fn from_node_with_options(
        root: &ContentNode,
        options: SanitizeOptions,
    ) -> Result<Self, Error> {
        let mut content = Self::empty(root.metrics.line_height, root.metrics.outer_width);

        let mut clean = sanitize_tree(root, content.line_height, options);
        renumber_lists(&mut clean);
        let (blocks, figures) = Flattener::new(content.line_height, options).run(&clean)?;
        content.blocks = blocks;
        content.figures = figures;

        for child in &root.children {
            collect_fields(child, &mut content.fields);
        }
        log::debug!(
            "Flattened content: {} blocks, {} figures, {} fields",
            content.blocks.len(),
            content.figures.len(),
            content.fields.len()
        );
        Ok(content)
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn figure(&self, index: usize) -> Option<&Figure> {
        self.figures.get(index)
    }

    /// Index after `index` skipping its descendants, or the block count.
    pub fn next_non_child_index(&self, index: usize) -> usize {
        self.blocks
            .get(index)
            .and_then(|b| b.next_non_child)
            .unwrap_or(self.blocks.len())
    }

    /// Ancestors of `index`, innermost first.
    pub fn ancestors(&self, index: usize) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        let mut cur = self.blocks.get(index).and_then(|b| b.parent);
        while let Some(p) = cur {
            out.push(p);
            cur = self.blocks.get(p).and_then(|b| b.parent);
        }
        out
    }

    /// Bottom border and padding of `index` plus all its ancestors.
    pub fn total_bp_bottom(&self, index: usize) -> f32 {
        let own = self
            .blocks
            .get(index)
            .map_or(0.0, |b| b.metrics.bp_bottom());
        own + self
            .ancestors(index)
            .iter()
            .map(|p| self.blocks[*p].metrics.bp_bottom())
            .sum::<f32>()
    }

    pub fn required_figures(&self) -> impl Iterator<Item = &Figure> {
        self.figures.iter().filter(|f| !f.optional)
    }
}

fn collect_fields(node: &ContentNode, fields: &mut Fields) {
    if let Some(name) = node.attr("itemprop") {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            log::warn!("Ignoring itemprop field without a name on <{}>", node.tag);
        } else {
            let value = node.text_content();
            log::debug!("Field found: {}", name);
            fields.insert(&name, value.trim().into());
        }
    }
    for child in &node.children {
        collect_fields(child, fields);
    }
}
