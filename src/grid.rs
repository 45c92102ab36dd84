//! Page templates: columns for text, containers for figures.

extern crate alloc;

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::break_record::{BreakRecord, FigureStatus};
use crate::capabilities::{parse_requirements, Capabilities};
use crate::content::Content;
use crate::error::Error;
use crate::metrics::{round_down, Metrics, PageEnvelope};
use crate::sizing::{Column, Container};
use crate::snapshot::ContentNode;

/// Grid scoring weights.
pub mod scoring {
    pub const FINISH_TEXT: f32 = 250.0;
    pub const FINISH_ALL: f32 = 2000.0;
    pub const FIXED_CONTAINER: f32 = 5000.0;
    pub const COLUMN: f32 = 50.0;
    pub const EMPTY_CONTAINER_PENALTY: f32 = 5000.0;
    pub const DIFFERENT_LINEHEIGHT: f32 = 2000.0;
    pub const DIFFERENT_COLWIDTH: f32 = f32::INFINITY;
    pub const CONTAINER_BONUS: f32 = 1000.0;
    pub const BLOCK_DELAY_PENALTY: f32 = 100.0;
    pub const REQUIRED_BLOCK_BONUS: f32 = 4000.0;
    pub const PAGE_NUMBER: f32 = 12000.0;
    pub const ONLY_PAGE: f32 = 4000.0;
    pub const FIRST_PAGE: f32 = 4000.0;
    pub const ODD_PAGE: f32 = 2000.0;
    pub const EVEN_PAGE: f32 = 2000.0;
    pub const NON_EVEN_ODD: f32 = f32::INFINITY;
    pub const NON_ONLY_PAGE: f32 = f32::INFINITY;
    pub const NON_FIRST_PAGE: f32 = f32::INFINITY;
}

/// Column widths within this distance count as equal.
const WIDTH_TOLERANCE: f32 = 0.5;

/// Page-position preferences declared as grid classes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoringFlags {
    pub only_page: bool,
    pub first_page: bool,
    pub odd: bool,
    pub even: bool,
    /// Page height follows the first container.
    pub size_to_container: bool,
    /// One-based page numbers from `page-N` classes.
    pub pages: BTreeSet<usize>,
}

impl ScoringFlags {
    pub fn from_classes<'a>(classes: impl IntoIterator<Item = &'a str>) -> Self {
        let mut flags = Self::default();
        for class in classes {
            match class.to_ascii_lowercase().as_str() {
                "onlypage" => flags.only_page = true,
                "firstpage" => flags.first_page = true,
                "odd" => flags.odd = true,
                "even" => flags.even = true,
                "sizetocontainer" => flags.size_to_container = true,
                other => {
                    if let Some(n) = other
                        .strip_prefix("page-")
                        .and_then(|n| n.parse::<usize>().ok())
                    {
                        flags.pages.insert(n);
                    }
                }
            }
        }
        flags
    }
}

/// A figure chosen for a container by [`Grid::map_containers`].
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerMapping {
    pub figure_index: usize,
    /// Size name selected from the container's list.
    pub size: String,
    pub flexible: bool,
}

/// A page template.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub classes: Vec<String>,
    pub requirements: Vec<String>,
    pub flexible: bool,
    pub scoring_flags: ScoringFlags,
    /// Measured template size.
    pub size: Metrics,
    /// Size after the last [`Grid::stretch`].
    pub stretched_size: Metrics,
    pub line_height: f32,
    /// Width shared by all columns, zero when there are none.
    pub col_width: f32,
    /// Sum of column heights.
    pub text_height: f32,
    pub max_col_height: f32,
    pub columns: Vec<Column>,
    pub containers: Vec<Container>,
    pub markup: String,
}

impl Grid {
    /// Build a grid from a measured template element.
    ///
    /// Descendants with class `column` become text columns, those with
    /// class `container` figure containers (accepting the sizes listed in
    /// their `data-sizes`).
    pub fn from_node(node: &ContentNode) -> Result<Self, Error> {
        let flexible = !node.has_class("fixed");
        let mut size = node.metrics.sanitized();
        if flexible {
            size.min_width = size.min_width.max(size.width);
        } else {
            size.min_height = size.height;
            size.min_width = size.width;
        }
        let line_height = if size.line_height > 0.0 {
            size.line_height
        } else {
            1.0
        };

        let mut grid = Self {
            classes: node.classes.clone(),
            requirements: parse_requirements(node.attr("data-requires")),
            flexible,
            scoring_flags: ScoringFlags::from_classes(node.classes.iter().map(String::as_str)),
            size,
            stretched_size: size,
            line_height,
            col_width: 0.0,
            text_height: 0.0,
            max_col_height: 0.0,
            columns: Vec::new(),
            containers: Vec::new(),
            markup: node.to_markup(),
        };
        grid.collect_regions(node)?;
        if grid.columns.is_empty() && grid.containers.is_empty() {
            return Err(Error::invalid_grid("grid has no columns or containers"));
        }
        Ok(grid)
    }

    fn collect_regions(&mut self, node: &ContentNode) -> Result<(), Error> {
        for child in &node.children {
            let metrics = child.metrics.sanitized();
            if child.has_class("column") {
                let col = Column::new(&metrics, self.size.height);
                self.text_height += col.height;
                self.max_col_height = self.max_col_height.max(col.height);
                self.columns.push(col);
                if self.col_width == 0.0 {
                    self.col_width = metrics.outer_width;
                } else if (self.col_width - metrics.outer_width).abs() > WIDTH_TOLERANCE {
                    return Err(Error::invalid_grid(alloc::format!(
                        "inconsistent column widths ({} vs {})",
                        self.col_width,
                        metrics.outer_width
                    )));
                }
            } else if child.has_class("container") {
                let sizes = child
                    .attr("data-sizes")
                    .map(|s| s.split_whitespace().map(String::from).collect())
                    .unwrap_or_default();
                let mut container = Container::new(&metrics, self.size.height, sizes);
                container.anchored_bottom = child.has_class("bottom");
                container.first_following_column = self.columns.len();
                self.containers.push(container);
            }
            self.collect_regions(child)?;
        }
        Ok(())
    }

    /// A flexible one-column grid filling `envelope`.
    pub fn single_column(envelope: PageEnvelope, line_height: f32, col_width: f32) -> Self {
        let line_height = if line_height > 0.0 { line_height } else { 1.0 };
        let size = Metrics {
            min_height: line_height,
            line_height,
            ..Metrics::sized(envelope.width, envelope.height)
        };
        let col = Column::new(&Metrics::sized(col_width, envelope.height), envelope.height);
        Self {
            classes: alloc::vec!["grid".into()],
            requirements: Vec::new(),
            flexible: true,
            scoring_flags: ScoringFlags::default(),
            size,
            stretched_size: size,
            line_height,
            col_width,
            text_height: col.height,
            max_col_height: col.height,
            columns: alloc::vec![col],
            containers: Vec::new(),
            markup: String::from("<div class=\"grid\"><div class=\"column\"/></div>"),
        }
    }

    /// Resize a flexible grid to fit `total_height` (margins, border and
    /// padding included).
    ///
    /// The content height is clamped to the grid's min/max and snapped to
    /// `min_height + k * line_height`; columns and containers follow.
    pub fn stretch(&mut self, total_height: f32) -> &mut Self {
        if !self.flexible {
            return self;
        }
        let content_height = total_height - (self.size.margin_height() + self.size.bp_height());
        let max_height = self.size.max_height.unwrap_or(f32::INFINITY);
        let mut final_height = content_height.max(self.size.min_height).min(max_height);
        let delta = final_height - self.size.min_height;
        if delta.is_finite() && delta > 0.0 {
            final_height = self.size.min_height + round_down(delta, self.line_height);
        }

        self.text_height = 0.0;
        self.max_col_height = 0.0;
        for col in &mut self.columns {
            let height = col.stretch(final_height).height;
            self.text_height += height;
            self.max_col_height = self.max_col_height.max(height);
        }
        for container in &mut self.containers {
            container.stretch(final_height);
        }

        let mut stretched = self.size;
        stretched.height = final_height;
        stretched.outer_height = final_height + self.size.bp_height();
        stretched.max_height = if self.scoring_flags.size_to_container {
            self.size.max_height
        } else {
            Some(max_height.min(final_height + self.line_height * 3.0))
        };
        self.stretched_size = stretched;
        self
    }

    pub fn capability_filter(&self, caps: &dyn Capabilities) -> bool {
        self.requirements.is_empty() || caps.meets_requirements(&self.requirements)
    }

    /// True when the grid's size range admits `envelope`.
    pub fn size_filter(&self, envelope: PageEnvelope) -> bool {
        let w = envelope.width - self.size.bp_width();
        let h = envelope.height - self.size.bp_height() - self.size.margin_height();
        w >= self.size.min_width
            && h >= self.size.min_height
            && self.size.max_width.is_none_or(|max| w <= max)
            && self.size.max_height.is_none_or(|max| h <= max)
    }

    /// Ordering for eligible grids: wider grids with more containers first.
    pub fn compare(a: &Self, b: &Self) -> Ordering {
        let key = |g: &Self| g.size.width + 20.0 * g.containers.len() as f32;
        key(b).total_cmp(&key(a))
    }

    /// Static part of the grid score: columns, geometry match, page flags.
    pub fn score(&self, content: &Content, br: &BreakRecord) -> f32 {
        let human_page = br.page_number + 1;
        let flags = &self.scoring_flags;
        let mut score = self.columns.len() as f32 * scoring::COLUMN;

        if self.line_height != content.line_height {
            score -= scoring::DIFFERENT_LINEHEIGHT;
        }
        if self.col_width != 0.0 && (self.col_width - content.col_width).abs() > WIDTH_TOLERANCE {
            score -= scoring::DIFFERENT_COLWIDTH;
        }
        if flags.only_page {
            score += if br.page_number > 0 {
                -scoring::NON_ONLY_PAGE
            } else {
                scoring::ONLY_PAGE
            };
        }
        if flags.first_page {
            score += if br.page_number > 0 {
                -scoring::NON_FIRST_PAGE
            } else {
                scoring::FIRST_PAGE
            };
        }
        if flags.pages.contains(&human_page) {
            score += scoring::PAGE_NUMBER;
        }
        let (own, other) = if human_page % 2 == 1 {
            (flags.odd, flags.even)
        } else {
            (flags.even, flags.odd)
        };
        if own {
            score += if human_page % 2 == 1 {
                scoring::ODD_PAGE
            } else {
                scoring::EVEN_PAGE
            };
        } else if other {
            score -= scoring::NON_EVEN_ODD;
        }
        score
    }

    /// Assign figures to containers, recording each assignment in `br`.
    ///
    /// Candidates are tried oldest first: delayed figures, then failed
    /// ones, then figures from the high-water mark on. Each container takes
    /// the first candidate for which it can select a size.
    pub fn map_containers(
        &self,
        content: &Content,
        br: &mut BreakRecord,
        caps: &dyn Capabilities,
    ) -> Vec<Option<ContainerMapping>> {
        let mut map = Vec::with_capacity(self.containers.len());
        for container in &self.containers {
            if container.sizes.is_empty() {
                map.push(None);
                continue;
            }
            let candidates = br
                .delayed()
                .chain(br.failed())
                .chain(br.figure_index..content.figures.len())
                .collect::<Vec<_>>();

            let mut mapping = None;
            for idx in candidates {
                if br.status(idx) == FigureStatus::Used {
                    continue;
                }
                let Some(figure) = content.figures.get(idx) else {
                    continue;
                };
                if let Some((name, _)) = container.select_size(figure, caps) {
                    mapping = Some(ContainerMapping {
                        figure_index: idx,
                        size: name.into(),
                        flexible: container.flexible,
                    });
                    br.use_figure(idx);
                    break;
                }
            }
            map.push(mapping);
        }
        map
    }
}
