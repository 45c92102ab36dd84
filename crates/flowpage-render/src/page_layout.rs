//! Single-page construction: grid choice, container fill, column fill.
//!
//! Everything here works on one page at a time and threads a single
//! [`BreakRecord`] through by exclusive reference. The engine owns the loop
//! over pages.

use flowpage::grid::scoring;
use flowpage::{
    round_up, BreakRecord, Capabilities, Content, ContainerMapping, FigureSize, FigureStatus,
    Grid, PageEnvelope,
};

use crate::render_ir::{BlockSlice, ColumnFill, PageDescriptor, PlacedFigure, SliceRole};

/// Columns shorter than the tallest one by this factor are "short".
pub const DEFAULT_SHORT_COLUMN_RATIO: f32 = 1.5;

/// Inputs shared by every page of one pagination run.
#[derive(Clone, Copy)]
pub struct PageContext<'a> {
    pub content: &'a Content,
    /// Eligible grids, already stretched to the page envelope.
    pub grids: &'a [Grid],
    pub capabilities: &'a dyn Capabilities,
    pub short_column_ratio: f32,
}

/// The grid [`best_grid`] picked and the figures it would show.
#[derive(Clone, Debug, PartialEq)]
pub struct BestGrid {
    pub grid: usize,
    pub score: f32,
    pub containers: Vec<Option<ContainerMapping>>,
}

/// Result of one page construction attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum PageBuild {
    Built(PageDescriptor),
    /// The grid sizes to its first container, which stayed empty. The break
    /// record is left untouched.
    Ignored { grid: usize },
    /// No grid scores above negative infinity.
    NoGrid,
    /// The page would show nothing. Figure status changes made while trying
    /// are kept in the break record; optional figures given up on are
    /// listed so they can be reported on the next page.
    NoProgress {
        grid: usize,
        dropped_figures: Vec<usize>,
    },
}

/// Score every grid against the current break record and return the best.
///
/// Grids listed in `excluded` are skipped. Ties keep the earlier grid.
pub fn best_grid(
    content: &Content,
    grids: &[Grid],
    br: &BreakRecord,
    caps: &dyn Capabilities,
    excluded: &[usize],
) -> Option<BestGrid> {
    let blocks = &content.blocks;
    let mut best: Option<BestGrid> = None;
    let mut high_score = f32::NEG_INFINITY;

    for (idx, grid) in grids.iter().enumerate() {
        if excluded.contains(&idx) {
            continue;
        }
        let mut trial = br.clone();
        let mut height = trial.overhang;
        let mut remaining = grid.text_height - height;
        // Overhang counts as a block.
        let mut block_added = height > 0.0 && grid.text_height > 0.0;
        let mut container_filled = false;

        let mut score = grid.score(content, &trial);
        let containers = grid.map_containers(content, &mut trial, caps);
        for (container, mapping) in grid.containers.iter().zip(&containers) {
            match mapping {
                Some(mapping) => {
                    score += scoring::CONTAINER_BONUS;
                    if content
                        .figures
                        .get(mapping.figure_index)
                        .is_some_and(|f| !f.optional)
                    {
                        score += scoring::REQUIRED_BLOCK_BONUS;
                    }
                    if !container.flexible {
                        score += scoring::FIXED_CONTAINER;
                    }
                    container_filled = true;
                }
                None if !container.flexible => score -= scoring::EMPTY_CONTAINER_PENALTY,
                None => {}
            }
        }

        // Rough text fit.
        while grid.text_height > 0.0 && trial.index < blocks.len() && height <= grid.text_height
        {
            let block = &blocks[trial.index];
            let estimate = block.metrics.outer_height + block.metrics.margin_top;
            if block.keep_together && (estimate > grid.max_col_height || estimate > remaining) {
                break;
            }
            if estimate > remaining && block.has_children {
                trial.index += 1;
                continue;
            }
            let partial = estimate > remaining;
            height += estimate;
            score += estimate;
            remaining -= estimate;
            block_added = true;
            if partial {
                break;
            }
            trial.index = block.next_sibling.unwrap_or(trial.index + 1);
        }

        if !block_added && !container_filled {
            score = f32::NEG_INFINITY;
        }
        if score > high_score {
            high_score = score;
            best = Some(BestGrid {
                grid: idx,
                score,
                containers,
            });
        }
    }
    best
}

/// Place as many blocks as fit in one column, advancing `br`.
///
/// `col_height` is snapped down to the line grid first. Columns shorter than
/// `min_height` stay empty.
pub fn fill_column(
    content: &Content,
    br: &mut BreakRecord,
    col_height: f32,
    max_col_height: f32,
    min_height: f32,
    short_column_ratio: f32,
) -> ColumnFill {
    let blocks = &content.blocks;
    let count = blocks.len();
    if br.index >= count {
        return ColumnFill::empty(col_height);
    }

    let short_column = max_col_height / col_height > short_column_ratio;
    let mut col = col_height - col_height % content.line_height;
    if col <= 0.0 || col < min_height {
        log::debug!("Column below min height at block {}: {}", br.index, col);
        return ColumnFill::empty(col.max(0.0));
    }

    let mut slices = Vec::new();
    for ancestor in content.ancestors(br.index).iter().rev() {
        slices.push(BlockSlice::open(*ancestor));
    }

    // Part of the first block shown in the previous column.
    let init_margin = if br.overhang > 0.0 {
        blocks[br.index].metrics.outer_height - br.overhang
    } else {
        0.0
    };
    let mut height = 0.0f32;
    let mut first = true;
    let mut margin_top = 0.0f32;
    let mut last = br.index;

    while br.index < count && height < col {
        let idx = br.index;
        let block = &blocks[idx];
        last = idx;
        let next_sibling = block.next_sibling.and_then(|i| blocks.get(i));
        let next_non_child = content.next_non_child_index(idx);

        if let Some(figure) = block.figure.filter(|_| block.is_fallback) {
            if br.figure_used(figure) && !(first && br.overhang > 0.0) {
                br.index = next_non_child;
                continue;
            }
        }

        let remaining = col - height;
        let margin_and_first_line;
        if first && margin_top == 0.0 {
            margin_top = -init_margin;
            margin_and_first_line = if br.overhang > 0.0 {
                line_height_of(content, idx)
            } else {
                block.first_line
            };
        } else {
            margin_top = margin_top.max(block.metrics.margin_top);
            margin_and_first_line = margin_top + block.first_line;
        }
        let mut margin_bottom = block
            .metrics
            .margin_bottom
            .max(next_sibling.map_or(0.0, |n| n.metrics.margin_top));
        let effective = block.metrics.outer_height + margin_top;

        let mut finish = remaining < margin_and_first_line;
        if !finish && block.keep_with_next && !(br.overhang > 0.0 || (first && !short_column)) {
            if let Some(next) = next_sibling {
                finish = remaining >= effective
                    && remaining < effective + margin_bottom + next.first_line;
                if finish {
                    log::debug!("Leaving column at block {} to keep it with the next", idx);
                }
            }
        }
        if finish {
            finish = !first || short_column;
            if !finish {
                log::debug!("Staying in virgin column despite non-fit at block {}", idx);
            } else if short_column {
                log::debug!("Leaving short column empty at block {}", idx);
            } else {
                log::debug!("Ending column early at block {}", idx);
            }
        }
        if finish {
            finish = !block.contains_fallback;
        }
        if block.column_break && !first {
            finish = true;
        }

        if finish {
            // Back out parents opened right before this block.
            let mut cur = idx;
            while let Some(parent) = blocks[cur].parent.filter(|p| p + 1 == cur) {
                if slices
                    .last()
                    .is_some_and(|s: &BlockSlice| s.block == parent && s.role == SliceRole::Open)
                {
                    slices.pop();
                }
                br.index = parent;
                if let Some(figure) = blocks[parent].figure.filter(|_| blocks[parent].is_fallback)
                {
                    br.delay_figure(figure);
                }
                cur = parent;
            }
            last = cur;
            break;
        }

        if let Some(figure) = block.figure.filter(|_| block.is_fallback) {
            br.use_figure(figure);
        }

        if block.contains_fallback || (block.has_children && remaining < effective) {
            if br.overhang > 0.0 {
                log::warn!("Opening block {} with overhang {}", idx, br.overhang);
            }
            if block.metrics.bp_top() > 0.0 {
                if !first {
                    height += margin_top;
                }
                margin_top = 0.0;
                height += block.metrics.bp_top();
            }
            slices.push(BlockSlice::open(idx));
            br.index += 1;
            continue;
        }

        height += effective;
        let continued = first && br.overhang > 0.0;
        slices.push(BlockSlice {
            block: idx,
            role: if continued {
                SliceRole::Continued
            } else {
                SliceRole::Whole
            },
            clip_top: if continued { init_margin } else { 0.0 },
            truncated: false,
        });
        first = false;
        br.overhang = 0.0;

        if col > height + margin_bottom {
            br.index = next_non_child;
            if next_sibling.is_none() {
                // Close finished parents, collapsing margins until border or
                // padding gets in the way.
                let mut parent = block.parent;
                while let Some(p) = parent {
                    let metrics = &blocks[p].metrics;
                    if metrics.bp_bottom() > 0.0 {
                        height += margin_bottom + metrics.bp_bottom();
                        margin_bottom = metrics.margin_bottom;
                    } else {
                        margin_bottom = margin_bottom.max(metrics.margin_bottom);
                    }
                    if blocks[p].next_sibling.is_some() {
                        break;
                    }
                    parent = blocks[p].parent;
                }
                if col <= height + margin_bottom {
                    // Only closing border and margin overflow; clip them.
                    height = col;
                    break;
                }
            }
            margin_top = margin_bottom;
            continue;
        }

        if !block.breakable {
            height = col;
            br.index = next_non_child;
            log::warn!("Unbreakable block {} shoved into column", idx);
        } else {
            if height <= col {
                br.index = next_non_child;
                height = col;
            }
            if block.keep_together {
                log::warn!("keeptogether block {} shoved into column", idx);
            }
        }
        break;
    }

    let content_height = height;
    col = compute_overhang(content, br, last, col, height);
    if br.overhang > 0.0 {
        if let Some(slice) = slices
            .last_mut()
            .filter(|s| s.block == br.index && s.role != SliceRole::Open)
        {
            slice.truncated = true;
        }
    }
    if slices.iter().all(|s| s.role == SliceRole::Open) {
        log::warn!("Clearing column contents since no block was added");
        slices.clear();
    }

    ColumnFill {
        height: col,
        content_height: content_height.min(col),
        slices,
    }
}

fn line_height_of(content: &Content, index: usize) -> f32 {
    let lh = content.blocks[index].metrics.line_height;
    if lh > 0.0 {
        lh
    } else {
        content.line_height
    }
}

/// Work out how much of block `last` spills out of a column filled to
/// `height`, store it in `br.overhang` and return the column height clipped
/// to whole lines.
pub fn compute_overhang(
    content: &Content,
    br: &mut BreakRecord,
    last: usize,
    col_height: f32,
    height: f32,
) -> f32 {
    let Some(block) = content.blocks.get(last) else {
        br.overhang = 0.0;
        return col_height;
    };
    if col_height >= height {
        br.overhang = 0.0;
        return col_height;
    }
    if !block.breakable {
        log::warn!("Overhang on unbreakable block {}", last);
    }
    if block.has_children {
        log::warn!("Overhang on block {} with children", last);
    }

    let mut col = col_height;
    br.overhang = height - col_height;
    let content_only = br.overhang - block.metrics.bp_bottom();
    if content_only <= 0.0 {
        // Only border and padding stick out.
        br.overhang = 0.0;
        br.index = last + 1;
    } else {
        let excess = (block.metrics.height - content_only) % line_height_of(content, last);
        if excess > 0.0 {
            col -= excess;
            br.overhang += excess;
        }
    }
    col
}

/// Put a figure size into a container of `available` height.
///
/// Fixed containers take any size they were mapped to. Flexible ones fail
/// when the payload is taller than the room left, and otherwise report the
/// payload height rounded up to the line grid.
pub fn fill_container(
    available: f32,
    size: &FigureSize,
    flexible: bool,
    line_height: f32,
) -> Option<f32> {
    if !flexible {
        return Some(available);
    }
    let payload = size.payload_height();
    if payload > available {
        log::debug!("Container failure: {} > {}", payload, available);
        return None;
    }
    Some(round_up(payload, line_height))
}

/// Build one page from `br`, choosing among `ctx.grids`.
pub fn build_page(ctx: &PageContext<'_>, br: &mut BreakRecord, excluded: &[usize]) -> PageBuild {
    let content = ctx.content;
    let Some(best) = best_grid(content, ctx.grids, br, ctx.capabilities, excluded) else {
        return PageBuild::NoGrid;
    };
    let grid = &ctx.grids[best.grid];
    let original = br.clone();
    let begin = br.position();

    let stretched = grid.stretched_size;
    let mut size = PageEnvelope::new(stretched.outer_width, stretched.outer_height);
    let mut col_heights: Vec<f32> = grid.columns.iter().map(|c| c.height).collect();
    let mut container_heights: Vec<f32> = grid.containers.iter().map(|c| c.height).collect();
    let mut flexed = vec![false; grid.containers.len()];
    let mut figures = Vec::new();
    let mut dropped_figures = Vec::new();
    let mut container_filled = false;

    for (i, (container, mapping)) in grid.containers.iter().zip(&best.containers).enumerate() {
        let Some(mapping) = mapping else {
            continue;
        };
        let figure_index = mapping.figure_index;
        let Some(figure) = content.figures.get(figure_index) else {
            continue;
        };
        let Some(figure_size) = figure.size(&mapping.size) else {
            continue;
        };

        let Some(fill) = fill_container(
            container_heights[i],
            figure_size,
            mapping.flexible,
            content.line_height,
        ) else {
            log::debug!("Container failure, figure {}", figure_index);
            if !figure.optional && figure.fallback.is_some() {
                br.delay_figure(figure_index);
            } else if figure.optional {
                br.use_figure(figure_index);
                dropped_figures.push(figure_index);
            } else if !flexed[i] {
                br.failed_figure(figure_index);
            }
            continue;
        };

        br.use_figure(figure_index);
        container_filled = true;
        if mapping.flexible {
            let shrink = |h: &mut f32| *h = if *h <= fill { 0.0 } else { *h - fill };
            for (j, h) in col_heights
                .iter_mut()
                .enumerate()
                .skip(container.first_following_column)
            {
                if grid.columns[j].flexible {
                    shrink(h);
                }
            }
            for j in i + 1..grid.containers.len() {
                if grid.containers[j].flexible {
                    shrink(&mut container_heights[j]);
                    flexed[j] = true;
                }
            }
        }
        if i == 0 && grid.scoring_flags.size_to_container {
            size.height = fill + container.delta + stretched.bp_height();
        }
        figures.push(PlacedFigure {
            figure_index,
            container_index: Some(i),
            size: mapping.size.clone(),
            payload: figure_size.payload.clone(),
            height: fill,
            anchored_bottom: container.anchored_bottom,
        });
    }

    let columns: Vec<ColumnFill> = grid
        .columns
        .iter()
        .zip(&col_heights)
        .map(|(col, height)| {
            fill_column(
                content,
                br,
                *height,
                grid.max_col_height,
                col.min_height,
                ctx.short_column_ratio,
            )
        })
        .collect();

    if original.same_progress(br) {
        log::warn!("No progress made in pagination at {:?}", begin);
        return PageBuild::NoProgress {
            grid: best.grid,
            dropped_figures,
        };
    }
    if grid.scoring_flags.size_to_container && !container_filled {
        log::warn!("sizetocontainer not filled, page ignored");
        *br = original;
        return PageBuild::Ignored { grid: best.grid };
    }
    let placed_text = columns.iter().any(|c| c.placed_blocks().next().is_some());
    if !placed_text && figures.is_empty() {
        log::warn!("Page at {:?} would be blank", begin);
        return PageBuild::NoProgress {
            grid: best.grid,
            dropped_figures,
        };
    }

    fail_passed_figures(content, br);
    let end = br.position();
    br.page_number += 1;

    PageBuild::Built(PageDescriptor {
        page_number: br.page_number,
        begin,
        end,
        size,
        grid_index: Some(best.grid),
        columns,
        figures,
        dropped_figures,
        forced: false,
        fields: content.fields.clone(),
    })
}

/// Mark required figures without a fallback whose anchor the text has moved
/// past as failed, so they are retried ahead of newer figures.
fn fail_passed_figures(content: &Content, br: &mut BreakRecord) {
    let text_done = br.index >= content.blocks.len();
    for figure in content.required_figures() {
        if figure.fallback.is_some() || !(text_done || figure.anchor_index < br.index) {
            continue;
        }
        if matches!(
            br.status(figure.figure_index),
            FigureStatus::Pending | FigureStatus::Delayed
        ) {
            br.failed_figure(figure.figure_index);
        }
    }
}

/// Build a page that holds nothing but the oldest unplaced required figure,
/// shown at its smallest size.
///
/// Returns `None` when every required figure is already used.
pub fn forced_figure_page(
    content: &Content,
    br: &mut BreakRecord,
    envelope: PageEnvelope,
) -> Option<PageDescriptor> {
    let candidate = br
        .failed()
        .chain(br.delayed())
        .chain(br.figure_index..content.figures.len())
        .find(|idx| {
            content.figures.get(*idx).is_some_and(|f| !f.optional) && !br.figure_used(*idx)
        })?;
    let figure = content.figures.get(candidate)?;
    let begin = br.position();

    let mut figures = Vec::new();
    let mut dropped_figures = Vec::new();
    match figure.smallest_size() {
        Some((name, size)) => {
            log::info!("Forcing figure {} onto its own page", candidate);
            figures.push(PlacedFigure {
                figure_index: candidate,
                container_index: None,
                size: name.into(),
                payload: size.payload.clone(),
                height: size.payload_height().min(envelope.height),
                anchored_bottom: false,
            });
        }
        None => {
            log::warn!("Required figure {} has no size to show", candidate);
            dropped_figures.push(candidate);
        }
    }
    br.use_figure(candidate);
    let end = br.position();
    br.page_number += 1;

    Some(PageDescriptor {
        page_number: br.page_number,
        begin,
        end,
        size: envelope,
        grid_index: None,
        columns: Vec::new(),
        figures,
        dropped_figures,
        forced: true,
        fields: content.fields.clone(),
    })
}
