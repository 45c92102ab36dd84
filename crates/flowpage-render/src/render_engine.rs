use flowpage::{
    AllCapabilities, BreakRecord, Capabilities, Content, ContentPosition, Grid, PageEnvelope,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::page_layout::{
    build_page, forced_figure_page, PageBuild, PageContext, DEFAULT_SHORT_COLUMN_RATIO,
};
use crate::render_ir::{PageDescriptor, PaginationProfileId};

/// Cancellation hook for long-running pagination.
pub trait CancelToken {
    fn is_cancelled(&self) -> bool;
}

/// Never-cancel token for default call paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Runtime diagnostics from pagination.
#[derive(Clone, Debug, PartialEq)]
pub enum PaginationDiagnostic {
    PageBuilt {
        page_index: usize,
        grid_index: Option<usize>,
    },
    /// A size-to-container grid was chosen but its container stayed empty.
    PageIgnored {
        page_index: usize,
        grid_index: usize,
    },
    ForcedFigurePage {
        page_index: usize,
        figure_index: usize,
    },
    NoProgress {
        page_index: usize,
        position: ContentPosition,
    },
    Cancelled,
    CacheHit {
        page_count: usize,
    },
    CacheMiss,
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(PaginationDiagnostic) + Send + 'static>>>;
type DiagnosticSink = Option<DiagnosticCallback>;

/// Hard caps on one pagination run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaginationLimits {
    /// Maximum number of pages, forced pages included.
    pub max_pages: usize,
    /// Maximum number of dedicated pages made for figures that fit nowhere.
    pub max_forced_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            max_pages: 10_000,
            max_forced_pages: 256,
        }
    }
}

/// Pagination-engine options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaginationOptions {
    /// Outer page size every grid is stretched to.
    pub envelope: PageEnvelope,
    pub limits: PaginationLimits,
    /// Columns shorter than the tallest by this factor give up on blocks that
    /// do not fit instead of forcing them in.
    pub short_column_ratio: f32,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self::for_envelope(600.0, 800.0)
    }
}

impl PaginationOptions {
    /// Build options for a target page size.
    pub fn for_envelope(width: f32, height: f32) -> Self {
        Self {
            envelope: PageEnvelope::new(width, height),
            limits: PaginationLimits::default(),
            short_column_ratio: DEFAULT_SHORT_COLUMN_RATIO,
        }
    }

    pub fn with_limits(mut self, limits: PaginationLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Per-run settings.
#[derive(Clone, Copy, Default)]
pub struct RunConfig<'a> {
    page_limit: Option<usize>,
    stop_at: Option<ContentPosition>,
    cache: Option<&'a dyn BoundaryCacheStore>,
    cancel: Option<&'a dyn CancelToken>,
    capabilities: Option<&'a dyn Capabilities>,
}

impl<'a> RunConfig<'a> {
    /// Stop [`PaginationEngine::paginate`] once `pages` pages exist.
    pub fn with_page_limit(mut self, pages: usize) -> Self {
        self.page_limit = Some(pages);
        self
    }

    /// Stop [`PaginationEngine::paginate`] once a page ends past `position`.
    pub fn with_stop_position(mut self, position: ContentPosition) -> Self {
        self.stop_at = Some(position);
        self
    }

    /// Use cache hooks for loading/storing page boundaries.
    pub fn with_cache(mut self, cache: &'a dyn BoundaryCacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach an optional cancellation token for session operations.
    pub fn with_cancel(mut self, cancel: &'a dyn CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Host capabilities for grid and figure size requirements. Everything is
    /// supported when unset.
    pub fn with_capabilities(mut self, capabilities: &'a dyn Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    fn capabilities(&self) -> &'a dyn Capabilities {
        self.capabilities.unwrap_or(&AllCapabilities)
    }
}

impl fmt::Debug for RunConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("page_limit", &self.page_limit)
            .field("stop_at", &self.stop_at)
            .field("cache", &self.cache.is_some())
            .field("cancel", &self.cancel.is_some())
            .field("capabilities", &self.capabilities.is_some())
            .finish()
    }
}

/// Pagination error.
#[derive(Clone, Debug, PartialEq)]
pub enum PaginationError {
    /// An empty page could not take anything from `position`.
    LayoutImpossible {
        page_index: usize,
        position: ContentPosition,
    },
    /// Grids were given but none suits the capabilities and envelope.
    NoEligibleGrid { page_index: usize },
    /// Pagination was cancelled.
    Cancelled,
    /// A configured limit was hit.
    LimitExceeded {
        kind: &'static str,
        actual: usize,
        limit: usize,
    },
    Content(flowpage::Error),
    Cache(String),
}

impl fmt::Display for PaginationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LayoutImpossible {
                page_index,
                position,
            } => write!(
                f,
                "layout impossible on page {} at block {} (figure {}, overhang {})",
                page_index, position.block, position.figure, position.overhang
            ),
            Self::NoEligibleGrid { page_index } => {
                write!(f, "no eligible grid for page {}", page_index)
            }
            Self::Cancelled => write!(f, "pagination cancelled"),
            Self::LimitExceeded {
                kind,
                actual,
                limit,
            } => write!(
                f,
                "pagination limit exceeded: {} (actual={} limit={})",
                kind, actual, limit
            ),
            Self::Content(err) => write!(f, "content error: {}", err),
            Self::Cache(msg) => write!(f, "boundary cache error: {}", msg),
        }
    }
}

impl std::error::Error for PaginationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Content(err) => Some(err),
            _ => None,
        }
    }
}

impl From<flowpage::Error> for PaginationError {
    fn from(value: flowpage::Error) -> Self {
        Self::Content(value)
    }
}

/// Pages of one run and whether they cover the whole document.
///
/// When `complete` is false, `error` says why pagination stopped, or is
/// `None` when a run limit from [`RunConfig`] stopped it.
#[derive(Clone, Debug, PartialEq)]
pub struct PaginationOutcome {
    pub pages: Vec<PageDescriptor>,
    pub complete: bool,
    pub error: Option<PaginationError>,
}

impl PaginationOutcome {
    /// End positions of every page, in order.
    pub fn boundaries(&self) -> Vec<ContentPosition> {
        self.pages.iter().map(|p| p.end).collect()
    }

    /// See [`page_index_for_position`].
    pub fn page_index_for_position(&self, position: &ContentPosition) -> Option<usize> {
        page_index_for_position(&self.pages, position, self.complete)
    }
}

/// Index of the page showing `position`.
///
/// The start of the stream is always page 0. `None` means the answer is not
/// known yet because pagination has not reached that far.
pub fn page_index_for_position(
    pages: &[PageDescriptor],
    position: &ContentPosition,
    complete: bool,
) -> Option<usize> {
    if position.at_beginning() {
        return Some(0);
    }
    let last = || {
        if complete {
            pages.len().checked_sub(1)
        } else {
            None
        }
    };
    if position.is_end() {
        return last();
    }
    pages
        .iter()
        .position(|page| page.end.greater(position))
        .or_else(last)
}

/// Storage hooks for page-boundary caches.
pub trait BoundaryCacheStore {
    /// Load cached page end positions for the pagination profile, if available.
    fn load_boundaries(&self, _profile: PaginationProfileId) -> Option<Vec<ContentPosition>> {
        None
    }

    /// Persist page end positions of a complete run.
    fn store_boundaries(&self, _profile: PaginationProfileId, _boundaries: &[ContentPosition]) {}
}

const CACHE_SCHEMA_VERSION: u8 = 1;
const DEFAULT_MAX_CACHE_FILE_BYTES: usize = 1024 * 1024;
static CACHE_WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

/// File-backed page-boundary cache store.
///
/// Cache paths are deterministic by pagination profile:
/// `<root>/<profile-hex>/boundaries.bin`.
///
/// The store writes a postcard envelope with a schema version and enforces
/// `max_file_bytes` on both reads and writes. When I/O, decode, or size checks
/// fail, operations return `None`/no-op instead of bubbling errors.
#[derive(Clone, Debug)]
pub struct FileBoundaryCacheStore {
    root: PathBuf,
    max_file_bytes: usize,
}

impl FileBoundaryCacheStore {
    /// Create a new cache store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_CACHE_FILE_BYTES,
        }
    }

    /// Set the maximum allowed cache file size in bytes.
    ///
    /// Values of `0` are treated as `1` to keep the cap explicit.
    pub fn with_max_file_bytes(mut self, max_file_bytes: usize) -> Self {
        self.max_file_bytes = max_file_bytes.max(1);
        self
    }

    /// Root directory for cache files.
    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    /// Deterministic cache path for a profile.
    pub fn boundaries_path(&self, profile: PaginationProfileId) -> PathBuf {
        self.root.join(profile.to_hex()).join("boundaries.bin")
    }

    /// Write `payload` beside `final_path` and rename it into place, so a
    /// reader never sees a partial boundary list.
    fn write_envelope(&self, final_path: &Path, payload: &[u8]) -> io::Result<()> {
        if payload.len() > self.max_file_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} boundary bytes exceed max_file_bytes ({})",
                    payload.len(),
                    self.max_file_bytes
                ),
            ));
        }
        let dir = final_path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
        fs::create_dir_all(dir)?;

        let temp_path = dir.join(format!(
            "boundaries.bin.tmp-{}-{}",
            std::process::id(),
            CACHE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed)
        ));
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .and_then(|mut file| {
                file.write_all(payload)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, final_path));
        match written {
            Ok(()) => {
                // Best effort: make the rename durable.
                if let Ok(handle) = File::open(dir) {
                    let _ = handle.sync_all();
                }
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                Err(err)
            }
        }
    }
}

impl BoundaryCacheStore for FileBoundaryCacheStore {
    fn load_boundaries(&self, profile: PaginationProfileId) -> Option<Vec<ContentPosition>> {
        let path = self.boundaries_path(profile);
        let max_file_bytes = self.max_file_bytes as u64;
        if fs::metadata(&path).ok()?.len() > max_file_bytes {
            return None;
        }

        let file = File::open(path).ok()?;
        let mut reader = file.take(max_file_bytes.saturating_add(1));
        let mut payload = Vec::with_capacity(64);
        if reader.read_to_end(&mut payload).is_err() {
            return None;
        }
        if payload.len() > self.max_file_bytes {
            return None;
        }
        let envelope: PersistedBoundaries = postcard::from_bytes(&payload).ok()?;
        if envelope.version != CACHE_SCHEMA_VERSION {
            return None;
        }
        Some(envelope.boundaries)
    }

    fn store_boundaries(&self, profile: PaginationProfileId, boundaries: &[ContentPosition]) {
        let envelope = PersistedBoundaries {
            version: CACHE_SCHEMA_VERSION,
            boundaries: boundaries.to_vec(),
        };
        let Ok(payload) = postcard::to_allocvec(&envelope) else {
            return;
        };
        let path = self.boundaries_path(profile);
        if let Err(err) = self.write_envelope(&path, &payload) {
            log::warn!("Boundary cache write to {} failed: {}", path.display(), err);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedBoundaries {
    version: u8,
    boundaries: Vec<ContentPosition>,
}

/// Pagination engine: turns content and grids into pages.
#[derive(Clone)]
pub struct PaginationEngine {
    opts: PaginationOptions,
    diagnostic_sink: DiagnosticSink,
}

impl fmt::Debug for PaginationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationEngine")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl PaginationEngine {
    /// Create a pagination engine.
    pub fn new(opts: PaginationOptions) -> Self {
        Self {
            opts,
            diagnostic_sink: None,
        }
    }

    pub fn options(&self) -> &PaginationOptions {
        &self.opts
    }

    /// Register or replace the diagnostics sink.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(PaginationDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    fn emit_diagnostic(&self, diagnostic: PaginationDiagnostic) {
        let Some(sink) = &self.diagnostic_sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            sink(diagnostic);
        }
    }

    /// Stable fingerprint of everything that decides page boundaries,
    /// including how `caps` answers each figure size and grid requirement.
    pub fn pagination_profile_id(
        &self,
        content: &Content,
        grids: &[Grid],
        caps: &dyn Capabilities,
    ) -> PaginationProfileId {
        let mut payload = format!(
            "{:?}|{:?}|{}|{}|{}|{}|{}",
            self.opts.envelope,
            self.opts.short_column_ratio,
            content.line_height,
            content.col_width,
            content.blocks.len(),
            content.figures.len(),
            grids.len()
        );
        for block in &content.blocks {
            payload.push_str(&format!("|{}", block.metrics.outer_height));
        }
        for figure in &content.figures {
            payload.push_str(&format!(
                "|{}:{}:{:?}",
                figure.anchor_index,
                if figure.optional { "optional" } else { "required" },
                figure.fallback
            ));
            for (name, size) in &figure.sizes {
                payload.push_str(&format!(
                    ",{}={}x{}:{}",
                    name,
                    size.min_width,
                    size.payload_height(),
                    size.meets_requirements(caps)
                ));
            }
        }
        for grid in grids {
            payload.push('|');
            payload.push(if grid.capability_filter(caps) { '+' } else { '-' });
            payload.push_str(&grid.markup);
        }
        PaginationProfileId::from_bytes(payload.as_bytes())
    }

    /// Grids usable for this run, stretched to the envelope and sorted best
    /// first, each with its index in `grids`.
    ///
    /// An empty `grids` list yields one flexible single-column grid.
    pub fn eligible_grids(
        &self,
        content: &Content,
        grids: &[Grid],
        caps: &dyn Capabilities,
    ) -> Vec<(usize, Grid)> {
        let envelope = self.opts.envelope;
        if grids.is_empty() {
            let col_width = if content.col_width > 0.0 {
                content.col_width
            } else {
                envelope.width
            };
            let mut grid = Grid::single_column(envelope, content.line_height, col_width);
            // Pages shorter than one line keep their raw height.
            if envelope.height >= grid.line_height {
                grid.stretch(envelope.height);
            }
            return vec![(0, grid)];
        }
        let mut eligible: Vec<(usize, Grid)> = grids
            .iter()
            .enumerate()
            .filter(|(_, g)| g.capability_filter(caps) && g.size_filter(envelope))
            .map(|(i, g)| {
                let mut g = g.clone();
                g.stretch(envelope.height);
                (i, g)
            })
            .collect();
        eligible.sort_by(|a, b| Grid::compare(&a.1, &b.1));
        log::debug!("{} of {} grids eligible", eligible.len(), grids.len());
        eligible
    }

    /// Begin a resumable pagination session.
    pub fn begin<'a>(
        &'a self,
        content: &'a Content,
        grids: &[Grid],
        config: RunConfig<'a>,
    ) -> PaginationSession<'a> {
        let profile = self.pagination_profile_id(content, grids, config.capabilities());
        let (grid_ids, eligible): (Vec<usize>, Vec<Grid>) = self
            .eligible_grids(content, grids, config.capabilities())
            .into_iter()
            .unzip();
        let error = eligible
            .is_empty()
            .then_some(PaginationError::NoEligibleGrid { page_index: 0 });

        let mut cached = None;
        if let Some(cache) = config.cache {
            match cache.load_boundaries(profile) {
                Some(boundaries) => {
                    self.emit_diagnostic(PaginationDiagnostic::CacheHit {
                        page_count: boundaries.len(),
                    });
                    cached = Some(boundaries);
                }
                None => self.emit_diagnostic(PaginationDiagnostic::CacheMiss),
            }
        }

        PaginationSession {
            engine: self,
            content,
            grids: eligible,
            grid_ids,
            cfg: config,
            profile,
            br: BreakRecord::new(),
            pages: Vec::with_capacity(8),
            forced_pages: 0,
            complete: false,
            error,
            cached,
            cache_mismatch: false,
        }
    }

    /// Paginate `content` in one go.
    ///
    /// Stops early at the run config's page limit or stop position, or on
    /// the first error. Pages built before an error are kept.
    pub fn paginate(
        &self,
        content: &Content,
        grids: &[Grid],
        config: RunConfig<'_>,
    ) -> PaginationOutcome {
        let page_limit = config.page_limit;
        let stop_at = config.stop_at;
        let mut session = self.begin(content, grids, config);
        while !session.is_complete() {
            if page_limit.is_some_and(|limit| session.pages.len() >= limit) {
                break;
            }
            if let Some(stop) = stop_at.as_ref() {
                if session.pages.last().is_some_and(|p| p.end.greater(stop)) {
                    break;
                }
            }
            if session.next_page().is_err() {
                break;
            }
        }
        session.into_outcome()
    }
}

/// Incremental pagination over one content stream.
///
/// Each call builds pages strictly after the previous ones; a session is
/// never re-entered for the same content while another pass is running.
pub struct PaginationSession<'a> {
    engine: &'a PaginationEngine,
    content: &'a Content,
    grids: Vec<Grid>,
    grid_ids: Vec<usize>,
    cfg: RunConfig<'a>,
    profile: PaginationProfileId,
    br: BreakRecord,
    pages: Vec<PageDescriptor>,
    forced_pages: usize,
    complete: bool,
    error: Option<PaginationError>,
    cached: Option<Vec<ContentPosition>>,
    cache_mismatch: bool,
}

impl fmt::Debug for PaginationSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationSession")
            .field("pages", &self.pages.len())
            .field("br", &self.br)
            .field("complete", &self.complete)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<'a> PaginationSession<'a> {
    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn error(&self) -> Option<&PaginationError> {
        self.error.as_ref()
    }

    /// Break state after the last built page.
    pub fn break_record(&self) -> &BreakRecord {
        &self.br
    }

    pub fn profile_id(&self) -> PaginationProfileId {
        self.profile
    }

    /// Page end positions loaded from the boundary cache, if any.
    pub fn cached_boundaries(&self) -> Option<&[ContentPosition]> {
        self.cached.as_deref()
    }

    /// See [`page_index_for_position`].
    pub fn page_index_for_position(&self, position: &ContentPosition) -> Option<usize> {
        page_index_for_position(&self.pages, position, self.complete)
    }

    /// Build the next page.
    ///
    /// Returns `Ok(None)` once the document is complete. Errors are sticky:
    /// after one, every call returns it again.
    pub fn next_page(&mut self) -> Result<Option<&PageDescriptor>, PaginationError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.complete {
            return Ok(None);
        }
        if self.cfg.cancel.is_some_and(|cancel| cancel.is_cancelled()) {
            self.engine.emit_diagnostic(PaginationDiagnostic::Cancelled);
            return Err(self.fail(PaginationError::Cancelled));
        }
        if self.br.at_end(self.content) {
            self.finish_document();
            return Ok(None);
        }
        let limit = self.engine.opts.limits.max_pages;
        if self.pages.len() >= limit {
            return Err(self.fail(PaginationError::LimitExceeded {
                kind: "pages",
                actual: self.pages.len() + 1,
                limit,
            }));
        }

        let ctx = PageContext {
            content: self.content,
            grids: &self.grids,
            capabilities: self.cfg.capabilities(),
            short_column_ratio: self.engine.opts.short_column_ratio,
        };
        let page_index = self.pages.len();
        let mut excluded = Vec::new();
        let mut carried_drops = Vec::new();
        let page = loop {
            let start = self.br.position();
            let dropped_figures = match build_page(&ctx, &mut self.br, &excluded) {
                PageBuild::Built(mut page) => {
                    let only_page = page
                        .grid_index
                        .and_then(|g| self.grids.get(g))
                        .is_some_and(|g| g.scoring_flags.only_page);
                    page.grid_index = page.grid_index.and_then(|g| self.grid_ids.get(g).copied());
                    break (page, only_page);
                }
                PageBuild::Ignored { grid } => {
                    self.engine.emit_diagnostic(PaginationDiagnostic::PageIgnored {
                        page_index,
                        grid_index: self.grid_ids.get(grid).copied().unwrap_or(grid),
                    });
                    excluded.push(grid);
                    continue;
                }
                PageBuild::NoGrid => Vec::new(),
                PageBuild::NoProgress {
                    dropped_figures, ..
                } => dropped_figures,
            };
            carried_drops.extend(dropped_figures);
            if self.br.at_end(self.content) {
                self.finish_without_page(carried_drops);
                return Ok(None);
            }
            let position = self.br.position();
            if position.block != start.block || position.overhang != start.overhang {
                // Only skipped blocks were consumed; try again from there.
                continue;
            }
            self.engine.emit_diagnostic(PaginationDiagnostic::NoProgress {
                page_index,
                position,
            });
            break (self.forced_page(page_index, position)?, false);
        };

        let (mut page, only_page) = page;
        if !carried_drops.is_empty() {
            carried_drops.append(&mut page.dropped_figures);
            page.dropped_figures = carried_drops;
        }
        let finished = only_page || self.br.at_end(self.content);
        if finished {
            self.drop_unplaced_optional(&mut page);
        }
        self.check_cached_boundary(page_index, &page.end);
        self.engine.emit_diagnostic(PaginationDiagnostic::PageBuilt {
            page_index,
            grid_index: page.grid_index,
        });
        self.pages.push(page);
        if finished {
            self.finish_document();
        }
        Ok(self.pages.last())
    }

    fn forced_page(
        &mut self,
        page_index: usize,
        position: ContentPosition,
    ) -> Result<PageDescriptor, PaginationError> {
        let limit = self.engine.opts.limits.max_forced_pages;
        let Some(page) = forced_figure_page(self.content, &mut self.br, self.engine.opts.envelope)
        else {
            log::warn!("No progress possible at block {}", position.block);
            return Err(self.fail(PaginationError::LayoutImpossible {
                page_index,
                position,
            }));
        };
        self.forced_pages += 1;
        if self.forced_pages > limit {
            return Err(self.fail(PaginationError::LimitExceeded {
                kind: "forced_pages",
                actual: self.forced_pages,
                limit,
            }));
        }
        let figure_index = page
            .figures
            .first()
            .map(|f| f.figure_index)
            .or_else(|| page.dropped_figures.first().copied())
            .unwrap_or_default();
        self.engine
            .emit_diagnostic(PaginationDiagnostic::ForcedFigurePage {
                page_index,
                figure_index,
            });
        Ok(page)
    }

    /// Optional figures never placed are given up on the last page.
    fn drop_unplaced_optional(&mut self, page: &mut PageDescriptor) {
        for figure in self.content.figures.iter().filter(|f| f.optional) {
            if !self.br.figure_used(figure.figure_index) {
                log::debug!("Dropping optional figure {}", figure.figure_index);
                self.br.use_figure(figure.figure_index);
                page.dropped_figures.push(figure.figure_index);
            }
        }
    }

    /// The document ran out while building a page that would be blank.
    /// Figures given up on are reported on the last page instead.
    fn finish_without_page(&mut self, dropped_figures: Vec<usize>) {
        if let Some(mut last) = self.pages.pop() {
            last.dropped_figures.extend(dropped_figures);
            self.drop_unplaced_optional(&mut last);
            self.pages.push(last);
        } else if !dropped_figures.is_empty() {
            log::debug!("Dropped figures {:?} before the first page", dropped_figures);
        }
        self.finish_document();
    }

    fn check_cached_boundary(&mut self, page_index: usize, end: &ContentPosition) {
        let Some(cached) = &self.cached else {
            return;
        };
        if !self.cache_mismatch && cached.get(page_index) != Some(end) {
            log::warn!("Page {} ends away from its cached boundary", page_index);
            self.cache_mismatch = true;
        }
    }

    fn finish_document(&mut self) {
        if self.complete {
            return;
        }
        self.complete = true;
        log::info!("Finished pagination with {} pages", self.pages.len());
        let Some(cache) = self.cfg.cache else {
            return;
        };
        let fresh = self
            .cached
            .as_ref()
            .is_none_or(|c| self.cache_mismatch || c.len() != self.pages.len());
        if fresh {
            let boundaries: Vec<ContentPosition> = self.pages.iter().map(|p| p.end).collect();
            cache.store_boundaries(self.profile, &boundaries);
        }
    }

    fn fail(&mut self, err: PaginationError) -> PaginationError {
        self.error = Some(err.clone());
        err
    }

    /// Paginate until page `index` exists or the document ends.
    pub fn paginate_until_page(
        &mut self,
        index: usize,
    ) -> Result<Option<&PageDescriptor>, PaginationError> {
        while self.pages.len() <= index && !self.complete {
            self.next_page()?;
        }
        Ok(self.pages.get(index))
    }

    /// Paginate until the page showing `position` exists, and return its index.
    pub fn paginate_until_position(
        &mut self,
        position: &ContentPosition,
    ) -> Result<Option<usize>, PaginationError> {
        while !self.complete
            && !position.at_beginning()
            && !self.pages.last().is_some_and(|p| p.end.greater(position))
        {
            self.next_page()?;
        }
        Ok(self.page_index_for_position(position))
    }

    /// Run to the end of the document.
    pub fn finish(mut self) -> PaginationOutcome {
        while !self.complete {
            if self.next_page().is_err() {
                break;
            }
        }
        self.into_outcome()
    }

    fn into_outcome(self) -> PaginationOutcome {
        PaginationOutcome {
            pages: self.pages,
            complete: self.complete,
            error: self.error,
        }
    }
}
