//! Page construction and pagination for `flowpage`.
//!
//! [`PaginationEngine`] picks the best grid for every page, maps figures to
//! grid containers, fills columns from the content stream and reports the
//! result as [`PageDescriptor`]s. Sessions are resumable, so a host can
//! paginate only as far as it needs to.
//!
//! ```rust,no_run
//! use flowpage::{snapshot, Content};
//! use flowpage_render::{PaginationEngine, PaginationOptions, RunConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = snapshot::parse_xhtml(b"<article data-line-height=\"20\">...</article>")?;
//! let content = Content::from_node(&tree)?;
//! let engine = PaginationEngine::new(PaginationOptions::for_envelope(600.0, 800.0));
//! let outcome = engine.paginate(&content, &[], RunConfig::default());
//! for page in &outcome.pages {
//!     println!("page {} ends at block {}", page.page_number, page.end.block);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod page_layout;
mod render_engine;
mod render_ir;

pub use page_layout::{PageBuild, PageContext, DEFAULT_SHORT_COLUMN_RATIO};
pub use render_engine::{
    page_index_for_position, BoundaryCacheStore, CancelToken, FileBoundaryCacheStore,
    NeverCancel, PaginationDiagnostic, PaginationEngine, PaginationError, PaginationLimits,
    PaginationOptions, PaginationOutcome, PaginationSession, RunConfig,
};
pub use render_ir::{
    BlockSlice, ColumnFill, PageDescriptor, PaginationProfileId, PlacedFigure, SliceRole,
};
