//! Content model and break records for grid-based page reflow.
//!
//! `flowpage` turns an already-measured element tree into a flat stream of
//! blocks and figures ([`Content`]) and provides the cursor types the page
//! construction loop in `flowpage-render` threads through pagination:
//! [`BreakRecord`] for in-progress decisions and [`ContentPosition`] for
//! finished page boundaries.
//!
//! # Usage
//!
//! ```rust,no_run
//! use flowpage::{snapshot, BreakRecord, Content, ContentPosition};
//!
//! # fn example() -> Result<(), flowpage::Error> {
//! let tree = snapshot::parse_xhtml(b"<article data-line-height=\"20\">...</article>")?;
//! let content = Content::from_node(&tree)?;
//!
//! let br = BreakRecord::new();
//! assert!(br.at_start());
//! assert!(br.position().at_beginning());
//! assert!(br.position() <= ContentPosition::END);
//! # let _ = content;
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

extern crate alloc;

pub mod block;
pub mod break_record;
pub mod capabilities;
pub mod content;
pub mod error;
pub mod figure;
pub mod grid;
pub mod metrics;
pub mod position;
pub mod sanitize;
pub mod sizing;
pub mod snapshot;

pub use block::Block;
pub use break_record::{BreakRecord, FigureStatus};
pub use capabilities::{AllCapabilities, Capabilities, CapabilitySet};
pub use content::{Content, Fields};
pub use error::Error;
pub use figure::{Figure, FigureSize};
pub use grid::{ContainerMapping, Grid, ScoringFlags};
pub use metrics::{round_up, Metrics, PageEnvelope};
pub use position::ContentPosition;
pub use sanitize::SanitizeOptions;
pub use sizing::{Column, Container};
pub use snapshot::{ContentNode, Display, SnapshotLimits};
