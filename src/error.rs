//! Error types for snapshot reading and content model construction.

use alloc::string::String;
use core::fmt;

/// Errors raised while building the content model.
///
/// Measurement defects (negative heights, non-finite values) are never
/// reported here: the sanitizer clamps them so that a single malformed block
/// cannot abort a whole document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The XHTML snapshot could not be read.
    Snapshot {
        /// Stable machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },
    /// A figure template value payload was malformed.
    Template {
        /// Human-readable message.
        message: String,
    },
    /// A grid template has no usable geometry.
    InvalidGrid {
        /// Human-readable message.
        message: String,
    },
}

impl Error {
    pub(crate) fn snapshot(code: &'static str, message: impl Into<String>) -> Self {
        Self::Snapshot {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_grid(message: impl Into<String>) -> Self {
        Self::InvalidGrid {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot { code, message } => write!(f, "snapshot error [{}]: {}", code, message),
            Self::Template { message } => write!(f, "figure template error: {}", message),
            Self::InvalidGrid { message } => write!(f, "invalid grid: {}", message),
        }
    }
}

impl std::error::Error for Error {}
