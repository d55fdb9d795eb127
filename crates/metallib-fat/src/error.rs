use thiserror::Error;

use crate::fat::ArchSelector;

/// Errors returned while parsing or thinning a universal container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatError {
    /// The header magic or the slice directory arithmetic is inconsistent.
    #[error("malformed universal container: {0}")]
    Malformed(String),

    /// A declared offset/length pair runs past the end of the buffer.
    #[error("truncated universal container: {0}")]
    Truncated(String),

    /// No slice matches the requested architecture.
    #[error("no slice matches {0}")]
    NotFound(ArchSelector),

    /// Several slices share the requested CPU type and no subtype was given to pick one.
    #[error("{count} slices match {selector}; a cpu subtype is required to pick one")]
    Ambiguous {
        /// The selector that matched more than one slice.
        selector: ArchSelector,
        /// Number of matching slices.
        count: usize,
    },
}

impl FatError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub(crate) fn truncated(msg: impl Into<String>) -> Self {
        Self::Truncated(msg.into())
    }
}
