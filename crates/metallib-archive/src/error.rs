use thiserror::Error;

/// Errors returned while reading or writing a Metal library container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// A header, table or tag invariant is violated.
    #[error("malformed metallib: {0}")]
    Malformed(String),

    /// A declared offset/length runs past the bytes actually available.
    #[error("truncated metallib: {0}")]
    Truncated(String),
}

impl ArchiveError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub(crate) fn truncated(msg: impl Into<String>) -> Self {
        Self::Truncated(msg.into())
    }

    /// The detail message without the error class prefix.
    pub fn context(&self) -> &str {
        match self {
            Self::Malformed(msg) | Self::Truncated(msg) => msg,
        }
    }

    /// Prefixes the detail message with `what`, keeping the error class.
    pub(crate) fn within(self, what: impl core::fmt::Display) -> Self {
        match self {
            Self::Malformed(msg) => Self::Malformed(format!("{what}: {msg}")),
            Self::Truncated(msg) => Self::Truncated(format!("{what}: {msg}")),
        }
    }
}
