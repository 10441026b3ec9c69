use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    NotFound,
    ExternalToolFailure,
    Timeout,
    IoFailure,
    InvalidInput,
}

impl ErrorKind {
    /// Short heading for user-facing notices.
    pub(crate) fn title(self) -> &'static str {
        match self {
            Self::NotFound => "Not Found",
            Self::ExternalToolFailure => "Download Failed",
            Self::Timeout => "Download Timed Out",
            Self::IoFailure => "Storage Error",
            Self::InvalidInput => "Invalid Request",
        }
    }
}

/// Failures surfaced by the download engine.
///
/// Variants carry rendered messages rather than source errors so one outcome can be
/// cloned out to every caller waiting on the same download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ani-cli failed: {0}")]
    ExternalToolFailure(String),

    #[error("ani-cli did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("i/o failure: {0}")]
    IoFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ExternalToolFailure(_) => ErrorKind::ExternalToolFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::IoFailure(_) => ErrorKind::IoFailure,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::IoFailure(format!("{context}: {err}"))
    }
}
