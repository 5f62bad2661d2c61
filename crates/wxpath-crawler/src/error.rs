use std::fmt;

use thiserror::Error;
use wxpath_expr::ParseError;

/// Run-level failures. Per-URL failures are [`FetchError`](FetchError)s and
/// never abort a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed expression; surfaced synchronously at run entry.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid settings, mixed hook modes, or a missing cache backend;
    /// surfaced synchronously at run entry.
    #[error("configuration error: {0}")]
    Config(String),

    /// Runtime invariant violation discovered during dispatch.
    #[error("program error: {0}")]
    Program(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Timeout,
    RobotsDenied,
    StatusNotAllowed,
    RedirectLoop,
    DecodeError,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::RobotsDenied => "robots denied",
            FetchErrorKind::StatusNotAllowed => "status not allowed",
            FetchErrorKind::RedirectLoop => "redirect loop",
            FetchErrorKind::DecodeError => "decode error",
        };
        f.write_str(s)
    }
}

/// Why one URL failed. Absorbed by the fetcher: counted, then dropped or
/// streamed as an error datum depending on `yield_errors`.
#[derive(Debug, Clone, Error)]
#[error("{kind} fetching {url}: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub status: Option<u16>,
    pub detail: String,
}

impl FetchError {
    pub(crate) fn new(kind: FetchErrorKind, url: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            status: None,
            detail: detail.into(),
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
