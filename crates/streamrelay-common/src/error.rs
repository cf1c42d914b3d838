//! Unified error type for streamrelay.
//!
//! Every failure on the relay and transcode paths funnels into [`Error`],
//! which carries enough context for the HTTP layer to pick a status code via
//! [`Error::http_status`] and a stable machine-readable code via
//! [`Error::code`].

/// Unified error type covering all failure modes of the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request parameters failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The upstream could not be reached, or kept failing after retries.
    #[error("Upstream unreachable [{url}]: {message}")]
    UpstreamUnreachable {
        /// The upstream URL (possibly truncated for logging).
        url: String,
        /// Human-readable error description.
        message: String,
    },

    /// The upstream answered with a non-success status that is not retried.
    #[error("Upstream rejected request with status {status}: {message}")]
    UpstreamRejected {
        /// Status code returned by the upstream.
        status: u16,
        /// Reason phrase or short body excerpt.
        message: String,
    },

    /// A manifest exceeded the configured rewrite bound.
    #[error("Manifest exceeds {limit} bytes")]
    ManifestTooLarge {
        /// Configured maximum manifest size in bytes.
        limit: usize,
    },

    /// An external tool could not be found or spawned.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The subprocess exited before producing any output.
    #[error("Process exited before producing output (code {code:?})")]
    ProcessExited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::UpstreamUnreachable { .. } => 502,
            Error::UpstreamRejected { status, .. } => *status,
            Error::ManifestTooLarge { .. } => 502,
            Error::Tool { .. } => 500,
            Error::ProcessExited { .. } => 502,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable snake_case code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::UpstreamUnreachable { .. } => "upstream_unreachable",
            Error::UpstreamRejected { .. } => "upstream_rejected",
            Error::ManifestTooLarge { .. } => "manifest_too_large",
            Error::Tool { .. } => "tool_error",
            Error::ProcessExited { .. } => "process_exited",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::UpstreamUnreachable`].
    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UpstreamUnreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::UpstreamRejected`].
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Error::UpstreamRejected {
            status,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
