//! Error types for tensorpool client operations

use thiserror::Error;
use tp::config::ConfigError;
use tp::control::WireError;
use tp::shm::LayoutError;
use tp::shm::uri::UriError;

/// Coarse error classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Caller misuse (bad argument, unknown pool, stale claim)
    Arg,
    /// Control-plane transport failure
    Transport,
    /// No data or no response before the deadline; always retryable
    Timeout,
    /// Malformed, epoch-mismatched or revoked; needs a re-attach
    Protocol,
    /// Mapping or superblock failure
    Shm,
    /// Operating system I/O failure
    Io,
    /// Fixed capacity exhausted
    NoMem,
    /// Feature or scheme not supported
    Unsupported,
    /// Resource contended
    Busy,
    /// Cache or attribute miss
    NotFound,
}

/// Errors that can occur during tensorpool client operations
#[derive(Error, Debug)]
pub enum TpError {
    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// Control-plane transport failure
    #[error("Transport error: {reason}")]
    Transport {
        /// Transport-specific description
        reason: String,
    },

    /// Nothing arrived before the deadline (or no frame is ready)
    #[error("Timed out: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },

    /// Peer violated the protocol
    #[error("Protocol violation: {reason}")]
    Protocol {
        /// Violation description
        reason: String,
    },

    /// The driver refused a request
    #[error("Driver rejected request: {message}")]
    Rejected {
        /// Driver-supplied reason
        message: String,
    },

    /// The lease backing this handle was revoked
    #[error("Lease {lease_id} revoked")]
    Revoked {
        /// Revoked lease
        lease_id: u64,
    },

    /// The driver announced shutdown
    #[error("Driver shut down")]
    DriverShutdown,

    /// Region mapping or superblock failure
    #[error("Shared memory error: {reason}")]
    Shm {
        /// Failure description
        reason: String,
    },

    /// Unsupported feature
    #[error("Unsupported: {reason}")]
    Unsupported {
        /// What is unsupported
        reason: String,
    },

    /// Slot or resource contended
    #[error("Resource busy: {resource}")]
    Busy {
        /// Contended resource
        resource: &'static str,
    },

    /// Lookup miss
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },

    /// Fixed-capacity table is full
    #[error("Capacity exhausted: {what}")]
    CapacityExhausted {
        /// Table that is full
        what: &'static str,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// Control-plane decode error
    #[error("Wire error: {source}")]
    Wire {
        /// Source codec error
        #[from]
        source: WireError,
    },

    /// Shared-memory layout decode error
    #[error("Layout error: {source}")]
    Layout {
        /// Source layout error
        #[from]
        source: LayoutError,
    },

    /// Region URI error
    #[error("Region URI error: {source}")]
    Uri {
        /// Source URI error
        #[from]
        source: UriError,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },
}

impl TpError {
    /// Classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } | Self::Config { .. } => ErrorCode::Arg,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Protocol { .. }
            | Self::Rejected { .. }
            | Self::Revoked { .. }
            | Self::DriverShutdown
            | Self::Wire { .. }
            | Self::Layout { .. } => ErrorCode::Protocol,
            Self::Shm { .. } => ErrorCode::Shm,
            Self::Unsupported { .. } => ErrorCode::Unsupported,
            Self::Busy { .. } => ErrorCode::Busy,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::CapacityExhausted { .. } => ErrorCode::NoMem,
            Self::Io { .. } | Self::Nix { .. } => ErrorCode::Io,
            Self::Uri { source } => match source {
                UriError::UnsupportedScheme(_) => ErrorCode::Unsupported,
                UriError::Malformed(_) | UriError::RelativePath(_) => ErrorCode::Arg,
            },
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::Timeout | ErrorCode::Busy)
    }

    pub(crate) fn arg(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub(crate) fn shm(reason: impl Into<String>) -> Self {
        Self::Shm {
            reason: reason.into(),
        }
    }
}

/// Result type for tensorpool client operations
pub type TpResult<T> = Result<T, TpError>;
