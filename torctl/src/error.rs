//! Error kinds for `torctl`.
//!
//! One `thiserror` enum, one variant per failure class, string payloads
//! for whatever the daemon or OS told us.

use thiserror::Error;

/// Every way an operation against a tor daemon (real or mocked) can fail.
#[derive(Debug, Error)]
pub enum TorCtlError {
    /// The tor binary could not be located or does not exist at the given path.
    #[error("tor binary not found: {0}")]
    NotFound(String),

    /// Caller supplied a name, value, or argument that can never be valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background parser (consensus, event demux) saw something the
    /// protocol doesn't allow. Per §7 this is logged and the offending
    /// event/line is dropped; it only becomes a caller-visible error when
    /// raised synchronously (e.g. an unexpected EXTENDCIRCUIT reply).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The daemon replied with a non-2xx code to a directed command.
    #[error("tor refused command: {0}")]
    DaemonRefused(String),

    /// The process supervisor failed to bring a tor daemon up.
    #[error("bootstrap failed: {0}")]
    BootstrapFailure(String),

    /// A precondition the caller was responsible for didn't hold
    /// (e.g. attaching to an untracked or not-yet-built circuit).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Transport-level I/O failure talking to the daemon or its process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TorCtlError>;
