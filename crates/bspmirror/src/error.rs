//! Error types for the mirror engine
//!
//! Three failure classes with different blast radii:
//!
//! - [`TransportError`]: socket I/O failed or the peer went away. Always
//!   fatal to the mirror; there is no reconnect policy in this crate.
//! - [`SnapshotParseError`]: the full-state dump was malformed. Fatal to
//!   startup, the mirror never becomes live.
//! - [`EventParseError`]: a single notification line was malformed. The
//!   line is dropped with a warning and processing continues.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur on either socket channel to the window manager
#[derive(Debug, Error)]
pub enum TransportError {
    /// Neither BSPWM_SOCKET nor DISPLAY is set, so no socket path can be derived
    #[error("BSPWM_SOCKET and DISPLAY are both unset - is the window manager running?")]
    SocketNotSet,

    /// The DISPLAY string could not be parsed
    #[error("DISPLAY value {display:?} is not of the form host:display[.screen]")]
    BadDisplay { display: String },

    /// The socket path does not exist
    #[error("window manager socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    /// The path exists but is not a unix socket
    #[error("{path} exists but is not a socket")]
    NotASocket { path: PathBuf },

    /// Failed to connect to the socket
    #[error("failed to connect to window manager socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a request or the subscribe command
    #[error("failed to send to window manager: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Failed to read a response or event line
    #[error("failed to read from window manager: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer closed the channel while we still expected data
    #[error("connection to window manager closed unexpectedly")]
    ConnectionClosed,
}

/// A malformed full-state dump, carrying the offending token and its byte
/// offset within the dump.
#[derive(Debug, Error)]
#[error("malformed snapshot token {token:?} at byte {offset}: {reason}")]
pub struct SnapshotParseError {
    pub token: String,
    pub offset: usize,
    pub reason: String,
}

/// A malformed notification line.
///
/// Unknown event *kinds* are not errors (they parse to
/// [`Event::Unknown`](crate::event::Event::Unknown)); this is produced when a
/// known kind arrives with the wrong field count or an unparseable field.
#[derive(Debug, Error)]
#[error("malformed event line {line:?}: {reason}")]
pub struct EventParseError {
    pub line: String,
    pub reason: String,
}

/// Umbrella error surfaced by the mirror lifecycle operations.
///
/// `EventParseError` is deliberately absent: it never terminates the mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotParseError),
}
