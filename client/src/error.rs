//! Client errors.
use std::io;

use crossbeam_channel as chan;
use thiserror::Error;

use tumbaga_common::server::Protocol;

/// A client error.
#[derive(Debug, Error)]
pub enum Error {
    /// No main interface is connected.
    #[error("not connected to a server")]
    NotConnected,
    /// The coordinator's event loop is no longer running.
    #[error("the client event loop has shut down")]
    Shutdown,
    /// The directory has no server speaking the required protocol.
    #[error("no known servers for protocol {0}")]
    NoServers(Protocol),
    /// A transport-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::Shutdown
    }
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::Shutdown
    }
}
