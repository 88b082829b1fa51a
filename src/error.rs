/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io::Error as IoError;
use std::sync::Arc;

/// The error type for **evtcp** operations
///
/// Errors are delivered to the affected resource only: a failed socket
/// operation surfaces through [`Handler::on_error`](crate::Handler::on_error)
/// (or [`ServerHandler::on_error`](crate::ServerHandler::on_error)) on the
/// channel or server that owns the socket, after which that resource is
/// force-closed. Graceful termination – the peer closing the connection, or
/// a local `stop()` – is **not** an error and is reported via `on_stop`
/// instead.
#[derive(Clone)]
pub enum TcpError {
    /// Indicates that the operation was attempted on a channel, server or
    /// reactor that has already been closed. Also delivered to every
    /// resource left registered with a reactor whose event loop terminated.
    Closed,
    /// Indicates that the underlying socket operation failed. The affected
    /// resource has been force-closed; the operation is never retried.
    Failed(Arc<IoError>),
    /// Indicates that a handler callback failed while processing an event.
    /// Treated like an I/O fault on the owning channel.
    Handler(String),
}

impl TcpError {
    /// Creates a handler-fault error from a descriptive message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl Debug for TcpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "TcpError::Closed"),
            Self::Failed(error) => write!(f, "TcpError::Failed({:?})", error),
            Self::Handler(message) => write!(f, "TcpError::Handler({:?})", message),
        }
    }
}

impl Display for TcpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpError::Closed => write!(f, "The resource has already been closed!"),
            TcpError::Failed(error) => write!(f, "The socket operation failed: {}", error),
            TcpError::Handler(message) => write!(f, "A handler callback failed: {}", message),
        }
    }
}

impl Error for TcpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TcpError::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<IoError> for TcpError {
    fn from(error: IoError) -> Self {
        TcpError::Failed(Arc::new(error))
    }
}
