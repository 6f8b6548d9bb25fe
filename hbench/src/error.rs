use std::io;

use thiserror::Error;

/// Transport-level failure.
///
/// Deadline expiration is reported as [`TransportError::Timeout`] and is
/// otherwise handled exactly like any other failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operation did not complete before its deadline.
    #[error("operation timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed response: {0}")]
    Http(#[from] httparse::Error),
    #[error("malformed response: {0}")]
    Framing(&'static str),
    /// The peer closed the connection before a complete response arrived.
    #[error("connection closed by peer")]
    Closed,
    #[error("no endpoints to connect to")]
    NoEndpoints,
}

impl TransportError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns the I/O error kind, if this error is caused by an I/O error.
    #[inline]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

/// Per-session failure, tagged with the operation that failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect: {0}")]
    Connect(#[source] TransportError),
    #[error("handshake: {0}")]
    Handshake(#[source] TransportError),
    #[error("write: {0}")]
    Write(#[source] TransportError),
    #[error("read: {0}")]
    Read(#[source] TransportError),
    #[error("shutdown: {0}")]
    Shutdown(#[source] TransportError),
}

impl SessionError {
    /// Returns the name of the failed operation.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Connect(..) => "connect",
            Self::Handshake(..) => "handshake",
            Self::Write(..) => "write",
            Self::Read(..) => "read",
            Self::Shutdown(..) => "shutdown",
        }
    }

    #[inline]
    pub fn transport(&self) -> &TransportError {
        match self {
            Self::Connect(err)
            | Self::Handshake(err)
            | Self::Write(err)
            | Self::Read(err)
            | Self::Shutdown(err) => err,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.transport().is_timeout()
    }
}

/// Address resolution failure.
///
/// This is fatal for the whole run and occurs before any session starts.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("can not resolve {host}:{port}: {source}")]
    Lookup {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("can not resolve {host}:{port}: no addresses found")]
    Empty { host: String, port: u16 },
}

/// Command line argument error.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error("URL '{0}' has no host")]
    EmptyHost(String),
    #[error("invalid port '{port}' in URL '{url}'")]
    InvalidPort { url: String, port: String },
    #[error("unterminated IPv6 address in URL '{0}'")]
    UnterminatedIpv6(String),
    #[error("'{0}' is not a valid TLS server name")]
    ServerName(String),
}
