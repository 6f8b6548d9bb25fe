//! Connection transports.
//!
//! A [`Transport`] drives a single connection through its lifecycle: connect,
//! optional handshake, request/response exchange and shutdown. Every operation
//! is bounded by an absolute deadline; its expiration is reported as
//! [`TransportError::Timeout`].

use core::{future::Future, net::SocketAddr};
use std::io;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};

pub use self::{
    plain::{PlainConnector, PlainTransport},
    secure::{load_root_certificates, SecureConnector, SecureTransport},
    wire::{encode, request, Response},
};
use crate::error::TransportError;

#[cfg(test)]
pub(crate) use self::secure::test::{serve_tls, unrelated_roots};

mod plain;
mod secure;
mod wire;

/// Connection capability owned by exactly one session.
pub trait Transport {
    /// Whether [`Transport::handshake`] must be performed after connecting.
    const SECURE: bool;

    /// Connects to the first reachable endpoint, trying them in order.
    fn connect(
        &mut self,
        endpoints: &[SocketAddr],
        deadline: Instant,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Performs the security handshake over an established connection.
    fn handshake(&mut self, deadline: Instant) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends the given request bytes.
    fn send(&mut self, request: &[u8], deadline: Instant) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives a single complete response.
    fn receive(&mut self, deadline: Instant) -> impl Future<Output = Result<Response, TransportError>> + Send;

    /// Gracefully closes the connection.
    fn shutdown(&mut self, deadline: Instant) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether the given shutdown error is a known condition that does not
    /// indicate a failed session.
    fn is_benign_shutdown(err: &TransportError) -> bool;
}

/// Creates fresh per-session transports.
pub trait Connector {
    type Transport: Transport + Send + 'static;

    fn transport(&self) -> Self::Transport;
}

/// Runs the given operation until the deadline.
async fn with_deadline<F, T>(deadline: Instant, f: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout_at(deadline, f).await {
        Ok(rc) => rc,
        Err(..) => Err(TransportError::Timeout),
    }
}

async fn connect_any(endpoints: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last_err = None;

    for addr in endpoints {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                log::trace!("connected to {addr}");
                return Ok(stream);
            }
            Err(err) => {
                log::trace!("failed to connect to {addr}: {err}");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => Err(err.into()),
        None => Err(TransportError::NoEndpoints),
    }
}

async fn write_all<S>(stream: &mut S, data: &[u8]) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    stream.flush().await?;

    Ok(())
}

#[inline]
fn not_connected() -> TransportError {
    io::Error::from(io::ErrorKind::NotConnected).into()
}
