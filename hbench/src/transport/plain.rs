use core::net::SocketAddr;
use std::io;

use bytes::BytesMut;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::Instant};

use super::{connect_any, not_connected, wire, with_deadline, write_all, Connector, Response, Transport};
use crate::error::TransportError;

/// Plain TCP transport.
#[derive(Debug, Default)]
pub struct PlainTransport {
    /// Current TCP stream, if connected.
    stream: Option<TcpStream>,
    /// Response buffer.
    buf: BytesMut,
}

impl PlainTransport {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for PlainTransport {
    const SECURE: bool = false;

    async fn connect(&mut self, endpoints: &[SocketAddr], deadline: Instant) -> Result<(), TransportError> {
        let stream = with_deadline(deadline, connect_any(endpoints)).await?;
        self.stream = Some(stream);

        Ok(())
    }

    async fn handshake(&mut self, _deadline: Instant) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&mut self, request: &[u8], deadline: Instant) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        with_deadline(deadline, write_all(stream, request)).await
    }

    async fn receive(&mut self, deadline: Instant) -> Result<Response, TransportError> {
        let Self { stream, buf } = self;
        let stream = stream.as_mut().ok_or_else(not_connected)?;

        with_deadline(deadline, wire::read_response(stream, buf)).await
    }

    async fn shutdown(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let mut stream = self.stream.take().ok_or_else(not_connected)?;

        with_deadline(deadline, close(&mut stream)).await
    }

    #[inline]
    fn is_benign_shutdown(err: &TransportError) -> bool {
        // The peer may have already torn the connection down.
        err.io_kind() == Some(io::ErrorKind::NotConnected)
    }
}

async fn close(stream: &mut TcpStream) -> Result<(), TransportError> {
    stream.shutdown().await?;

    Ok(())
}

/// Creates [`PlainTransport`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainConnector;

impl Connector for PlainConnector {
    type Transport = PlainTransport;

    #[inline]
    fn transport(&self) -> Self::Transport {
        PlainTransport::new()
    }
}
