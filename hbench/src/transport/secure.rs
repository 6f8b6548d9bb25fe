use core::{
    fmt::{self, Debug, Formatter},
    mem,
    net::SocketAddr,
};
use std::{io, sync::Arc};

use bytes::BytesMut;
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::{self, CryptoProvider, WebPkiSupportedAlgorithms},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::{connect_any, not_connected, wire, with_deadline, write_all, Connector, Response, Transport};
use crate::error::{CmdError, TransportError};

/// Loads root certificates from the platform trust store.
///
/// Unreadable certificates are skipped.
pub fn load_root_certificates() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        log::warn!("failed to load native certificates: {err}");
    }
    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    log::debug!("loaded {added} root certificates, {ignored} ignored");

    roots
}

/// Creates [`SecureTransport`] instances sharing a single TLS context.
#[derive(Clone)]
pub struct SecureConnector {
    tls: TlsConnector,
    server_name: ServerName<'static>,
}

impl SecureConnector {
    /// Constructs a new [`SecureConnector`] for the given host.
    ///
    /// The host is sent as the server name indication. Server certificate
    /// chains are built against the given roots, but verification failures
    /// are ignored.
    pub fn new(host: &str, roots: RootCertStore) -> Result<Self, anyhow::Error> {
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|_| CmdError::ServerName(host.to_string()))?;

        let provider = Arc::new(crypto::ring::default_provider());
        let verifier = LenientVerifier::new(roots, provider.clone());
        let cfg = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        let m = Self {
            tls: TlsConnector::from(Arc::new(cfg)),
            server_name,
        };

        Ok(m)
    }
}

impl Debug for SecureConnector {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        fmt.debug_struct("SecureConnector")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl Connector for SecureConnector {
    type Transport = SecureTransport;

    #[inline]
    fn transport(&self) -> Self::Transport {
        SecureTransport::new(self.tls.clone(), self.server_name.clone())
    }
}

enum Stream {
    Idle,
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// TLS over TCP transport.
pub struct SecureTransport {
    tls: TlsConnector,
    server_name: ServerName<'static>,
    stream: Stream,
    /// Response buffer.
    buf: BytesMut,
}

impl SecureTransport {
    pub fn new(tls: TlsConnector, server_name: ServerName<'static>) -> Self {
        Self {
            tls,
            server_name,
            stream: Stream::Idle,
            buf: BytesMut::new(),
        }
    }

    #[inline]
    fn tls(&mut self) -> Result<&mut TlsStream<TcpStream>, TransportError> {
        match &mut self.stream {
            Stream::Tls(stream) => Ok(&mut **stream),
            _ => Err(not_connected()),
        }
    }
}

impl Debug for SecureTransport {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let state = match self.stream {
            Stream::Idle => "idle",
            Stream::Tcp(..) => "tcp",
            Stream::Tls(..) => "tls",
        };

        fmt.debug_struct("SecureTransport")
            .field("server_name", &self.server_name)
            .field("stream", &state)
            .finish_non_exhaustive()
    }
}

impl Transport for SecureTransport {
    const SECURE: bool = true;

    async fn connect(&mut self, endpoints: &[SocketAddr], deadline: Instant) -> Result<(), TransportError> {
        let stream = with_deadline(deadline, connect_any(endpoints)).await?;
        self.stream = Stream::Tcp(stream);

        Ok(())
    }

    async fn handshake(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let stream = match mem::replace(&mut self.stream, Stream::Idle) {
            Stream::Tcp(stream) => stream,
            stream => {
                self.stream = stream;
                return Err(not_connected());
            }
        };

        let stream = with_deadline(deadline, handshake(&self.tls, self.server_name.clone(), stream)).await?;
        self.stream = Stream::Tls(Box::new(stream));

        Ok(())
    }

    async fn send(&mut self, request: &[u8], deadline: Instant) -> Result<(), TransportError> {
        let stream = self.tls()?;

        with_deadline(deadline, write_all(stream, request)).await
    }

    async fn receive(&mut self, deadline: Instant) -> Result<Response, TransportError> {
        let Stream::Tls(stream) = &mut self.stream else {
            return Err(not_connected());
        };

        with_deadline(deadline, wire::read_response(&mut **stream, &mut self.buf)).await
    }

    async fn shutdown(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let Stream::Tls(mut stream) = mem::replace(&mut self.stream, Stream::Idle) else {
            return Err(not_connected());
        };

        with_deadline(deadline, close(&mut stream, &mut self.buf)).await
    }

    #[inline]
    fn is_benign_shutdown(err: &TransportError) -> bool {
        // The peer closed the connection without sending "close_notify".
        err.io_kind() == Some(io::ErrorKind::UnexpectedEof)
    }
}

async fn handshake(
    tls: &TlsConnector,
    server_name: ServerName<'static>,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let stream = tls.connect(server_name, stream).await?;

    Ok(stream)
}

/// Sends "close_notify" and waits for the peer to close its side.
async fn close(stream: &mut TlsStream<TcpStream>, buf: &mut BytesMut) -> Result<(), TransportError> {
    stream.shutdown().await?;

    loop {
        buf.clear();
        if stream.read_buf(buf).await? == 0 {
            return Ok(());
        }
    }
}

/// Certificate verifier that builds the server certificate chain, but never
/// rejects it.
///
/// Handshake signatures are still verified.
#[derive(Debug)]
struct LenientVerifier {
    chain: Option<Arc<WebPkiServerVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl LenientVerifier {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Self {
        let algorithms = provider.signature_verification_algorithms;

        let chain = if roots.is_empty() {
            log::warn!("no root certificates loaded, server certificate chains will not be built");
            None
        } else {
            match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build() {
                Ok(verifier) => Some(verifier),
                Err(err) => {
                    log::warn!("failed to initialize certificate chain builder: {err}");
                    None
                }
            }
        };

        Self { chain, algorithms }
    }
}

impl ServerCertVerifier for LenientVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(chain) = &self.chain {
            if let Err(err) = chain.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
                log::trace!("ignoring server certificate error: {err}");
            }
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use core::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls::{pki_types::PrivatePkcs8KeyDer, ServerConfig};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    use super::*;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    /// Returns a root store with a single certificate that signed nothing.
    pub(crate) fn unrelated_roots() -> RootCertStore {
        let CertifiedKey { cert, .. } = generate_simple_self_signed(vec!["unrelated.test".to_string()]).unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(cert.der().clone()).unwrap();
        roots
    }

    /// Runs a TLS server with a self-signed "localhost" certificate answering
    /// every request with 200.
    ///
    /// Once the client closes its side the server either replies with
    /// "close_notify" or just drops the connection. Returns the server
    /// address and the number of handshakes that carried "localhost" as SNI.
    pub(crate) async fn serve_tls(close_notify: bool) -> (SocketAddr, Arc<AtomicUsize>) {
        let CertifiedKey { cert, key_pair } = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());

        let cfg = ServerConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key.into())
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(cfg));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let num_sni = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let num_sni = num_sni.clone();
            async move {
                loop {
                    let (sock, _) = listener.accept().await.unwrap();
                    let acceptor = acceptor.clone();
                    let num_sni = num_sni.clone();

                    tokio::spawn(async move {
                        let Ok(mut stream) = acceptor.accept(sock).await else {
                            return;
                        };
                        if stream.get_ref().1.server_name() == Some("localhost") {
                            num_sni.fetch_add(1, Ordering::Relaxed);
                        }

                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        loop {
                            match stream.read(&mut chunk).await {
                                Ok(0) | Err(..) => break,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                            while let Some(pos) = buf.windows(4).position(|v| v == b"\r\n\r\n") {
                                buf.drain(..pos + 4);
                                stream.write_all(RESPONSE).await.unwrap();
                            }
                        }

                        if close_notify {
                            let _ = stream.shutdown().await;
                        }
                    });
                }
            }
        });

        (addr, num_sni)
    }

    async fn exchange(transport: &mut SecureTransport, addr: SocketAddr) {
        transport.connect(&[addr], deadline()).await.unwrap();
        transport.handshake(deadline()).await.unwrap();

        for _ in 0..2 {
            transport
                .send(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", deadline())
                .await
                .unwrap();
            let resp = transport.receive(deadline()).await.unwrap();
            assert_eq!(200, resp.status);
            assert_eq!(RESPONSE.len(), resp.len);
        }
    }

    #[tokio::test]
    async fn test_exchange_with_close_notify() {
        let (addr, num_sni) = serve_tls(true).await;

        let connector = SecureConnector::new("localhost", RootCertStore::empty()).unwrap();
        let mut transport = connector.transport();
        exchange(&mut transport, addr).await;

        transport.shutdown(deadline()).await.unwrap();
        assert_eq!(1, num_sni.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_exchange_peer_closes_without_close_notify() {
        let (addr, num_sni) = serve_tls(false).await;

        // The server certificate is not signed by any of these roots.
        let connector = SecureConnector::new("localhost", unrelated_roots()).unwrap();
        let mut transport = connector.transport();
        exchange(&mut transport, addr).await;

        let err = transport.shutdown(deadline()).await.unwrap_err();
        assert_eq!(Some(io::ErrorKind::UnexpectedEof), err.io_kind());
        assert!(SecureTransport::is_benign_shutdown(&err));
        assert_eq!(1, num_sni.load(Ordering::Relaxed));
    }

    #[test]
    fn test_connector_server_name() {
        assert!(SecureConnector::new("example.com", RootCertStore::empty()).is_ok());
        assert!(SecureConnector::new("127.0.0.1", RootCertStore::empty()).is_ok());
        assert!(SecureConnector::new("not a host", RootCertStore::empty()).is_err());
    }

    #[test]
    fn test_benign_shutdown() {
        assert!(SecureTransport::is_benign_shutdown(&TransportError::Io(
            io::ErrorKind::UnexpectedEof.into()
        )));
        assert!(!SecureTransport::is_benign_shutdown(&TransportError::Io(
            io::ErrorKind::NotConnected.into()
        )));
        assert!(!SecureTransport::is_benign_shutdown(&TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_handshake_requires_connection() {
        let connector = SecureConnector::new("localhost", RootCertStore::empty()).unwrap();
        let mut transport = connector.transport();

        let err = transport.handshake(deadline()).await.unwrap_err();
        assert_eq!(Some(io::ErrorKind::NotConnected), err.io_kind());

        let err = transport.send(b"GET", deadline()).await.unwrap_err();
        assert_eq!(Some(io::ErrorKind::NotConnected), err.io_kind());
    }

    #[tokio::test]
    async fn test_handshake_with_plain_server_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let connector = SecureConnector::new("localhost", RootCertStore::empty()).unwrap();
        let mut transport = connector.transport();
        transport.connect(&[addr], deadline()).await.unwrap();

        let err = transport.handshake(deadline()).await.unwrap_err();
        assert!(!err.is_timeout());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = SecureConnector::new("localhost", RootCertStore::empty()).unwrap();
        let mut transport = connector.transport();
        transport.connect(&[addr], deadline()).await.unwrap();
        let (_sock, _) = listener.accept().await.unwrap();

        let err = transport
            .handshake(Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
