use core::{future::Future, net::SocketAddr, ops::Deref};
use std::sync::Arc;

use crate::error::ResolveError;

/// Ordered set of resolved endpoints.
///
/// Computed once before any session starts and shared read-only afterwards,
/// cloning is cheap.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    addrs: Arc<[SocketAddr]>,
}

impl EndpointSet {
    #[inline]
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs: addrs.into() }
    }
}

impl Deref for EndpointSet {
    type Target = [SocketAddr];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.addrs
    }
}

/// Maps a host and port into an [`EndpointSet`].
pub trait Resolve {
    /// Resolves the given host and port.
    ///
    /// Must never return an empty set.
    fn resolve(&self, host: &str, port: u16) -> impl Future<Output = Result<EndpointSet, ResolveError>>;
}

/// System DNS resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<EndpointSet, ResolveError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ResolveError::Empty { host: host.to_string(), port });
        }

        log::debug!("resolved {host}:{port} to {addrs:?}");

        Ok(EndpointSet::new(addrs))
    }
}
