use core::{num::NonZero, time::Duration};

use crate::{cmd::Cmd, error::CmdError};

/// Default per-operation deadline.
pub const OP_TIMEOUT: Duration = Duration::from_secs(30);

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Run parameters.
///
/// Immutable after construction and shared read-only by all sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target endpoint.
    pub target: Target,
    /// Number of sessions to spawn.
    pub sessions: usize,
    /// Number of requests each session performs.
    pub requests_per_session: u32,
    /// Number of worker threads.
    pub workers: NonZero<usize>,
    /// Whether to send "Connection: keep-alive".
    pub keep_alive: bool,
    /// Whether to use TLS.
    pub use_tls: bool,
    /// Deadline applied to every connect, handshake, request and shutdown.
    pub op_timeout: Duration,
}

impl Config {
    /// Constructs a new [`Config`] for the given target with default
    /// parameters.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            sessions: 25000,
            requests_per_session: 10,
            workers: NonZero::<usize>::MIN,
            keep_alive: false,
            use_tls: false,
            op_timeout: OP_TIMEOUT,
        }
    }
}

impl TryFrom<Cmd> for Config {
    type Error = CmdError;

    fn try_from(cmd: Cmd) -> Result<Self, Self::Error> {
        let Cmd {
            url,
            keep_alive,
            requests,
            workers,
            connections,
            ssl,
            verbose: _,
        } = cmd;

        let default_port = if ssl { HTTPS_PORT } else { HTTP_PORT };
        let target = Target::parse(url.as_deref().unwrap_or_default(), default_port)?;

        let m = Self {
            target,
            sessions: connections,
            requests_per_session: requests,
            workers,
            keep_alive,
            use_tls: ssl,
            op_timeout: OP_TIMEOUT,
        };

        Ok(m)
    }
}

/// Target endpoint parsed from the "host[:port][/path]" form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    /// Parses the given URL.
    ///
    /// Everything starting from the first "/" is the path. The rest is split
    /// at ":" into host and port. IPv6 literals must be enclosed in brackets.
    pub fn parse(url: &str, default_port: u16) -> Result<Self, CmdError> {
        let (authority, path) = match url.find('/') {
            Some(idx) => (&url[..idx], &url[idx..]),
            None => (url, "/"),
        };

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let idx = rest
                .find(']')
                .ok_or_else(|| CmdError::UnterminatedIpv6(url.to_string()))?;
            let port = rest[idx + 1..].strip_prefix(':');
            (&rest[..idx], port)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(CmdError::EmptyHost(url.to_string()));
        }

        let port = match port {
            Some(port) => port.parse().map_err(|_| CmdError::InvalidPort {
                url: url.to_string(),
                port: port.to_string(),
            })?,
            None => default_port,
        };

        let m = Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        };

        Ok(m)
    }

    /// Returns the value for the "Host" header.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}
