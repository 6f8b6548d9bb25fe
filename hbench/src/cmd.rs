use core::num::NonZero;

use clap::{ArgAction, Parser};

/// HTTP/HTTPS load generator.
///
/// Opens many concurrent sessions against a single endpoint, each sending a
/// bounded number of paced GET requests, and reports session and request
/// statistics.
#[derive(Debug, Clone, Parser)]
#[command(name = "hbench", version, about)]
pub struct Cmd {
    /// Target URL in "host[:port][/path]" form, e.g. 192.168.0.1:8080/index.html.
    pub url: Option<String>,
    /// Send "Connection: keep-alive" with every request.
    #[clap(short, long = "keep-alive", visible_alias = "keepAlive")]
    pub keep_alive: bool,
    /// Number of requests per session.
    #[clap(short, long, default_value_t = 10)]
    pub requests: u32,
    /// Number of worker threads.
    #[clap(short, long, default_value_t = std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN))]
    pub workers: NonZero<usize>,
    /// Number of concurrent sessions.
    #[clap(short, long, default_value_t = 25000)]
    pub connections: usize,
    /// Use TLS.
    ///
    /// This also changes the default port from 80 to 443.
    #[clap(short, long)]
    pub ssl: bool,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count)]
    pub verbose: u8,
}
