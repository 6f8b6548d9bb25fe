use std::error::Error;

use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Initializes the logger, writing to stderr.
///
/// Each verbosity step raises the level of this crate first. TLS internals
/// stay silent below "-vv".
pub fn init(verbosity: usize) -> Result<(), Box<dyn Error>> {
    let tls = tls_level(verbosity);

    SimpleLogger::new()
        .with_level(LevelFilter::Off)
        .with_module_level("hbench", level(verbosity))
        .with_module_level("rustls", tls)
        .with_module_level("tokio_rustls", tls)
        .with_utc_timestamps()
        .init()?;

    Ok(())
}

#[inline]
fn level(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[inline]
fn tls_level(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 | 1 => LevelFilter::Off,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
