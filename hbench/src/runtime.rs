use core::time::Duration;
use std::{
    io::{self, Stdout, Write},
    sync::Arc,
};

use anyhow::Context;
use tokio::task::JoinSet;

use crate::{
    cfg::Config,
    engine::{Outcome, Reporter, Session},
    pacer::MakePace,
    resolve::Resolve,
    stat::{Stat, StatSnapshot},
    transport::{self, Connector},
};

/// Fans out sessions over the current runtime and waits for all of them.
///
/// Progress is written into `W`, stdout by default.
#[derive(Debug)]
pub struct Runtime<R, C, P, W = Stdout> {
    cfg: Arc<Config>,
    resolver: R,
    connector: C,
    pacer: P,
    stat: Arc<Stat>,
    report_interval: Duration,
    out: W,
}

impl<R, C, P> Runtime<R, C, P> {
    pub fn new(cfg: Config, resolver: R, connector: C, pacer: P) -> Self {
        Self {
            cfg: Arc::new(cfg),
            resolver,
            connector,
            pacer,
            stat: Arc::new(Stat::default()),
            report_interval: Duration::from_secs(1),
            out: io::stdout(),
        }
    }
}

impl<R, C, P, W> Runtime<R, C, P, W>
where
    R: Resolve,
    C: Connector,
    P: MakePace,
    W: Write + Send + 'static,
{
    /// Redirects progress lines into the given writer.
    pub fn with_output<O>(self, out: O) -> Runtime<R, C, P, O> {
        let Self {
            cfg,
            resolver,
            connector,
            pacer,
            stat,
            report_interval,
            ..
        } = self;

        Runtime {
            cfg,
            resolver,
            connector,
            pacer,
            stat,
            report_interval,
            out,
        }
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Returns the counters this runtime reports into.
    #[inline]
    pub fn stat(&self) -> Arc<Stat> {
        self.stat.clone()
    }

    /// Runs all sessions to completion and returns the final counters.
    ///
    /// Fails only when the run can not start: either the target does not
    /// resolve or the request can not be built. No session is spawned then.
    pub async fn run(self) -> Result<StatSnapshot, anyhow::Error> {
        let cfg = &self.cfg;
        let endpoints = self.resolver.resolve(&cfg.target.host, cfg.target.port).await?;

        let request = transport::request(cfg).context("failed to build request")?;
        let request = transport::encode(&request);

        log::info!(
            "{} sessions, {} requests each, {} workers",
            cfg.sessions,
            cfg.requests_per_session,
            cfg.workers
        );
        println!("Starting ..");

        let mut sessions = JoinSet::new();
        for id in 0..cfg.sessions {
            let session = Session::new(
                id,
                cfg.clone(),
                endpoints.clone(),
                self.stat.clone(),
                request.clone(),
                self.connector.transport(),
                self.pacer.make(),
            );
            sessions.spawn(session.run());
        }

        // Every session is already accounted as active, so the reporter can
        // not observe a premature zero. With nothing spawned it would only
        // delay completion.
        let reporter = if cfg.sessions > 0 {
            let reporter = Reporter::new(self.stat.clone(), self.out).with_interval(self.report_interval);
            Some(tokio::spawn(reporter.run()))
        } else {
            None
        };

        let mut num_failed = 0;
        while let Some(rc) = sessions.join_next().await {
            match rc {
                Ok(Outcome::Success) => {}
                Ok(Outcome::Failed) => num_failed += 1,
                Err(err) => log::error!("session task: {err}"),
            }
        }
        log::debug!("all sessions terminated, {num_failed} failed");

        if let Some(reporter) = reporter {
            if let Err(err) = reporter.await {
                log::error!("reporter task: {err}");
            }
        }

        Ok(self.stat.snapshot())
    }
}
