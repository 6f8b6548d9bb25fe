use core::time::Duration;
use std::{io::Write, sync::Arc};

use tokio::time::{self, Instant, MissedTickBehavior};

use crate::stat::Stat;

/// Periodically prints progress until no sessions remain active.
#[derive(Debug)]
pub struct Reporter<W> {
    stat: Arc<Stat>,
    interval: Duration,
    wr: W,
}

impl<W> Reporter<W>
where
    W: Write,
{
    pub fn new(stat: Arc<Stat>, wr: W) -> Self {
        Self {
            stat,
            interval: Duration::from_secs(1),
            wr,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs this reporter.
    ///
    /// Sessions are never spawned after the initial wave, so the first
    /// observed zero of active sessions is final.
    pub async fn run(mut self) -> W {
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let snapshot = self.stat.snapshot();
            if let Err(err) = writeln!(self.wr, "{snapshot}") {
                log::warn!("failed to write progress: {err}");
            }

            if snapshot.active_sessions == 0 {
                break;
            }
        }

        self.wr
    }
}
