use core::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};
use std::sync::Arc;

/// Run-wide session and request counters.
///
/// Every counter is updated independently with relaxed atomics, there is no
/// cross-counter consistency.
#[derive(Debug, Default)]
pub struct Stat {
    /// Sessions between spawn and termination.
    active_sessions: AtomicU64,
    /// Sessions that established a connection (including the TLS handshake)
    /// and have not terminated yet.
    connected_sessions: AtomicU64,
    success_sessions: AtomicU64,
    failed_sessions: AtomicU64,
    success_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Stat {
    /// Marks a session as started.
    ///
    /// The session stays active until the returned guard is dropped.
    #[inline]
    pub fn on_session_start(self: &Arc<Self>) -> ActiveGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { stat: self.clone() }
    }

    /// Marks a session as connected.
    ///
    /// The session stays connected until the returned guard is dropped.
    #[inline]
    pub fn on_session_connected(self: &Arc<Self>) -> ConnectedGuard {
        self.connected_sessions.fetch_add(1, Ordering::Relaxed);
        ConnectedGuard { stat: self.clone() }
    }

    #[inline]
    pub fn on_session_success(&self) {
        self.success_sessions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn on_session_failed(&self) {
        self.failed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn on_request_success(&self) {
        self.success_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn on_request_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn connected_sessions(&self) -> u64 {
        self.connected_sessions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn success_sessions(&self) -> u64 {
        self.success_sessions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failed_sessions(&self) -> u64 {
        self.failed_sessions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn success_requests(&self) -> u64 {
        self.success_requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Takes a snapshot of all counters.
    ///
    /// Counters are loaded one by one, so the result may mix values observed
    /// at slightly different moments.
    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            active_sessions: self.active_sessions(),
            connected_sessions: self.connected_sessions(),
            success_sessions: self.success_sessions(),
            failed_sessions: self.failed_sessions(),
            success_requests: self.success_requests(),
            failed_requests: self.failed_requests(),
        }
    }

    #[inline]
    fn on_session_end(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    fn on_session_disconnected(&self) {
        self.connected_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Keeps a session accounted as active.
#[derive(Debug)]
pub struct ActiveGuard {
    stat: Arc<Stat>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stat.on_session_end();
    }
}

/// Keeps a session accounted as connected.
#[derive(Debug)]
pub struct ConnectedGuard {
    stat: Arc<Stat>,
}

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        self.stat.on_session_disconnected();
    }
}

/// Point-in-time copy of [`Stat`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub active_sessions: u64,
    pub connected_sessions: u64,
    pub success_sessions: u64,
    pub failed_sessions: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
}

impl StatSnapshot {
    /// Returns the final summary view of this snapshot.
    #[inline]
    pub fn summary(&self) -> Summary<'_> {
        Summary(self)
    }
}

/// Progress line.
impl Display for StatSnapshot {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        write!(
            fmt,
            "Active sessions {} connected sessions {} success sessions {} failed sessions {} success requests {} failed requests {}",
            self.active_sessions,
            self.connected_sessions,
            self.success_sessions,
            self.failed_sessions,
            self.success_requests,
            self.failed_requests,
        )
    }
}

/// Final run summary.
#[derive(Debug)]
pub struct Summary<'a>(&'a StatSnapshot);

impl Display for Summary<'_> {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let Self(s) = self;

        writeln!(fmt, "Summary :")?;
        writeln!(fmt)?;
        writeln!(fmt, "\tsessions success {} / failed {}", s.success_sessions, s.failed_sessions)?;
        write!(fmt, "\trequests success {} / failed {}", s.success_requests, s.failed_requests)
    }
}
