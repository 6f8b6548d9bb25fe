use core::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Delay generator governing session timing.
pub trait Pace {
    /// Delay before a session starts connecting.
    fn jitter(&mut self) -> Duration;
    /// Delay between two consecutive requests.
    fn inter_request(&mut self) -> Duration;
    /// Delay before a session shuts its connection down.
    fn linger(&mut self) -> Duration;
}

/// Creates per-session pacers.
pub trait MakePace {
    type Pacer: Pace + Send + 'static;

    fn make(&self) -> Self::Pacer;
}

/// Pacing bounds.
///
/// Random delays are drawn uniformly from the half-open ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceBounds {
    /// Upper bound of the startup jitter, which starts at zero.
    pub jitter_max: Duration,
    pub inter_request_min: Duration,
    pub inter_request_max: Duration,
    /// Fixed delay before shutdown.
    pub linger: Duration,
}

impl Default for PaceBounds {
    fn default() -> Self {
        Self {
            jitter_max: Duration::from_millis(2000),
            inter_request_min: Duration::from_millis(100),
            inter_request_max: Duration::from_millis(3100),
            linger: Duration::from_millis(2500),
        }
    }
}

impl MakePace for PaceBounds {
    type Pacer = RandomPacer;

    #[inline]
    fn make(&self) -> Self::Pacer {
        RandomPacer::new(*self)
    }
}

/// Randomized pacer.
///
/// Owns its generator, so no synchronization is required between sessions.
#[derive(Debug)]
pub struct RandomPacer {
    bounds: PaceBounds,
    rng: SmallRng,
}

impl RandomPacer {
    pub fn new(bounds: PaceBounds) -> Self {
        Self::with_rng(bounds, SmallRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(bounds: PaceBounds, rng: SmallRng) -> Self {
        Self { bounds, rng }
    }

    /// Draws a delay in `[lo, hi)` with millisecond granularity.
    fn uniform(&mut self, lo: Duration, hi: Duration) -> Duration {
        let lo = lo.as_millis() as u64;
        let hi = hi.as_millis() as u64;
        if hi <= lo {
            return Duration::from_millis(lo);
        }

        Duration::from_millis(self.rng.random_range(lo..hi))
    }
}

impl Pace for RandomPacer {
    #[inline]
    fn jitter(&mut self) -> Duration {
        self.uniform(Duration::ZERO, self.bounds.jitter_max)
    }

    #[inline]
    fn inter_request(&mut self) -> Duration {
        self.uniform(self.bounds.inter_request_min, self.bounds.inter_request_max)
    }

    #[inline]
    fn linger(&mut self) -> Duration {
        self.bounds.linger
    }
}

/// Deterministic pacer always yielding the same delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedPacer {
    pub jitter: Duration,
    pub inter_request: Duration,
    pub linger: Duration,
}

impl FixedPacer {
    /// Pacer without any delays.
    #[inline]
    pub const fn zero() -> Self {
        Self {
            jitter: Duration::ZERO,
            inter_request: Duration::ZERO,
            linger: Duration::ZERO,
        }
    }
}

impl Pace for FixedPacer {
    #[inline]
    fn jitter(&mut self) -> Duration {
        self.jitter
    }

    #[inline]
    fn inter_request(&mut self) -> Duration {
        self.inter_request
    }

    #[inline]
    fn linger(&mut self) -> Duration {
        self.linger
    }
}

impl MakePace for FixedPacer {
    type Pacer = Self;

    #[inline]
    fn make(&self) -> Self::Pacer {
        *self
    }
}
