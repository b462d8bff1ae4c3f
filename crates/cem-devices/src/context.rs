use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

const DAY_S: f64 = 86_400.0;

/// Process-wide runtime settings handed to the loop and every backend at
/// construction.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    speed_factor: f64,
    io_timeout: Duration,
    seed: Option<u64>,
    clock: SimClock,
}

impl RuntimeContext {
    pub fn new(speed_factor: f64) -> Self {
        let speed_factor = if speed_factor.is_finite() && speed_factor > 0.0 {
            speed_factor
        } else {
            warn!(speed_factor, "invalid simulation speed, using 1.0");
            1.0
        };
        Self {
            speed_factor,
            io_timeout: Duration::from_secs(5),
            seed: None,
            clock: SimClock::new(speed_factor, 8.0 * 3600.0),
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Time of day, in seconds, at which simulated time starts.
    pub fn with_start_of_day(mut self, seconds: f64) -> Self {
        self.clock = SimClock::new(self.speed_factor, seconds);
        self
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Real time to sleep for one loop period of simulated time.
    pub fn scaled(&self, period: Duration) -> Duration {
        period.div_f64(self.speed_factor)
    }

    /// Seeded per-backend RNG when a seed is configured, entropy otherwise.
    pub fn rng(&self, salt: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(salt)),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Simulated wall clock: real elapsed time times the speed factor.
#[derive(Debug, Clone)]
pub struct SimClock {
    started: Instant,
    speed_factor: f64,
    start_of_day_s: f64,
}

impl SimClock {
    fn new(speed_factor: f64, start_of_day_s: f64) -> Self {
        Self {
            started: Instant::now(),
            speed_factor,
            start_of_day_s,
        }
    }

    pub fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * self.speed_factor
    }

    /// Simulated hour of day in `[0, 24)`.
    pub fn hour_of_day(&self) -> f64 {
        ((self.start_of_day_s + self.elapsed_s()) % DAY_S) / 3600.0
    }
}
