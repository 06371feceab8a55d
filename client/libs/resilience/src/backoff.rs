/// Bounded exponential backoff with jitter
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry, also the lower bound of every delay
    pub initial: Duration,
    /// Upper bound of every delay
    pub max: Duration,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
    /// Random jitter as a fraction of the delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl BackoffConfig {
    /// Socket reconnect preset
    ///
    /// - Delays stay between 800ms and 4s
    /// - Grows 1.5x per attempt so the ceiling is reached after ~4 failures
    pub fn reconnect() -> Self {
        Self {
            initial: Duration::from_millis(800),
            max: Duration::from_secs(4),
            multiplier: 1.5,
            jitter: 0.2,
        }
    }
}

/// Stateful delay generator. Attempts are unlimited; callers decide when to stop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the next delay and advances the exponential base
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.jittered(self.current);
        self.attempt = self.attempt.saturating_add(1);

        let grown = self.current.as_millis() as f64 * self.config.multiplier;
        self.current = Duration::from_millis(grown.min(self.config.max.as_millis() as f64) as u64);

        delay
    }

    /// Back to the initial delay, called after a successful attempt
    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.attempt = 0;
    }

    fn jittered(&self, base: Duration) -> Duration {
        let millis = if self.config.jitter > 0.0 {
            let spread = self.config.jitter;
            let factor = 1.0 + rand::thread_rng().gen_range(-spread..spread);
            base.as_millis() as f64 * factor
        } else {
            base.as_millis() as f64
        };

        // Jitter never pushes a delay outside the configured window
        let floor = self.config.initial.as_millis() as f64;
        let ceiling = self.config.max.as_millis() as f64;
        Duration::from_millis(millis.clamp(floor, ceiling) as u64)
    }
}
