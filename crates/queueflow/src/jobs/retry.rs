pub const MAX_DELAY_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub backoff_base: f64,
    pub max_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base: 2.0,
            max_seconds: MAX_DELAY_SECONDS,
        }
    }
}

impl RetryConfig {
    pub fn with_base(backoff_base: f64) -> Self {
        Self {
            backoff_base,
            ..Self::default()
        }
    }
}

/// `min(max_seconds, base ^ attempts)` with base floored at 1 and attempts
/// floored at 1. Pure: the same inputs always give the same delay.
pub fn next_delay_seconds(attempts: i32, cfg: &RetryConfig) -> f64 {
    let base = if cfg.backoff_base.is_finite() {
        cfg.backoff_base.max(1.0)
    } else {
        1.0
    };
    let exp = attempts.max(1);

    // powi saturates to +inf on overflow; the cap takes care of it.
    base.powi(exp).min(cfg.max_seconds)
}

/// Dead-letter once the attempt count exceeds the retry budget.
pub fn exhausted(next_attempts: i32, max_retries: i32) -> bool {
    next_attempts > max_retries
}
