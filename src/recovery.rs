// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reconnect policy
//!
//! Provides retry strategies and a backoff tracker for the push channel.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Retry strategy for reconnect attempts
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RetryStrategy {
    /// No retries
    #[default]
    None,
    /// Constant delay between attempts
    Fixed {
        /// Maximum number of attempts (`None` = keep trying)
        max_retries: Option<u32>,
        /// Delay between attempts
        delay: Duration,
    },
    /// Exponential backoff with jitter
    ExponentialBackoff {
        /// Maximum number of attempts (`None` = keep trying)
        max_retries: Option<u32>,
        /// Initial delay
        initial_delay: Duration,
        /// Maximum delay
        max_delay: Duration,
        /// Multiplier for each attempt
        multiplier: f64,
        /// Random spread applied to each delay (0.2 = ±20%)
        jitter: f64,
    },
}

impl RetryStrategy {
    /// Create a fixed retry strategy
    pub fn fixed(max_retries: Option<u32>, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Create an exponential backoff strategy (x2, capped at 30s, ±20%)
    pub fn exponential(max_retries: Option<u32>, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Get maximum number of retries
    pub fn max_retries(&self) -> Option<u32> {
        match self {
            Self::None => Some(0),
            Self::Fixed { max_retries, .. } | Self::ExponentialBackoff { max_retries, .. } => {
                *max_retries
            }
        }
    }

    /// Calculate the un-jittered delay for a given attempt number (0-indexed)
    ///
    /// Returns None if no more retries should be attempted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_retries() {
            if attempt >= max {
                return None;
            }
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                // Saturate well before f64 overflow
                let exponent = attempt.min(63) as i32;
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(capped as u64))
            }
        }
    }

    /// Calculate the delay for an attempt with jitter applied
    ///
    /// The result never exceeds the strategy's maximum delay.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        let base = self.delay_for_attempt(attempt)?;
        match self {
            Self::ExponentialBackoff {
                max_delay, jitter, ..
            } if *jitter > 0.0 => {
                let spread = rng.gen_range(-*jitter..=*jitter);
                let millis = (base.as_millis() as f64 * (1.0 + spread)).max(0.0);
                Some(Duration::from_millis(millis as u64).min(*max_delay))
            }
            _ => Some(base),
        }
    }
}

impl From<&ReconnectConfig> for RetryStrategy {
    fn from(config: &ReconnectConfig) -> Self {
        if !config.enabled {
            return Self::None;
        }
        Self::ExponentialBackoff {
            max_retries: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

/// Tracks consecutive failed attempts against a strategy
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: RetryStrategy,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff tracker
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or None once the strategy gives up
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self
            .strategy
            .jittered_delay(self.attempt, &mut rand::thread_rng())?;
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get the underlying strategy
    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }
}
