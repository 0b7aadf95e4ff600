//! Reconnect policy and backoff calculation.
//!
//! - [`ReconnectPolicy`]: per-channel reconnect parameters
//! - [`calculate_backoff_delay`]: deterministic fixed/exponential delay
//! - [`calculate_backoff_delay_with_random`]: the same with symmetric jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default delay before reconnecting, in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 5000;
/// Default cap for exponential backoff, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// How an upstream channel reconnects after an unexpected close or failed open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Reconnect at all (default: true).
    pub enabled: bool,
    /// Delay before the first reconnect in ms (default: 5000).
    pub base_delay_ms: u64,
    /// Upper bound for exponential delays in ms (default: 60000).
    pub max_delay_ms: u64,
    /// Double the delay on every consecutive failure (default: false, fixed delay).
    pub exponential: bool,
    /// Jitter factor 0.0–1.0 (default: 0).
    pub jitter_factor: f64,
    /// Give up after this many consecutive reconnects (default: unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            exponential: false,
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Fixed delay, unlimited attempts.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Whether another reconnect may be scheduled after `retry_count` reconnects.
    #[must_use]
    pub fn allows(&self, retry_count: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| retry_count < max)
    }

    /// Delay before reconnect number `retry_count` (zero-based).
    ///
    /// `random` should be a value in `[0.0, 1.0)`; it only matters when
    /// `jitter_factor` is non-zero.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32, random: f64) -> Duration {
        let attempt = if self.exponential { retry_count } else { 0 };
        let max = self.max_delay_ms.max(self.base_delay_ms);
        let ms = if self.jitter_factor > 0.0 {
            calculate_backoff_delay_with_random(
                attempt,
                self.base_delay_ms,
                max,
                self.jitter_factor,
                random,
            )
        } else {
            calculate_backoff_delay(attempt, self.base_delay_ms, max)
        };
        Duration::from_millis(ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// `min(max_delay, base_delay * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// Backoff delay with symmetric jitter.
///
/// Maps `random` in `[0, 1)` onto `[-jitter, +jitter]` around the capped delay.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
