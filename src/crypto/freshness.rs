//! Freshness enforcement for entitlement confirmations.
//!
//! A confirmation is only trusted while it is younger than the configured
//! window. Confirmations dated in the future point at clock tampering and are
//! rejected the same way.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Maximum future tolerance for confirmation timestamps (60 seconds).
pub const MAX_FUTURE_TOLERANCE_SECONDS: i64 = 60;

/// Why a confirmation is not fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Older than the freshness window.
    TooOld {
        /// Age of the confirmation in seconds.
        age_seconds: i64,
    },
    /// Dated further in the future than the tolerance allows.
    FromFuture,
}

/// Check that a confirmation made at `confirmed_at` is still fresh.
///
/// # Returns
/// * `Ok(())` - age is within `window` (inclusive)
/// * `Err(TooOld)` - older than `window`
/// * `Err(FromFuture)` - more than 60s in the future
pub fn check_freshness<C: Clock + ?Sized>(
    confirmed_at: DateTime<Utc>,
    window: Duration,
    clock: &C,
) -> Result<(), Staleness> {
    let now = clock.now_utc();
    let age_seconds = (now - confirmed_at).num_seconds();
    let window_seconds = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);

    if age_seconds > window_seconds {
        return Err(Staleness::TooOld { age_seconds });
    }

    if age_seconds < -MAX_FUTURE_TOLERANCE_SECONDS {
        return Err(Staleness::FromFuture);
    }

    Ok(())
}
