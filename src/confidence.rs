//! Trust-weighted, time-decaying confidence scoring.
//!
//! The score is a read-time projection: its age term changes continuously,
//! so it is recomputed whenever a report is serialized rather than trusted
//! from storage.

use chrono::Duration;

use crate::models::Condition;

/// Age at which confidence hits zero regardless of social proof.
pub const FULL_DECAY_MINUTES: f64 = 240.0;

/// Compute a confidence score in `[0, 1]`.
///
/// Trust contributes a capped base (no single reporter's history can alone
/// produce full confidence), confirmations are the strongest corroboration
/// signal, upvotes a weak one; the sum decays linearly to zero at 4 hours.
pub fn confidence(upvotes: i64, confirmations: i64, trust_score: i32, age_minutes: f64) -> f64 {
    let base = (0.3 + (trust_score as f64 / 100.0) * 0.3).min(0.6);
    let from_confirmations = (confirmations as f64 * 0.15).min(0.3);
    let from_upvotes = (upvotes as f64 * 0.02).min(0.1);

    let decay = (1.0 - age_minutes / FULL_DECAY_MINUTES).max(0.0);
    let score = (base + from_confirmations + from_upvotes) * decay;

    score.clamp(0.0, 1.0)
}

/// Expiration horizon for a freshly created report. Volatile conditions
/// decay fastest; ice is assumed to persist and gets the longest window.
pub fn expiration_horizon(condition: Condition) -> Duration {
    let hours = match condition {
        Condition::Clear => 2,
        Condition::Wet => 3,
        Condition::Slush => 3,
        Condition::Snow => 4,
        Condition::Ice => 4,
        Condition::Whiteout => 2,
    };
    Duration::hours(hours)
}
