//! Peer "road update" aggregation.
//!
//! One live opinion per user per report: a resubmission replaces the
//! previous row instead of appending. `plowed_count` is a live tally over
//! current opinions, not an append-only counter, so it moves in both
//! directions as users change their minds. When the tally reaches the
//! consensus threshold the report's condition is reclassified to clear,
//! synchronously on the qualifying submission.

use crate::models::{Condition, UpdateType};

/// Number of concurrent "plowed" opinions that auto-resolves a report.
pub const PLOWED_CONSENSUS: i64 = 3;

/// How the live plowed tally moves when a user's opinion goes from
/// `previous` (None on first submission) to `next`.
pub fn plowed_delta(previous: Option<UpdateType>, next: UpdateType) -> i64 {
    let was = previous == Some(UpdateType::Plowed);
    let is = next == UpdateType::Plowed;
    match (was, is) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

pub fn consensus_reached(plowed_count: i64) -> bool {
    plowed_count >= PLOWED_CONSENSUS
}

/// Condition after crowd consensus kicks in.
pub fn consensus_condition() -> Condition {
    Condition::Clear
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_plowed_opinion_increments() {
        assert_eq!(plowed_delta(None, UpdateType::Plowed), 1);
    }

    #[test]
    fn first_non_plowed_opinion_is_neutral() {
        assert_eq!(plowed_delta(None, UpdateType::Worse), 0);
        assert_eq!(plowed_delta(None, UpdateType::Same), 0);
    }

    #[test]
    fn changing_away_from_plowed_decrements() {
        assert_eq!(plowed_delta(Some(UpdateType::Plowed), UpdateType::Worse), -1);
    }

    #[test]
    fn changing_into_plowed_increments() {
        assert_eq!(plowed_delta(Some(UpdateType::Same), UpdateType::Plowed), 1);
    }

    #[test]
    fn restating_the_same_opinion_is_neutral() {
        assert_eq!(plowed_delta(Some(UpdateType::Plowed), UpdateType::Plowed), 0);
        assert_eq!(plowed_delta(Some(UpdateType::Worse), UpdateType::Worse), 0);
    }

    #[test]
    fn consensus_at_three() {
        assert!(!consensus_reached(2));
        assert!(consensus_reached(3));
        assert!(consensus_reached(4));
        assert_eq!(consensus_condition(), Condition::Clear);
    }
}
