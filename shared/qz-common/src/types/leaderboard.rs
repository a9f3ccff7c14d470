//! Leaderboard Types
//!
//! Ranking uses a single composite score so the cache's sorted set can order
//! entries in one pass: `rank_score = total_score - total_time_ms / 1e9`.
//! Higher score wins; equal scores break ties toward the faster participant.

use serde::{Deserialize, Serialize};

use super::ParticipantId;

/// Composite score stored as the sorted-set member score.
///
/// The time component is scaled so that any realistic cumulative response
/// time (well under 1e9 ms) can never outweigh a single point of score.
pub fn rank_score(total_score: i64, total_time_ms: u64) -> f64 {
    total_score as f64 - total_time_ms as f64 / 1e9
}

/// One raw leaderboard entry, as read from the sorted set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub participant_id: ParticipantId,
    pub rank_score: f64,
}

/// One leaderboard row enriched for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    /// 1-based position in descending rank-score order.
    pub rank: u32,
    pub participant_id: ParticipantId,
    pub nickname: String,
    pub total_score: i64,
    pub total_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_score_always_wins() {
        assert!(rank_score(100, 999_999) > rank_score(99, 0));
        assert!(rank_score(1, 500_000_000) > rank_score(0, 0));
    }

    #[test]
    fn equal_scores_break_ties_on_time() {
        assert!(rank_score(100, 5_000) > rank_score(100, 6_000));
        assert!(rank_score(0, 100) > rank_score(0, 200));
    }

    #[test]
    fn identical_inputs_tie() {
        assert_eq!(rank_score(42, 1234), rank_score(42, 1234));
    }
}
