//! crates/rewards_core/src/policy.rs
//!
//! Tunable constants of the reward rules.

use chrono::Duration;

/// A one-time bonus paid on the day a streak reaches exactly `streak`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakMilestone {
    pub streak: u32,
    pub bonus: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardPolicy {
    /// Minimum percentage for a scored quiz to count as passed.
    pub pass_threshold: u32,
    pub token_capacity: u32,
    /// Wall-clock time to regenerate one attempt token.
    pub token_regen_interval: Duration,
    /// Points for the very first check-in of an account.
    pub first_login_points: u64,
    /// Points for every consecutive-day check-in.
    pub daily_streak_points: u64,
    pub streak_milestones: Vec<StreakMilestone>,
    /// How many times a conflicting transaction is attempted before giving up.
    pub max_transaction_attempts: u32,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: 80,
            token_capacity: 5,
            token_regen_interval: Duration::hours(5),
            first_login_points: 100,
            daily_streak_points: 100,
            streak_milestones: vec![
                StreakMilestone {
                    streak: 5,
                    bonus: 1000,
                },
                StreakMilestone {
                    streak: 15,
                    bonus: 5000,
                },
            ],
            max_transaction_attempts: 5,
        }
    }
}

impl RewardPolicy {
    /// The bonus for reaching exactly `streak`, or 0.
    pub fn milestone_bonus(&self, streak: u32) -> u64 {
        self.streak_milestones
            .iter()
            .filter(|m| m.streak == streak)
            .map(|m| m.bonus)
            .sum()
    }
}
