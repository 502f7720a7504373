//! crates/rewards_core/src/streak.rs
//!
//! Daily check-in streaks.
//!
//! Calendar days are taken in the time zone of the `now` passed in, so the
//! caller decides the boundary by passing the device's local offset.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tracing::info;

use crate::domain::UserAccount;
use crate::error::LedgerResult;
use crate::ledger::{user_key, RewardLedger};
use crate::policy::RewardPolicy;
use crate::ports::{AuthProvider, Write};
use crate::transaction::{encode_fields, run_transaction, TxnPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakState {
    pub streak: u32,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakEvaluation {
    pub streak: u32,
    pub last_login: Option<DateTime<Utc>>,
    pub points_earned: u64,
    /// False when the check-in was already counted today.
    pub changed: bool,
}

/// The caller-visible result of a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckIn {
    pub streak: u32,
    pub points_earned: u64,
    /// Point balance after the check-in.
    pub points: u64,
}

/// Advances the streak state machine for a check-in at `now`.
pub fn evaluate<Tz: TimeZone>(
    state: StreakState,
    now: &DateTime<Tz>,
    policy: &RewardPolicy,
) -> StreakEvaluation {
    let now_utc = now.with_timezone(&Utc);
    let Some(last_login) = state.last_login else {
        return StreakEvaluation {
            streak: 1,
            last_login: Some(now_utc),
            points_earned: policy.first_login_points,
            changed: true,
        };
    };

    let today = now.date_naive();
    let last_day = last_login.with_timezone(&now.timezone()).date_naive();
    let days = (today - last_day).num_days();

    match days {
        1 => {
            let streak = state.streak.saturating_add(1);
            StreakEvaluation {
                streak,
                last_login: Some(now_utc),
                points_earned: policy.daily_streak_points + policy.milestone_bonus(streak),
                changed: true,
            }
        }
        d if d > 1 => StreakEvaluation {
            streak: 0,
            last_login: Some(now_utc),
            points_earned: 0,
            changed: true,
        },
        // Same day, or the clock went backwards.
        _ => StreakEvaluation {
            streak: state.streak,
            last_login: state.last_login,
            points_earned: 0,
            changed: false,
        },
    }
}

impl RewardLedger {
    /// Evaluates today's check-in for the signed-in user and persists the result.
    pub async fn check_in<Tz>(
        &self,
        auth: &dyn AuthProvider,
        now: DateTime<Tz>,
    ) -> LedgerResult<Option<CheckIn>>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: Send + Sync,
    {
        let Some(user_id) = Self::signed_in(auth, "check_in") else {
            return Ok(None);
        };
        let key = user_key(&user_id);
        let policy = self.policy();

        let check_in = run_transaction(
            self.store(),
            std::slice::from_ref(&key),
            policy.max_transaction_attempts,
            |snapshot| {
                let Some(account) = snapshot.decode::<UserAccount>(&key)? else {
                    return Ok(TxnPlan::read_only(None));
                };
                let state = StreakState {
                    streak: account.streak,
                    last_login: account.last_login,
                };
                let eval = evaluate(state, &now, policy);
                let points = account.points.saturating_add(eval.points_earned);
                let output = CheckIn {
                    streak: eval.streak,
                    points_earned: eval.points_earned,
                    points,
                };
                if !eval.changed {
                    return Ok(TxnPlan::read_only(Some(output)));
                }

                let fields = encode_fields(&json!({
                    "streak": eval.streak,
                    "lastLogin": eval.last_login,
                    "points": points,
                }))?;
                Ok(TxnPlan::with_writes(
                    vec![Write::Merge {
                        key: key.clone(),
                        fields,
                    }],
                    Some(output),
                ))
            },
        )
        .await?;

        let Some(check_in) = check_in else {
            Self::account_missing(&user_id, "check_in");
            return Ok(None);
        };
        if check_in.points_earned > 0 {
            info!(user = %user_id, streak = check_in.streak, earned = check_in.points_earned, "Streak reward granted");
        }
        Ok(Some(check_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::domain::USERS;
    use crate::memory::InMemoryDocumentStore;
    use crate::ports::DocumentStore;
    use chrono::{Duration, FixedOffset};
    use std::sync::Arc;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn state(streak: u32, last_login: DateTime<Utc>) -> StreakState {
        StreakState {
            streak,
            last_login: Some(last_login),
        }
    }

    #[test]
    fn first_check_in_bootstraps_the_streak() {
        let policy = RewardPolicy::default();
        let eval = evaluate(
            StreakState {
                streak: 0,
                last_login: None,
            },
            &at(1, 9),
            &policy,
        );

        assert_eq!(eval.streak, 1);
        assert_eq!(eval.points_earned, 100);
        assert_eq!(eval.last_login, Some(at(1, 9)));
    }

    #[test]
    fn consecutive_day_pays_daily_points() {
        let policy = RewardPolicy::default();
        let eval = evaluate(state(2, at(1, 23)), &at(2, 1), &policy);

        assert_eq!(eval.streak, 3);
        assert_eq!(eval.points_earned, 100);
    }

    #[test]
    fn milestones_fire_only_on_the_exact_day() {
        let policy = RewardPolicy::default();

        assert_eq!(evaluate(state(4, at(1, 9)), &at(2, 9), &policy).points_earned, 1100);
        assert_eq!(evaluate(state(5, at(1, 9)), &at(2, 9), &policy).points_earned, 100);
        assert_eq!(evaluate(state(14, at(1, 9)), &at(2, 9), &policy).points_earned, 5100);
        assert_eq!(evaluate(state(15, at(1, 9)), &at(2, 9), &policy).points_earned, 100);
    }

    #[test]
    fn a_missed_day_resets_without_points() {
        let policy = RewardPolicy::default();
        let eval = evaluate(state(9, at(1, 9)), &at(3, 9), &policy);

        assert_eq!(eval.streak, 0);
        assert_eq!(eval.points_earned, 0);
        assert_eq!(eval.last_login, Some(at(3, 9)));
    }

    #[test]
    fn same_day_and_backwards_clock_change_nothing() {
        let policy = RewardPolicy::default();

        let same_day = evaluate(state(3, at(2, 1)), &at(2, 22), &policy);
        assert!(!same_day.changed);
        assert_eq!(same_day.streak, 3);
        assert_eq!(same_day.last_login, Some(at(2, 1)));

        let backwards = evaluate(state(3, at(5, 9)), &at(2, 9), &policy);
        assert!(!backwards.changed);
        assert_eq!(backwards.points_earned, 0);
    }

    #[test]
    fn day_boundaries_follow_the_callers_zone() {
        let policy = RewardPolicy::default();
        // 23:00 UTC on the 1st and 01:00 UTC on the 2nd are the same local day at UTC-5.
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at(2, 1).with_timezone(&new_york);

        let eval = evaluate(state(3, at(1, 23)), &now, &policy);
        assert!(!eval.changed);

        let utc_eval = evaluate(state(3, at(1, 23)), &at(2, 1), &policy);
        assert_eq!(utc_eval.streak, 4);
    }

    #[tokio::test]
    async fn check_in_persists_streak_and_points() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(
            USERS,
            "u1",
            serde_json::json!({ "points": 10, "streak": 4, "lastLogin": at(1, 9) }),
        );
        let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());
        let auth = StaticAuth::signed_in("u1");

        let first = ledger.check_in(&auth, at(2, 8)).await.unwrap().unwrap();
        assert_eq!(first.streak, 5);
        assert_eq!(first.points_earned, 1100);
        assert_eq!(first.points, 1110);

        let again = ledger
            .check_in(&auth, at(2, 8) + Duration::hours(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.points_earned, 0);
        assert_eq!(again.points, 1110);

        let doc = store.get_document(USERS, "u1").await.unwrap();
        assert_eq!(doc.fields["streak"], serde_json::json!(5));
        assert_eq!(doc.fields["points"], serde_json::json!(1110));
    }

    #[tokio::test]
    async fn check_in_without_an_account_writes_nothing() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());

        let result = ledger
            .check_in(&StaticAuth::signed_in("ghost"), at(2, 8))
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(store.get_document(USERS, "ghost").await.is_err());
    }
}
