//! crates/rewards_core/src/ledger.rs
//!
//! The reward ledger: the entry point for every balance-affecting operation.
//!
//! `RewardLedger` owns the store handle and the reward policy. The caller supplies
//! the `AuthProvider` on every call, and a missing user turns the operation into a
//! logged no-op (`Ok(None)`) rather than an error. The streak, token and coupon
//! operations are implemented on the same type in their own modules.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Activity, Quiz, QuizKind, UserAccount, UserId, COMPLETIONS, QUIZZES, USERS};
use crate::error::{LedgerError, LedgerResult};
use crate::policy::RewardPolicy;
use crate::ports::{AuthProvider, DocumentKey, DocumentStore, PortError, Write};
use crate::quiz::{option_indices, score_answers, selected_trait};
use crate::tokens::{regenerate, TokenBucket};
use crate::transaction::{decode_fields, encode_fields, run_transaction, TxnPlan};

#[derive(Clone)]
pub struct RewardLedger {
    store: Arc<dyn DocumentStore>,
    policy: RewardPolicy,
}

/// The caller-visible result of recording a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizCompletion {
    /// Point balance after the update.
    pub points: u64,
    /// Points granted by this call; 0 on a repeat completion.
    pub points_awarded: u64,
    pub first_completion: bool,
    pub progress: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizOutcome {
    Scored {
        correct: usize,
        total: usize,
        score: u32,
        passed: bool,
        /// Present only when the attempt passed and was recorded.
        completion: Option<QuizCompletion>,
    },
    Personality {
        trait_index: usize,
        trait_name: Option<String>,
        completion: Option<QuizCompletion>,
    },
}

/// A read-only view of an account for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub user_id: UserId,
    pub points: u64,
    pub streak: u32,
    pub progress: u32,
    /// Tokens as they stand at the requested instant, regeneration included.
    pub tokens: u32,
    pub last_login: Option<DateTime<Utc>>,
    pub completed_quizzes: BTreeMap<String, u32>,
    pub redeemed_coupons: BTreeMap<String, String>,
    pub activated_coupons: BTreeMap<String, String>,
}

pub(crate) fn user_key(user_id: &UserId) -> DocumentKey {
    DocumentKey::new(USERS, user_id.as_str())
}

impl RewardLedger {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RewardPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Resolves the signed-in user, logging when the operation is skipped.
    pub(crate) fn signed_in(auth: &dyn AuthProvider, operation: &str) -> Option<UserId> {
        let user = auth.current_user_id();
        if user.is_none() {
            debug!(operation, "No signed-in user, skipping");
        }
        user
    }

    /// Logs a write skipped because the user has no ledger document.
    pub(crate) fn account_missing(user_id: &UserId, operation: &str) {
        warn!(user = %user_id, operation, "User document missing, nothing written");
    }

    /// Creates the ledger document for a newly signed-up user.
    ///
    /// An existing document is left as it is and returned.
    pub async fn create_account(
        &self,
        auth: &dyn AuthProvider,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<UserAccount>> {
        let Some(user_id) = Self::signed_in(auth, "create_account") else {
            return Ok(None);
        };
        let key = user_key(&user_id);
        let capacity = self.policy.token_capacity;

        let account = run_transaction(
            self.store(),
            std::slice::from_ref(&key),
            self.policy.max_transaction_attempts,
            |snapshot| {
                if let Some(existing) = snapshot.decode::<UserAccount>(&key)? {
                    return Ok(TxnPlan::read_only(existing));
                }
                let account = UserAccount::new(capacity, now);
                let fields = encode_fields(&account)?;
                Ok(TxnPlan::with_writes(
                    vec![Write::Merge {
                        key: key.clone(),
                        fields,
                    }],
                    account,
                ))
            },
        )
        .await?;

        info!(user = %user_id, "Account ready");
        Ok(Some(account))
    }

    pub async fn account_summary(
        &self,
        auth: &dyn AuthProvider,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<AccountSummary>> {
        let Some(user_id) = Self::signed_in(auth, "account_summary") else {
            return Ok(None);
        };
        let key = user_key(&user_id);
        let doc = self.store.get_document(&key.collection, &key.id).await?;
        let account: UserAccount = decode_fields(&key, &doc.fields)?;

        let bucket = regenerate(TokenBucket::from(&account), now, &self.policy);
        Ok(Some(AccountSummary {
            user_id,
            points: account.points,
            streak: account.streak,
            progress: account.progress,
            tokens: bucket.tokens,
            last_login: account.last_login,
            completed_quizzes: account.completed_quizzes,
            redeemed_coupons: account.redeemed_coupons,
            activated_coupons: account.activated_coupons,
        }))
    }

    /// Records a completion, granting `reward_points` only the first time
    /// `completion_id` is seen. Later calls just overwrite the stored score.
    ///
    /// A missing user document is logged and skipped. Scores above 100 are
    /// rejected with `InvalidScore`.
    pub async fn complete_quiz(
        &self,
        auth: &dyn AuthProvider,
        completion_id: &str,
        score: u32,
        reward_points: u64,
    ) -> LedgerResult<Option<QuizCompletion>> {
        let Some(user_id) = Self::signed_in(auth, "complete_quiz") else {
            return Ok(None);
        };
        if score > 100 {
            return Err(LedgerError::InvalidScore(score));
        }
        let key = user_key(&user_id);

        let completion = run_transaction(
            self.store(),
            std::slice::from_ref(&key),
            self.policy.max_transaction_attempts,
            |snapshot| {
                let Some(mut account) = snapshot.decode::<UserAccount>(&key)? else {
                    return Ok(TxnPlan::read_only(None));
                };

                let first_completion = !account.completed_quizzes.contains_key(completion_id);
                let points_awarded = if first_completion { reward_points } else { 0 };
                account.points = account.points.saturating_add(points_awarded);
                account
                    .completed_quizzes
                    .insert(completion_id.to_string(), score);
                account.progress = u32::try_from(account.completed_quizzes.len()).unwrap_or(u32::MAX);

                let fields = json!({
                    "points": account.points,
                    "completedQuizzes": account.completed_quizzes,
                    "progress": account.progress,
                });
                Ok(TxnPlan::with_writes(
                    vec![Write::Merge {
                        key: key.clone(),
                        fields: encode_fields(&fields)?,
                    }],
                    Some(QuizCompletion {
                        points: account.points,
                        points_awarded,
                        first_completion,
                        progress: account.progress,
                    }),
                ))
            },
        )
        .await?;

        match &completion {
            Some(c) if c.first_completion => {
                info!(user = %user_id, completion_id, awarded = c.points_awarded, total = c.points, "Completion recorded")
            }
            Some(_) => debug!(user = %user_id, completion_id, score, "Repeat completion, score updated"),
            None => warn!(user = %user_id, completion_id, "User document missing, completion not recorded"),
        }
        Ok(completion)
    }

    /// Records a client-reported completion of a stored activity, such as a
    /// watched video. The reward comes from the `completions` document.
    pub async fn record_completion(
        &self,
        auth: &dyn AuthProvider,
        activity_id: &str,
        score: u32,
    ) -> LedgerResult<Option<QuizCompletion>> {
        if Self::signed_in(auth, "record_completion").is_none() {
            return Ok(None);
        }
        if score > 100 {
            return Err(LedgerError::InvalidScore(score));
        }
        let key = DocumentKey::new(COMPLETIONS, activity_id);
        let doc = self
            .store
            .get_document(&key.collection, &key.id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    LedgerError::NotFound(format!("Activity {activity_id} not found"))
                }
                other => other.into(),
            })?;
        let activity: Activity = decode_fields(&key, &doc.fields)?;

        self.complete_quiz(auth, activity_id, score, activity.reward_points)
            .await
    }

    /// Grades a stored quiz and records it when it counts as completed.
    ///
    /// Scored quizzes complete only on a pass. Personality quizzes always
    /// complete, with a score of 100.
    pub async fn submit_quiz(
        &self,
        auth: &dyn AuthProvider,
        quiz_id: &str,
        selections: &HashMap<usize, String>,
    ) -> LedgerResult<Option<QuizOutcome>> {
        if Self::signed_in(auth, "submit_quiz").is_none() {
            return Ok(None);
        }
        let key = DocumentKey::new(QUIZZES, quiz_id);
        let doc = self
            .store
            .get_document(&key.collection, &key.id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => LedgerError::NotFound(format!("Quiz {quiz_id} not found")),
                other => other.into(),
            })?;
        let quiz: Quiz = decode_fields(&key, &doc.fields)?;

        let outcome = match quiz.kind {
            QuizKind::Scored => {
                let result = score_answers(&quiz.questions, selections)?;
                let passed = result.passed(self.policy.pass_threshold);
                let completion = if passed {
                    self.complete_quiz(auth, quiz_id, result.score, quiz.reward_points)
                        .await?
                } else {
                    debug!(quiz_id, score = result.score, "Attempt below pass threshold");
                    None
                };
                QuizOutcome::Scored {
                    correct: result.correct,
                    total: result.total,
                    score: result.score,
                    passed,
                    completion,
                }
            }
            QuizKind::Personality => {
                if quiz.questions.is_empty() {
                    return Err(LedgerError::EmptyQuiz);
                }
                let picked = option_indices(&quiz.questions, selections);
                let trait_index = selected_trait(&picked, quiz.traits.len());
                let completion = self
                    .complete_quiz(auth, quiz_id, 100, quiz.reward_points)
                    .await?;
                QuizOutcome::Personality {
                    trait_index,
                    trait_name: quiz.traits.get(trait_index).cloned(),
                    completion,
                }
            }
        };
        Ok(Some(outcome))
    }
}
