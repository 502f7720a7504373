//! crates/rewards_core/src/tokens.rs
//!
//! The attempt-token bucket that gates quiz attempts.
//!
//! Tokens regenerate one per `token_regen_interval` since the anchor
//! (`lastTokenUsed`), up to `token_capacity`. Regeneration advances the anchor by
//! whole intervals only, so partial progress toward the next token is kept.
//! Consuming a token re-anchors to the moment of consumption. A bucket that was
//! never anchored, as written by older clients, counts as full.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::debug;

use crate::domain::UserAccount;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{user_key, RewardLedger};
use crate::policy::RewardPolicy;
use crate::ports::{AuthProvider, DocumentKey, Write};
use crate::transaction::{encode_fields, run_transaction, TxnPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    pub tokens: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&UserAccount> for TokenBucket {
    fn from(account: &UserAccount) -> Self {
        Self {
            tokens: account.current_tokens,
            last_used: account.last_token_used,
        }
    }
}

/// Token balance as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStatus {
    pub tokens: u32,
    pub capacity: u32,
    /// When the next token regenerates; `None` when the bucket is full.
    pub next_token_at: Option<DateTime<Utc>>,
}

/// Credits every whole interval elapsed since the anchor.
///
/// Never lowers the balance. A bucket without an anchor is refilled to
/// capacity; one whose anchor lies in the future is returned unchanged.
pub fn regenerate(bucket: TokenBucket, now: DateTime<Utc>, policy: &RewardPolicy) -> TokenBucket {
    let Some(last_used) = bucket.last_used else {
        return TokenBucket {
            tokens: bucket.tokens.max(policy.token_capacity),
            last_used: None,
        };
    };
    let interval = policy.token_regen_interval.num_seconds();
    if interval <= 0 {
        return bucket;
    }

    let elapsed = (now - last_used).num_seconds();
    let tokens_to_add = if elapsed > 0 { elapsed / interval } else { 0 };
    if tokens_to_add == 0 || bucket.tokens >= policy.token_capacity {
        return bucket;
    }

    let added = u32::try_from(tokens_to_add).unwrap_or(u32::MAX);
    TokenBucket {
        tokens: bucket.tokens.saturating_add(added).min(policy.token_capacity),
        last_used: Some(last_used + Duration::seconds(tokens_to_add * interval)),
    }
}

/// Spends one token and restarts the regeneration countdown at `now`.
pub fn consume(bucket: TokenBucket, now: DateTime<Utc>) -> LedgerResult<TokenBucket> {
    if bucket.tokens == 0 {
        return Err(LedgerError::InsufficientTokens);
    }
    Ok(TokenBucket {
        tokens: bucket.tokens - 1,
        last_used: Some(now),
    })
}

pub fn status(bucket: TokenBucket, policy: &RewardPolicy) -> TokenStatus {
    let next_token_at = if bucket.tokens < policy.token_capacity {
        bucket.last_used.map(|last| last + policy.token_regen_interval)
    } else {
        None
    };
    TokenStatus {
        tokens: bucket.tokens,
        capacity: policy.token_capacity,
        next_token_at,
    }
}

fn bucket_write(user: &DocumentKey, bucket: TokenBucket) -> LedgerResult<Write> {
    Ok(Write::Merge {
        key: user.clone(),
        fields: encode_fields(&json!({
            "currentTokens": bucket.tokens,
            "lastTokenUsed": bucket.last_used,
        }))?,
    })
}

impl RewardLedger {
    /// Applies any pending regeneration and reports the balance.
    pub async fn token_status(
        &self,
        auth: &dyn AuthProvider,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<TokenStatus>> {
        self.update_tokens(auth, "token_status", now, false).await
    }

    /// Regenerates, then spends one token for a quiz attempt.
    ///
    /// Fails with `InsufficientTokens` when none are left after regeneration.
    pub async fn consume_token(
        &self,
        auth: &dyn AuthProvider,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<TokenStatus>> {
        self.update_tokens(auth, "consume_token", now, true).await
    }

    async fn update_tokens(
        &self,
        auth: &dyn AuthProvider,
        operation: &str,
        now: DateTime<Utc>,
        spend: bool,
    ) -> LedgerResult<Option<TokenStatus>> {
        let Some(user_id) = Self::signed_in(auth, operation) else {
            return Ok(None);
        };
        let key = user_key(&user_id);
        let policy = self.policy();

        let reported = run_transaction(
            self.store(),
            std::slice::from_ref(&key),
            policy.max_transaction_attempts,
            |snapshot| {
                let Some(account) = snapshot.decode::<UserAccount>(&key)? else {
                    return Ok(TxnPlan::read_only(None));
                };
                let before = TokenBucket::from(&account);
                let regenerated = regenerate(before, now, policy);
                let after = if spend {
                    consume(regenerated, now)?
                } else {
                    regenerated
                };

                let output = status(after, policy);
                if after == before {
                    return Ok(TxnPlan::read_only(Some(output)));
                }
                Ok(TxnPlan::with_writes(vec![bucket_write(&key, after)?], Some(output)))
            },
        )
        .await?;

        let Some(reported) = reported else {
            Self::account_missing(&user_id, operation);
            return Ok(None);
        };

        debug!(user = %user_id, operation, tokens = reported.tokens, "Token bucket updated");
        Ok(Some(reported))
    }
}
