//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the client app and the API server.
//! Core result types are converted here so the ledger stays free of wire concerns.

use chrono::{DateTime, Utc};
use rewards_core::{
    AccountSummary, CheckIn, CouponListing, QuizCompletion, QuizOutcome, Redemption,
    TokenStatus, UserAccount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use utoipa::ToSchema;

//=========================================================================================
// Requests Sent FROM the Client TO the Server
//=========================================================================================

/// Check-in payload. The offset places the calendar-day boundary in the
/// device's local time.
#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct CheckInRequest {
    /// Minutes east of UTC. Defaults to 0.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Answers keyed by question index, each holding the selected option text.
#[derive(Deserialize, Debug, ToSchema)]
pub struct SubmitQuizRequest {
    #[schema(value_type = Object)]
    pub answers: HashMap<usize, String>,
}

/// Completion of content graded outside the quiz engine, such as a video.
/// The reward is looked up server-side.
#[derive(Deserialize, Debug, ToSchema)]
pub struct CompleteRequest {
    /// Percentage in `0..=100`.
    pub score: u32,
}

//=========================================================================================
// Responses Sent FROM the Server TO the Client
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct AccountResponse {
    pub user_id: String,
    pub points: u64,
    pub streak: u32,
    pub progress: u32,
    pub tokens: u32,
    pub last_login: Option<DateTime<Utc>>,
    pub completed_quizzes: BTreeMap<String, u32>,
    pub redeemed_coupons: BTreeMap<String, String>,
    pub activated_coupons: BTreeMap<String, String>,
}

impl From<AccountSummary> for AccountResponse {
    fn from(summary: AccountSummary) -> Self {
        Self {
            user_id: summary.user_id.to_string(),
            points: summary.points,
            streak: summary.streak,
            progress: summary.progress,
            tokens: summary.tokens,
            last_login: summary.last_login,
            completed_quizzes: summary.completed_quizzes,
            redeemed_coupons: summary.redeemed_coupons,
            activated_coupons: summary.activated_coupons,
        }
    }
}

impl AccountResponse {
    /// The view of a freshly created or already existing account.
    pub fn from_account(user_id: String, account: UserAccount) -> Self {
        Self {
            user_id,
            points: account.points,
            streak: account.streak,
            progress: account.progress,
            tokens: account.current_tokens,
            last_login: account.last_login,
            completed_quizzes: account.completed_quizzes,
            redeemed_coupons: account.redeemed_coupons,
            activated_coupons: account.activated_coupons,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CheckInResponse {
    pub streak: u32,
    pub points_earned: u64,
    pub points: u64,
}

impl From<CheckIn> for CheckInResponse {
    fn from(check_in: CheckIn) -> Self {
        Self {
            streak: check_in.streak,
            points_earned: check_in.points_earned,
            points: check_in.points,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct TokenStatusResponse {
    pub tokens: u32,
    pub capacity: u32,
    /// Absent when the bucket is full.
    pub next_token_at: Option<DateTime<Utc>>,
}

impl From<TokenStatus> for TokenStatusResponse {
    fn from(status: TokenStatus) -> Self {
        Self {
            tokens: status.tokens,
            capacity: status.capacity,
            next_token_at: status.next_token_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CompletionResponse {
    pub points: u64,
    pub points_awarded: u64,
    pub first_completion: bool,
    pub progress: u32,
}

impl From<QuizCompletion> for CompletionResponse {
    fn from(completion: QuizCompletion) -> Self {
        Self {
            points: completion.points,
            points_awarded: completion.points_awarded,
            first_completion: completion.first_completion,
            progress: completion.progress,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuizResultResponse {
    Scored {
        correct: usize,
        total: usize,
        score: u32,
        passed: bool,
        completion: Option<CompletionResponse>,
    },
    Personality {
        trait_index: usize,
        trait_name: Option<String>,
        completion: Option<CompletionResponse>,
    },
}

impl From<QuizOutcome> for QuizResultResponse {
    fn from(outcome: QuizOutcome) -> Self {
        match outcome {
            QuizOutcome::Scored {
                correct,
                total,
                score,
                passed,
                completion,
            } => QuizResultResponse::Scored {
                correct,
                total,
                score,
                passed,
                completion: completion.map(Into::into),
            },
            QuizOutcome::Personality {
                trait_index,
                trait_name,
                completion,
            } => QuizResultResponse::Personality {
                trait_index,
                trait_name,
                completion: completion.map(Into::into),
            },
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CouponResponse {
    pub id: String,
    pub required_points: u64,
    pub discount_amount: f64,
    pub remaining: usize,
}

impl From<CouponListing> for CouponResponse {
    fn from(listing: CouponListing) -> Self {
        Self {
            id: listing.id,
            required_points: listing.required_points,
            discount_amount: listing.discount_amount,
            remaining: listing.remaining,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RedemptionResponse {
    pub coupon_id: String,
    pub code: String,
    pub points: u64,
    pub remaining: usize,
}

impl From<Redemption> for RedemptionResponse {
    fn from(redemption: Redemption) -> Self {
        Self {
            coupon_id: redemption.coupon_id,
            code: redemption.code,
            points: redemption.points,
            remaining: redemption.remaining,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ActivationResponse {
    pub coupon_id: String,
    pub code: String,
}

/// Reports a failed operation with a stable code the client can branch on.
#[derive(Serialize, Deserialize, Debug, PartialEq, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
