//! crates/rewards_core/src/domain.rs
//!
//! Defines the core data structures of the rewards ledger.
//! Field names are the wire contract with the document database, so every
//! persisted struct is camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Collection holding one document per user account.
pub const USERS: &str = "users";

/// Collection holding quiz definitions.
pub const QUIZZES: &str = "quizzes";

/// Collection holding content graded outside the quiz engine, such as videos.
pub const COMPLETIONS: &str = "completions";

/// Coupons live under their store: `stores/{store_id}/coupons/{coupon_id}`.
pub fn coupons_collection(store_id: &str) -> String {
    format!("stores/{store_id}/coupons")
}

/// Opaque, stable user identifier owned by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The ledger fields of a user document.
///
/// Documents written by older clients may lack any of these, so every field
/// falls back to its zero value on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAccount {
    pub points: u64,
    pub streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub current_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_token_used: Option<DateTime<Utc>>,
    /// Completion id (quiz, video or persona) to the last achieved score.
    pub completed_quizzes: BTreeMap<String, u32>,
    pub progress: u32,
    /// Coupon id to the redemption code allocated to this user.
    pub redeemed_coupons: BTreeMap<String, String>,
    /// Coupon id to the code shown to the merchant.
    pub activated_coupons: BTreeMap<String, String>,
}

impl UserAccount {
    /// A freshly signed-up account: no points, no streak, a full token bucket.
    pub fn new(token_capacity: u32, now: DateTime<Utc>) -> Self {
        Self {
            current_tokens: token_capacity,
            last_token_used: Some(now),
            ..Self::default()
        }
    }
}

/// A coupon in a store's shared inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Coupon {
    pub required_points: u64,
    /// Fraction of the price taken off, in `0.0..=1.0`.
    pub discount_amount: f64,
    /// Unused redemption codes, earliest provisioned first.
    pub available: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    /// Graded against a correct answer per question.
    #[default]
    Scored,
    /// No right answers; the plurality option picks a trait.
    Personality,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    /// The correct option string. Absent for personality quizzes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quiz {
    pub title: String,
    pub kind: QuizKind,
    pub reward_points: u64,
    pub questions: Vec<Question>,
    /// Trait names indexed by option position; personality quizzes only.
    pub traits: Vec<String>,
}

/// Content the client reports as completed. The reward is read from here,
/// never from the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Activity {
    pub title: String,
    pub reward_points: u64,
}
