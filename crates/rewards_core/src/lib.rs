pub mod auth;
pub mod coupons;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod quiz;
pub mod streak;
pub mod tokens;
pub mod transaction;

pub use auth::StaticAuth;
pub use coupons::{CouponListing, Redemption};
pub use domain::{Activity, Coupon, Question, Quiz, QuizKind, UserAccount, UserId};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{AccountSummary, QuizCompletion, QuizOutcome, RewardLedger};
pub use memory::InMemoryDocumentStore;
pub use policy::{RewardPolicy, StreakMilestone};
pub use ports::{AuthProvider, DocumentStore, PortError, PortResult};
pub use streak::CheckIn;
pub use tokens::TokenStatus;
