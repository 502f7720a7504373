//! crates/rewards_core/src/coupons.rs
//!
//! Coupon redemption against a store's shared code inventory.
//!
//! A coupon's `available` queue is the only ledger resource written by many
//! users, so redemption reads the user and the coupon in one transaction and
//! commits the point debit, the code allocation and the shrunk queue together.

use serde_json::json;
use tracing::info;

use crate::domain::{coupons_collection, Coupon, UserAccount};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{user_key, RewardLedger};
use crate::ports::{AuthProvider, DocumentKey, Write};
use crate::transaction::{decode_fields, encode_fields, run_transaction, TxnPlan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub coupon_id: String,
    pub code: String,
    /// Point balance after the debit.
    pub points: u64,
    /// Codes still unallocated for this coupon.
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouponListing {
    pub id: String,
    pub required_points: u64,
    pub discount_amount: f64,
    pub remaining: usize,
}

/// The decision of a redemption attempt, before any write.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionPlan {
    pub account: UserAccount,
    pub coupon: Coupon,
    pub code: String,
}

/// Checks a redemption and computes the post-redemption documents.
///
/// Checks run in order: already redeemed, enough points, codes left.
/// The earliest provisioned code is allocated first.
pub fn plan_redemption(
    mut account: UserAccount,
    mut coupon: Coupon,
    coupon_id: &str,
) -> LedgerResult<RedemptionPlan> {
    if account.redeemed_coupons.contains_key(coupon_id) {
        return Err(LedgerError::AlreadyRedeemed(coupon_id.to_string()));
    }
    if account.points < coupon.required_points {
        return Err(LedgerError::InsufficientPoints {
            required: coupon.required_points,
            available: account.points,
        });
    }
    if coupon.available.is_empty() {
        return Err(LedgerError::NoCodesAvailable(coupon_id.to_string()));
    }

    let code = coupon.available.remove(0);
    account.points -= coupon.required_points;
    account
        .redeemed_coupons
        .insert(coupon_id.to_string(), code.clone());

    Ok(RedemptionPlan {
        account,
        coupon,
        code,
    })
}

fn coupon_key(store_id: &str, coupon_id: &str) -> DocumentKey {
    DocumentKey::new(coupons_collection(store_id), coupon_id)
}

impl RewardLedger {
    /// Allocates the next code of `coupon_id` to the signed-in user and debits
    /// its price, all or nothing.
    pub async fn redeem(
        &self,
        auth: &dyn AuthProvider,
        store_id: &str,
        coupon_id: &str,
    ) -> LedgerResult<Option<Redemption>> {
        let Some(user_id) = Self::signed_in(auth, "redeem") else {
            return Ok(None);
        };
        let user = user_key(&user_id);
        let coupon = coupon_key(store_id, coupon_id);

        let redemption = run_transaction(
            self.store(),
            &[user.clone(), coupon.clone()],
            self.policy().max_transaction_attempts,
            |snapshot| {
                let Some(account) = snapshot.decode::<UserAccount>(&user)? else {
                    return Ok(TxnPlan::read_only(None));
                };
                let inventory = snapshot
                    .decode::<Coupon>(&coupon)?
                    .ok_or_else(|| LedgerError::NotFound(format!("Coupon {coupon} not found")))?;

                let plan = plan_redemption(account, inventory, coupon_id)?;
                let writes = vec![
                    Write::Merge {
                        key: user.clone(),
                        fields: encode_fields(&json!({
                            "points": plan.account.points,
                            "redeemedCoupons": plan.account.redeemed_coupons,
                        }))?,
                    },
                    Write::Merge {
                        key: coupon.clone(),
                        fields: encode_fields(&json!({ "available": plan.coupon.available }))?,
                    },
                ];
                Ok(TxnPlan::with_writes(
                    writes,
                    Some(Redemption {
                        coupon_id: coupon_id.to_string(),
                        code: plan.code,
                        points: plan.account.points,
                        remaining: plan.coupon.available.len(),
                    }),
                ))
            },
        )
        .await?;

        let Some(redemption) = redemption else {
            Self::account_missing(&user_id, "redeem");
            return Ok(None);
        };

        info!(
            user = %user_id,
            store_id,
            coupon_id,
            remaining = redemption.remaining,
            "Coupon redeemed"
        );
        Ok(Some(redemption))
    }

    /// Marks a redeemed coupon as activated in-store and returns the code to
    /// show the merchant. Activating again returns the same code.
    pub async fn activate(
        &self,
        auth: &dyn AuthProvider,
        store_id: &str,
        coupon_id: &str,
    ) -> LedgerResult<Option<String>> {
        let Some(user_id) = Self::signed_in(auth, "activate") else {
            return Ok(None);
        };
        let user = user_key(&user_id);

        let code = run_transaction(
            self.store(),
            std::slice::from_ref(&user),
            self.policy().max_transaction_attempts,
            |snapshot| {
                let Some(mut account) = snapshot.decode::<UserAccount>(&user)? else {
                    return Ok(TxnPlan::read_only(None));
                };
                if let Some(existing) = account.activated_coupons.get(coupon_id) {
                    return Ok(TxnPlan::read_only(Some(existing.clone())));
                }
                let code = account
                    .redeemed_coupons
                    .get(coupon_id)
                    .cloned()
                    .ok_or_else(|| LedgerError::NotRedeemed(coupon_id.to_string()))?;

                account
                    .activated_coupons
                    .insert(coupon_id.to_string(), code.clone());
                let fields =
                    encode_fields(&json!({ "activatedCoupons": account.activated_coupons }))?;
                Ok(TxnPlan::with_writes(
                    vec![Write::Merge {
                        key: user.clone(),
                        fields,
                    }],
                    Some(code),
                ))
            },
        )
        .await?;

        let Some(code) = code else {
            Self::account_missing(&user_id, "activate");
            return Ok(None);
        };

        info!(user = %user_id, store_id, coupon_id, "Coupon activated");
        Ok(Some(code))
    }

    /// Lists a store's coupons with how many codes each has left, by id.
    pub async fn list_coupons(&self, store_id: &str) -> LedgerResult<Vec<CouponListing>> {
        let collection = coupons_collection(store_id);
        let docs = self.store().query_collection(&collection, &[]).await?;

        let mut listings = docs
            .into_iter()
            .map(|doc| {
                let key = DocumentKey::new(collection.as_str(), doc.id.as_str());
                let coupon: Coupon = decode_fields(&key, &doc.fields)?;
                Ok(CouponListing {
                    id: doc.id,
                    required_points: coupon.required_points,
                    discount_amount: coupon.discount_amount,
                    remaining: coupon.available.len(),
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;
        listings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::domain::USERS;
    use crate::memory::InMemoryDocumentStore;
    use crate::policy::RewardPolicy;
    use crate::ports::DocumentStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn account(points: u64) -> UserAccount {
        UserAccount {
            points,
            ..UserAccount::default()
        }
    }

    fn coupon(required: u64, codes: &[&str]) -> Coupon {
        Coupon {
            required_points: required,
            discount_amount: 0.1,
            available: codes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn plan_allocates_the_oldest_code_and_debits() {
        let plan = plan_redemption(account(200), coupon(150, &["A1", "A2"]), "c1").unwrap();

        assert_eq!(plan.code, "A1");
        assert_eq!(plan.account.points, 50);
        assert_eq!(plan.coupon.available, vec!["A2"]);
        assert_eq!(plan.account.redeemed_coupons["c1"], "A1");
    }

    #[test]
    fn plan_checks_points_before_inventory() {
        let err = plan_redemption(account(10), coupon(150, &[]), "c1").unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientPoints {
                required: 150,
                available: 10
            }
        );

        let err = plan_redemption(account(500), coupon(150, &[]), "c1").unwrap_err();
        assert_eq!(err, LedgerError::NoCodesAvailable("c1".into()));
    }

    #[test]
    fn plan_rejects_a_second_redemption() {
        let mut holder = account(500);
        holder.redeemed_coupons = BTreeMap::from([("c1".to_string(), "A1".to_string())]);

        let err = plan_redemption(holder, coupon(150, &["A2"]), "c1").unwrap_err();
        assert_eq!(err, LedgerError::AlreadyRedeemed("c1".into()));
    }

    fn setup() -> (Arc<InMemoryDocumentStore>, RewardLedger) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert(USERS, "u1", json!({ "points": 200 }));
        store.insert(
            "stores/s1/coupons",
            "c1",
            json!({ "requiredPoints": 150, "discountAmount": 0.2, "available": ["A1", "A2"] }),
        );
        let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());
        (store, ledger)
    }

    #[tokio::test]
    async fn activation_copies_the_redeemed_code_once() {
        let (store, ledger) = setup();
        let auth = StaticAuth::signed_in("u1");
        ledger.redeem(&auth, "s1", "c1").await.unwrap();

        let code = ledger.activate(&auth, "s1", "c1").await.unwrap().unwrap();
        assert_eq!(code, "A1");
        let version = store.get_document(USERS, "u1").await.unwrap().version;

        let again = ledger.activate(&auth, "s1", "c1").await.unwrap().unwrap();
        assert_eq!(again, "A1");
        assert_eq!(store.get_document(USERS, "u1").await.unwrap().version, version);
    }

    #[tokio::test]
    async fn activation_requires_a_redemption() {
        let (_store, ledger) = setup();

        let err = ledger
            .activate(&StaticAuth::signed_in("u1"), "s1", "c1")
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotRedeemed("c1".into()));
    }

    #[tokio::test]
    async fn unknown_coupon_is_not_found() {
        let (_store, ledger) = setup();

        let err = ledger
            .redeem(&StaticAuth::signed_in("u1"), "s1", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn operations_without_an_account_write_nothing() {
        let (store, ledger) = setup();
        let ghost = StaticAuth::signed_in("ghost");
        let before = store.get_document("stores/s1/coupons", "c1").await.unwrap();

        assert_eq!(ledger.redeem(&ghost, "s1", "c1").await.unwrap(), None);
        assert_eq!(ledger.activate(&ghost, "s1", "c1").await.unwrap(), None);
        assert_eq!(
            store.get_document("stores/s1/coupons", "c1").await.unwrap(),
            before
        );
        assert!(store.get_document(USERS, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn listing_reports_remaining_codes() {
        let (store, ledger) = setup();
        store.insert(
            "stores/s1/coupons",
            "a0",
            json!({ "requiredPoints": 20, "discountAmount": 0.05, "available": [] }),
        );

        let listings = ledger.list_coupons("s1").await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].id, "a0");
        assert_eq!(listings[0].remaining, 0);
        assert_eq!(listings[1].remaining, 2);
        assert_eq!(listings[1].required_points, 150);
    }
}
