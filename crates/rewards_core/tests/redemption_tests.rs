// tests/redemption_tests.rs
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rewards_core::ports::{Fields, Filter, Precondition, StoredDocument, Write};
use rewards_core::{
    Coupon, DocumentStore, InMemoryDocumentStore, LedgerError, PortError, PortResult,
    RewardLedger, RewardPolicy, StaticAuth, UserAccount,
};

const COUPONS: &str = "stores/s1/coupons";

/// Wraps the in-memory store and fails every commit while `fail_commits` is set.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryDocumentStore,
    fail_commits: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get_document(&self, collection: &str, id: &str) -> PortResult<StoredDocument> {
        self.inner.get_document(collection, id).await
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> PortResult<()> {
        self.inner.set_document(collection, id, fields, merge).await
    }

    async fn update_document(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        self.inner.update_document(collection, id, fields).await
    }

    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> PortResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("connection reset".to_string()));
        }
        self.inner.commit(preconditions, writes).await
    }

    async fn query_collection(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> PortResult<Vec<StoredDocument>> {
        self.inner.query_collection(collection, filters).await
    }
}

async fn account(store: &dyn DocumentStore, id: &str) -> UserAccount {
    let doc = store.get_document("users", id).await.unwrap();
    serde_json::from_value(Value::Object(doc.fields)).unwrap()
}

async fn coupon(store: &dyn DocumentStore, id: &str) -> Coupon {
    let doc = store.get_document(COUPONS, id).await.unwrap();
    serde_json::from_value(Value::Object(doc.fields)).unwrap()
}

#[tokio::test]
async fn redeem_scenario_debits_and_allocates_in_order() {
    let store = Arc::new(InMemoryDocumentStore::new());
    store.insert("users", "u1", json!({ "points": 200 }));
    store.insert(
        COUPONS,
        "couponId",
        json!({ "requiredPoints": 150, "discountAmount": 0.15, "available": ["A1", "A2"] }),
    );
    let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());
    let auth = StaticAuth::signed_in("u1");

    let redemption = ledger.redeem(&auth, "s1", "couponId").await.unwrap().unwrap();
    assert_eq!(redemption.code, "A1");
    assert_eq!(redemption.points, 50);

    let user = account(store.as_ref(), "u1").await;
    assert_eq!(user.points, 50);
    assert_eq!(user.redeemed_coupons.get("couponId").map(String::as_str), Some("A1"));
    assert_eq!(coupon(store.as_ref(), "couponId").await.available, vec!["A2"]);

    // A direct second call is refused instead of allocating "A2".
    let err = ledger.redeem(&auth, "s1", "couponId").await.unwrap_err();
    assert_eq!(err, LedgerError::AlreadyRedeemed("couponId".into()));
    assert_eq!(coupon(store.as_ref(), "couponId").await.available, vec!["A2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_allocate_each_code_exactly_once() {
    const CODES: usize = 8;
    let store = Arc::new(InMemoryDocumentStore::new());
    let codes: Vec<String> = (0..CODES).map(|i| format!("CODE-{i}")).collect();
    store.insert(
        COUPONS,
        "c1",
        json!({ "requiredPoints": 10, "discountAmount": 0.5, "available": codes }),
    );
    for user in 0..=CODES {
        store.insert("users", &format!("u{user}"), json!({ "points": 100 }));
    }
    let policy = RewardPolicy {
        max_transaction_attempts: 32,
        ..RewardPolicy::default()
    };
    let ledger = Arc::new(RewardLedger::new(store.clone(), policy));

    let handles: Vec<_> = (0..=CODES)
        .map(|user| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let auth = StaticAuth::signed_in(format!("u{user}"));
                ledger.redeem(&auth, "s1", "c1").await
            })
        })
        .collect();

    let mut allocated = HashSet::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Some(redemption)) => assert!(allocated.insert(redemption.code)),
            Err(LedgerError::NoCodesAvailable(_)) => exhausted += 1,
            other => panic!("unexpected redemption result {other:?}"),
        }
    }

    assert_eq!(allocated.len(), CODES);
    assert_eq!(exhausted, 1);
    assert!(coupon(store.as_ref(), "c1").await.available.is_empty());

    let mut debited = 0;
    for user in 0..=CODES {
        let state = account(store.as_ref(), &format!("u{user}")).await;
        if state.points == 90 {
            debited += 1;
            assert_eq!(state.redeemed_coupons.len(), 1);
        } else {
            assert_eq!(state.points, 100);
            assert!(state.redeemed_coupons.is_empty());
        }
    }
    assert_eq!(debited, CODES);
}

#[tokio::test]
async fn failed_commit_leaves_user_and_inventory_untouched() {
    let store = Arc::new(FlakyStore::default());
    store.inner.insert("users", "u1", json!({ "points": 500 }));
    store.inner.insert(
        COUPONS,
        "c1",
        json!({ "requiredPoints": 150, "discountAmount": 0.1, "available": ["A1"] }),
    );
    store.fail_commits.store(true, Ordering::SeqCst);
    let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());
    let auth = StaticAuth::signed_in("u1");

    let err = ledger.redeem(&auth, "s1", "c1").await.unwrap_err();
    assert!(matches!(err, LedgerError::Network(_)));

    let user = account(store.as_ref(), "u1").await;
    assert_eq!(user.points, 500);
    assert!(user.redeemed_coupons.is_empty());
    assert_eq!(coupon(store.as_ref(), "c1").await.available, vec!["A1"]);

    store.fail_commits.store(false, Ordering::SeqCst);
    let redemption = ledger.redeem(&auth, "s1", "c1").await.unwrap().unwrap();
    assert_eq!(redemption.code, "A1");
}

#[tokio::test]
async fn rejected_redemptions_change_nothing() {
    let store = Arc::new(InMemoryDocumentStore::new());
    store.insert("users", "poor", json!({ "points": 20 }));
    store.insert("users", "rich", json!({ "points": 900 }));
    store.insert(
        COUPONS,
        "pricey",
        json!({ "requiredPoints": 150, "discountAmount": 0.3, "available": ["P1"] }),
    );
    store.insert(
        COUPONS,
        "empty",
        json!({ "requiredPoints": 50, "discountAmount": 0.3, "available": [] }),
    );
    let ledger = RewardLedger::new(store.clone(), RewardPolicy::default());

    let poor_before = store.get_document("users", "poor").await.unwrap();
    let err = ledger
        .redeem(&StaticAuth::signed_in("poor"), "s1", "pricey")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientPoints { required: 150, available: 20 }));
    assert_eq!(store.get_document("users", "poor").await.unwrap(), poor_before);
    assert_eq!(coupon(store.as_ref(), "pricey").await.available, vec!["P1"]);

    let rich_before = store.get_document("users", "rich").await.unwrap();
    let err = ledger
        .redeem(&StaticAuth::signed_in("rich"), "s1", "empty")
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::NoCodesAvailable("empty".into()));
    assert_eq!(store.get_document("users", "rich").await.unwrap(), rich_before);
}

#[tokio::test]
async fn signed_out_redeem_is_skipped() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let ledger = RewardLedger::new(store, RewardPolicy::default());

    let result = ledger.redeem(&StaticAuth::signed_out(), "s1", "c1").await.unwrap();
    assert_eq!(result, None);
}
