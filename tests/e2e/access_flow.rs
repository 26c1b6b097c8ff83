//! Grant, access check and reconcile flows.

use super::harness::{
    payment, tx_hash, TestHarness, BOT_ADDRESS, BOT_ID, BOT_PRICE, MINIMUM_STAKE, PAYER,
};
use chrono::{Duration, Utc};
use ness_gate::verification::RejectionReason;
use ness_gate::{AccessError, AccessEvent, GrantStatus, Subscription, SubscriptionStore};

fn stored(user_id: &str, expires_at: chrono::DateTime<Utc>) -> Subscription {
    Subscription {
        user_id: user_id.to_string(),
        bot_id: BOT_ID.to_string(),
        bot_display_name: "@signal_bot".to_string(),
        payer_address: PAYER.to_string(),
        created_at: expires_at - Duration::days(30),
        expires_at,
    }
}

#[tokio::test]
async fn test_unknown_bot_makes_no_calls() {
    let harness = TestHarness::new();

    let result = harness.manager.verify_and_grant("42", "nope", &tx_hash(1)).await;

    assert!(matches!(result, Err(AccessError::ConfigNotFound(ref id)) if id == "nope"));
    assert_eq!(harness.total_calls(), 0);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_payment_grants_thirty_days() {
    let harness = TestHarness::new();
    let tx = tx_hash(1);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    let mut events = harness.manager.subscribe_events();

    let before = Utc::now();
    let grant = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    assert_eq!(grant.status, GrantStatus::Granted);
    assert_eq!(grant.bot_display_name, "@signal_bot");
    assert_eq!(grant.payment_address, BOT_ADDRESS);
    let expected = before + Duration::days(30);
    assert!((grant.expires_at - expected).num_seconds().abs() <= 5);

    let row = harness.store.get("42", BOT_ID).await.unwrap().unwrap();
    assert_eq!(row.payer_address, PAYER);
    assert_eq!(row.expires_at, grant.expires_at);

    let status = harness.manager.check_ongoing_access("42", BOT_ID).await.unwrap();
    assert!(status.access);
    assert_eq!(status.expires_at, Some(grant.expires_at));

    assert!(matches!(
        events.try_recv(),
        Ok(AccessEvent::Granted { ref user_id, .. }) if user_id == "42"
    ));
}

#[tokio::test]
async fn test_replay_returns_existing_grant_without_lookups() {
    let harness = TestHarness::new();
    let tx = tx_hash(1);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);

    let first = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();
    let calls = harness.total_calls();

    let replay = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    assert_eq!(replay.status, GrantStatus::AlreadyActive);
    assert_eq!(replay.expires_at, first.expires_at);
    assert_eq!(harness.total_calls(), calls);
}

#[tokio::test]
async fn test_one_short_of_price_is_refused() {
    let harness = TestHarness::new();
    let tx = tx_hash(2);
    harness.publish_payment(&tx, 2999.0, 50.0);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    match result {
        Err(AccessError::TransactionInvalid(RejectionReason::AmountTooLow {
            received,
            required,
        })) => {
            assert!((received - 2999.0).abs() < f64::EPSILON);
            assert!((required - 3000.0).abs() < f64::EPSILON);
        }
        other => panic!("expected amountTooLow, got {other:?}"),
    }
    assert!(harness.store.is_empty());
    assert_eq!(harness.rpc.balance_calls(), 0);
}

#[tokio::test]
async fn test_payment_to_other_address_is_refused() {
    let harness = TestHarness::new();
    let tx = tx_hash(3);
    harness.rpc.add_transaction(payment(&tx, "ADDR_OTHER", 5000.0));

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    assert!(matches!(
        result,
        Err(AccessError::TransactionInvalid(RejectionReason::WrongRecipient { ref actual, .. }))
            if actual == "ADDR_OTHER"
    ));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_insufficient_stake_is_refused() {
    let harness = TestHarness::new();
    let tx = tx_hash(4);
    harness.publish_payment(&tx, BOT_PRICE, MINIMUM_STAKE - 1.0);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    assert!(matches!(
        result,
        Err(AccessError::BalanceInsufficient { ref address, .. }) if address == PAYER
    ));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_malformed_reference_is_refused_without_lookups() {
    let harness = TestHarness::new();

    let result = harness.manager.verify_and_grant("42", BOT_ID, "not-a-hash").await;

    assert!(matches!(
        result,
        Err(AccessError::TransactionInvalid(RejectionReason::MalformedReference))
    ));
    assert_eq!(harness.total_calls(), 0);
}

#[tokio::test]
async fn test_fallback_source_grants_when_rpc_is_down() {
    let harness = TestHarness::new();
    let tx = tx_hash(5);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.rpc.set_down(true);

    let grant = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    assert_eq!(grant.status, GrantStatus::Granted);
    assert_eq!(harness.rpc.tx_calls(), 1);
    assert_eq!(harness.explorer.tx_calls(), 1);
    assert_eq!(harness.explorer.balance_calls(), 1);
}

#[tokio::test]
async fn test_all_sources_down_is_retryable() {
    let harness = TestHarness::new();
    let tx = tx_hash(6);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.rpc.set_down(true);
    harness.explorer.set_down(true);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;
    assert!(matches!(result, Err(AccessError::VerificationSourceUnreachable)));
    assert!(harness.store.is_empty());

    harness.rpc.set_down(false);
    let grant = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();
    assert_eq!(grant.status, GrantStatus::Granted);
}

#[tokio::test]
async fn test_reconcile_revokes_when_stake_drops() {
    let harness = TestHarness::new();
    let tx = tx_hash(7);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    assert!(harness.manager.reconcile_status("42", BOT_ID).await.unwrap());

    let mut events = harness.manager.subscribe_events();
    harness.rpc.set_balance(PAYER, 0.5);
    harness.explorer.set_balance(PAYER, 0.5);

    assert!(!harness.manager.reconcile_status("42", BOT_ID).await.unwrap());
    assert!(harness.store.get("42", BOT_ID).await.unwrap().is_none());
    assert!(matches!(events.try_recv(), Ok(AccessEvent::Revoked { .. })));

    let calls = harness.total_calls();
    assert!(!harness.manager.reconcile_status("42", BOT_ID).await.unwrap());
    assert_eq!(harness.total_calls(), calls);

    let status = harness.manager.check_ongoing_access("42", BOT_ID).await.unwrap();
    assert!(!status.access);
    assert_eq!(status.expires_at, None);
}

#[tokio::test]
async fn test_revoked_user_can_pay_again() {
    let harness = TestHarness::new();
    let tx = tx_hash(8);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    harness.rpc.set_balance(PAYER, 0.0);
    harness.explorer.set_balance(PAYER, 0.0);
    assert!(!harness.manager.reconcile_status("42", BOT_ID).await.unwrap());

    harness.rpc.set_balance(PAYER, 50.0);
    let renewed = harness.manager.verify_and_grant("42", BOT_ID, &tx_hash(9)).await;
    assert!(renewed.is_err());

    harness.publish_payment(&tx_hash(9), BOT_PRICE, 50.0);
    let renewed = harness.manager.verify_and_grant("42", BOT_ID, &tx_hash(9)).await.unwrap();
    assert_eq!(renewed.status, GrantStatus::Granted);
}

#[tokio::test]
async fn test_grants_for_different_users_are_independent() {
    let harness = TestHarness::new();
    harness.publish_payment(&tx_hash(10), BOT_PRICE, 50.0);
    harness.publish_payment(&tx_hash(11), BOT_PRICE, 50.0);

    let (tx_a, tx_b) = (tx_hash(10), tx_hash(11));
    let (a, b) = tokio::join!(
        harness.manager.verify_and_grant("1", BOT_ID, &tx_a),
        harness.manager.verify_and_grant("2", BOT_ID, &tx_b),
    );

    assert_eq!(a.unwrap().status, GrantStatus::Granted);
    assert_eq!(b.unwrap().status, GrantStatus::Granted);
    assert_eq!(harness.store.len(), 2);
}

#[tokio::test]
async fn test_expired_rows_grant_nothing_and_are_reverified() {
    let harness = TestHarness::new();
    harness
        .store
        .upsert(stored("42", Utc::now() - Duration::hours(1)))
        .await
        .unwrap();
    harness.store.upsert(stored("43", Utc::now())).await.unwrap();

    for user in ["42", "43"] {
        let status = harness.manager.check_ongoing_access(user, BOT_ID).await.unwrap();
        assert!(!status.access, "{user} should have no access");
        assert_eq!(status.expires_at, None);
    }

    harness.publish_payment(&tx_hash(20), BOT_PRICE, 50.0);
    harness.publish_payment(&tx_hash(21), BOT_PRICE, 50.0);
    let a = harness.manager.verify_and_grant("42", BOT_ID, &tx_hash(20)).await.unwrap();
    let b = harness.manager.verify_and_grant("43", BOT_ID, &tx_hash(21)).await.unwrap();

    assert_eq!(a.status, GrantStatus::Granted);
    assert_eq!(b.status, GrantStatus::Granted);
    assert_eq!(harness.rpc.tx_calls(), 2);
    assert!(a.expires_at > Utc::now() + Duration::days(29));
}

#[tokio::test]
async fn test_failed_write_grants_nothing_and_can_be_retried() {
    let harness = TestHarness::new();
    let tx = tx_hash(22);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.store.set_fail_upserts(true);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    assert!(matches!(result, Err(AccessError::Persistence(_))));
    assert!(harness.store.is_empty());

    harness.store.set_fail_upserts(false);
    let grant = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();
    assert_eq!(grant.status, GrantStatus::Granted);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn test_failed_read_makes_no_lookups() {
    let harness = TestHarness::new();
    let tx = tx_hash(23);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.store.set_fail_reads(true);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    assert!(matches!(result, Err(AccessError::Persistence(_))));
    assert_eq!(harness.total_calls(), 0);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_transaction_pays_for_one_user_only() {
    let harness = TestHarness::new();
    let tx = tx_hash(24);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    let result = harness.manager.verify_and_grant("43", BOT_ID, &tx).await;

    assert!(matches!(
        result,
        Err(AccessError::TransactionInvalid(RejectionReason::AlreadyRedeemed))
    ));
    assert!(harness.store.get("43", BOT_ID).await.unwrap().is_none());
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn test_represented_transaction_keeps_original_expiry() {
    let harness = TestHarness::new();
    let tx = tx_hash(25);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    let first = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    harness.rpc.set_balance(PAYER, 0.0);
    harness.explorer.set_balance(PAYER, 0.0);
    assert!(!harness.manager.reconcile_status("42", BOT_ID).await.unwrap());

    harness.rpc.set_balance(PAYER, 50.0);
    let again = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();

    assert_eq!(again.status, GrantStatus::Granted);
    assert_eq!(again.expires_at, first.expires_at);
}

#[tokio::test]
async fn test_unavailable_stake_is_retryable() {
    let harness = TestHarness::new();
    let tx = tx_hash(26);
    harness.publish_payment(&tx, BOT_PRICE, 50.0);
    harness.rpc.set_balances_down(true);
    harness.explorer.set_balances_down(true);

    let result = harness.manager.verify_and_grant("42", BOT_ID, &tx).await;

    assert!(matches!(result, Err(AccessError::VerificationSourceUnreachable)));
    assert!(harness.store.is_empty());

    harness.explorer.set_balances_down(false);
    let grant = harness.manager.verify_and_grant("42", BOT_ID, &tx).await.unwrap();
    assert_eq!(grant.status, GrantStatus::Granted);
}
