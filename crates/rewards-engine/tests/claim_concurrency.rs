//! Concurrent claim issuance

mod common;

use std::collections::HashSet;

use rust_decimal::Decimal;

use common::{credit, user, Harness};
use rewards_core::SettlementEvent;
use rewards_engine::{verify_claim_authorization, Clock, EngineError};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_requests_for_one_user_yield_one_authorization() {
    let h = Harness::in_memory();
    let alice = user(0xa1);
    credit(h.engine.ledger(), &[(alice, 300)]);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let claims = h.engine.claims().clone();
        handles.push(tokio::spawn(async move { claims.issue_claim_authorization(alice).await }));
    }

    let mut issued = Vec::new();
    let mut in_flight = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(auth) => issued.push(auth),
            Err(EngineError::ClaimInFlight { nonce, .. }) => {
                assert_eq!(nonce, 1);
                in_flight += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(issued.len(), 1);
    assert_eq!(in_flight, 31);
    assert_eq!(issued[0].nonce, 1);
    assert_eq!(issued[0].amount, Decimal::from(300));

    let state = h.engine.ledger().user_state(&alice).unwrap();
    assert_eq!(state.last_nonce, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn distinct_users_are_served_in_parallel() {
    let h = Harness::in_memory();
    let users: Vec<_> = (1..=20u8).map(user).collect();
    let grants: Vec<_> = users.iter().map(|u| (*u, 100)).collect();
    credit(h.engine.ledger(), &grants);

    let mut handles = Vec::new();
    for u in &users {
        let claims = h.engine.claims().clone();
        let u = *u;
        handles.push(tokio::spawn(async move { claims.issue_claim_authorization(u).await }));
    }

    let key = h.engine.claims().active_verifying_key().unwrap();
    let mut signatures = HashSet::new();
    for handle in handles {
        let auth = handle.await.unwrap().unwrap();
        assert_eq!(auth.nonce, 1);
        assert_eq!(auth.amount, Decimal::from(100));
        verify_claim_authorization(&auth, &key, h.clock.now()).unwrap();
        signatures.insert(auth.signature);
    }
    assert_eq!(signatures.len(), users.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_settlement_reports_apply_once() {
    let h = Harness::in_memory();
    let bob = user(0xb0);
    credit(h.engine.ledger(), &[(bob, 400)]);
    let auth = h.engine.claims().issue_claim_authorization(bob).await.unwrap();

    let event = SettlementEvent {
        user: bob,
        amount: auth.amount,
        nonce: auth.nonce,
        tx_hash: "0xFEED01".into(),
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let claims = h.engine.claims().clone();
        let event = event.clone();
        handles.push(tokio::spawn(async move { claims.on_claim_settled(event).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = h.engine.ledger().user_state(&bob).unwrap();
    assert_eq!(state.cumulative_claimed, Decimal::from(400));
    assert_eq!(state.successful_claims, 1);
    assert_eq!(h.engine.snapshot().cumulative_distributed, Decimal::from(400));
}
