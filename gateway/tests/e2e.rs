//! End-to-end tests for the wallet gateway.
//!
//! Each test opens a full [`Gateway`] (account store, local ledger, transfer
//! orchestrator, faucet) in its own temporary directory, driven by a
//! manual clock so claim periods pass instantly.

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use tempfile::TempDir;

use wallet_gateway::clock::ManualClock;
use wallet_gateway::config::{CredentialParams, GatewayConfig};
use wallet_gateway::faucet::{ClaimState, Faucet, Ruleset};
use wallet_gateway::ledger::{Address, Ledger};
use wallet_gateway::telemetry::{GatewayMetrics, Telemetry};
use wallet_gateway::{ErrorKind, Gateway, GatewayError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.credentials = CredentialParams::minimal();
    config.faucet.max_claim_per_period = 10;
    config.faucet.min_claim_per_period = 1;
    config.faucet.claim_period_secs = 6 * 60 * 60;
    config.faucet.genesis_allocation = 1_000_000;
    config
}

fn open(dir: &TempDir, clock: &Arc<ManualClock>) -> Gateway {
    Gateway::open(dir.path(), &config(), clock.clone(), Telemetry::detached()).expect("gateway")
}

fn setup() -> (TempDir, Arc<ManualClock>, Gateway) {
    let dir = tempfile::tempdir().expect("temp dir");
    let clock = Arc::new(ManualClock::starting_now());
    let gateway = open(&dir, &clock);
    (dir, clock, gateway)
}

// ---------------------------------------------------------------------------
// 1. Account Lifecycle and Claim Cooling
// ---------------------------------------------------------------------------

#[test]
fn alice_claims_then_cools_down() {
    let (_dir, clock, gateway) = setup();
    let accounts = gateway.accounts();
    let faucet = gateway.faucet();

    let alice = accounts.create_account("alice", "pw1").unwrap();
    assert!(accounts.authenticate("alice", "pw1").unwrap());
    assert!(!accounts.authenticate("alice", "pw2").unwrap());

    assert!(faucet.account_can_claim("alice").unwrap());
    faucet.claim("alice", 5).unwrap();
    assert_eq!(faucet.account_last_claim("alice").unwrap().unwrap().amount, 5);

    let err = faucet.claim("alice", 5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClaimTooLarge);
    let last = faucet.account_last_claim("alice").unwrap().unwrap();
    assert_eq!(last.amount, 5);

    clock.advance(Duration::hours(6));
    assert!(faucet.account_can_claim("alice").unwrap());
    assert_eq!(gateway.ledger().balance(&alice.address()).unwrap(), 5);
}

#[test]
fn claim_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    {
        let gateway = open(&dir, &clock);
        gateway.accounts().create_account("alice", "pw1").unwrap();
        gateway.faucet().claim("alice", 10).unwrap();
        gateway.flush().unwrap();
    }

    let gateway = open(&dir, &clock);
    let alice = gateway.accounts().query_by_username("alice").unwrap();
    assert!(matches!(
        gateway.faucet().claim_state(&alice),
        ClaimState::Cooling { .. }
    ));
    assert_eq!(gateway.ledger().balance(&alice.address()).unwrap(), 10);
    assert!(gateway.faucet().reconcile().unwrap().is_clean());
}

// ---------------------------------------------------------------------------
// 2. Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_token_issuance_loses_nothing() {
    let (_dir, _clock, gateway) = setup();
    gateway.accounts().create_account("alice", "pw1").unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let accounts = Arc::clone(gateway.accounts());
            thread::spawn(move || accounts.issue_token("alice", "pw1").unwrap())
        })
        .collect();
    let tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_ne!(tokens[0], tokens[1]);
    for token in &tokens {
        assert!(gateway.accounts().authenticate("alice", token).unwrap());
    }
    let alice = gateway.accounts().query_by_username("alice").unwrap();
    assert_eq!(alice.tokens().len(), 2);
}

#[test]
fn concurrent_account_creation_yields_unique_addresses() {
    let (_dir, _clock, gateway) = setup();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let accounts = Arc::clone(gateway.accounts());
            thread::spawn(move || {
                accounts
                    .create_account(&format!("user{i}"), "pw")
                    .unwrap()
                    .address()
            })
        })
        .collect();
    let mut addresses: Vec<Address> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    addresses.sort();
    addresses.dedup();
    assert_eq!(addresses.len(), 8);

    for address in &addresses {
        let account = gateway.accounts().query_by_address(address).unwrap();
        assert_eq!(account.address(), *address);
    }
}

#[test]
fn same_username_created_twice_concurrently_lands_once() {
    let (_dir, _clock, gateway) = setup();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let accounts = Arc::clone(gateway.accounts());
            thread::spawn(move || accounts.create_account("bob", "pw").is_ok())
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(created, 1);
}

// ---------------------------------------------------------------------------
// 3. Transfers
// ---------------------------------------------------------------------------

#[test]
fn claimed_funds_can_be_sent_on() {
    let (_dir, _clock, gateway) = setup();
    let accounts = gateway.accounts();
    let orchestrator = gateway.orchestrator();

    accounts.create_account("alice", "pw1").unwrap();
    let bob = accounts.create_account("bob", "pw2").unwrap();
    gateway.faucet().claim("alice", 10).unwrap();

    let token = accounts.issue_token("alice", "pw1").unwrap();
    let first = orchestrator
        .submit_transfer("alice", &token, bob.address(), 4, None)
        .unwrap();
    let second = orchestrator
        .submit_transfer("alice", "pw1", bob.address(), 3, Some(b"rent".to_vec()))
        .unwrap();

    assert_eq!(first.nonce, 0);
    assert_eq!(second.nonce, 1);
    assert_eq!(second.parent.as_deref(), Some(first.hash.as_str()));
    assert_eq!(orchestrator.balance("alice").unwrap(), 3);
    assert_eq!(orchestrator.balance("bob").unwrap(), 7);
    assert_eq!(
        orchestrator.last_transaction_hash("alice").unwrap(),
        Some(second.hash.clone())
    );
    // Faucet payout plus two outgoing.
    assert_eq!(orchestrator.history("alice").unwrap().len(), 3);

    let err = orchestrator
        .submit_transfer("alice", "pw1", bob.address(), 100, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerFailure);
    assert_eq!(orchestrator.balance("alice").unwrap(), 3);
}

#[test]
fn transfer_with_wrong_secret_has_no_side_effects() {
    let (_dir, _clock, gateway) = setup();
    gateway.accounts().create_account("alice", "pw1").unwrap();
    let bob = gateway.accounts().create_account("bob", "pw2").unwrap();
    gateway.faucet().claim("alice", 10).unwrap();

    let err = gateway
        .orchestrator()
        .submit_transfer("alice", "nope", bob.address(), 1, None)
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidCredentials { .. }));
    assert_eq!(gateway.orchestrator().balance("bob").unwrap(), 0);
    assert!(gateway
        .orchestrator()
        .last_transaction_hash("alice")
        .unwrap()
        .is_none());
}

#[test]
fn published_transfers_reach_subscribers() {
    let (_dir, _clock, gateway) = setup();
    let mut events = gateway.ledger().subscribe();
    let alice = gateway.accounts().create_account("alice", "pw1").unwrap();

    let receipt = gateway.faucet().claim("alice", 7).unwrap();
    let seen = events.try_recv().unwrap();
    assert_eq!(seen.hash, receipt.transaction.hash);
    assert_eq!(seen.recipient, alice.address());
}

// ---------------------------------------------------------------------------
// 4. Bans
// ---------------------------------------------------------------------------

#[test]
fn banned_address_never_claims() {
    let (_dir, clock, gateway) = setup();
    gateway.accounts().create_account("mallory", "pw").unwrap();
    assert!(gateway.faucet().ban_user("mallory").unwrap());
    assert!(!gateway.faucet().ban_user("mallory").unwrap());

    for _ in 0..3 {
        assert_eq!(gateway.faucet().amount_can_claim("mallory").unwrap(), 0);
        assert!(gateway.faucet().claim("mallory", 1).is_err());
        clock.advance(Duration::hours(12));
    }
    assert!(gateway
        .faucet()
        .account_last_claim("mallory")
        .unwrap()
        .is_none());
}

#[test]
fn runtime_ban_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let mallory = {
        let gateway = open(&dir, &clock);
        let mallory = gateway.accounts().create_account("mallory", "pw").unwrap();
        assert!(gateway.faucet().ban_user("mallory").unwrap());
        gateway.flush().unwrap();
        mallory
    };

    let gateway = open(&dir, &clock);
    assert!(gateway.faucet().ruleset().is_banned(&mallory.address()));
    assert_eq!(gateway.faucet().amount_can_claim("mallory").unwrap(), 0);
    assert!(!gateway.faucet().ban_user("mallory").unwrap());
    assert_eq!(
        gateway.faucet().claim("mallory", 1).unwrap_err().kind(),
        ErrorKind::ClaimTooLarge
    );
}

// ---------------------------------------------------------------------------
// 5. Credentials
// ---------------------------------------------------------------------------

#[test]
fn password_reset_and_token_validation() {
    let (_dir, _clock, gateway) = setup();
    let accounts = gateway.accounts();
    let alice = accounts.create_account("alice", "pw1").unwrap();
    let token = accounts.issue_token("alice", "pw1").unwrap();

    assert_eq!(accounts.validate_token("alice", &token).unwrap(), alice.address());
    assert_eq!(
        accounts.validate_token("alice", "pw1").unwrap_err().kind(),
        ErrorKind::InvalidCredentials
    );

    accounts.reset_password("alice", "pw1", "pw9").unwrap();
    assert!(!accounts.authenticate("alice", "pw1").unwrap());
    assert!(accounts.authenticate("alice", "pw9").unwrap());
    assert!(accounts.authenticate("alice", &token).unwrap());

    let err = accounts.reset_password("alice", "pw1", "x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[test]
fn deleted_account_frees_its_name() {
    let (_dir, _clock, gateway) = setup();
    let accounts = gateway.accounts();
    let first = accounts.create_account("carol", "pw").unwrap();
    accounts.delete_account("carol", "pw").unwrap();

    assert_eq!(
        accounts.query_by_username("carol").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        accounts.query_by_address(&first.address()).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let second = accounts.create_account("carol", "pw").unwrap();
    assert_ne!(first.address(), second.address());
}

#[test]
fn imported_address_cannot_be_bound_twice() {
    let (_dir, _clock, gateway) = setup();
    let address: Address = "0x0101010101010101010101010101010101010101010101010101010101010101"
        .parse()
        .unwrap();
    gateway
        .accounts()
        .import_account("dave", "pw", address)
        .unwrap();
    let err = gateway
        .accounts()
        .import_account("erin", "pw", address)
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyExists { what: "address", .. }));
    assert_eq!(
        gateway.accounts().query_by_address(&address).unwrap().username(),
        "dave"
    );
}

// ---------------------------------------------------------------------------
// 6. Telemetry
// ---------------------------------------------------------------------------

#[test]
fn counters_track_gateway_activity() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let metrics = Arc::new(GatewayMetrics::new());
    let telemetry = Telemetry::new(tracing::info_span!("gateway"), metrics.clone());
    let gateway = Gateway::open(dir.path(), &config(), clock, telemetry).unwrap();

    gateway.accounts().create_account("alice", "pw1").unwrap();
    gateway.accounts().authenticate("alice", "bad").unwrap();
    gateway.faucet().claim("alice", 3).unwrap();
    gateway.faucet().claim("alice", 3).unwrap_err();

    // The faucet account counts too.
    assert_eq!(metrics.accounts_created_total.get(), 2);
    assert_eq!(metrics.auth_failures_total.get(), 1);
    assert_eq!(metrics.claims_succeeded_total.get(), 1);
    assert_eq!(metrics.claims_rejected_total.get(), 1);
    assert_eq!(metrics.transfers_published_total.get(), 1);
    assert!(gateway
        .metrics()
        .encode()
        .contains("wallet_gateway_claims_succeeded_total 1"));
}
