// Credential benchmarks for the wallet gateway.
//
// Covers Argon2id hashing and verification at default and minimal cost,
// session token issuance, and a full authenticate round trip through the
// account store.

use std::sync::Arc;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use wallet_gateway::accounts::AccountStore;
use wallet_gateway::clock::SystemClock;
use wallet_gateway::config::{CredentialParams, GatewayConfig};
use wallet_gateway::credentials::{fingerprint, CredentialStore};
use wallet_gateway::ledger::LocalLedger;
use wallet_gateway::telemetry::Telemetry;

fn cost_profiles() -> [(&'static str, CredentialParams); 2] {
    [
        ("default", CredentialParams::default()),
        ("minimal", CredentialParams::minimal()),
    ]
}

fn bench_hash_password(c: &mut Criterion) {
    let mut group = c.benchmark_group("argon2id/hash_password");
    group.sample_size(10);

    for (name, params) in cost_profiles() {
        let store = CredentialStore::new(&params).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &store, |b, store| {
            b.iter(|| store.hash_password("correct horse battery staple").unwrap());
        });
    }

    group.finish();
}

fn bench_verify_password(c: &mut Criterion) {
    let mut group = c.benchmark_group("argon2id/verify_password");
    group.sample_size(10);

    for (name, params) in cost_profiles() {
        let store = CredentialStore::new(&params).unwrap();
        let hash = store.hash_password("correct horse battery staple").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &hash, |b, hash| {
            b.iter(|| store.verify_password(hash, "correct horse battery staple").unwrap());
        });
    }

    group.finish();
}

fn bench_issue_token(c: &mut Criterion) {
    let store = CredentialStore::new(&CredentialParams::minimal()).unwrap();

    c.bench_function("token/issue", |b| {
        b.iter(|| store.issue_token(Utc::now(), None, None).unwrap());
    });

    let (token, _) = store.issue_token(Utc::now(), None, None).unwrap();
    c.bench_function("token/fingerprint", |b| {
        b.iter(|| fingerprint(&token));
    });
}

fn bench_authenticate(c: &mut Criterion) {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let ledger = Arc::new(LocalLedger::from_db(&db, Telemetry::detached()).unwrap());
    let mut config = GatewayConfig::default();
    config.credentials = CredentialParams::minimal();
    let accounts = AccountStore::from_db(
        &db,
        ledger,
        &config,
        Arc::new(SystemClock),
        Telemetry::detached(),
    )
    .unwrap();
    accounts.create_account("alice", "pw1").unwrap();
    let token = accounts.issue_token("alice", "pw1").unwrap();

    c.bench_function("accounts/authenticate_password", |b| {
        b.iter(|| accounts.authenticate("alice", "pw1").unwrap());
    });
    c.bench_function("accounts/authenticate_token", |b| {
        b.iter(|| accounts.authenticate("alice", &token).unwrap());
    });
}

criterion_group!(
    benches,
    bench_hash_password,
    bench_verify_password,
    bench_issue_token,
    bench_authenticate,
);
criterion_main!(benches);
