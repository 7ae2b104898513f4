//! # Gateway
//!
//! Wires the account store, local ledger, transfer orchestrator and faucet
//! onto one sled database. A data directory looks like:
//!
//! ```text
//! <data_dir>/
//!   db/                   sled database (accounts + ledger trees)
//!   faucet_keystore.json  faucet account credentials (0600)
//! ```
//!
//! On first start the faucet account is created and its credentials written
//! to the keystore. The configured genesis allocation is credited to the
//! faucet address on the first open that finds no genesis marker in the
//! ledger, so a start interrupted after the account was created still ends
//! up funded, and exactly once.

use std::path::Path;
use std::sync::Arc;

use sled::Db;

use crate::accounts::AccountStore;
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::faucet::{FaucetKeystore, StandardFaucet, StandardRuleset};
use crate::ledger::LocalLedger;
use crate::telemetry::{GatewayMetrics, Telemetry};
use crate::transfer::TransferOrchestrator;

/// Directory (under the data dir) holding the sled database.
const DB_DIR: &str = "db";

pub struct Gateway {
    db: Db,
    accounts: Arc<AccountStore>,
    ledger: Arc<LocalLedger>,
    orchestrator: Arc<TransferOrchestrator>,
    faucet: Arc<StandardFaucet>,
    telemetry: Telemetry,
}

impl Gateway {
    /// Opens (or initializes) a gateway rooted at `data_dir`.
    pub fn open(
        data_dir: &Path,
        config: &GatewayConfig,
        clock: Arc<dyn Clock>,
        telemetry: Telemetry,
    ) -> GatewayResult<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| GatewayError::storage("create data directory", e))?;
        let db = sled::open(data_dir.join(DB_DIR))
            .map_err(|e| GatewayError::storage("open database", e))?;
        let keystore_path = data_dir.join(&config.faucet.keystore_file);
        Self::from_db(db, config, &keystore_path, clock, telemetry)
    }

    /// Builds a gateway on an already opened database.
    pub fn from_db(
        db: Db,
        config: &GatewayConfig,
        keystore_path: &Path,
        clock: Arc<dyn Clock>,
        telemetry: Telemetry,
    ) -> GatewayResult<Self> {
        config.validate()?;

        let ledger = Arc::new(
            LocalLedger::from_db(&db, telemetry.component("ledger"))?.with_clock(clock.clone()),
        );
        let accounts = Arc::new(AccountStore::from_db(
            &db,
            ledger.clone(),
            config,
            clock.clone(),
            telemetry.component("accounts"),
        )?);
        let orchestrator = Arc::new(TransferOrchestrator::new(
            accounts.clone(),
            ledger.clone(),
            telemetry.component("transfer"),
        ));
        let ruleset = Arc::new(StandardRuleset::open(&db, &config.faucet)?);

        let loaded =
            FaucetKeystore::load_or_init(keystore_path, &accounts, &config.faucet.faucet_username)?;
        let faucet_account = accounts.query_by_username(loaded.keystore.username())?;
        if loaded.account_created {
            tracing::info!(
                parent: telemetry.span(),
                username = faucet_account.username(),
                address = %faucet_account.address(),
                "faucet account initialized"
            );
        }
        if config.faucet.genesis_allocation > 0 {
            ledger.apply_genesis(&faucet_account.address(), config.faucet.genesis_allocation)?;
        }

        let faucet = Arc::new(StandardFaucet::new(
            accounts.clone(),
            orchestrator.clone(),
            ruleset,
            loaded.keystore,
            clock,
            telemetry.component("faucet"),
        ));

        Ok(Self {
            db,
            accounts,
            ledger,
            orchestrator,
            faucet,
            telemetry,
        })
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn ledger(&self) -> &Arc<LocalLedger> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn faucet(&self) -> &Arc<StandardFaucet> {
        &self.faucet
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        self.telemetry.metrics()
    }

    /// Flushes all dirty sled pages to disk.
    pub fn flush(&self) -> GatewayResult<usize> {
        self.db
            .flush()
            .map_err(|e| GatewayError::storage("flush database", e))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("faucet", &self.faucet)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
