// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Wallet Gateway Operator Tool
//!
//! Entry point for the `wallet-gateway` binary. Parses CLI arguments,
//! initializes logging, loads the gateway configuration, opens the gateway
//! data directory and runs a single operation against it.
//!
//! - `init`     — create the data directory, faucet account and keystore
//! - `account`  — create, authenticate, inspect and delete accounts
//! - `faucet`   — claim, inspect eligibility, ban, reconcile
//! - `transfer` — send funds between accounts
//! - `version`  — print build version information

mod cli;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use wallet_gateway::clock::SystemClock;
use wallet_gateway::config::{GatewayConfig, TRANSACTION_VERSION};
use wallet_gateway::faucet::Faucet;
use wallet_gateway::ledger::{Address, Ledger};
use wallet_gateway::telemetry::{GatewayMetrics, Telemetry};
use wallet_gateway::Gateway;

use cli::{AccountCommand, Commands, FaucetCommand, GatewayCli, GlobalArgs, TransferArgs};
use logging::LogFormat;

/// Config file picked up from the data directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

fn main() -> Result<()> {
    let cli = GatewayCli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    logging::init_logging(&cli.global.log_level, LogFormat::from(cli.global.log_format));

    let metrics = Arc::new(GatewayMetrics::new());
    let gateway = open_gateway(&cli.global, Arc::clone(&metrics))?;

    let outcome = match cli.command {
        Commands::Init => init(&gateway, &cli.global),
        Commands::Account(cmd) => account(&gateway, cmd),
        Commands::Faucet(cmd) => faucet(&gateway, cmd),
        Commands::Transfer(args) => transfer(&gateway, args),
        Commands::Republish { hash } => {
            let tx = gateway
                .orchestrator()
                .republish(&hash)
                .with_context(|| format!("failed to republish {hash}"))?;
            println!("{}", tx.hash);
            Ok(())
        }
        Commands::Version => Ok(()),
    };

    gateway.flush().context("failed to flush gateway database")?;

    if cli.global.print_metrics {
        print!("{}", metrics.encode());
    }

    outcome
}

/// Loads configuration and opens the gateway data directory.
fn open_gateway(global: &GlobalArgs, metrics: Arc<GatewayMetrics>) -> Result<Gateway> {
    let config_path = resolve_config_path(global.config.as_deref(), &global.data_dir);
    let config = GatewayConfig::load_or_default(config_path.as_deref()).with_context(|| {
        match &config_path {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "invalid default configuration".to_string(),
        }
    })?;

    let span = tracing::info_span!("gateway", data_dir = %global.data_dir.display());
    let telemetry = Telemetry::new(span, metrics);

    tracing::debug!(
        data_dir = %global.data_dir.display(),
        config = ?config_path,
        "opening gateway"
    );

    Gateway::open(&global.data_dir, &config, Arc::new(SystemClock), telemetry).with_context(|| {
        format!(
            "failed to open gateway data directory {}",
            global.data_dir.display()
        )
    })
}

/// An explicit `--config` always wins; otherwise `gateway.toml` in the data
/// directory if it exists.
fn resolve_config_path(explicit: Option<&Path>, data_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let candidate = data_dir.join(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse::<Address>()
        .with_context(|| format!("invalid address: {raw}"))
}

fn init(gateway: &Gateway, global: &GlobalArgs) -> Result<()> {
    let faucet_username = gateway.faucet().faucet_username().to_string();
    let faucet_account = gateway
        .accounts()
        .query_by_username(&faucet_username)
        .context("faucet account missing after initialization")?;
    let balance = gateway
        .ledger()
        .balance(&faucet_account.address())
        .context("failed to read faucet balance")?;
    let report = gateway
        .faucet()
        .reconcile()
        .context("failed to reconcile pending claims")?;

    tracing::info!(
        username = %faucet_username,
        address = %faucet_account.address(),
        balance,
        "gateway initialized"
    );

    println!("Gateway initialized successfully.");
    println!("  Data directory : {}", global.data_dir.display());
    println!("  Faucet account : {faucet_username}");
    println!("  Faucet address : {}", faucet_account.address());
    println!("  Faucet balance : {balance}");
    if !report.is_clean() {
        println!("  Pending claims : {}", report.still_pending.len());
    }
    Ok(())
}

fn account(gateway: &Gateway, cmd: AccountCommand) -> Result<()> {
    let accounts = gateway.accounts();
    let orchestrator = gateway.orchestrator();

    match cmd {
        AccountCommand::Create { username, password } => {
            let account = accounts
                .create_account(&username, &password)
                .with_context(|| format!("failed to create account {username}"))?;
            println!("{}", account.address());
        }
        AccountCommand::Import {
            username,
            address,
            password,
        } => {
            let address = parse_address(&address)?;
            let account = accounts
                .import_account(&username, &password, address)
                .with_context(|| format!("failed to import account {username}"))?;
            println!("{}", account.address());
        }
        AccountCommand::Auth(creds) => {
            let ok = accounts
                .authenticate(&creds.username, &creds.secret)
                .with_context(|| format!("failed to authenticate {}", creds.username))?;
            println!("{ok}");
        }
        AccountCommand::Token { credentials, scope } => {
            let token = accounts
                .issue_scoped_token(&credentials.username, &credentials.secret, scope)
                .with_context(|| format!("failed to issue token for {}", credentials.username))?;
            println!("{token}");
        }
        AccountCommand::ValidateToken { username, token } => {
            let address = accounts
                .validate_token(&username, &token)
                .with_context(|| format!("token rejected for {username}"))?;
            println!("{address}");
        }
        AccountCommand::ResetPassword {
            username,
            old_password,
            new_password,
        } => {
            accounts
                .reset_password(&username, &old_password, &new_password)
                .with_context(|| format!("failed to reset password for {username}"))?;
            println!("password updated");
        }
        AccountCommand::Delete(creds) => {
            accounts
                .delete_account(&creds.username, &creds.secret)
                .with_context(|| format!("failed to delete {}", creds.username))?;
            println!("deleted {}", creds.username);
        }
        AccountCommand::Show { username } => {
            let summary = accounts.account_summary(&username)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        AccountCommand::Resolve { address } => {
            let address = parse_address(&address)?;
            let account = accounts.query_by_address(&address)?;
            println!("{}", account.username());
        }
        AccountCommand::List => {
            for username in accounts.usernames()? {
                println!("{username}");
            }
        }
        AccountCommand::Balance { username } => {
            println!("{}", orchestrator.balance(&username)?);
        }
        AccountCommand::History { username } => {
            for tx in orchestrator.history(&username)? {
                println!("{}", serde_json::to_string(&tx)?);
            }
        }
        AccountCommand::LastTx { username } => match orchestrator.last_transaction_hash(&username)? {
            Some(hash) => println!("{hash}"),
            None => println!("none"),
        },
        AccountCommand::PushToken {
            credentials,
            push_token,
        } => {
            accounts
                .add_push_token(&credentials.username, &credentials.secret, &push_token)
                .with_context(|| format!("failed to register push token for {}", credentials.username))?;
            println!("push token registered");
        }
    }
    Ok(())
}

fn faucet(gateway: &Gateway, cmd: FaucetCommand) -> Result<()> {
    let faucet = gateway.faucet();

    match cmd {
        FaucetCommand::Claim { username, amount } => {
            let receipt = faucet
                .claim(&username, amount)
                .with_context(|| format!("claim of {amount} for {username} failed"))?;
            println!("claimed {} (tx {})", receipt.amount, receipt.transaction.hash);
            println!("next claim at {}", receipt.next_claim_at.to_rfc3339());
        }
        FaucetCommand::Status { username } => {
            let account = gateway.accounts().query_by_username(&username)?;
            let state = faucet.claim_state(&account);
            let allowed = faucet.amount_can_claim(&username)?;
            println!("state   : {state:?}");
            println!("claimable: {allowed}");
        }
        FaucetCommand::NextClaim { username } => match faucet.next_claim_at(&username)? {
            Some(at) => {
                let wait = faucet.time_until_next_claim(&username)?;
                println!("{} (in {}s)", at.to_rfc3339(), wait.num_seconds());
            }
            None => println!("now"),
        },
        FaucetCommand::Ban { username } => {
            if faucet.ban_user(&username)? {
                println!("banned {username}");
            } else {
                println!("{username} was already banned");
            }
        }
        FaucetCommand::Reconcile => {
            let report = faucet.reconcile()?;
            println!("republished   : {}", report.republished.join(", "));
            println!("reverted      : {}", report.reverted.join(", "));
            println!("still pending : {}", report.still_pending.join(", "));
        }
    }
    Ok(())
}

fn transfer(gateway: &Gateway, args: TransferArgs) -> Result<()> {
    let recipient = parse_address(&args.to)?;
    let payload = args.memo.map(String::into_bytes);
    let tx = gateway
        .orchestrator()
        .submit_transfer(
            &args.credentials.username,
            &args.credentials.secret,
            recipient,
            args.amount,
            payload,
        )
        .with_context(|| {
            format!(
                "transfer of {} from {} failed",
                args.amount, args.credentials.username
            )
        })?;
    println!("{}", tx.hash);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("wallet-gateway {}", env!("CARGO_PKG_VERSION"));
    println!("tx format      v{TRANSACTION_VERSION}");
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        let explicit = PathBuf::from("/etc/gateway.toml");
        assert_eq!(
            resolve_config_path(Some(&explicit), dir.path()),
            Some(explicit)
        );
    }

    #[test]
    fn data_dir_config_is_picked_up_when_present() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_config_path(None, dir.path()), None);
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        assert_eq!(
            resolve_config_path(None, dir.path()),
            Some(dir.path().join(DEFAULT_CONFIG_FILE))
        );
    }
}
