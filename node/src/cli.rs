//! # CLI Interface
//!
//! Defines the command-line argument structure for `wallet-gateway` using
//! `clap` derive. Every subcommand opens the gateway at `--data-dir`, runs
//! one operation and prints the result to stdout.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Custodial wallet gateway operator tool.
///
/// Manages accounts, faucet claims and transfers against a local gateway
/// data directory.
#[derive(Parser, Debug)]
#[command(
    name = "wallet-gateway",
    about = "Custodial wallet gateway operator tool",
    version,
    propagate_version = true
)]
pub struct GatewayCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Gateway data directory (database and faucet keystore).
    #[arg(
        long,
        short = 'd',
        global = true,
        env = "WALLET_GATEWAY_DATA_DIR",
        default_value = "./gateway-data"
    )]
    pub data_dir: PathBuf,

    /// Path to the gateway configuration file (TOML).
    ///
    /// When omitted, `gateway.toml` in the data directory is used if present,
    /// otherwise built-in defaults.
    #[arg(long, short = 'c', global = true, env = "WALLET_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(
        long,
        global = true,
        env = "WALLET_GATEWAY_LOG",
        default_value = "wallet_gateway=info,wallet_gateway_node=info"
    )]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Print the Prometheus counters after the command finishes.
    #[arg(long, global = true)]
    pub print_metrics: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a data directory: database, faucet account and keystore.
    Init,
    /// Account management.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Faucet claims and bans.
    #[command(subcommand)]
    Faucet(FaucetCommand),
    /// Send funds from an account to an address.
    Transfer(TransferArgs),
    /// Publish an already persisted transaction again.
    Republish {
        /// Transaction hash.
        hash: String,
    },
    /// Print version information and exit.
    Version,
}

/// Username plus a password or session token.
#[derive(Args, Debug)]
pub struct Credentials {
    pub username: String,

    /// Password or session token.
    #[arg(long, env = "WALLET_GATEWAY_SECRET", hide_env_values = true)]
    pub secret: String,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Create an account with a freshly derived address.
    Create {
        username: String,
        #[arg(long, env = "WALLET_GATEWAY_SECRET", hide_env_values = true)]
        password: String,
    },
    /// Create an account bound to an existing address.
    Import {
        username: String,
        /// `0x`-prefixed hex address.
        address: String,
        #[arg(long, env = "WALLET_GATEWAY_SECRET", hide_env_values = true)]
        password: String,
    },
    /// Check a password or token.
    Auth(Credentials),
    /// Issue a session token.
    Token {
        #[command(flatten)]
        credentials: Credentials,
        /// Restrict the token to a named scope.
        #[arg(long)]
        scope: Option<String>,
    },
    /// Check a session token and print the bound address.
    ValidateToken {
        username: String,
        #[arg(long, env = "WALLET_GATEWAY_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Replace the password.
    ResetPassword {
        username: String,
        #[arg(long)]
        old_password: String,
        #[arg(long)]
        new_password: String,
    },
    /// Delete an account.
    Delete(Credentials),
    /// Show an account summary.
    Show { username: String },
    /// Find the account bound to an address.
    Resolve { address: String },
    /// List all usernames.
    List,
    /// Print the account's ledger balance.
    Balance { username: String },
    /// Print the account's transaction history as JSON lines.
    History { username: String },
    /// Print the hash of the account's latest outgoing transaction.
    LastTx { username: String },
    /// Register a push-delivery token.
    PushToken {
        #[command(flatten)]
        credentials: Credentials,
        push_token: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum FaucetCommand {
    /// Claim from the faucet.
    Claim { username: String, amount: u64 },
    /// Show whether and how much an account can claim.
    Status { username: String },
    /// Show when the account may claim next.
    NextClaim { username: String },
    /// Ban an account's address from the faucet.
    Ban { username: String },
    /// Resolve claims left pending by failed or interrupted transfers.
    Reconcile,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    /// Recipient address.
    #[arg(long)]
    pub to: String,

    /// Amount in the ledger's smallest unit.
    #[arg(long)]
    pub amount: u64,

    /// Optional UTF-8 payload attached to the transaction.
    #[arg(long)]
    pub memo: Option<String>,
}
