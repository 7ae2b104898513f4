//! # Gateway Configuration & Constants
//!
//! Fixed protocol constants live at the top of this file. Everything an
//! operator can tune lives in [`GatewayConfig`], which is loaded from a TOML
//! file and falls back to the defaults below for any missing key.
//!
//! ```toml
//! [faucet]
//! max_claim_per_period = 1000
//! min_claim_per_period = 1
//! claim_period_secs = 21600
//! banned_addresses = []
//!
//! [credentials]
//! memory_kib = 19456
//! iterations = 2
//! parallelism = 1
//!
//! [tokens]
//! ttl_secs = 2592000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Address;

// ---------------------------------------------------------------------------
// Identity & Keys
// ---------------------------------------------------------------------------

/// Length of a ledger address in bytes (BLAKE3 digest of the public key).
pub const ADDRESS_LENGTH: usize = 32;

/// Prefix used when rendering an address as text.
pub const ADDRESS_PREFIX: &str = "0x";

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Random bytes drawn for each session token. Rendered as hex, so the
/// token string is twice this long.
pub const TOKEN_BYTES: usize = 32;

/// Random bytes drawn for generated passwords (the faucet's own account).
pub const GENERATED_PASSWORD_BYTES: usize = 24;

/// Usernames longer than this are rejected at creation.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Passwords shorter than this are rejected at creation and reset.
pub const MIN_PASSWORD_LENGTH: usize = 1;

/// Longest accepted `tokens.ttl_secs`: one hundred years.
pub const MAX_TOKEN_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Current transaction format version.
pub const TRANSACTION_VERSION: u16 = 1;

/// Transactions stamped further than this into the future are rejected.
pub const MAX_FUTURE_SKEW_MS: u64 = 5 * 60 * 1000;

/// Payload prefix of faucet transfers. The claim intent id follows it, so a
/// transfer can be matched back to the claim that caused it.
pub const FAUCET_CLAIM_PAYLOAD: &[u8] = b"faucet claim ";

// ---------------------------------------------------------------------------
// Faucet Defaults
// ---------------------------------------------------------------------------

/// Six hours between claims.
pub const DEFAULT_CLAIM_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// Longest accepted `faucet.claim_period_secs`: one hundred years. Keeps
/// `last_claim + period` well inside the range of a timestamp.
pub const MAX_CLAIM_PERIOD_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Default amount (smallest ledger unit) an account may claim per period.
pub const DEFAULT_MAX_CLAIM: u64 = 1_000;

/// Default minimum claim. A claim of zero is always rejected.
pub const DEFAULT_MIN_CLAIM: u64 = 1;

/// Username of the account the faucet pays out from.
pub const DEFAULT_FAUCET_USERNAME: &str = "faucet";

/// File (relative to the data directory) holding the faucet's credentials.
pub const DEFAULT_KEYSTORE_FILE: &str = "faucet_keystore.json";

/// Balance credited to the faucet address when the local ledger is first
/// initialized.
pub const DEFAULT_GENESIS_ALLOCATION: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Operator Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration. Every section is optional in the TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub faucet: FaucetConfig,
    pub credentials: CredentialParams,
    pub tokens: TokenPolicy,
}

/// Claim ruleset and faucet account settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    pub max_claim_per_period: u64,
    pub min_claim_per_period: u64,
    pub claim_period_secs: u64,
    /// Addresses rendered as `0x`-prefixed hex.
    pub banned_addresses: Vec<String>,
    pub faucet_username: String,
    pub keystore_file: String,
    pub genesis_allocation: u64,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            max_claim_per_period: DEFAULT_MAX_CLAIM,
            min_claim_per_period: DEFAULT_MIN_CLAIM,
            claim_period_secs: DEFAULT_CLAIM_PERIOD.as_secs(),
            banned_addresses: Vec::new(),
            faucet_username: DEFAULT_FAUCET_USERNAME.to_string(),
            keystore_file: DEFAULT_KEYSTORE_FILE.to_string(),
            genesis_allocation: DEFAULT_GENESIS_ALLOCATION,
        }
    }
}

impl FaucetConfig {
    pub fn claim_period(&self) -> Duration {
        Duration::from_secs(self.claim_period_secs)
    }

    /// Parses `banned_addresses`.
    pub fn banned(&self) -> Result<Vec<Address>, ConfigError> {
        self.banned_addresses
            .iter()
            .map(|raw| {
                raw.parse::<Address>().map_err(|e| ConfigError::Invalid {
                    field: "faucet.banned_addresses",
                    reason: format!("{raw}: {e}"),
                })
            })
            .collect()
    }
}

/// Argon2id cost parameters used for new password hashes. Existing hashes
/// keep verifying with whatever parameters they were created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for CredentialParams {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl CredentialParams {
    /// The cheapest parameters Argon2 accepts. For tests and throwaway
    /// development stores only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: argon2::Params::MIN_M_COST,
            iterations: argon2::Params::MIN_T_COST,
            parallelism: argon2::Params::MIN_P_COST,
        }
    }
}

/// Session token lifetime. `None` means tokens never expire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPolicy {
    pub ttl_secs: Option<u64>,
}

impl TokenPolicy {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_secs
            .filter(|secs| *secs <= MAX_TOKEN_TTL_SECS)
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}

impl GatewayConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let faucet = &self.faucet;
        if faucet.claim_period_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "faucet.claim_period_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if faucet.claim_period_secs > MAX_CLAIM_PERIOD_SECS {
            return Err(ConfigError::Invalid {
                field: "faucet.claim_period_secs",
                reason: format!("must be at most {MAX_CLAIM_PERIOD_SECS}"),
            });
        }
        if faucet.min_claim_per_period > faucet.max_claim_per_period {
            return Err(ConfigError::Invalid {
                field: "faucet.min_claim_per_period",
                reason: format!(
                    "{} exceeds max_claim_per_period {}",
                    faucet.min_claim_per_period, faucet.max_claim_per_period
                ),
            });
        }
        if faucet.faucet_username.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "faucet.faucet_username",
                reason: "must not be empty".into(),
            });
        }
        faucet.banned()?;
        if let Some(ttl) = self.tokens.ttl_secs {
            if ttl > MAX_TOKEN_TTL_SECS {
                return Err(ConfigError::Invalid {
                    field: "tokens.ttl_secs",
                    reason: format!("must be at most {MAX_TOKEN_TTL_SECS}"),
                });
            }
        }
        argon2::Params::new(
            self.credentials.memory_kib,
            self.credentials.iterations,
            self.credentials.parallelism,
            None,
        )
        .map_err(|e| ConfigError::Invalid {
            field: "credentials",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.faucet.claim_period(), DEFAULT_CLAIM_PERIOD);
        assert!(config.tokens.ttl().is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [faucet]
            max_claim_per_period = 10
            claim_period_secs = 60

            [tokens]
            ttl_secs = 3600
            "#,
        )
        .unwrap();
        assert_eq!(config.faucet.max_claim_per_period, 10);
        assert_eq!(config.faucet.min_claim_per_period, DEFAULT_MIN_CLAIM);
        assert_eq!(config.faucet.claim_period(), Duration::from_secs(60));
        assert_eq!(config.tokens.ttl(), Some(chrono::Duration::hours(1)));
    }

    #[test]
    fn min_above_max_is_rejected() {
        let err = GatewayConfig::from_toml_str(
            "[faucet]\nmax_claim_per_period = 5\nmin_claim_per_period = 6\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "faucet.min_claim_per_period"));
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(GatewayConfig::from_toml_str("[faucet]\nclaim_period_secs = 0\n").is_err());
    }

    #[test]
    fn claim_period_beyond_a_century_is_rejected() {
        let at_limit = format!("[faucet]\nclaim_period_secs = {MAX_CLAIM_PERIOD_SECS}\n");
        assert!(GatewayConfig::from_toml_str(&at_limit).is_ok());

        for secs in [MAX_CLAIM_PERIOD_SECS + 1, 9_300_000_000_000_000] {
            let raw = format!("[faucet]\nclaim_period_secs = {secs}\n");
            let err = GatewayConfig::from_toml_str(&raw).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "faucet.claim_period_secs"));
        }
    }

    #[test]
    fn token_ttl_beyond_a_century_is_rejected() {
        let at_limit = format!("[tokens]\nttl_secs = {MAX_TOKEN_TTL_SECS}\n");
        let config = GatewayConfig::from_toml_str(&at_limit).unwrap();
        assert!(config.tokens.ttl().is_some());

        let raw = format!("[tokens]\nttl_secs = {}\n", 9_300_000_000_000_000u64);
        let err = GatewayConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "tokens.ttl_secs"));

        let unchecked = TokenPolicy {
            ttl_secs: Some(u64::MAX),
        };
        assert!(unchecked.ttl().is_none());
    }

    #[test]
    fn malformed_banned_address_is_rejected() {
        let err =
            GatewayConfig::from_toml_str("[faucet]\nbanned_addresses = [\"0xzz\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_path_means_defaults() {
        let config = GatewayConfig::load_or_default(None).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert!(matches!(
            GatewayConfig::load_or_default(Some(Path::new("/nonexistent/gateway.toml"))),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[faucet]\nfaucet_username = \"tap\"\n").unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.faucet.faucet_username, "tap");
    }
}
