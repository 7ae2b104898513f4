//! Claim ruleset: how much, how often, and who may not.

use std::collections::BTreeSet;

use chrono::Duration;
use parking_lot::RwLock;
use sled::{Db, Tree};

use crate::config::{FaucetConfig, MAX_CLAIM_PERIOD_SECS};
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::Address;

/// Policy the faucet engine consults on every eligibility check.
pub trait Ruleset: Send + Sync {
    fn max_claim_per_period(&self) -> u64;

    fn min_claim_per_period(&self) -> u64;

    fn claim_period(&self) -> Duration;

    fn is_banned(&self, address: &Address) -> bool;

    fn banned_addresses(&self) -> Vec<Address>;

    /// Returns `true` if the address was not already banned. Banning twice
    /// is not an error.
    fn ban_address(&self, address: Address) -> GatewayResult<bool>;
}

/// Fixed amounts and period, with a mutable ban list.
///
/// A ruleset opened against a database keeps its bans in the `faucet_bans`
/// tree, so they survive restarts. One built with [`StandardRuleset::new`]
/// holds them in memory only.
#[derive(Debug)]
pub struct StandardRuleset {
    max_claim: u64,
    min_claim: u64,
    period: Duration,
    banned: RwLock<BTreeSet<Address>>,
    store: Option<Tree>,
}

impl StandardRuleset {
    pub fn new(
        max_claim: u64,
        min_claim: u64,
        period: Duration,
        banned: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            max_claim,
            min_claim,
            period,
            banned: RwLock::new(banned.into_iter().collect()),
            store: None,
        }
    }

    /// In-memory ruleset built from configuration.
    pub fn from_config(config: &FaucetConfig) -> GatewayResult<Self> {
        let banned = config
            .banned()
            .map_err(|e| GatewayError::invalid_input("faucet.banned_addresses", e.to_string()))?;
        Ok(Self::new(
            config.max_claim_per_period,
            config.min_claim_per_period,
            period_from_secs(config.claim_period_secs)?,
            banned,
        ))
    }

    /// Ruleset whose bans live in `db`. Addresses banned in configuration are
    /// written to the tree on every open; bans added at runtime are loaded
    /// back alongside them.
    pub fn open(db: &Db, config: &FaucetConfig) -> GatewayResult<Self> {
        let mut rules = Self::from_config(config)?;
        let tree = db.open_tree("faucet_bans")?;

        for address in rules.banned.get_mut().iter() {
            tree.insert(address.as_bytes(), Vec::<u8>::new())?;
        }
        for entry in tree.iter() {
            let (key, _) = entry?;
            let address = Address::try_from_slice(&key)
                .map_err(|e| GatewayError::storage("decode banned address", e))?;
            rules.banned.get_mut().insert(address);
        }

        rules.store = Some(tree);
        Ok(rules)
    }
}

fn period_from_secs(secs: u64) -> GatewayResult<Duration> {
    if secs > MAX_CLAIM_PERIOD_SECS {
        return Err(GatewayError::invalid_input(
            "faucet.claim_period_secs",
            format!("must be at most {MAX_CLAIM_PERIOD_SECS}"),
        ));
    }
    let secs = i64::try_from(secs)
        .map_err(|_| GatewayError::invalid_input("faucet.claim_period_secs", "out of range"))?;
    Ok(Duration::seconds(secs))
}

impl Ruleset for StandardRuleset {
    fn max_claim_per_period(&self) -> u64 {
        self.max_claim
    }

    fn min_claim_per_period(&self) -> u64 {
        self.min_claim
    }

    fn claim_period(&self) -> Duration {
        self.period
    }

    fn is_banned(&self, address: &Address) -> bool {
        self.banned.read().contains(address)
    }

    fn banned_addresses(&self) -> Vec<Address> {
        self.banned.read().iter().copied().collect()
    }

    fn ban_address(&self, address: Address) -> GatewayResult<bool> {
        let mut banned = self.banned.write();
        if banned.contains(&address) {
            return Ok(false);
        }
        if let Some(tree) = &self.store {
            tree.insert(address.as_bytes(), Vec::<u8>::new())?;
            tree.flush()?;
        }
        Ok(banned.insert(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_is_idempotent() {
        let rules = StandardRuleset::new(10, 1, Duration::hours(6), []);
        let addr = Address::from_bytes([1; 32]);
        assert!(!rules.is_banned(&addr));
        assert!(rules.ban_address(addr).unwrap());
        assert!(!rules.ban_address(addr).unwrap());
        assert!(rules.is_banned(&addr));
        assert_eq!(rules.banned_addresses(), vec![addr]);
    }

    #[test]
    fn from_config_uses_configured_values() {
        let banned = Address::from_bytes([3; 32]);
        let config = FaucetConfig {
            max_claim_per_period: 10,
            min_claim_per_period: 2,
            claim_period_secs: 3600,
            banned_addresses: vec![banned.to_string()],
            ..FaucetConfig::default()
        };
        let rules = StandardRuleset::from_config(&config).unwrap();
        assert_eq!(rules.max_claim_per_period(), 10);
        assert_eq!(rules.min_claim_per_period(), 2);
        assert_eq!(rules.claim_period(), Duration::hours(1));
        assert!(rules.is_banned(&banned));
    }

    #[test]
    fn oversized_period_is_rejected() {
        let config = FaucetConfig {
            claim_period_secs: MAX_CLAIM_PERIOD_SECS + 1,
            ..FaucetConfig::default()
        };
        assert!(StandardRuleset::from_config(&config).is_err());
    }

    #[test]
    fn bans_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let configured = Address::from_bytes([3; 32]);
        let runtime = Address::from_bytes([4; 32]);
        let config = FaucetConfig {
            banned_addresses: vec![configured.to_string()],
            ..FaucetConfig::default()
        };

        {
            let db = sled::open(dir.path()).unwrap();
            let rules = StandardRuleset::open(&db, &config).unwrap();
            assert!(rules.ban_address(runtime).unwrap());
            db.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let rules = StandardRuleset::open(&db, &FaucetConfig::default()).unwrap();
        assert!(rules.is_banned(&runtime));
        assert!(rules.is_banned(&configured));
        assert!(!rules.ban_address(runtime).unwrap());
        assert_eq!(rules.banned_addresses(), vec![configured, runtime]);
    }
}
