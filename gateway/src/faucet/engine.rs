//! The standard claim engine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::keystore::FaucetKeystore;
use super::ruleset::Ruleset;
use super::{ClaimReceipt, ClaimState, Faucet, ReconcileReport};
use crate::accounts::{Account, AccountStore, ClaimRecord};
use crate::clock::Clock;
use crate::config::FAUCET_CLAIM_PAYLOAD;
use crate::error::{GatewayError, GatewayResult};
use crate::telemetry::Telemetry;
use crate::transfer::TransferOrchestrator;

pub struct StandardFaucet {
    accounts: Arc<AccountStore>,
    orchestrator: Arc<TransferOrchestrator>,
    ruleset: Arc<dyn Ruleset>,
    keystore: FaucetKeystore,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl StandardFaucet {
    pub fn new(
        accounts: Arc<AccountStore>,
        orchestrator: Arc<TransferOrchestrator>,
        ruleset: Arc<dyn Ruleset>,
        keystore: FaucetKeystore,
        clock: Arc<dyn Clock>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            accounts,
            orchestrator,
            ruleset,
            keystore,
            clock,
            telemetry,
        }
    }

    /// Username of the account claims are paid from.
    pub fn faucet_username(&self) -> &str {
        self.keystore.username()
    }

    fn state_at(&self, account: &Account, now: DateTime<Utc>) -> ClaimState {
        if self.ruleset.is_banned(&account.address()) {
            return ClaimState::Banned;
        }
        match account.last_claim() {
            Some(last) => {
                let until = next_after(last.time, self.ruleset.claim_period());
                if now >= until {
                    ClaimState::Eligible
                } else {
                    ClaimState::Cooling { until }
                }
            }
            None => ClaimState::Eligible,
        }
    }

    fn allowance_at(&self, account: &Account, now: DateTime<Utc>) -> u64 {
        match self.state_at(account, now) {
            ClaimState::Eligible => self.ruleset.max_claim_per_period(),
            ClaimState::Cooling { .. } | ClaimState::Banned => 0,
        }
    }

    fn reject(&self, err: GatewayError) -> GatewayError {
        self.telemetry.metrics().claims_rejected_total.inc();
        tracing::info!(parent: self.telemetry.span(), error = %err, "claim rejected");
        err
    }

    /// Rolls a reserved claim back. A failure here is logged; the caller
    /// still reports the error that caused the rollback.
    fn revert(&self, username: &str, intent_id: Uuid) {
        match self.accounts.revert_faucet_claim(username, intent_id) {
            Ok(true) => {
                self.telemetry.metrics().claims_reverted_total.inc();
                tracing::info!(parent: self.telemetry.span(), username, %intent_id, "claim reverted");
            }
            Ok(false) => {}
            Err(e) => tracing::error!(
                parent: self.telemetry.span(),
                username,
                %intent_id,
                error = %e,
                "failed to revert claim; left for reconciliation"
            ),
        }
    }

    /// The persisted faucet transfer carrying `intent_id`, if any.
    fn find_claim_transfer(
        &self,
        username: &str,
        intent_id: Uuid,
    ) -> GatewayResult<Option<String>> {
        let payload = claim_payload(intent_id);
        Ok(self
            .orchestrator
            .history(username)?
            .into_iter()
            .find(|tx| tx.payload.as_deref() == Some(payload.as_slice()))
            .map(|tx| tx.hash))
    }
}

impl Faucet for StandardFaucet {
    fn ruleset(&self) -> &dyn Ruleset {
        self.ruleset.as_ref()
    }

    fn claim_state(&self, account: &Account) -> ClaimState {
        self.state_at(account, self.clock.now())
    }

    fn account_can_claim(&self, username: &str) -> GatewayResult<bool> {
        let account = self.accounts.query_by_username(username)?;
        Ok(self.claim_state(&account).can_claim())
    }

    fn account_last_claim(&self, username: &str) -> GatewayResult<Option<ClaimRecord>> {
        let account = self.accounts.query_by_username(username)?;
        Ok(account.last_claim().cloned())
    }

    fn amount_can_claim(&self, username: &str) -> GatewayResult<u64> {
        let account = self.accounts.query_by_username(username)?;
        Ok(self.allowance_at(&account, self.clock.now()))
    }

    fn next_claim_at(&self, username: &str) -> GatewayResult<Option<DateTime<Utc>>> {
        let account = self.accounts.query_by_username(username)?;
        Ok(account
            .last_claim()
            .map(|last| next_after(last.time, self.ruleset.claim_period())))
    }

    fn time_until_next_claim(&self, username: &str) -> GatewayResult<Duration> {
        let now = self.clock.now();
        Ok(match self.next_claim_at(username)? {
            Some(at) if at > now => at - now,
            _ => Duration::zero(),
        })
    }

    fn claim(&self, username: &str, requested: u64) -> GatewayResult<ClaimReceipt> {
        let minimum = self.ruleset.min_claim_per_period().max(1);
        if requested < minimum {
            return Err(self.reject(GatewayError::ClaimTooSmall {
                username: username.to_string(),
                requested,
                minimum,
            }));
        }

        let now = self.clock.now();
        let next_claim_at = now
            .checked_add_signed(self.ruleset.claim_period())
            .ok_or_else(|| GatewayError::invalid_input("claim period", "next claim time out of range"))?;
        let intent_id = Uuid::new_v4();
        let reserved = self
            .accounts
            .record_faucet_claim(username, requested, now, intent_id, |account| {
                let allowed = self.allowance_at(account, now);
                if requested > allowed {
                    return Err(GatewayError::ClaimTooLarge {
                        username: username.to_string(),
                        requested,
                        allowed,
                    });
                }
                Ok(())
            });
        let account = match reserved {
            Ok(account) => account,
            Err(e @ GatewayError::ClaimTooLarge { .. }) => return Err(self.reject(e)),
            Err(e) => return Err(e),
        };

        let transfer = self.orchestrator.submit_transfer(
            self.keystore.username(),
            self.keystore.password(),
            account.address(),
            requested,
            Some(claim_payload(intent_id)),
        );

        match transfer {
            Ok(transaction) => {
                self.accounts.settle_faucet_claim(username, intent_id)?;
                self.telemetry.metrics().claims_succeeded_total.inc();
                tracing::info!(
                    parent: self.telemetry.span(),
                    username,
                    amount = requested,
                    hash = %transaction.hash,
                    "faucet claim paid"
                );
                Ok(ClaimReceipt {
                    username: username.to_string(),
                    amount: requested,
                    claimed_at: now,
                    next_claim_at,
                    transaction,
                })
            }
            Err(GatewayError::PublishFailure {
                transaction,
                source,
            }) => {
                if let Err(e) =
                    self.accounts
                        .mark_claim_unpublished(username, intent_id, &transaction.hash)
                {
                    tracing::error!(
                        parent: self.telemetry.span(),
                        username,
                        %intent_id,
                        error = %e,
                        "failed to record unpublished claim transfer"
                    );
                }
                tracing::warn!(
                    parent: self.telemetry.span(),
                    username,
                    hash = %transaction.hash,
                    "claim transfer awaiting publication"
                );
                Err(GatewayError::PublishFailure {
                    transaction,
                    source,
                })
            }
            Err(e) => {
                self.revert(username, intent_id);
                Err(e)
            }
        }
    }

    fn ban_user(&self, username: &str) -> GatewayResult<bool> {
        let account = self.accounts.query_by_username(username)?;
        let added = self.ruleset.ban_address(account.address())?;
        if added {
            tracing::info!(
                parent: self.telemetry.span(),
                username,
                address = %account.address(),
                "account banned from faucet"
            );
        }
        Ok(added)
    }

    fn reconcile(&self) -> GatewayResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for account in self.accounts.pending_claims()? {
            let Some(intent) = account.pending_claim().cloned() else {
                continue;
            };
            let username = account.username().to_string();

            // A crash between persisting and recording the hash leaves no hash
            // on the intent, but the transfer is still findable by payload.
            let hash = match intent.transaction_hash.clone() {
                Some(hash) => Some(hash),
                None => self.find_claim_transfer(&username, intent.id)?,
            };

            let Some(hash) = hash else {
                self.revert(&username, intent.id);
                report.reverted.push(username);
                continue;
            };

            match self.orchestrator.republish(&hash) {
                Ok(_) => {
                    self.accounts.settle_faucet_claim(&username, intent.id)?;
                    self.telemetry.metrics().claims_succeeded_total.inc();
                    report.republished.push(username);
                }
                Err(GatewayError::NotFound { .. }) => {
                    self.revert(&username, intent.id);
                    report.reverted.push(username);
                }
                Err(e) => {
                    tracing::warn!(
                        parent: self.telemetry.span(),
                        username = %username,
                        %hash,
                        error = %e,
                        "claim transfer still unpublished"
                    );
                    report.still_pending.push(username);
                }
            }
        }

        tracing::info!(
            parent: self.telemetry.span(),
            republished = report.republished.len(),
            reverted = report.reverted.len(),
            still_pending = report.still_pending.len(),
            "claim reconciliation finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for StandardFaucet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardFaucet")
            .field("faucet_username", &self.keystore.username())
            .field("max_claim", &self.ruleset.max_claim_per_period())
            .field("claim_period", &self.ruleset.claim_period())
            .finish_non_exhaustive()
    }
}

/// End of the cooling period that started at `from`. Saturates at the
/// largest representable time.
fn next_after(from: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    from.checked_add_signed(period)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn claim_payload(intent_id: Uuid) -> Vec<u8> {
    let mut payload = FAUCET_CLAIM_PAYLOAD.to_vec();
    payload.extend_from_slice(intent_id.to_string().as_bytes());
    payload
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
