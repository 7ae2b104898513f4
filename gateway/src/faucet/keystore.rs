//! The faucet's own credentials.
//!
//! The faucet pays out of an ordinary account. Its username and password
//! live in a small JSON file next to the database, written once on first
//! start and read-only after that:
//!
//! ```json
//! { "username": "faucet", "password": "<random hex>" }
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::AccountStore;
use crate::config::GENERATED_PASSWORD_BYTES;
use crate::credentials::random_hex;
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keystore I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<KeystoreError> for GatewayError {
    fn from(err: KeystoreError) -> Self {
        GatewayError::storage("faucet keystore", err)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetKeystore {
    username: String,
    password: String,
}

/// Outcome of [`FaucetKeystore::load_or_init`].
#[derive(Debug)]
pub struct LoadedKeystore {
    pub keystore: FaucetKeystore,
    /// The faucet account was created during this call.
    pub account_created: bool,
}

impl FaucetKeystore {
    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads the keystore at `path`, making sure the faucet account exists.
    ///
    /// With no file present, generates a password, writes the file (0600 on
    /// Unix) and creates the account. A file whose account has disappeared
    /// (fresh database, old keystore) gets its account recreated with the
    /// stored credentials.
    pub fn load_or_init(
        path: &Path,
        accounts: &AccountStore,
        username: &str,
    ) -> GatewayResult<LoadedKeystore> {
        if path.exists() {
            let keystore = Self::load(path)?;
            let account_created = match accounts.query_by_username(&keystore.username) {
                Ok(_) => false,
                Err(GatewayError::NotFound { .. }) => {
                    accounts.create_account(&keystore.username, &keystore.password)?;
                    true
                }
                Err(e) => return Err(e),
            };
            return Ok(LoadedKeystore {
                keystore,
                account_created,
            });
        }

        let keystore = Self {
            username: username.to_string(),
            password: random_hex::<GENERATED_PASSWORD_BYTES>()?,
        };
        keystore.write_new(path)?;

        if let Err(e) = accounts.create_account(&keystore.username, &keystore.password) {
            // An account we hold no password for is useless; drop the file so
            // the next start does not pretend otherwise.
            let _ = std::fs::remove_file(path);
            return Err(e);
        }

        Ok(LoadedKeystore {
            keystore,
            account_created: true,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    fn write_new(&self, path: &Path) -> Result<(), KeystoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FaucetKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaucetKeystore")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
