use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::crypto::{
    decrypt_secret, derive_vault_key, encrypt_secret, hash_nullifier, verify_round_trip,
};
use crate::config::{MiniPayConfig, StorageMode};
use crate::error::{CryptoKind, MiniPayError, MiniPayResult, ValidationKind};
use crate::handles::validate_handle;
use crate::keys::{shorten_address, validate_address};
use crate::storage::{durable_store_for, DurableStore, KeyValueStore, Table};
use crate::utils::{decode_record, now_unix};

/// Vault record as persisted in the `encrypted_vaults` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVault {
    /// `hex(SHA-256(nullifier))`, the record key.
    pub nullifier_hash: String,
    /// `base64(nonce).base64(ciphertext)`.
    pub ciphertext: String,
    /// Address the encrypted secret belongs to.
    pub wallet_address: String,
    /// Handle of the wallet, if any.
    #[serde(default)]
    pub handle: Option<String>,
    /// Unix seconds of the last write.
    #[serde(default)]
    pub updated_at: u64,
}

/// A decrypted and verified vault.
#[derive(Debug)]
pub struct RecoveredVault {
    /// The `S...` secret seed.
    pub secret: SecretString,
    /// Address the secret was verified against.
    pub wallet_address: String,
    /// Handle stored alongside the vault.
    pub handle: Option<String>,
}

/// What can be learnt about a vault without decrypting it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct VaultSummary {
    /// Address the vault belongs to.
    pub wallet_address: String,
    /// Handle stored alongside the vault.
    pub handle: Option<String>,
}

/// Uploads and downloads encrypted vaults.
///
/// Remote and local-only modes share this code path; only the injected
/// [`DurableStore`] differs.
pub struct VaultService {
    store: Arc<dyn DurableStore>,
    mode: StorageMode,
}

impl VaultService {
    /// Creates a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, mode: StorageMode) -> Self {
        Self { store, mode }
    }

    /// Creates a service with the durable store selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote store cannot be constructed.
    pub fn from_config(
        config: &MiniPayConfig,
        cache: Arc<dyn KeyValueStore>,
    ) -> MiniPayResult<Self> {
        Ok(Self::new(
            durable_store_for(config, cache)?,
            config.storage_mode(),
        ))
    }

    /// Storage mode this service was built for.
    #[must_use]
    pub const fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Encrypts `secret` under the nullifier's key and upserts the vault.
    ///
    /// Re-uploading for the same nullifier replaces the previous vault. Returns
    /// only once the durable write is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed address or handle, a crypto
    /// error if encryption fails, and a backend error if the write fails.
    pub async fn upload(
        &self,
        nullifier: &str,
        secret: &SecretString,
        wallet_address: &str,
        handle: Option<&str>,
    ) -> MiniPayResult<()> {
        validate_address(wallet_address)?;
        let handle = handle.map(validate_handle).transpose()?;

        let key = derive_vault_key(nullifier)?;
        let vault = EncryptedVault {
            nullifier_hash: hash_nullifier(nullifier),
            ciphertext: encrypt_secret(secret.expose_secret(), &key)?,
            wallet_address: wallet_address.to_string(),
            handle,
            updated_at: now_unix(),
        };

        self.store
            .upsert(
                Table::Vaults,
                &vault.nullifier_hash,
                serde_json::to_value(&vault)?,
            )
            .await?;

        log::info!(
            "[VAULT] uploaded vault for {} ({})",
            shorten_address(wallet_address),
            self.mode
        );
        Ok(())
    }

    /// Fetches, decrypts and verifies the vault of `nullifier`.
    ///
    /// # Errors
    ///
    /// - [`MiniPayError::NotFound`] if no vault exists
    /// - [`MiniPayError::Crypto`] if the vault exists but cannot be decrypted or
    ///   does not reproduce its wallet address
    /// - [`MiniPayError::BackendUnavailable`] if the store cannot be reached
    pub async fn download(&self, nullifier: &str) -> MiniPayResult<RecoveredVault> {
        let vault = self.fetch(nullifier).await?.ok_or_else(|| {
            log::debug!("[VAULT] no vault for this identity");
            MiniPayError::NotFound("no vault for this identity".to_string())
        })?;

        let key = derive_vault_key(nullifier)?;
        let secret = decrypt_secret(&vault.ciphertext, &key)?;

        if !verify_round_trip(secret.expose_secret(), &vault.wallet_address) {
            log::error!(
                "[VAULT] decrypted key does not match {}",
                shorten_address(&vault.wallet_address)
            );
            return Err(CryptoKind::RoundTripMismatch.into());
        }

        log::info!(
            "[VAULT] recovered vault for {}",
            shorten_address(&vault.wallet_address)
        );
        Ok(RecoveredVault {
            secret,
            wallet_address: vault.wallet_address,
            handle: vault.handle,
        })
    }

    /// Whether a vault exists for `nullifier`. Does not decrypt.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn exists(&self, nullifier: &str) -> MiniPayResult<bool> {
        Ok(self.fetch(nullifier).await?.is_some())
    }

    /// Address and handle of the vault of `nullifier`, without decrypting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn probe(&self, nullifier: &str) -> MiniPayResult<Option<VaultSummary>> {
        Ok(self.fetch(nullifier).await?.map(|vault| VaultSummary {
            wallet_address: vault.wallet_address,
            handle: vault.handle,
        }))
    }

    /// Replaces the handle stored with an existing vault.
    ///
    /// # Errors
    ///
    /// Returns [`MiniPayError::NotFound`] if there is no vault to update.
    pub async fn update_handle(&self, nullifier: &str, handle: &str) -> MiniPayResult<()> {
        let handle = validate_handle(handle)?;
        let mut vault = self
            .fetch(nullifier)
            .await?
            .ok_or_else(|| MiniPayError::NotFound("no vault for this identity".to_string()))?;

        vault.handle = Some(handle);
        vault.updated_at = now_unix();
        self.store
            .upsert(
                Table::Vaults,
                &vault.nullifier_hash,
                serde_json::to_value(&vault)?,
            )
            .await?;

        log::info!("[VAULT] handle updated");
        Ok(())
    }

    async fn fetch(&self, nullifier: &str) -> MiniPayResult<Option<EncryptedVault>> {
        if nullifier.is_empty() {
            return Err(ValidationKind::Nullifier.into());
        }
        self.store
            .get(Table::Vaults, &hash_nullifier(nullifier))
            .await?
            .map(decode_record)
            .transpose()
    }
}
