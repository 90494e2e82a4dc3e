//! Identity registry: binds a proof nullifier to at most one wallet address.
//!
//! Bindings are written to the device cache first and then to the durable
//! store, which is authoritative for cross-device recovery. Durable records are
//! keyed by `hex(SHA-256(nullifier))`; the raw nullifier only lives in the
//! device cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConflictKind, MiniPayError, MiniPayResult, ValidationKind};
use crate::handles::validate_handle;
use crate::keys::{shorten_address, validate_address};
use crate::storage::keys::{DEVICE_IDENTITY, IDENTITY_PREFIX};
use crate::storage::{DurableStore, KeyValueStore, Table};
use crate::utils::{decode_record, now_unix};
use crate::vault::hash_nullifier;

/// A nullifier bound to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct IdentityBinding {
    /// The proof nullifier (large integer as a decimal string).
    pub nullifier: String,
    /// The bound `G...` address.
    pub wallet_address: String,
    /// Handle of the wallet, if any.
    #[serde(default)]
    pub handle: Option<String>,
    /// Unix seconds of the verification.
    pub verified_at: u64,
}

/// Durable form of [`IdentityBinding`], without the raw nullifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DurableIdentity {
    nullifier_hash: String,
    wallet_address: String,
    #[serde(default)]
    handle: Option<String>,
    verified_at: u64,
}

impl DurableIdentity {
    fn from_binding(binding: &IdentityBinding) -> Self {
        Self {
            nullifier_hash: hash_nullifier(&binding.nullifier),
            wallet_address: binding.wallet_address.clone(),
            handle: binding.handle.clone(),
            verified_at: binding.verified_at,
        }
    }

    fn into_binding(self, nullifier: &str) -> IdentityBinding {
        IdentityBinding {
            nullifier: nullifier.to_string(),
            wallet_address: self.wallet_address,
            handle: self.handle,
            verified_at: self.verified_at,
        }
    }
}

/// What a [`IdentityRegistry::bind`] or [`IdentityRegistry::relink`] call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    /// First binding of this nullifier.
    Created,
    /// Same wallet, new handle.
    Updated,
    /// The nullifier now points at a different wallet.
    Relinked,
    /// Nothing changed.
    Unchanged,
}

/// Result of a bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindReceipt {
    /// The binding now in effect.
    pub binding: IdentityBinding,
    /// What changed.
    pub status: BindStatus,
    /// `false` if the durable write failed and only the device cache holds the binding.
    pub durable_synced: bool,
}

/// Identity registry over an on-device cache and a durable store.
pub struct IdentityRegistry {
    cache: Arc<dyn KeyValueStore>,
    durable: Arc<dyn DurableStore>,
}

impl IdentityRegistry {
    /// Creates a registry over the given stores.
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self { cache, durable }
    }

    /// Binds `nullifier` to `wallet_address`.
    ///
    /// Binding the same pair again is a no-op (or a handle update). `handle: None`
    /// keeps the handle already stored.
    ///
    /// # Errors
    ///
    /// - [`ConflictKind::NullifierBound`] if the nullifier is bound to a
    ///   different address; use [`Self::relink`] to move it
    /// - a validation error for an empty nullifier, malformed address or handle
    /// - a backend error if the device cache cannot be written
    pub async fn bind(
        &self,
        nullifier: &str,
        wallet_address: &str,
        handle: Option<&str>,
    ) -> MiniPayResult<BindReceipt> {
        self.write_binding(nullifier, wallet_address, handle, false)
            .await
    }

    /// Binds `nullifier` to `wallet_address`, replacing a binding to another address.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bind`], minus the conflict.
    pub async fn relink(
        &self,
        nullifier: &str,
        wallet_address: &str,
        handle: Option<&str>,
    ) -> MiniPayResult<BindReceipt> {
        self.write_binding(nullifier, wallet_address, handle, true)
            .await
    }

    /// Finds the wallet bound to `nullifier`.
    ///
    /// The durable store is asked first so bindings made on other devices are
    /// found; a durable hit is copied into the device cache. The cache answers
    /// when the durable store has no match or cannot be reached.
    ///
    /// # Errors
    ///
    /// - [`MiniPayError::NotFound`] if neither store knows the nullifier
    /// - the durable error if the durable store failed and the cache has no match
    pub async fn lookup(&self, nullifier: &str) -> MiniPayResult<IdentityBinding> {
        ensure_nullifier(nullifier)?;

        let durable_error = match self.durable_binding(nullifier).await {
            Ok(Some(binding)) => {
                log::info!(
                    "[IDENTITY] found in durable store: {}",
                    shorten_address(&binding.wallet_address)
                );
                if let Err(err) = self.cache_binding(&binding) {
                    log::warn!("[IDENTITY] failed to back-fill cache: {err}");
                }
                return Ok(binding);
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("[IDENTITY] durable lookup failed, using device cache: {err}");
                Some(err)
            }
        };

        if let Some(binding) = self.cached_binding(nullifier)? {
            log::info!(
                "[IDENTITY] found in device cache: {}",
                shorten_address(&binding.wallet_address)
            );
            return Ok(binding);
        }

        log::debug!("[IDENTITY] no identity for nullifier");
        Err(durable_error
            .unwrap_or_else(|| MiniPayError::NotFound("no identity for nullifier".to_string())))
    }

    /// Whether any binding is known. Only used to adjust messaging.
    pub async fn has_any_binding(&self) -> bool {
        match self.durable.any(Table::Identities).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => log::debug!("[IDENTITY] durable probe failed: {err}"),
        }
        self.cache
            .keys_with_prefix(IDENTITY_PREFIX)
            .is_ok_and(|keys| !keys.is_empty())
    }

    /// The identity last bound on this device.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read or holds a corrupt record.
    pub fn local_identity(&self) -> MiniPayResult<Option<IdentityBinding>> {
        read_json(self.cache.as_ref(), DEVICE_IDENTITY)
    }

    async fn write_binding(
        &self,
        nullifier: &str,
        wallet_address: &str,
        handle: Option<&str>,
        relink: bool,
    ) -> MiniPayResult<BindReceipt> {
        ensure_nullifier(nullifier)?;
        validate_address(wallet_address)?;
        let handle = handle.map(validate_handle).transpose()?;

        let durable_current = match self.durable_binding(nullifier).await {
            Ok(found) => Some(found),
            Err(err) => {
                log::warn!("[IDENTITY] durable read failed, checking device cache: {err}");
                None
            }
        };
        let current = match &durable_current {
            Some(Some(binding)) => Some(binding.clone()),
            _ => self.cached_binding(nullifier)?,
        };

        let (binding, status) = match current {
            Some(existing) if existing.wallet_address != wallet_address => {
                if !relink {
                    return Err(ConflictKind::NullifierBound {
                        bound_address: existing.wallet_address,
                    }
                    .into());
                }
                let binding = IdentityBinding {
                    nullifier: nullifier.to_string(),
                    wallet_address: wallet_address.to_string(),
                    handle,
                    verified_at: now_unix(),
                };
                (binding, BindStatus::Relinked)
            }
            Some(existing) => match handle {
                Some(new_handle) if existing.handle.as_deref() != Some(new_handle.as_str()) => {
                    let binding = IdentityBinding {
                        handle: Some(new_handle),
                        ..existing
                    };
                    (binding, BindStatus::Updated)
                }
                _ => (existing, BindStatus::Unchanged),
            },
            None => {
                let binding = IdentityBinding {
                    nullifier: nullifier.to_string(),
                    wallet_address: wallet_address.to_string(),
                    handle,
                    verified_at: now_unix(),
                };
                (binding, BindStatus::Created)
            }
        };

        // The device cache reflects the action before the durable write is attempted.
        self.cache_binding(&binding)?;
        self.cache
            .put(DEVICE_IDENTITY, &serde_json::to_string(&binding)?)?;

        let already_durable = matches!(&durable_current, Some(Some(stored)) if *stored == binding);
        let durable_synced = already_durable || self.push_durable(&binding).await;

        log::info!(
            "[IDENTITY] {status:?} binding for {}",
            shorten_address(&binding.wallet_address)
        );
        Ok(BindReceipt {
            binding,
            status,
            durable_synced,
        })
    }

    async fn push_durable(&self, binding: &IdentityBinding) -> bool {
        let record = DurableIdentity::from_binding(binding);
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => {
                log::error!("[IDENTITY] failed to encode durable record: {err}");
                return false;
            }
        };
        match self
            .durable
            .upsert(Table::Identities, &record.nullifier_hash, value)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[IDENTITY] durable write failed, binding kept on device only: {err}");
                false
            }
        }
    }

    async fn durable_binding(&self, nullifier: &str) -> MiniPayResult<Option<IdentityBinding>> {
        self.durable
            .get(Table::Identities, &hash_nullifier(nullifier))
            .await?
            .map(decode_record::<DurableIdentity>)
            .transpose()
            .map(|found| found.map(|record| record.into_binding(nullifier)))
    }

    fn cached_binding(&self, nullifier: &str) -> MiniPayResult<Option<IdentityBinding>> {
        read_json(self.cache.as_ref(), &cache_key(nullifier))
    }

    fn cache_binding(&self, binding: &IdentityBinding) -> MiniPayResult<()> {
        self.cache.put(
            &cache_key(&binding.nullifier),
            &serde_json::to_string(binding)?,
        )?;
        Ok(())
    }
}

fn cache_key(nullifier: &str) -> String {
    format!("{IDENTITY_PREFIX}{nullifier}")
}

fn ensure_nullifier(nullifier: &str) -> MiniPayResult<()> {
    if nullifier.trim().is_empty() {
        return Err(ValidationKind::Nullifier.into());
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    cache: &dyn KeyValueStore,
    key: &str,
) -> MiniPayResult<Option<T>> {
    cache
        .get(key)?
        .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_keypair;
    use crate::storage::{MemoryDurableStore, MemoryKeyValueStore};

    struct Device {
        cache: Arc<MemoryKeyValueStore>,
        registry: IdentityRegistry,
    }

    fn device(durable: &Arc<MemoryDurableStore>) -> Device {
        let cache = Arc::new(MemoryKeyValueStore::new());
        let registry = IdentityRegistry::new(cache.clone(), durable.clone());
        Device { cache, registry }
    }

    fn address(credential: &str) -> String {
        derive_keypair(credential).unwrap().public_address()
    }

    #[tokio::test]
    async fn test_bind_then_lookup() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);
        let wallet = address("credential-a");

        let receipt = phone.registry.bind("12345", &wallet, None).await.unwrap();
        assert_eq!(receipt.status, BindStatus::Created);
        assert!(receipt.durable_synced);

        let found = phone.registry.lookup("12345").await.unwrap();
        assert_eq!(found.wallet_address, wallet);
        assert_eq!(
            phone.registry.local_identity().unwrap().unwrap().nullifier,
            "12345"
        );
    }

    #[tokio::test]
    async fn test_durable_record_is_keyed_by_hash() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);
        phone
            .registry
            .bind("12345", &address("credential-a"), None)
            .await
            .unwrap();

        assert!(durable.peek(Table::Identities, "12345").unwrap().is_none());
        let record = durable
            .peek(Table::Identities, &hash_nullifier("12345"))
            .unwrap()
            .unwrap();
        assert!(record.get("nullifier").is_none());
    }

    #[tokio::test]
    async fn test_rebinding_same_pair_is_idempotent() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);
        let wallet = address("credential-a");

        phone.registry.bind("n", &wallet, Some("alice")).await.unwrap();
        let again = phone.registry.bind("n", &wallet, None).await.unwrap();

        assert_eq!(again.status, BindStatus::Unchanged);
        assert_eq!(again.binding.handle.as_deref(), Some("alice"));
        assert_eq!(durable.len(Table::Identities).unwrap(), 1);

        let updated = phone.registry.bind("n", &wallet, Some("alice_2")).await.unwrap();
        assert_eq!(updated.status, BindStatus::Updated);
    }

    #[tokio::test]
    async fn test_bind_to_other_address_conflicts_until_relinked() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);
        let first = address("credential-a");
        let second = address("credential-b");

        phone.registry.bind("n", &first, None).await.unwrap();
        let err = phone.registry.bind("n", &second, None).await.unwrap_err();
        assert!(matches!(
            err,
            MiniPayError::Conflict(ConflictKind::NullifierBound { ref bound_address })
                if *bound_address == first
        ));

        let receipt = phone.registry.relink("n", &second, None).await.unwrap();
        assert_eq!(receipt.status, BindStatus::Relinked);
        assert_eq!(phone.registry.lookup("n").await.unwrap().wallet_address, second);
        assert_eq!(durable.len(Table::Identities).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookup_finds_binding_made_on_other_device() {
        let durable = Arc::new(MemoryDurableStore::new());
        let laptop = device(&durable);
        let phone = device(&durable);
        let wallet = address("credential-a");

        laptop.registry.bind("n", &wallet, Some("alice")).await.unwrap();
        assert!(phone.cache.is_empty().unwrap());

        let found = phone.registry.lookup("n").await.unwrap();
        assert_eq!(found.wallet_address, wallet);
        assert_eq!(found.handle.as_deref(), Some("alice"));
        // back-filled
        assert!(phone.cache.contains(&cache_key("n")).unwrap());
    }

    #[tokio::test]
    async fn test_lookup_prefers_durable_over_stale_cache() {
        let durable = Arc::new(MemoryDurableStore::new());
        let laptop = device(&durable);
        let phone = device(&durable);
        let a = address("credential-a");
        let b = address("credential-b");

        laptop.registry.bind("n", &a, None).await.unwrap();
        let receipt = phone.registry.relink("n", &b, None).await.unwrap();
        assert_eq!(receipt.status, BindStatus::Relinked);

        // the laptop cache still says A
        let stale: IdentityBinding =
            serde_json::from_str(&laptop.cache.get("identity/by-nullifier/n").unwrap().unwrap())
                .unwrap();
        assert_eq!(stale.wallet_address, a);

        let found = laptop.registry.lookup("n").await.unwrap();
        assert_eq!(found.wallet_address, b);

        let refreshed: IdentityBinding =
            serde_json::from_str(&laptop.cache.get("identity/by-nullifier/n").unwrap().unwrap())
                .unwrap();
        assert_eq!(refreshed.wallet_address, b);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_cache() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);
        let wallet = address("credential-a");
        durable.set_available(false);

        let receipt = phone.registry.bind("n", &wallet, None).await.unwrap();
        assert!(!receipt.durable_synced);
        assert_eq!(phone.registry.lookup("n").await.unwrap().wallet_address, wallet);
        assert!(phone.registry.has_any_binding().await);

        let err = phone.registry.lookup("other").await.unwrap_err();
        assert!(matches!(err, MiniPayError::BackendUnavailable(_)));

        durable.set_available(true);
        let err = phone.registry.lookup("other").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_malformed_input() {
        let durable = Arc::new(MemoryDurableStore::new());
        let phone = device(&durable);

        assert!(matches!(
            phone.registry.bind("n", "GNOTANADDRESS", None).await,
            Err(MiniPayError::Validation(ValidationKind::Address(_)))
        ));
        assert!(matches!(
            phone.registry.bind("", &address("credential-a"), None).await,
            Err(MiniPayError::Validation(ValidationKind::Nullifier))
        ));
        assert!(!phone.registry.has_any_binding().await);
    }
}
