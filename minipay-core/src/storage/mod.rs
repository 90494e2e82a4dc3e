//! Storage backends: the on-device cache and the durable shared store.
//!
//! Every component receives its stores by injection, so tests (and several
//! simulated devices inside one test) never share ambient state.

use std::sync::Arc;

pub mod error;
pub mod file;
pub mod local_durable;
pub mod memory;
pub mod remote;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::FileKeyValueStore;
pub use local_durable::LocalDurableStore;
pub use memory::{MemoryDurableStore, MemoryKeyValueStore};
pub use remote::RemoteDurableStore;
pub use traits::{DurableStore, InsertOutcome, KeyValueStore};

use crate::config::{MiniPayConfig, StorageMode};
use crate::error::MiniPayResult;

/// Tables of the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Table {
    /// Identity bindings keyed by nullifier hash.
    #[strum(serialize = "identities")]
    Identities,
    /// Encrypted vaults keyed by nullifier hash.
    #[strum(serialize = "encrypted_vaults")]
    Vaults,
    /// Handle bindings keyed by handle.
    #[strum(serialize = "handles")]
    Handles,
    /// Reverse handle index keyed by wallet address.
    #[strum(serialize = "handle_owners")]
    HandleOwners,
}

impl Table {
    /// Column holding the record key.
    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::Identities | Self::Vaults => "nullifier_hash",
            Self::Handles => "handle",
            Self::HandleOwners => "wallet_address",
        }
    }
}

/// Key prefixes of the on-device cache. Each component owns one namespace.
pub mod keys {
    /// Identity bindings, `identity/by-nullifier/{nullifier}`.
    pub const IDENTITY_PREFIX: &str = "identity/by-nullifier/";
    /// The identity verified on this device.
    pub const DEVICE_IDENTITY: &str = "identity/device";
    /// Handle bindings, `handle/{handle}`.
    pub const HANDLE_PREFIX: &str = "handle/";
    /// Reverse handle index, `handle-owner/{address}`.
    pub const HANDLE_OWNER_PREFIX: &str = "handle-owner/";
    /// Local-only durable tables, `durable/{table}/{key}`.
    pub const DURABLE_PREFIX: &str = "durable/";
}

/// Builds the durable store selected by `config`.
///
/// In [`StorageMode::LocalOnly`] the durable tables live in `cache` under their
/// own prefix; callers see the same contract either way.
///
/// # Errors
///
/// Returns an error if the remote client cannot be constructed.
pub fn durable_store_for(
    config: &MiniPayConfig,
    cache: Arc<dyn KeyValueStore>,
) -> MiniPayResult<Arc<dyn DurableStore>> {
    match (config.storage_mode(), config.durable.as_ref()) {
        (StorageMode::Remote, Some(backend)) => {
            log::info!("[STORAGE] using remote durable store");
            Ok(Arc::new(RemoteDurableStore::new(backend)?))
        }
        _ => {
            log::info!("[STORAGE] durable backend not configured, using local-only store");
            Ok(Arc::new(LocalDurableStore::new(cache)))
        }
    }
}
