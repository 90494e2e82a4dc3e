//! Encrypted cross-device backup of the wallet secret, keyed by the identity nullifier.
//!
//! [`crypto`] holds the primitives; [`service`] stores vaults in the durable store.

pub mod crypto;
pub mod service;

pub use crypto::{
    decrypt_secret, derive_vault_key, encrypt_secret, hash_nullifier, verify_round_trip,
    VaultKey,
};
pub use service::{EncryptedVault, RecoveredVault, VaultService, VaultSummary};
