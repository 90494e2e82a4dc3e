use thiserror::Error;

use crate::storage::StoreError;

/// Result alias used across `MiniPay`.
pub type MiniPayResult<T, E = MiniPayError> = std::result::Result<T, E>;

/// Error outputs from `MiniPay`.
///
/// Callers can always tell "not found" apart from "found but broken" and from
/// "rejected by policy": each of those has its own variant.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum MiniPayError {
    /// The presented input is malformed (address, handle, vault blob, ...).
    #[error("validation_error: {0}")]
    Validation(#[from] ValidationKind),
    /// The operation conflicts with an existing binding.
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictKind),
    /// A cryptographic operation failed. Never downgraded to "not found".
    #[error("crypto_error: {0}")]
    Crypto(#[from] CryptoKind),
    /// No binding, vault or handle exists for the given key.
    #[error("not_found: {0}")]
    NotFound(String),
    /// The durable store could not be reached. Retryable.
    #[error("backend_unavailable: {0}")]
    BackendUnavailable(String),
    /// The durable store refused the request.
    #[error("backend_error: {0}")]
    Backend(String),
    /// Unexpected error (de)serializing a stored record
    #[error("serialization_error: {0}")]
    Serialization(String),
}

impl MiniPayError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Whether this is the expected "nothing stored under this key" outcome.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Message suitable for the recovery screen.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "no wallet linked to this identity",
            Self::Validation(_) => "the provided details are not valid",
            Self::Conflict(_) => "this is already linked to a different wallet",
            Self::Crypto(_)
            | Self::BackendUnavailable(_)
            | Self::Backend(_)
            | Self::Serialization(_) => "recovery temporarily unavailable, try again",
        }
    }
}

/// Why an input was rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationKind {
    /// Not a valid address on the payment network.
    #[error("invalid wallet address `{0}`")]
    Address(String),
    /// Handle violates the syntax rules.
    #[error("invalid handle `{handle}`: {rule}")]
    Handle {
        /// The normalized handle that was rejected.
        handle: String,
        /// The rule it broke.
        rule: HandleRule,
    },
    /// The credential identifier cannot seed a keypair.
    #[error("invalid credential id: {0}")]
    Credential(String),
    /// The nullifier is empty.
    #[error("empty nullifier")]
    Nullifier,
    /// Payment amount is not a positive decimal with at most 7 fraction digits.
    #[error("invalid amount `{0}`")]
    Amount(String),
    /// Memo is longer than 28 bytes.
    #[error("memo too long ({0} bytes, at most 28)")]
    Memo(usize),
    /// Payment URI could not be parsed.
    #[error("invalid payment uri: {0}")]
    PaymentUri(String),
    /// Configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Syntax rules a handle must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleRule {
    /// Handle is empty after trimming.
    #[error("handle cannot be empty")]
    Empty,
    /// Fewer than 3 characters.
    #[error("handle must be at least 3 characters")]
    TooShort,
    /// More than 20 characters.
    #[error("handle must be at most 20 characters")]
    TooLong,
    /// Contains something other than `a-z`, `0-9` or `_`.
    #[error("handle can only contain letters, numbers, and underscore")]
    Charset,
}

/// Which binding an operation collided with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    /// The handle belongs to another address.
    #[error("handle `{handle}` is already taken")]
    HandleTaken {
        /// The contested handle.
        handle: String,
    },
    /// The address already owns a different handle.
    #[error("address already has handle `{existing}`")]
    AddressHasHandle {
        /// The handle the address already owns.
        existing: String,
    },
    /// The nullifier is bound to another wallet and no re-link was requested.
    #[error("identity is already linked to wallet {bound_address}")]
    NullifierBound {
        /// Address the nullifier is currently bound to.
        bound_address: String,
    },
}

/// Cryptographic failure classes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoKind {
    /// Key derivation (PBKDF2/HKDF) failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    /// AEAD encryption failed.
    #[error("encryption failed")]
    Encryption,
    /// AEAD authentication failed: wrong key or tampered ciphertext.
    #[error("decryption failed")]
    Decryption,
    /// The vault blob is not `nonce.ciphertext` in base64.
    #[error("malformed vault blob: {0}")]
    MalformedBlob(String),
    /// Decrypted secret does not reproduce the stored wallet address.
    #[error("decrypted key does not match wallet address")]
    RoundTripMismatch,
    /// A secret seed could not be decoded into a keypair.
    #[error("invalid secret seed")]
    InvalidSecret,
}

impl From<StoreError> for MiniPayError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(reason) => Self::BackendUnavailable(reason),
            StoreError::Rejected(reason) => Self::Backend(reason),
            StoreError::Serialization(reason) => Self::Serialization(reason),
            err @ (StoreError::Io { .. } | StoreError::Lock(_)) => {
                Self::Backend(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for MiniPayError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
