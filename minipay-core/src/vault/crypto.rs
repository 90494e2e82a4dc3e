//! Vault cryptography.
//!
//! - `nullifier_hash = hex(SHA-256(nullifier))` is the only externally visible vault key
//! - `key = PBKDF2-HMAC-SHA256(nullifier, "minipay_vault_v1", 100_000 rounds, 32 bytes)`
//! - `blob = base64(nonce) "." base64(AES-256-GCM(key, nonce, secret))` with a fresh 12-byte nonce

use std::fmt;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::Hmac;
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoKind, MiniPayResult, ValidationKind};
use crate::keys::WalletKeypair;

const VAULT_SALT: &[u8] = b"minipay_vault_v1";
const PBKDF2_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const BLOB_SEPARATOR: char = '.';

/// 256-bit AES key derived from a nullifier. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> MiniPayResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CryptoKind::KeyDerivation(e.to_string()).into())
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// Hex SHA-256 of the nullifier's UTF-8 bytes.
#[must_use]
pub fn hash_nullifier(nullifier: &str) -> String {
    hex::encode(Sha256::digest(nullifier.as_bytes()))
}

/// Derives the vault key of `nullifier`.
///
/// Deliberately slow (PBKDF2, 100k rounds). Deterministic per nullifier.
///
/// # Errors
///
/// Returns a validation error for an empty nullifier and a crypto error if the
/// KDF fails.
pub fn derive_vault_key(nullifier: &str) -> MiniPayResult<VaultKey> {
    if nullifier.is_empty() {
        return Err(ValidationKind::Nullifier.into());
    }
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(nullifier.as_bytes(), VAULT_SALT, PBKDF2_ROUNDS, &mut key[..])
        .map_err(|e| CryptoKind::KeyDerivation(e.to_string()))?;
    Ok(VaultKey::from_bytes(*key))
}

/// Encrypts `secret` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoKind::Encryption`] if the AEAD primitive fails.
pub fn encrypt_secret(secret: &str, key: &VaultKey) -> MiniPayResult<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = key
        .cipher()?
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
        .map_err(|_| CryptoKind::Encryption)?;

    Ok(format!(
        "{}{BLOB_SEPARATOR}{}",
        STANDARD.encode(nonce_bytes),
        STANDARD.encode(ciphertext)
    ))
}

/// Decrypts a blob produced by [`encrypt_secret`].
///
/// # Errors
///
/// Every failure is a crypto error: [`CryptoKind::MalformedBlob`] if the blob is
/// not `nonce.ciphertext`, [`CryptoKind::Decryption`] if authentication fails
/// (wrong key, tampered data) or the plaintext is not UTF-8.
pub fn decrypt_secret(blob: &str, key: &VaultKey) -> MiniPayResult<SecretString> {
    let (nonce_b64, ciphertext_b64) = blob
        .split_once(BLOB_SEPARATOR)
        .ok_or_else(|| CryptoKind::MalformedBlob("missing separator".to_string()))?;

    let nonce_bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|e| CryptoKind::MalformedBlob(format!("nonce: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoKind::MalformedBlob(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        ))
        .into());
    }
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| CryptoKind::MalformedBlob(format!("ciphertext: {e}")))?;

    let plaintext = Zeroizing::new(
        key.cipher()?
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoKind::Decryption)?,
    );

    let secret = std::str::from_utf8(&plaintext).map_err(|_| CryptoKind::Decryption)?;
    Ok(SecretString::from(secret))
}

/// Whether `secret` is the secret seed of `expected_address`.
#[must_use]
pub fn verify_round_trip(secret: &str, expected_address: &str) -> bool {
    WalletKeypair::from_secret_seed(secret)
        .is_ok_and(|keypair| keypair.public_address() == expected_address)
}
