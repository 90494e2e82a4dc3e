//! Credential-to-key derivation and Stellar key encoding.
//!
//! A wallet keypair is never stored: it is re-derived from the platform
//! credential identifier whenever it is needed.
//!
//! ```text
//! ikm  = "minipay:stellar-wallet:v1" || credential_id
//! seed = HKDF-SHA256(salt = none, ikm, info = "minipay:ed25519-seed", L = 32)
//! key  = Ed25519(seed)
//! ```

use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use hkdf::Hkdf;
use secrecy::SecretString;
use sha2::Sha256;
use stellar_strkey::ed25519::{PrivateKey, PublicKey};
use zeroize::Zeroizing;

use crate::error::{CryptoKind, MiniPayResult, ValidationKind};

/// Domain-separation label prepended to the credential id.
const DERIVATION_LABEL: &[u8] = b"minipay:stellar-wallet:v1";
/// HKDF `info` for the signing seed.
const SEED_INFO: &[u8] = b"minipay:ed25519-seed";

/// Ed25519 keypair of a wallet, addressed by its `G...` public key.
#[derive(Clone)]
pub struct WalletKeypair {
    signing_key: SigningKey,
}

impl WalletKeypair {
    /// Builds the keypair from a raw 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Builds the keypair from an `S...` secret seed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoKind::InvalidSecret`] if the string is not a valid secret seed.
    pub fn from_secret_seed(secret: &str) -> MiniPayResult<Self> {
        let private_key = PrivateKey::from_string(secret.trim())
            .map_err(|_| CryptoKind::InvalidSecret)?;
        let seed = Zeroizing::new(private_key.0);
        Ok(Self::from_seed(&seed))
    }

    /// The `G...` address of this keypair.
    #[must_use]
    pub fn public_address(&self) -> String {
        PublicKey(self.public_key_bytes()).to_string()
    }

    /// The `S...` secret seed. This is what the vault encrypts.
    #[must_use]
    pub fn secret_seed(&self) -> SecretString {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        SecretString::from(PrivateKey(*seed).to_string())
    }

    /// Raw Ed25519 public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs `message` with the wallet key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for WalletKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeypair")
            .field("public_address", &self.public_address())
            .finish_non_exhaustive()
    }
}

/// Derives the wallet keypair bound to a platform credential.
///
/// Deterministic: the same credential id yields the same keypair on every
/// device and in every process.
///
/// # Errors
///
/// Returns a validation error if `credential_id` is empty.
pub fn derive_keypair(credential_id: &str) -> MiniPayResult<WalletKeypair> {
    if credential_id.is_empty() {
        return Err(ValidationKind::Credential("credential id cannot be empty".to_string()).into());
    }

    let mut ikm = Zeroizing::new(Vec::with_capacity(
        DERIVATION_LABEL.len() + credential_id.len(),
    ));
    ikm.extend_from_slice(DERIVATION_LABEL);
    ikm.extend_from_slice(credential_id.as_bytes());

    let mut seed = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(None, &ikm)
        .expand(SEED_INFO, &mut seed[..])
        .map_err(|e| CryptoKind::KeyDerivation(e.to_string()))?;

    Ok(WalletKeypair::from_seed(&seed))
}

/// Whether `address` is a well-formed `G...` account address (checksum included).
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 56 && address.starts_with('G') && PublicKey::from_string(address).is_ok()
}

/// Like [`is_valid_address`], as a `Result`.
///
/// # Errors
///
/// Returns [`ValidationKind::Address`] for anything that is not a valid address.
pub fn validate_address(address: &str) -> MiniPayResult<()> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(ValidationKind::Address(address.to_string()).into())
    }
}

/// `GABC...WXYZ` form for display and logs.
#[must_use]
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() < 10 {
        return address.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use secrecy::ExposeSecret;

    #[test]
    fn test_derivation_is_deterministic() {
        let first = derive_keypair("credential-abc").unwrap();
        let second = derive_keypair("credential-abc").unwrap();

        assert_eq!(first.public_address(), second.public_address());
        assert_eq!(
            first.secret_seed().expose_secret(),
            second.secret_seed().expose_secret()
        );
    }

    #[test]
    fn test_distinct_credentials_give_distinct_wallets() {
        let a = derive_keypair("credential-a").unwrap();
        let b = derive_keypair("credential-b").unwrap();
        assert_ne!(a.public_address(), b.public_address());
    }

    #[test]
    fn test_derivation_is_domain_separated() {
        // The raw credential bytes used directly as a seed must not give the wallet key.
        let mut raw = [0u8; 32];
        let id = b"0123456789abcdef0123456789abcdef";
        raw.copy_from_slice(id);
        let undomained = WalletKeypair::from_seed(&raw);

        let derived = derive_keypair("0123456789abcdef0123456789abcdef").unwrap();
        assert_ne!(derived.public_address(), undomained.public_address());
    }

    #[test]
    fn test_empty_credential_is_rejected() {
        assert!(matches!(
            derive_keypair(""),
            Err(crate::MiniPayError::Validation(ValidationKind::Credential(_)))
        ));
    }

    #[test]
    fn test_secret_seed_round_trips() {
        let keypair = derive_keypair("credential-abc").unwrap();
        let secret = keypair.secret_seed();

        assert!(secret.expose_secret().starts_with('S'));
        let restored = WalletKeypair::from_secret_seed(secret.expose_secret()).unwrap();
        assert_eq!(restored.public_address(), keypair.public_address());
    }

    #[test]
    fn test_invalid_secret_seed() {
        assert!(matches!(
            WalletKeypair::from_secret_seed("SNOTAREALSEED"),
            Err(crate::MiniPayError::Crypto(CryptoKind::InvalidSecret))
        ));
    }

    #[test]
    fn test_addresses_validate() {
        let address = derive_keypair("credential-abc").unwrap().public_address();
        assert_eq!(address.len(), 56);
        assert!(is_valid_address(&address));
        assert!(validate_address(&address).is_ok());

        // flip the last character, breaking the checksum
        let mut broken = address[..55].to_string();
        broken.push(if address.ends_with('A') { 'B' } else { 'A' });
        assert!(!is_valid_address(&broken));

        assert!(!is_valid_address("0x1234567890abcdef1234567890abcdef12345678"));
        assert!(!is_valid_address(""));
        let secret = derive_keypair("credential-abc").unwrap().secret_seed();
        assert!(!is_valid_address(secret.expose_secret()));
    }

    #[test]
    fn test_signatures_verify() {
        let keypair = derive_keypair("credential-abc").unwrap();
        let signature = keypair.sign(b"payment");

        let verifying_key = VerifyingKey::from_bytes(&keypair.public_key_bytes()).unwrap();
        assert!(verifying_key
            .verify(b"payment", &Signature::from_bytes(&signature))
            .is_ok());
    }

    #[test]
    fn test_shorten_address() {
        assert_eq!(
            shorten_address("GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5"),
            "GBBD...FLA5"
        );
        assert_eq!(shorten_address("GSHORT"), "GSHORT");
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let keypair = derive_keypair("credential-abc").unwrap();
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains(&keypair.public_address()));
        assert!(!rendered.contains(keypair.secret_seed().expose_secret()));
    }
}
