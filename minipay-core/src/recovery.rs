//! Recovery orchestrator: turns a completed identity proof into a recovered wallet.
//!
//! ```text
//! Idle --proving--> Verifying --proven--> Matched | NotFound | Unavailable
//!   ^                                                 |           |
//!   +-------------------- retry ----------------------+-----------+
//! ```
//!
//! `Matched` is terminal. `Unavailable` covers every failure that is not a clean
//! "nothing stored for this identity" (backend outage, corrupt vault), so the
//! caller can show a retry message instead of "no wallet".

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::MiniPayError;
use crate::identity::IdentityRegistry;
use crate::keys::shorten_address;
use crate::vault::VaultService;

/// Status reported by the external proof widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ProofStatus {
    /// No proof requested yet.
    NotStarted,
    /// The widget is generating a proof.
    Proving,
    /// A proof is available.
    Proven,
}

/// Where a recovered wallet was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// Decrypted from the encrypted vault; the secret is available.
    Vault,
    /// Identity binding only; the secret must come from the credential.
    IdentityRegistry,
}

/// A wallet matched to a proven identity.
#[derive(Debug, Clone)]
pub struct RecoveredWallet {
    /// The recovered `G...` address.
    pub wallet_address: String,
    /// Handle of the wallet, if known.
    pub handle: Option<String>,
    /// The verified secret seed when recovered from the vault.
    pub secret: Option<Arc<SecretString>>,
    /// Which store produced the match.
    pub source: RecoverySource,
}

/// State of the recovery flow.
#[derive(Debug, Clone)]
pub enum RecoveryState {
    /// Waiting for a proof.
    Idle,
    /// Proof in progress or lookup running.
    Verifying,
    /// A wallet was found.
    Matched(RecoveredWallet),
    /// No wallet is linked to this identity.
    NotFound,
    /// Lookup failed; the reason is for logs, not for users.
    Unavailable(String),
}

impl RecoveryState {
    /// Message for the recovery screen, if the state has one.
    #[must_use]
    pub const fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::NotFound => Some("no wallet linked to this identity"),
            Self::Unavailable(_) => Some("recovery temporarily unavailable, try again"),
            Self::Idle | Self::Verifying | Self::Matched(_) => None,
        }
    }
}

/// Receives the outcome of a recovery attempt.
pub trait RecoveryListener: Send + Sync {
    /// A wallet was recovered.
    fn on_matched(&self, wallet: &RecoveredWallet);

    /// No wallet is linked to the proven identity.
    fn on_not_found(&self);

    /// The lookup failed; the user may retry.
    fn on_unavailable(&self, _reason: &str) {}
}

/// Extracts the nullifier from a proof emitted by the proof widget.
///
/// Accepted shapes, and nothing else:
///
/// - a proof wrapper object, or a collection holding exactly one wrapper: an
///   array of one element, or an object with a single entry (`{"0": {...}}`)
///   whose value is an object, provided the outer object has no `pcd` or
///   `proof` key of its own
/// - the wrapper either carries the proof data in `pcd` (a JSON string or an
///   object) or is the proof data itself
/// - the nullifier sits at `/proof/nullifier`, as a string of decimal digits or
///   a non-negative integer. Integers above `u64::MAX` lose precision when the
///   JSON is parsed and are rejected; the widget emits nullifiers as strings.
///
/// Returns `None` for every other input.
#[must_use]
pub fn extract_nullifier(proof: &Value) -> Option<String> {
    let wrapper = match proof {
        Value::Array(items) if items.len() == 1 => &items[0],
        Value::Object(fields)
            if fields.len() == 1 && !fields.contains_key("pcd") && !fields.contains_key("proof") =>
        {
            match fields.values().next() {
                Some(inner @ Value::Object(_)) => inner,
                _ => proof,
            }
        }
        Value::Object(_) => proof,
        _ => return None,
    };

    let parsed;
    let data = match wrapper.get("pcd") {
        Some(Value::String(raw)) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        Some(pcd @ Value::Object(_)) => pcd,
        Some(_) => return None,
        None => wrapper,
    };

    match data.pointer("/proof/nullifier")? {
        Value::String(digits) => decimal_digits(digits.clone()),
        Value::Number(number) => decimal_digits(number.to_string()),
        _ => None,
    }
}

fn decimal_digits(raw: String) -> Option<String> {
    (!raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())).then_some(raw)
}

/// Drives recovery from proof events.
pub struct RecoveryOrchestrator {
    vaults: Arc<VaultService>,
    identities: Arc<IdentityRegistry>,
    listeners: Vec<Arc<dyn RecoveryListener>>,
    state: watch::Sender<RecoveryState>,
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator in [`RecoveryState::Idle`].
    #[must_use]
    pub fn new(vaults: Arc<VaultService>, identities: Arc<IdentityRegistry>) -> Self {
        Self {
            vaults,
            identities,
            listeners: Vec::new(),
            state: watch::Sender::new(RecoveryState::Idle),
        }
    }

    /// Adds a listener notified on every terminal outcome.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RecoveryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> RecoveryState {
        self.state.borrow().clone()
    }

    /// Watch channel of state changes, for progress display.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecoveryState> {
        self.state.subscribe()
    }

    /// Feeds a proof widget event into the state machine and returns the new state.
    ///
    /// `proof` is only read for [`ProofStatus::Proven`]. A proof without an
    /// extractable nullifier ends in [`RecoveryState::NotFound`].
    pub async fn on_proof_event(
        &self,
        status: ProofStatus,
        proof: Option<&Value>,
    ) -> RecoveryState {
        if matches!(*self.state.borrow(), RecoveryState::Matched(_)) {
            return self.status();
        }

        match status {
            ProofStatus::NotStarted => {}
            ProofStatus::Proving => self.transition(RecoveryState::Verifying),
            ProofStatus::Proven => {
                self.transition(RecoveryState::Verifying);
                let outcome = match proof.and_then(extract_nullifier) {
                    Some(nullifier) => self.find_wallet(&nullifier).await,
                    None => {
                        log::info!("[RECOVERY] no nullifier in proof");
                        RecoveryState::NotFound
                    }
                };
                self.transition(outcome);
                self.notify();
            }
        }
        self.status()
    }

    /// Returns from `NotFound` or `Unavailable` to `Idle` so the proof can be retried.
    pub fn retry(&self) -> RecoveryState {
        self.state.send_if_modified(|state| {
            if matches!(state, RecoveryState::NotFound | RecoveryState::Unavailable(_)) {
                *state = RecoveryState::Idle;
                true
            } else {
                false
            }
        });
        self.status()
    }

    async fn find_wallet(&self, nullifier: &str) -> RecoveryState {
        let mut outage = None;

        match self.vaults.download(nullifier).await {
            Ok(vault) => {
                log::info!(
                    "[RECOVERY] matched vault for {}",
                    shorten_address(&vault.wallet_address)
                );
                return RecoveryState::Matched(RecoveredWallet {
                    wallet_address: vault.wallet_address,
                    handle: vault.handle,
                    secret: Some(Arc::new(vault.secret)),
                    source: RecoverySource::Vault,
                });
            }
            Err(MiniPayError::NotFound(_)) => {}
            Err(err @ MiniPayError::BackendUnavailable(_)) => {
                log::warn!("[RECOVERY] vault store unreachable, trying identity registry: {err}");
                outage = Some(err);
            }
            Err(err) => {
                log::error!("[RECOVERY] vault present but unusable: {err}");
                return RecoveryState::Unavailable(err.to_string());
            }
        }

        match self.identities.lookup(nullifier).await {
            Ok(binding) => {
                log::info!(
                    "[RECOVERY] matched identity for {}",
                    shorten_address(&binding.wallet_address)
                );
                RecoveryState::Matched(RecoveredWallet {
                    wallet_address: binding.wallet_address,
                    handle: binding.handle,
                    secret: None,
                    source: RecoverySource::IdentityRegistry,
                })
            }
            Err(MiniPayError::NotFound(_)) => match outage {
                Some(err) => RecoveryState::Unavailable(err.to_string()),
                None => {
                    log::info!("[RECOVERY] no wallet linked to this identity");
                    RecoveryState::NotFound
                }
            },
            Err(err) => {
                log::warn!("[RECOVERY] identity lookup failed: {err}");
                RecoveryState::Unavailable(err.to_string())
            }
        }
    }

    fn transition(&self, next: RecoveryState) {
        let previous = self.state.send_replace(next);
        log::debug!("[RECOVERY] {previous:?} -> {:?}", *self.state.borrow());
    }

    fn notify(&self) {
        let state = self.status();
        for listener in &self.listeners {
            match &state {
                RecoveryState::Matched(wallet) => listener.on_matched(wallet),
                RecoveryState::NotFound => listener.on_not_found(),
                RecoveryState::Unavailable(reason) => listener.on_unavailable(reason),
                RecoveryState::Idle | RecoveryState::Verifying => {}
            }
        }
    }
}
