#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! `MiniPay` core: passkey-derived Stellar wallets, identity-bound recovery,
//! encrypted cross-device vaults and payment handles.
//!
//! Every registry and service receives its stores by injection (see [`storage`]),
//! so the same code runs against an in-memory store in tests, a JSON file on a
//! device, or a remote PostgREST backend.

mod config;
pub use config::*;

mod error;
pub use error::*;

pub mod handles;
pub use handles::{HandleBinding, HandleRegistry, RegisterOutcome};

pub mod identity;
pub use identity::{BindReceipt, BindStatus, IdentityBinding, IdentityRegistry};

pub mod keys;
pub use keys::{derive_keypair, WalletKeypair};

/// Bridge for host applications to receive core logs.
pub mod logger;

pub mod payments;

pub mod recovery;
pub use recovery::{RecoveryOrchestrator, RecoveryState};

pub mod storage;

pub mod vault;
pub use vault::VaultService;

// private modules
mod http_request;
mod utils;

pub use utils::now_unix;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("minipay_core");
