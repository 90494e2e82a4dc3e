//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use minipay_core::storage::{FileKeyValueStore, KeyValueStore, MemoryDurableStore};
use minipay_core::{HandleRegistry, IdentityRegistry, RecoveryOrchestrator, VaultService};
use minipay_core::StorageMode;
use serde_json::{json, Value};
use tempfile::TempDir;

/// One simulated device: its own on-device cache, sharing the durable store.
pub struct Device {
    pub dir: TempDir,
    pub cache: Arc<FileKeyValueStore>,
    pub identities: Arc<IdentityRegistry>,
    pub vaults: Arc<VaultService>,
    pub handles: Arc<HandleRegistry>,
}

impl Device {
    pub fn new(durable: &Arc<MemoryDurableStore>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(FileKeyValueStore::open(dir.path()).expect("open cache"));
        let cache_dyn: Arc<dyn KeyValueStore> = cache.clone();

        Self {
            identities: Arc::new(IdentityRegistry::new(cache_dyn.clone(), durable.clone())),
            vaults: Arc::new(VaultService::new(durable.clone(), StorageMode::Remote)),
            handles: Arc::new(HandleRegistry::new(cache_dyn, durable.clone())),
            cache,
            dir,
        }
    }

    pub fn orchestrator(&self) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(self.vaults.clone(), self.identities.clone())
    }
}

/// Proof shaped like the widget output: a one-element array whose `pcd` is a JSON string.
pub fn proof_for(nullifier: &str) -> Value {
    let pcd = json!({
        "type": "anon-aadhaar",
        "proof": {
            "nullifierSeed": "12345",
            "nullifier": nullifier,
            "timestamp": "1700000000",
        },
    });
    json!([{ "type": "anon-aadhaar-pcd", "pcd": pcd.to_string() }])
}

/// The same proof as [`proof_for`], wrapped in a single-keyed object `{"0": {...}}`.
pub fn keyed_proof_for(nullifier: &str) -> Value {
    let wrapper = proof_for(nullifier)[0].clone();
    json!({ "0": wrapper })
}
