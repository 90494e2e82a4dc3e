//! Stores and services shared by every subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{eyre, WrapErr as _};
use minipay_core::storage::{durable_store_for, FileKeyValueStore, KeyValueStore};
use minipay_core::{
    HandleRegistry, IdentityRegistry, MiniPayConfig, RecoveryOrchestrator, VaultService,
};

pub struct App {
    pub config: MiniPayConfig,
    pub data_dir: PathBuf,
    pub identities: Arc<IdentityRegistry>,
    pub vaults: Arc<VaultService>,
    pub handles: Arc<HandleRegistry>,
}

impl App {
    /// Opens the device cache under `data_dir` and wires the durable store
    /// selected by `config`.
    pub fn open(mut config: MiniPayConfig, data_dir: Option<PathBuf>) -> eyre::Result<Self> {
        let data_dir = match data_dir.or_else(|| config.data_dir.clone()) {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .map(|dir| dir.join("minipay"))
                .ok_or_else(|| eyre!("no data directory; pass --data-dir"))?,
        };
        config.data_dir = Some(data_dir.clone());

        let cache: Arc<dyn KeyValueStore> = Arc::new(
            FileKeyValueStore::open(&data_dir)
                .wrap_err_with(|| format!("opening cache in {}", data_dir.display()))?,
        );
        let durable = durable_store_for(&config, cache.clone())?;
        tracing::debug!(
            mode = %config.storage_mode(),
            environment = %config.environment,
            data_dir = %data_dir.display(),
            "storage ready"
        );

        Ok(Self {
            identities: Arc::new(IdentityRegistry::new(cache.clone(), durable.clone())),
            vaults: Arc::new(VaultService::new(durable.clone(), config.storage_mode())),
            handles: Arc::new(HandleRegistry::new(cache, durable)),
            data_dir,
            config,
        })
    }

    pub fn orchestrator(&self) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(self.vaults.clone(), self.identities.clone())
    }

    /// Waits for background durable writes before the process exits.
    pub async fn finish(&self) {
        self.handles.wait_for_sync().await;
    }
}
