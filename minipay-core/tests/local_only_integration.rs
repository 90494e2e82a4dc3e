use std::sync::Arc;

use minipay_core::storage::{durable_store_for, FileKeyValueStore, KeyValueStore};
use minipay_core::{
    derive_keypair, DurableBackendConfig, IdentityRegistry, MiniPayConfig, StorageMode,
    VaultService,
};
use secrecy::ExposeSecret;

fn local_only_config() -> MiniPayConfig {
    MiniPayConfig {
        durable: Some(DurableBackendConfig {
            url: "https://your-project.supabase.co".to_string(),
            api_key: "placeholder".to_string(),
        }),
        ..MiniPayConfig::default()
    }
}

#[tokio::test]
async fn test_placeholder_backend_falls_back_to_local_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache: Arc<dyn KeyValueStore> =
        Arc::new(FileKeyValueStore::open(dir.path()).expect("open cache"));
    let config = local_only_config();
    assert_eq!(config.storage_mode(), StorageMode::LocalOnly);

    let vaults = VaultService::from_config(&config, cache.clone()).expect("vault service");
    assert_eq!(vaults.mode(), StorageMode::LocalOnly);

    let keypair = derive_keypair("credential-local").expect("derive");
    vaults
        .upload("777", &keypair.secret_seed(), &keypair.public_address(), None)
        .await
        .expect("upload");

    assert!(!cache
        .keys_with_prefix("durable/encrypted_vaults/")
        .expect("keys")
        .is_empty());
}

#[tokio::test]
async fn test_local_only_tables_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = local_only_config();
    let keypair = derive_keypair("credential-local").expect("derive");
    let address = keypair.public_address();

    {
        let cache: Arc<dyn KeyValueStore> =
            Arc::new(FileKeyValueStore::open(dir.path()).expect("open cache"));
        let durable = durable_store_for(&config, cache.clone()).expect("durable");
        let identities = IdentityRegistry::new(cache.clone(), durable.clone());
        identities.bind("777", &address, None).await.expect("bind");
        VaultService::new(durable, StorageMode::LocalOnly)
            .upload("777", &keypair.secret_seed(), &address, None)
            .await
            .expect("upload");
    }

    let cache: Arc<dyn KeyValueStore> =
        Arc::new(FileKeyValueStore::open(dir.path()).expect("reopen cache"));
    let durable = durable_store_for(&config, cache.clone()).expect("durable");
    let identities = IdentityRegistry::new(cache, durable.clone());

    assert_eq!(
        identities.lookup("777").await.expect("lookup").wallet_address,
        address
    );
    let recovered = VaultService::new(durable, StorageMode::LocalOnly)
        .download("777")
        .await
        .expect("download");
    assert_eq!(
        recovered.secret.expose_secret(),
        keypair.secret_seed().expose_secret()
    );
}
