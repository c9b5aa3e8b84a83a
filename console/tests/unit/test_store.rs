//! On-disk record store

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use clusterctl::errors::ConsoleError;
use clusterctl::filesys::file::File;
use clusterctl::storage::store::{ConfigStore, FileConfigStore};

use crate::fakes::{cache_server, server};

fn store(dir: &TempDir) -> (File, FileConfigStore) {
    let file = File::new(dir.path().join("records.json"));
    (file.clone(), FileConfigStore::new(file))
}

#[tokio::test]
async fn test_missing_file_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    let (_, store) = store(&dir);

    let records = store.read().await.unwrap();
    assert!(records.servers.is_empty());
    assert!(records.cache_servers.is_empty());
    assert!(records.settings.use_ldap_cache);
}

#[tokio::test]
async fn test_saved_records_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    let (file, store) = store(&dir);

    store
        .save_server(&server(1, "gluu-1.example.org", "10.0.5.1", true))
        .await
        .unwrap();
    store
        .save_cache_server(&cache_server(1, "cache-1.example.org", "10.0.5.9", true, "s3cret"))
        .await
        .unwrap();
    let mut settings = store.fleet_settings().await.unwrap();
    settings.offline = true;
    store.save_fleet_settings(&settings).await.unwrap();

    let reopened = FileConfigStore::new(file);
    let records = reopened.read().await.unwrap();
    assert_eq!(records.servers.len(), 1);
    assert_eq!(records.cache_servers[0].redis_password(), "s3cret");
    assert!(records.settings.offline);

    let ctx = reopened.fleet_context().await.unwrap();
    assert_eq!(ctx.primary_cache.unwrap().id, 1);
}

#[tokio::test]
async fn test_save_replaces_by_id() {
    let dir = TempDir::new().unwrap();
    let (_, store) = store(&dir);

    let mut s = server(1, "gluu-1.example.org", "10.0.5.1", true);
    assert_ok!(store.save_server(&s).await);
    s.installed = true;
    assert_ok!(store.save_server(&s).await);

    let servers = store.servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert!(servers[0].installed);
}

#[tokio::test]
async fn test_invalid_record_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (_, store) = store(&dir);

    let result = store
        .save_server(&server(1, "gluu-1.example.org", "not-an-ip", true))
        .await;
    assert!(matches!(result, Err(ConsoleError::ValidationError(_))));
    assert!(store.servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_file_is_a_storage_error() {
    let dir = TempDir::new().unwrap();
    let (file, store) = store(&dir);
    file.write_string("{ not json").await.unwrap();

    assert!(matches!(
        store.read().await,
        Err(ConsoleError::StorageError(_))
    ));
}

#[tokio::test]
async fn test_missing_server_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_, store) = store(&dir);
    assert_err!(store.cache_server(42).await);
    assert!(matches!(
        store.server(42).await,
        Err(ConsoleError::NotFound(_))
    ));
}
