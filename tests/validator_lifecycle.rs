//! Validator lifecycle: background task, stop/restart and concurrent access.

mod common;

use common::{epoch, license_key, ScriptedServer, ServerMode, TEST_PUBLIC_KEY_HEX};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tierwarden::store::{FileStore, LicenseKeyStore, MemoryKeyStore};
use tierwarden::{MockClock, Tier, TierwardenError, Validator, ValidatorConfig};

fn fast_config() -> ValidatorConfig {
    let mut config = ValidatorConfig::new(
        TEST_PUBLIC_KEY_HEX,
        "https://license.example.com",
        "backup-manager",
    );
    config.revalidation_interval = Duration::from_millis(20);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_task_ticks_until_stopped() {
    let server = Arc::new(ScriptedServer::new(ServerMode::Valid));
    let validator = Validator::new(
        fast_config(),
        server.clone(),
        Arc::new(MemoryKeyStore::new()),
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();

    validator
        .set_license_key(&license_key("cus_1", None, Tier::Pro, 1, 365))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.calls() >= 1);

    validator.stop().await;
    let after_stop = server.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.calls(), after_stop);
    assert!(!validator.is_running().await);
}

#[tokio::test]
async fn deactivate_then_reactivate() {
    let server = Arc::new(ScriptedServer::new(ServerMode::Valid));
    let validator = Validator::new(
        fast_config(),
        server,
        Arc::new(MemoryKeyStore::new()),
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();

    validator
        .set_license_key(&license_key("cus_1", None, Tier::Pro, 1, 365))
        .await
        .unwrap();

    validator.stop().await;
    validator.clear_license_key().await.unwrap();
    assert_eq!(validator.current_tier(), Tier::Free);
    assert!(matches!(
        validator
            .set_license_key(&license_key("cus_1", None, Tier::Enterprise, 2, 365))
            .await,
        Err(TierwardenError::ValidatorStopped)
    ));

    validator.restart();
    validator
        .set_license_key(&license_key("cus_1", None, Tier::Enterprise, 2, 365))
        .await
        .unwrap();
    assert_eq!(validator.current_tier(), Tier::Enterprise);
    assert!(validator.is_running().await);

    validator.stop().await;
}

#[tokio::test]
async fn key_survives_restart_via_file_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::with_path(temp_dir.path().join("licenses")).unwrap());
    let raw = license_key("cus_2", None, Tier::Enterprise, 3, 365);

    let first = Validator::new(
        fast_config(),
        Arc::new(ScriptedServer::new(ServerMode::Valid)),
        store.clone(),
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();
    first.set_license_key(&raw).await.unwrap();
    first.stop().await;
    assert_eq!(store.load_key().unwrap().as_deref(), Some(raw.as_str()));

    let second = Validator::new(
        fast_config(),
        Arc::new(ScriptedServer::new(ServerMode::Valid)),
        store,
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();
    let restored = second.load_persisted().await.unwrap().unwrap();
    assert_eq!(restored.tier(), Tier::Enterprise);
    assert_eq!(second.current_tier(), Tier::Enterprise);
    second.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_torn_license() {
    let validator = Arc::new(
        Validator::new(
            fast_config(),
            Arc::new(ScriptedServer::new(ServerMode::Valid)),
            Arc::new(MemoryKeyStore::new()),
            Arc::new(MockClock::new(epoch())),
        )
        .unwrap(),
    );
    let pro = license_key("cus_pro", None, Tier::Pro, 1, 365);
    let enterprise = license_key("cus_ent", None, Tier::Enterprise, 1, 365);
    validator.set_license_key(&pro).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..3 {
        let validator = validator.clone();
        let done = done.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            let mut reads = 0u64;
            loop {
                let license = validator.get_license();
                let expected = match license.customer_id() {
                    "cus_pro" => Tier::Pro,
                    "cus_ent" => Tier::Enterprise,
                    other => panic!("unexpected customer {:?}", other),
                };
                assert_eq!(license.tier(), expected);
                reads += 1;
                if done.load(Ordering::SeqCst) {
                    return reads;
                }
            }
        }));
    }

    for i in 0..50 {
        let key = if i % 2 == 0 { &enterprise } else { &pro };
        validator.set_license_key(key).await.unwrap();
        let checker = validator.clone();
        tokio::task::spawn_blocking(move || checker.revalidate())
            .await
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    validator.stop().await;
}

#[tokio::test]
async fn rollback_guard_survives_clear_and_restart() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::with_path(temp_dir.path().join("licenses")).unwrap());

    let first = Validator::new(
        fast_config(),
        Arc::new(ScriptedServer::new(ServerMode::Valid)),
        store.clone(),
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();
    first
        .set_license_key(&license_key("cus_7", None, Tier::Enterprise, 5, 365))
        .await
        .unwrap();
    first.clear_license_key().await.unwrap();
    first.stop().await;
    drop(first);

    let second = Validator::new(
        fast_config(),
        Arc::new(ScriptedServer::new(ServerMode::Valid)),
        store,
        Arc::new(MockClock::new(epoch())),
    )
    .unwrap();
    assert!(second.load_persisted().await.unwrap().is_none());
    assert!(matches!(
        second
            .set_license_key(&license_key("cus_7", None, Tier::Enterprise, 4, 900))
            .await,
        Err(TierwardenError::StaleSequence {
            presented: 4,
            current: 5
        })
    ));
    second
        .set_license_key(&license_key("cus_7", None, Tier::Pro, 5, 365))
        .await
        .unwrap();
    second.stop().await;
}
