//! Integration tests for the key stores: persistence across reopen and
//! password-protected backup/restore.

use ircx_core::E2eeError;
use ircx_crypto::{generate_key, KdfParams};
use ircx_keystore::{KeyResolver, KeyStores};
use secrecy::SecretString;
use tempfile::TempDir;

/// Cheap Argon2 parameters so tests stay fast.
fn test_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

fn password(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

async fn paired() -> (KeyStores, KeyStores) {
    let alice = KeyStores::in_memory(test_kdf());
    let bob = KeyStores::in_memory(test_kdf());
    alice
        .dm
        .import_bundle("net1", "bob", &bob.dm.export_bundle().await.unwrap())
        .await
        .unwrap();
    bob.dm
        .import_bundle("net1", "alice", &alice.dm.export_bundle().await.unwrap())
        .await
        .unwrap();
    (alice, bob)
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("keys.store");
    let store_key = generate_key();

    let (fingerprint, channel_key) = {
        let stores = KeyStores::open_file(&path, store_key.clone(), test_kdf()).unwrap();
        stores.channels.generate_channel_key("#test", "net1").await.unwrap();
        (
            stores.dm.own_fingerprint().await.unwrap(),
            stores.channel_key("#test", "net1").await.unwrap(),
        )
    };

    let reopened = KeyStores::open_file(&path, store_key, test_kdf()).unwrap();
    assert_eq!(reopened.dm.own_fingerprint().await.unwrap(), fingerprint);
    assert_eq!(reopened.channel_key("#test", "net1").await.unwrap(), channel_key);
}

#[tokio::test]
async fn file_store_rejects_wrong_key() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("keys.store");
    {
        let stores = KeyStores::open_file(&path, generate_key(), test_kdf()).unwrap();
        stores.channels.generate_channel_key("#test", "net1").await.unwrap();
    }
    let result = KeyStores::open_file(&path, generate_key(), test_kdf());
    assert!(matches!(result, Err(E2eeError::DecryptFailed)));
}

#[tokio::test]
async fn backup_restores_everything_on_fresh_device() {
    let (alice, bob) = paired().await;
    alice.channels.generate_channel_key("#test", "net1").await.unwrap();
    alice.channels.generate_channel_key("#dev", "net2").await.unwrap();
    alice.dm.set_verified_for_network("net1", "bob", true).await.unwrap();

    let backup = alice
        .backup
        .export_key_backup(&password("correct horse"))
        .await
        .unwrap();

    let restored = KeyStores::in_memory(test_kdf());
    let count = restored
        .backup
        .import_key_backup(&backup, &password("correct horse"))
        .await
        .unwrap();
    assert_eq!(count, 3, "one DM bundle plus two channel keys");

    assert_eq!(
        restored.dm.own_fingerprint().await.unwrap(),
        alice.dm.own_fingerprint().await.unwrap(),
        "identity travels with the backup"
    );
    assert_eq!(
        restored.channel_key("#dev", "net2").await.unwrap(),
        alice.channel_key("#dev", "net2").await.unwrap()
    );
    let bundle = restored.dm.get_bundle("net1", "bob").await.unwrap().unwrap();
    assert!(bundle.verified);

    // The restored device still talks to bob.
    assert_eq!(
        restored.dm_context("net1", "bob").await.unwrap().key,
        bob.dm_context("net1", "alice").await.unwrap().key
    );
}

#[tokio::test]
async fn backup_wrong_password_changes_nothing() {
    let (alice, _bob) = paired().await;
    alice.channels.generate_channel_key("#test", "net1").await.unwrap();
    let backup = alice.backup.export_key_backup(&password("right")).await.unwrap();

    let target = KeyStores::in_memory(test_kdf());
    let before = target.dm.own_fingerprint().await.unwrap();

    let err = target
        .backup
        .import_key_backup(&backup, &password("wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::DecryptFailed));

    assert_eq!(target.dm.own_fingerprint().await.unwrap(), before);
    assert!(target.dm.list_all_keys().await.unwrap().is_empty());
    assert!(target.channels.list_channel_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn backup_rejects_garbage() {
    let stores = KeyStores::in_memory(test_kdf());
    for bad in ["", "not base64 at all!", "eyJ2IjoxfQ=="] {
        let err = stores
            .backup
            .import_key_backup(bad, &password("pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eeError::InvalidFormat(_)), "{bad:?}: {err}");
    }
}

#[tokio::test]
async fn backup_tolerates_line_wrapping() {
    let stores = KeyStores::in_memory(test_kdf());
    stores.channels.generate_channel_key("#test", "net1").await.unwrap();
    let backup = stores.backup.export_key_backup(&password("pw")).await.unwrap();

    let wrapped = backup
        .as_bytes()
        .chunks(64)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("\n");

    let restored = KeyStores::in_memory(test_kdf());
    let count = restored
        .backup
        .import_key_backup(&wrapped, &password("pw"))
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn restore_replaces_existing_entries() {
    let source = KeyStores::in_memory(test_kdf());
    source.channels.generate_channel_key("#test", "net1").await.unwrap();
    let backup = source.backup.export_key_backup(&password("pw")).await.unwrap();

    let target = KeyStores::in_memory(test_kdf());
    target.channels.generate_channel_key("#test", "net1").await.unwrap();
    target.backup.import_key_backup(&backup, &password("pw")).await.unwrap();

    assert_eq!(
        target.channel_key("#test", "net1").await.unwrap(),
        source.channel_key("#test", "net1").await.unwrap()
    );
    assert_eq!(target.channels.list_channel_keys().await.unwrap().len(), 1);
}

#[tokio::test]
async fn copy_and_move_never_replace_a_pinned_peer() {
    let (alice, bob) = paired().await;
    let impostor = KeyStores::in_memory(test_kdf());
    alice
        .dm
        .import_bundle("net2", "bob", &impostor.dm.export_bundle().await.unwrap())
        .await
        .unwrap();

    let err = alice
        .dm
        .copy_bundle_to_network("net2", "net1", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::KeyChanged { .. }));
    let err = alice
        .dm
        .move_bundle_to_network("net2", "net1", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::KeyChanged { .. }));

    // net1 still talks to the real bob.
    assert_eq!(
        alice.dm.fingerprint("net1", "bob").await.unwrap(),
        bob.dm.own_fingerprint().await.unwrap()
    );
    assert!(alice.dm.has_bundle("net2", "bob").await.unwrap());

    // Re-pairing is the explicit override.
    alice
        .dm
        .repair_bundle("net1", "bob", &impostor.dm.export_bundle().await.unwrap())
        .await
        .unwrap();
    alice
        .dm
        .copy_bundle_to_network("net2", "net1", "bob")
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_persist_leaves_no_partial_state() {
    let (alice, _bob) = paired().await;
    alice.channels.generate_channel_key("#test", "net1").await.unwrap();
    let backup = alice
        .backup
        .export_key_backup(&password("pw"))
        .await
        .unwrap();

    let tmp = TempDir::new().unwrap();
    // A regular file where the store's directory should be.
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a dir").unwrap();
    let stores =
        KeyStores::open_file(&blocker.join("keys.store"), generate_key(), test_kdf()).unwrap();

    let err = stores
        .backup
        .import_key_backup(&backup, &password("pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::WriteFailed { .. }));
    assert!(!stores.channels.has_channel_key("#test", "net1").await.unwrap());
    assert!(!stores.dm.has_bundle("net1", "bob").await.unwrap());

    let err = stores
        .channels
        .generate_channel_key("#other", "net1")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::WriteFailed { .. }));
    assert!(!stores.channels.has_channel_key("#other", "net1").await.unwrap());
}
