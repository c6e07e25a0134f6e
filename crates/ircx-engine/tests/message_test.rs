//! Message Cipher behavior over real key stores: round trips, context
//! binding, tamper detection and DM key agreement.

use ircx_core::{ConversationRef, E2eeError};
use ircx_crypto::KdfParams;
use ircx_engine::{E2eeEngine, EncryptedPayload};
use ircx_keystore::KeyStores;
use proptest::prelude::*;

fn engine() -> E2eeEngine {
    let kdf = KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };
    E2eeEngine::new(KeyStores::in_memory(kdf), std::env::temp_dir())
}

async fn dm_pair() -> (E2eeEngine, E2eeEngine) {
    let alice = engine();
    let bob = engine();
    let alice_bundle = alice.stores().dm.export_bundle().await.unwrap();
    let bob_bundle = bob.stores().dm.export_bundle().await.unwrap();
    alice
        .stores()
        .dm
        .import_bundle("net1", "bob", &bob_bundle)
        .await
        .unwrap();
    bob.stores()
        .dm
        .import_bundle("net1", "Alice", &alice_bundle)
        .await
        .unwrap();
    (alice, bob)
}

#[tokio::test]
async fn channel_example_scenario() {
    let e = engine();
    e.stores()
        .channels
        .generate_channel_key("#test", "net1")
        .await
        .unwrap();

    let payload = e
        .messages()
        .encrypt_for_channel("hello", "#test", "net1")
        .await
        .unwrap();
    let plain = e
        .messages()
        .decrypt_for_channel(&payload, "#test", "net1")
        .await
        .unwrap();
    assert_eq!(plain, "hello");

    // Give #other the very same key: the AAD alone must reject the replay.
    let exported = e
        .stores()
        .channels
        .export_channel_key("#test", "net1")
        .await
        .unwrap();
    e.stores()
        .channels
        .import_channel_key("#other", "net1", &exported)
        .await
        .unwrap();
    let err = e
        .messages()
        .decrypt_for_channel(&payload, "#other", "net1")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::DecryptFailed));
}

#[tokio::test]
async fn channel_without_key_fails_closed() {
    let e = engine();
    let err = e
        .messages()
        .encrypt_for_channel("hello", "#nokey", "net1")
        .await
        .unwrap_err();
    assert!(err.is_missing_key());
    assert!(!e
        .should_encrypt(&ConversationRef::channel("net1", "#nokey"))
        .await
        .unwrap());
}

#[tokio::test]
async fn channel_shared_between_members() {
    let alice = engine();
    let bob = engine();
    alice
        .stores()
        .channels
        .generate_channel_key("#test", "net1")
        .await
        .unwrap();
    let exported = alice
        .stores()
        .channels
        .export_channel_key("#test", "net1")
        .await
        .unwrap();
    bob.stores()
        .channels
        .import_channel_key("#TEST", "NET1", &exported)
        .await
        .unwrap();

    let wire = alice
        .messages()
        .encrypt_for_channel("hi all", "#test", "net1")
        .await
        .unwrap()
        .to_wire();
    let payload = EncryptedPayload::from_wire(&wire).unwrap();
    let plain = bob
        .messages()
        .decrypt_for_channel(&payload, "#Test", "Net1")
        .await
        .unwrap();
    assert_eq!(plain, "hi all");
}

#[tokio::test]
async fn nonce_is_fresh_per_message() {
    let e = engine();
    e.stores()
        .channels
        .generate_channel_key("#test", "net1")
        .await
        .unwrap();
    let a = e
        .messages()
        .encrypt_for_channel("same", "#test", "net1")
        .await
        .unwrap();
    let b = e
        .messages()
        .encrypt_for_channel("same", "#test", "net1")
        .await
        .unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[tokio::test]
async fn tampered_payload_rejected() {
    let e = engine();
    e.stores()
        .channels
        .generate_channel_key("#test", "net1")
        .await
        .unwrap();
    let payload = e
        .messages()
        .encrypt_for_channel("do not alter", "#test", "net1")
        .await
        .unwrap();

    for i in 0..payload.ciphertext.len() {
        let mut bad = payload.clone();
        bad.ciphertext[i] ^= 0x80;
        let result = e.messages().decrypt_for_channel(&bad, "#test", "net1").await;
        assert!(matches!(result, Err(E2eeError::DecryptFailed)), "byte {i}");
    }
    for i in 0..payload.nonce.len() {
        let mut bad = payload.clone();
        bad.nonce[i] ^= 0x01;
        let result = e.messages().decrypt_for_channel(&bad, "#test", "net1").await;
        assert!(matches!(result, Err(E2eeError::DecryptFailed)), "nonce byte {i}");
    }
}

#[tokio::test]
async fn dm_round_trip_between_peers() {
    let (alice, bob) = dm_pair().await;
    assert!(alice
        .should_encrypt(&ConversationRef::query("net1", "bob"))
        .await
        .unwrap());

    let payload = alice
        .messages()
        .encrypt_for_dm("secret", "net1", "bob")
        .await
        .unwrap();
    let plain = bob
        .messages()
        .decrypt_for_dm(&payload, "net1", "alice")
        .await
        .unwrap();
    assert_eq!(plain, "secret");

    let reply = bob
        .messages()
        .encrypt_for_dm("got it", "net1", "alice")
        .await
        .unwrap();
    assert_eq!(
        alice
            .messages()
            .decrypt_for_dm(&reply, "net1", "bob")
            .await
            .unwrap(),
        "got it"
    );
}

#[tokio::test]
async fn dm_payload_bound_to_peers_and_network() {
    let (alice, bob) = dm_pair().await;
    let payload = alice
        .messages()
        .encrypt_for_dm("secret", "net1", "bob")
        .await
        .unwrap();

    // A third party cannot read it, and the peer cannot read it on
    // another network.
    let eve = engine();
    eve.stores()
        .dm
        .import_bundle(
            "net1",
            "alice",
            &alice.stores().dm.export_bundle().await.unwrap(),
        )
        .await
        .unwrap();
    let err = eve
        .messages()
        .decrypt_for_dm(&payload, "net1", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::DecryptFailed));

    bob.stores()
        .dm
        .copy_bundle_to_network("net1", "net2", "alice")
        .await
        .unwrap();
    let err = bob
        .messages()
        .decrypt_for_dm(&payload, "net2", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eeError::DecryptFailed));
}

#[tokio::test]
async fn dm_without_bundle_fails_closed() {
    let e = engine();
    let err = e
        .messages()
        .encrypt_for_dm("hi", "net1", "stranger")
        .await
        .unwrap_err();
    assert!(err.is_missing_key());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_channel_round_trip(text in ".{0,256}", channel in "#[a-z]{1,12}") {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let e = engine();
            e.stores().channels.generate_channel_key(&channel, "net1").await.unwrap();
            let payload = e.messages().encrypt_for_channel(&text, &channel, "net1").await.unwrap();
            let back = e.messages().decrypt_for_channel(&payload, &channel, "net1").await.unwrap();
            prop_assert_eq!(back, text.clone());

            let wrong = format!("{channel}x");
            e.stores().channels.generate_channel_key(&wrong, "net1").await.unwrap();
            let exported = e.stores().channels.export_channel_key(&channel, "net1").await.unwrap();
            e.stores().channels.import_channel_key(&wrong, "net1", &exported).await.unwrap();
            prop_assert!(e.messages().decrypt_for_channel(&payload, &wrong, "net1").await.is_err());
            Ok(())
        })?;
    }
}
