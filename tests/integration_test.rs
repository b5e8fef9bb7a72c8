//! Integration tests for the Data Layer
//!
//! These tests verify end-to-end behavior across the store, core, client and CLI crates.

use bytes::Bytes;
use datalayer_cli::commands::HexArg;
use datalayer_cli::{run, AppState, Command, DataLayerConfig};
use datalayer_core::{
    Change, DataStore, DiffEntry, ErrorKind, LocalDirSource, ReplicationOptions,
};
use datalayer_crypto::{internal_hash, leaf_hash, Bytes32};
use datalayer_store::{Side, SqliteConfig};
use tempfile::TempDir;

const TREE_ID: Bytes32 = Bytes32::new([0x11; 32]);

/// Insert, branch, diff and delete, then reopen the database
#[test_log::test(tokio::test)]
async fn test_scenario_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.sqlite");

    let (r1, r2) = {
        let store = DataStore::open_sqlite(&path).await.unwrap();
        store.create_tree(TREE_ID).await.unwrap();

        let a = store
            .insert(TREE_ID, &b"a"[..], vec![0x00, 0x01], None, None)
            .await
            .unwrap();
        let r1 = store.get_tree_root(TREE_ID).await.unwrap();
        assert_eq!(r1.generation, 1);
        assert_eq!(r1.node_hash, Some(a));

        store
            .insert(TREE_ID, &b"b"[..], vec![0x03, 0x05], Some(a), Some(Side::Right))
            .await
            .unwrap();
        let r2 = store.get_tree_root(TREE_ID).await.unwrap();
        assert_eq!(
            r2.node_hash,
            Some(internal_hash(
                &leaf_hash(b"a", &[0x00, 0x01]),
                &leaf_hash(b"b", &[0x03, 0x05])
            ))
        );

        let diff = store
            .get_kv_diff(TREE_ID, r1.node_hash, r2.node_hash)
            .await
            .unwrap();
        assert_eq!(diff, vec![DiffEntry::insert(&b"b"[..], vec![0x03, 0x05])]);

        store.delete(TREE_ID, b"b").await.unwrap();
        (r1, r2)
    };

    let store = DataStore::open_sqlite(&path).await.unwrap();
    let latest = store.get_tree_root(TREE_ID).await.unwrap();
    assert_eq!(latest.generation, 3);
    assert_eq!(latest.node_hash, r1.node_hash);
    assert_eq!(store.get_tree_root_at(TREE_ID, 2).await.unwrap(), r2);
    assert_eq!(
        store.get_keys(TREE_ID, r2.node_hash).await.unwrap(),
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
    );
    store.check_integrity().await.unwrap();
}

/// Files written by one store rebuild the same history in another
#[tokio::test]
async fn test_replication_through_folder() {
    let dir = TempDir::new().unwrap();
    let publisher = DataStore::memory();
    publisher.create_tree(TREE_ID).await.unwrap();
    for i in 0u8..6 {
        publisher.autoinsert(TREE_ID, vec![i], vec![i; 3]).await.unwrap();
    }
    publisher
        .batch_update(
            TREE_ID,
            vec![Change::delete(vec![2u8]), Change::insert(vec![9u8], vec![9u8])],
        )
        .await
        .unwrap();
    publisher.delete(TREE_ID, &[0]).await.unwrap();

    let latest = publisher.get_tree_root(TREE_ID).await.unwrap();
    let mut hashes = Vec::new();
    for generation in 1..=latest.generation {
        publisher
            .write_files_for_root(TREE_ID, generation, dir.path())
            .await
            .unwrap();
        hashes.push(
            publisher
                .get_tree_root_at(TREE_ID, generation)
                .await
                .unwrap()
                .node_hash,
        );
    }

    let db = TempDir::new().unwrap();
    let subscriber = DataStore::open_sqlite(db.path().join("sub.sqlite")).await.unwrap();
    subscriber.create_tree(TREE_ID).await.unwrap();
    subscriber
        .apply_delta(
            TREE_ID,
            0,
            &hashes,
            &LocalDirSource::new(dir.path()),
            &ReplicationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        subscriber.get_roots_history(TREE_ID).await.unwrap(),
        publisher.get_roots_history(TREE_ID).await.unwrap()
    );
    subscriber.check_integrity().await.unwrap();

    // A single full file is enough for the latest pair set
    let full = publisher.export_full(TREE_ID, latest.generation).await.unwrap();
    let snapshot = DataStore::memory();
    snapshot.create_tree(TREE_ID).await.unwrap();
    snapshot
        .apply_full(TREE_ID, latest.node_hash, full)
        .await
        .unwrap();
    assert_eq!(
        snapshot.get_keys_values(TREE_ID, None).await.unwrap(),
        publisher.get_keys_values(TREE_ID, None).await.unwrap()
    );
}

/// A batch lands on the same root as the same inserts one at a time
#[tokio::test]
async fn test_batch_matches_sequential_autoinsert() {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0u8..12).map(|i| (vec![i, i], vec![0xf0 | i])).collect();

    let sequential = DataStore::memory();
    sequential.create_tree(TREE_ID).await.unwrap();
    for (key, value) in &pairs {
        sequential
            .autoinsert(TREE_ID, key.clone(), value.clone())
            .await
            .unwrap();
    }

    let batched = DataStore::memory();
    batched.create_tree(TREE_ID).await.unwrap();
    let changes = pairs
        .iter()
        .map(|(key, value)| Change::insert(key.clone(), value.clone()))
        .collect();
    batched.batch_update(TREE_ID, changes).await.unwrap();

    let a = sequential.get_tree_root(TREE_ID).await.unwrap();
    let b = batched.get_tree_root(TREE_ID).await.unwrap();
    assert_eq!(a.node_hash, b.node_hash);
    assert_eq!(a.generation, 12);
    assert_eq!(b.generation, 1);
}

#[tokio::test]
async fn test_error_kinds() {
    let store = DataStore::memory();
    let err = store.get_tree_root(TREE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    store.create_tree(TREE_ID).await.unwrap();
    store.autoinsert(TREE_ID, &b"k"[..], &b"v"[..]).await.unwrap();
    let err = store
        .autoinsert(TREE_ID, &b"k"[..], &b"other"[..])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(store.get_tree_generation(TREE_ID).await.unwrap(), 1);
}

/// CLI commands against a database file, across two process-like sessions
#[tokio::test]
async fn test_cli_state_persists() {
    let dir = TempDir::new().unwrap();
    let config = DataLayerConfig {
        database: SqliteConfig::file(dir.path().join("cli.sqlite")),
        ..Default::default()
    };

    {
        let state = AppState::new(config.clone()).await.unwrap();
        assert!(state.store.backend().is_persistent());
        run(&state, Command::CreateTree { tree_id: TREE_ID }).await.unwrap();
        run(
            &state,
            Command::Insert {
                tree_id: TREE_ID,
                key: HexArg(Bytes::from_static(b"name")),
                value: HexArg(Bytes::from_static(b"datalayer")),
                reference: None,
                side: None,
            },
        )
        .await
        .unwrap();
    }

    let state = AppState::new(config).await.unwrap();
    let value = run(
        &state,
        Command::GetValue {
            tree_id: TREE_ID,
            key: HexArg(Bytes::from_static(b"name")),
        },
    )
    .await
    .unwrap();
    assert_eq!(value["value"], serde_json::json!(hex::encode(b"datalayer")));

    let trees = run(&state, Command::Trees).await.unwrap();
    assert_eq!(trees, serde_json::json!([TREE_ID]));
}
