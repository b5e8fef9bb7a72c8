//! Publishing snapshot files and following them from a second store
//!
//! Run with: cargo run --example local_replication

use datalayer_core::{DataStore, LocalDirSource, ReplicationOptions};
use datalayer_crypto::Bytes32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let folder = std::env::temp_dir().join("datalayer-demo");
    let tree_id = Bytes32::new([0x02; 32]);

    let publisher = DataStore::memory();
    publisher.create_tree(tree_id).await?;
    for i in 0u8..5 {
        publisher
            .autoinsert(tree_id, format!("key-{i}").into_bytes(), vec![i])
            .await?;
    }

    let latest = publisher.get_tree_root(tree_id).await?;
    let mut roots = Vec::new();
    for generation in 1..=latest.generation {
        let (full, delta) = publisher
            .write_files_for_root(tree_id, generation, &folder)
            .await?;
        println!("wrote {} and {}", full.display(), delta.display());
        roots.push(publisher.get_tree_root_at(tree_id, generation).await?.node_hash);
    }

    let subscriber = DataStore::memory();
    subscriber.create_tree(tree_id).await?;
    let applied = subscriber
        .apply_delta(
            tree_id,
            0,
            &roots,
            &LocalDirSource::new(&folder),
            &ReplicationOptions::default(),
        )
        .await?;
    println!("\napplied {} generations", applied.len());

    let mirrored = subscriber.get_tree_root(tree_id).await?;
    println!(
        "publisher {:?}\nsubscriber {:?}",
        latest.node_hash, mirrored.node_hash
    );
    Ok(())
}
