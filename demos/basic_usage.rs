//! Basic usage of a Data Layer store
//!
//! This demo shows:
//! - Creating a tree and inserting pairs
//! - Reading historical roots
//! - Proofs of inclusion and diffs
//!
//! Run with: cargo run --example basic_usage

use datalayer_core::{Change, DataStore};
use datalayer_crypto::Bytes32;
use datalayer_store::Side;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = DataStore::memory();
    let tree_id = Bytes32::new([0x01; 32]);
    store.create_tree(tree_id).await?;

    println!("Inserting pairs...");
    let apple = store.autoinsert(tree_id, &b"apple"[..], &b"red"[..]).await?;
    store
        .insert(tree_id, &b"banana"[..], &b"yellow"[..], Some(apple), Some(Side::Right))
        .await?;
    let before = store.get_tree_root(tree_id).await?;
    println!("   root {:?} at generation {}", before.node_hash, before.generation);

    println!("\nApplying a batch...");
    store
        .batch_update(
            tree_id,
            vec![
                Change::insert(&b"cherry"[..], &b"dark red"[..]),
                Change::delete(&b"apple"[..]),
            ],
        )
        .await?;
    let after = store.get_tree_root(tree_id).await?;
    println!("   root {:?} at generation {}", after.node_hash, after.generation);

    println!("\nProof for 'banana':");
    let proof = store
        .get_proof_of_inclusion_by_key(tree_id, b"banana")
        .await?;
    println!("{}", serde_json::to_string_pretty(&proof)?);
    println!("   valid: {}", proof.is_valid());

    println!("\nChanges between generation {} and {}:", before.generation, after.generation);
    for entry in store
        .get_kv_diff(tree_id, before.node_hash, after.node_hash)
        .await?
    {
        println!(
            "   {:?} {} = {}",
            entry.op,
            String::from_utf8_lossy(&entry.key),
            String::from_utf8_lossy(&entry.value)
        );
    }

    Ok(())
}
