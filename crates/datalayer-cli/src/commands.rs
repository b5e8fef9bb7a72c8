//! Subcommands of the `datalayer` binary
//!
//! Every command prints one JSON document. Keys, values and hashes are hex.

use crate::state::AppState;
use bytes::Bytes;
use clap::{Subcommand, ValueEnum};
use datalayer_core::{Change, DeltaSource, LocalDirSource};
use datalayer_crypto::Bytes32;
use datalayer_store::{GenerationRange, Side};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// A hex encoded byte string argument, with or without `0x`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexArg(pub Bytes);

impl FromStr for HexArg {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(s)?.into()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SideArg {
    Left,
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an empty tree
    CreateTree { tree_id: Bytes32 },

    /// List every tree id
    Trees,

    /// Insert a key/value pair; placement is automatic without --reference
    Insert {
        tree_id: Bytes32,
        key: HexArg,
        value: HexArg,
        /// Terminal the new pair is placed next to
        #[arg(long, requires = "side")]
        reference: Option<Bytes32>,
        #[arg(long, value_enum, requires = "reference")]
        side: Option<SideArg>,
    },

    /// Delete a key
    Delete { tree_id: Bytes32, key: HexArg },

    /// Apply a JSON changelist as one generation
    Batch { tree_id: Bytes32, file: PathBuf },

    /// Read the value stored under a key
    GetValue { tree_id: Bytes32, key: HexArg },

    /// List every pair, left to right
    Keys {
        tree_id: Bytes32,
        /// Historical root to read instead of the latest
        #[arg(long)]
        root_hash: Option<Bytes32>,
    },

    /// Show the latest root, or the root at a generation
    Root {
        tree_id: Bytes32,
        #[arg(long)]
        generation: Option<u32>,
    },

    /// Show roots, newest first
    History {
        tree_id: Bytes32,
        /// Only the most recent N roots
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Pairs that differ between two roots
    Diff {
        tree_id: Bytes32,
        /// Defaults to the empty tree
        #[arg(long)]
        from: Option<Bytes32>,
        /// Defaults to the latest root
        #[arg(long)]
        to: Option<Bytes32>,
    },

    /// Proof of inclusion for a key under the latest root
    Proof { tree_id: Bytes32, key: HexArg },

    /// Ancestors of a node, nearest first
    Ancestors {
        tree_id: Bytes32,
        node_hash: Bytes32,
        #[arg(long)]
        root_hash: Option<Bytes32>,
    },

    /// Verify hashes, children and root logs of the whole store
    Check,

    /// Write the full and delta files for a generation
    Export {
        tree_id: Bytes32,
        generation: u32,
        folder: PathBuf,
    },

    /// Apply delta files for the given roots, from a folder or an HTTP mirror
    ApplyDelta {
        tree_id: Bytes32,
        /// Root hash of each next generation, in order; zeroes for an empty tree
        #[arg(long = "root", required = true)]
        roots: Vec<Bytes32>,
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        folder: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
    },
}

/// Run one command against the store
pub async fn run(state: &AppState, command: Command) -> anyhow::Result<Value> {
    let store = &state.store;
    let output = match command {
        Command::CreateTree { tree_id } => {
            store.create_tree(tree_id).await?;
            json!({ "tree_id": tree_id, "root": store.get_tree_root(tree_id).await? })
        }
        Command::Trees => json!(store.get_tree_ids().await?),
        Command::Insert {
            tree_id,
            key,
            value,
            reference,
            side,
        } => {
            let node_hash = match reference {
                Some(_) => {
                    store
                        .insert(tree_id, key.0, value.0, reference, side.map(Side::from))
                        .await?
                }
                None => store.autoinsert(tree_id, key.0, value.0).await?,
            };
            json!({ "node_hash": node_hash, "root": store.get_tree_root(tree_id).await? })
        }
        Command::Delete { tree_id, key } => {
            store.delete(tree_id, &key.0).await?;
            json!({ "root": store.get_tree_root(tree_id).await? })
        }
        Command::Batch { tree_id, file } => {
            let changes: Vec<Change> = serde_json::from_slice(&tokio::fs::read(&file).await?)?;
            let count = changes.len();
            store.batch_update(tree_id, changes).await?;
            info!(changes = count, "Batch applied");
            json!({ "changes": count, "root": store.get_tree_root(tree_id).await? })
        }
        Command::GetValue { tree_id, key } => {
            let value = store.get_value(tree_id, &key.0).await?;
            json!({ "key": hex::encode(&key.0), "value": hex::encode(value) })
        }
        Command::Keys { tree_id, root_hash } => {
            serde_json::to_value(store.get_keys_values(tree_id, root_hash).await?)?
        }
        Command::Root {
            tree_id,
            generation,
        } => {
            let root = match generation {
                Some(generation) => store.get_tree_root_at(tree_id, generation).await?,
                None => store.get_tree_root(tree_id).await?,
            };
            json!(root)
        }
        Command::History { tree_id, limit } => {
            let range = match limit {
                Some(limit) => GenerationRange::latest(limit),
                None => GenerationRange::all().descending(),
            };
            json!(store.get_history(tree_id, range).await?)
        }
        Command::Diff { tree_id, from, to } => {
            let to = match to {
                Some(hash) => Some(hash),
                None => store.get_tree_root(tree_id).await?.node_hash,
            };
            serde_json::to_value(store.get_kv_diff(tree_id, from, to).await?)?
        }
        Command::Proof { tree_id, key } => {
            let proof = store.get_proof_of_inclusion_by_key(tree_id, &key.0).await?;
            json!({
                "key": hex::encode(&key.0),
                "node_hash": proof.node_hash,
                "root_hash": proof.root_hash(),
                "sibling_sides": proof.sibling_sides_integer(),
                "layers": proof.layers,
                "valid": proof.is_valid(),
            })
        }
        Command::Ancestors {
            tree_id,
            node_hash,
            root_hash,
        } => {
            let ancestors = store.get_ancestors(tree_id, node_hash, root_hash).await?;
            let ancestors: Vec<Value> = ancestors
                .iter()
                .map(|node| json!({ "hash": node.hash(), "type": node.node_type() }))
                .collect();
            json!(ancestors)
        }
        Command::Check => {
            store.check_integrity().await?;
            json!({ "ok": true })
        }
        Command::Export {
            tree_id,
            generation,
            folder,
        } => {
            let (full, delta) = store.write_files_for_root(tree_id, generation, &folder).await?;
            json!({ "full": full, "delta": delta })
        }
        Command::ApplyDelta {
            tree_id,
            roots,
            folder,
            url,
        } => {
            if !store.get_tree_ids().await?.contains(&tree_id) {
                store.create_tree(tree_id).await?;
            }
            let source: Box<dyn DeltaSource> = match (folder, url) {
                (Some(folder), _) => Box::new(LocalDirSource::new(folder)),
                (None, Some(url)) => Box::new(state.client.source(&url)),
                (None, None) => anyhow::bail!("either --folder or --url is required"),
            };
            let roots: Vec<Option<Bytes32>> = roots.into_iter().map(Bytes32::into_option).collect();
            let generation = store.get_tree_generation(tree_id).await?;
            let options = state.client.config().replication_options();
            let applied = store
                .apply_delta(tree_id, generation, &roots, source.as_ref(), &options)
                .await?;
            json!({ "applied": applied, "root": store.get_tree_root(tree_id).await? })
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};
    use datalayer_crypto::leaf_hash;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    const TREE: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    async fn exec(state: &AppState, args: &[&str]) -> anyhow::Result<Value> {
        let cli = TestCli::try_parse_from(std::iter::once("datalayer").chain(args.iter().copied()))?;
        run(state, cli.command).await
    }

    #[test]
    fn test_cli_definition() {
        TestCli::command().debug_assert();
    }

    #[test]
    fn test_hex_arg() {
        assert_eq!("0x0a0b".parse::<HexArg>().unwrap().0.as_ref(), &[0x0a, 0x0b]);
        assert!("".parse::<HexArg>().unwrap().0.is_empty());
        assert!("xyz".parse::<HexArg>().is_err());
    }

    #[test]
    fn test_reference_requires_side() {
        let reference = "00".repeat(32);
        let result = TestCli::try_parse_from([
            "datalayer", "insert", TREE, "61", "01", "--reference", reference.as_str(),
        ]);
        assert!(result.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_insert_diff_delete() {
        let state = AppState::in_memory().await.unwrap();
        exec(&state, &["create-tree", TREE]).await.unwrap();

        let first = exec(&state, &["insert", TREE, "61", "0001"]).await.unwrap();
        let a = leaf_hash(b"a", &[0x00, 0x01]);
        assert_eq!(first["node_hash"], json!(a));
        assert_eq!(first["root"]["generation"], json!(1));
        let r1 = first["root"]["node_hash"].as_str().unwrap().to_string();

        let a_hex = a.to_hex();
        exec(
            &state,
            &["insert", TREE, "62", "0305", "--reference", a_hex.as_str(), "--side", "right"],
        )
        .await
        .unwrap();

        let diff = exec(&state, &["diff", TREE, "--from", r1.as_str()]).await.unwrap();
        assert_eq!(diff, json!([{ "op": "insert", "key": "62", "value": "0305" }]));

        let value = exec(&state, &["get-value", TREE, "62"]).await.unwrap();
        assert_eq!(value["value"], json!("0305"));

        let deleted = exec(&state, &["delete", TREE, "62"]).await.unwrap();
        assert_eq!(deleted["root"]["node_hash"], json!(r1));
        assert_eq!(deleted["root"]["generation"], json!(3));

        let history = exec(&state, &["history", TREE]).await.unwrap();
        assert_eq!(history.as_array().unwrap().len(), 4);
        let latest = exec(&state, &["history", TREE, "--limit", "2"]).await.unwrap();
        assert_eq!(latest[0]["generation"], json!(3));
        assert_eq!(latest[1]["generation"], json!(2));
        assert_eq!(latest.as_array().unwrap().len(), 2);
        assert_eq!(exec(&state, &["check"]).await.unwrap(), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_batch_and_proof() {
        let dir = tempfile::tempdir().unwrap();
        let changelist = dir.path().join("changes.json");
        tokio::fs::write(
            &changelist,
            r#"[
                {"action": "insert", "key": "01", "value": "aa"},
                {"action": "insert", "key": "02", "value": "bb"},
                {"action": "insert", "key": "03", "value": "cc"}
            ]"#,
        )
        .await
        .unwrap();

        let state = AppState::in_memory().await.unwrap();
        exec(&state, &["create-tree", TREE]).await.unwrap();
        let batch = exec(&state, &["batch", TREE, changelist.to_str().unwrap()])
            .await
            .unwrap();
        assert_eq!(batch["changes"], json!(3));
        assert_eq!(batch["root"]["generation"], json!(1));

        let keys = exec(&state, &["keys", TREE]).await.unwrap();
        assert_eq!(keys.as_array().unwrap().len(), 3);

        let proof = exec(&state, &["proof", TREE, "02"]).await.unwrap();
        assert_eq!(proof["valid"], json!(true));
        assert_eq!(proof["root_hash"], batch["root"]["node_hash"]);
    }

    #[tokio::test]
    async fn test_export_then_apply_from_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_str().unwrap();

        let publisher = AppState::in_memory().await.unwrap();
        exec(&publisher, &["create-tree", TREE]).await.unwrap();
        let mut roots = Vec::new();
        for (generation, key) in ["0a", "0b", "0c"].iter().enumerate() {
            let out = exec(&publisher, &["insert", TREE, key, "ff"]).await.unwrap();
            roots.push(out["root"]["node_hash"].as_str().unwrap().to_string());
            let generation = (generation + 1).to_string();
            exec(&publisher, &["export", TREE, generation.as_str(), folder])
                .await
                .unwrap();
        }

        let subscriber = AppState::in_memory().await.unwrap();
        let mut args = vec!["apply-delta", TREE, "--folder", folder];
        for root in &roots {
            args.extend(["--root", root.as_str()]);
        }
        let out = exec(&subscriber, &args).await.unwrap();

        assert_eq!(out["applied"].as_array().unwrap().len(), 3);
        assert_eq!(out["root"]["node_hash"], json!(roots[2]));
        assert_eq!(
            exec(&subscriber, &["keys", TREE]).await.unwrap(),
            exec(&publisher, &["keys", TREE]).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_tree_is_an_error() {
        let state = AppState::in_memory().await.unwrap();
        let err = exec(&state, &["root", TREE]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
