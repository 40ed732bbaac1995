use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use zkp_anon_membership::{
    config::Config,
    ethereum::normalize_addresses_batch,
    identity::{address_identity_from_str, raw_key_identity, IdentityMode},
    merkle::index_in_range,
    store::{DiskStore, Session},
    Hash, MerkleTree, PublicKey, TREE_DEPTH,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Maintain the club membership tree", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `[store] data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides `[store] namespace`.
    #[arg(long)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the member list with the rows of a file (one address or key per line).
    Update {
        #[arg(short, long)]
        rows: PathBuf,
    },
    /// Print the current root.
    Root,
    /// Print the Merkle proof JSON for a leaf.
    Proof {
        #[arg(short, long)]
        index: u64,
    },
}

fn row_identity(mode: IdentityMode, row: &str) -> Result<Hash> {
    match mode {
        IdentityMode::Address => address_identity_from_str(row),
        IdentityMode::RawKey => {
            let key = PublicKey::from_hex(row)
                .or_else(|_| {
                    let x: [u8; 32] = zkp_anon_membership::utils::decode_hex_array(row)?;
                    PublicKey::from_x_only(&x)
                        .ok_or_else(|| anyhow::anyhow!("x-only key is not on the curve"))
                })
                .with_context(|| format!("Invalid public key row '{row}'"))?;
            Ok(raw_key_identity(&key))
        }
    }
}

/// Lower-cases address rows and rejects repeats, which would give one
/// member two leaves.
fn normalize_address_rows(rows: &[String]) -> Result<Vec<String>> {
    let normalized = normalize_addresses_batch(rows)?;
    let mut seen = HashSet::new();
    for (i, address) in normalized.iter().enumerate() {
        if !seen.insert(address.as_str()) {
            return Err(anyhow::anyhow!(
                "Duplicate address at line {}: 0x{address}",
                i + 1
            ));
        }
    }
    Ok(normalized.into_iter().map(|a| format!("0x{a}")).collect())
}

fn read_rows(path: &PathBuf, max_size: u64) -> Result<Vec<String>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read rows file metadata: {}", path.display()))?;
    if metadata.len() > max_size {
        return Err(anyhow::anyhow!(
            "Rows file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_size
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rows file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load_optional(args.config.as_ref())?;
    if let Some(dir) = args.data_dir {
        config.store.data_dir = dir;
    }
    if let Some(namespace) = args.namespace {
        config.store.namespace = namespace;
    }

    let mut store = DiskStore::new(&config.store.data_dir, &config.store.namespace);
    debug!("Using store at {}", store.path().display());
    let session = Session::open(&mut store).context("Failed to open club store")?;

    match args.command {
        Command::Update { rows } => {
            let mut rows = read_rows(&rows, config.security.max_rows_file_size)?;
            if config.identity.mode == IdentityMode::Address {
                rows = normalize_address_rows(&rows)?;
            }
            if !index_in_range(rows.len().saturating_sub(1) as u64, TREE_DEPTH) {
                return Err(anyhow::anyhow!(
                    "{} rows do not fit in a tree of depth {}",
                    rows.len(),
                    TREE_DEPTH
                ));
            }

            let mut leaves = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let leaf = row_identity(config.identity.mode, row)
                    .with_context(|| format!("Invalid row {}", i + 1))?;
                leaves.push((i as u64, leaf));
            }

            let mut tree: MerkleTree<_> =
                MerkleTree::load_or_build(session).context("Failed to load club tree")?;

            // Rows removed since the last update go back to zero.
            let capacity = 1u64 << TREE_DEPTH;
            for index in rows.len() as u64..capacity {
                if tree.leaf(index)? != Hash::ZERO {
                    leaves.push((index, Hash::ZERO));
                }
            }

            tree.update_many(leaves).context("Failed to update club tree")?;

            let rows_copy = config
                .store
                .data_dir
                .join(format!("{}.rows.txt", config.store.namespace));
            fs::write(&rows_copy, rows.join("\n"))
                .with_context(|| format!("Failed to write {}", rows_copy.display()))?;

            info!("Club updated with {} members", rows.len());
            println!("Members: {}", rows.len());
            println!("Root: {}", tree.root());
            tree.into_store().close().context("Failed to close club store")?;
        }
        Command::Root => {
            let tree: MerkleTree<_> =
                MerkleTree::import(session).context("No club tree found; run `club update` first")?;
            println!("{}", tree.root());
        }
        Command::Proof { index } => {
            let tree: MerkleTree<_> =
                MerkleTree::import(session).context("No club tree found; run `club update` first")?;
            let proof = tree.prove(index)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&proof.to_json())
                    .context("Failed to serialize proof")?
            );
        }
    }

    Ok(())
}
