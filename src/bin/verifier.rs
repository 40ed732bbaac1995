use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::fs;
use std::io::{BufRead, BufReader, Seek, Write};
use std::path::{Path, PathBuf};
use zkp_anon_membership::{
    config::Config,
    ethereum::eip191_hash,
    oracle::SlipContext,
    predicate::{evaluate, evaluate_vote, SlipWitness},
    store::{DiskStore, Session},
    MerkleProof, MerkleTree, PublicKey, Submission, TREE_DEPTH,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Check an anonymous club submission", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    namespace: Option<String>,

    #[arg(short, long)]
    submission_file: PathBuf,

    /// Oracle public key trusted for slips (hex).
    #[arg(long)]
    oracle_public_key: Option<String>,

    /// Proposal the attached slip must be bound to.
    #[arg(long)]
    proposal: Option<String>,
}

/// Appends `slip_id` to the replay log, failing if it is already there.
fn check_and_add_slip(slip_file: &Path, slip_id: &str) -> Result<()> {
    let normalized = slip_id.trim().to_lowercase();

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(slip_file)
        .context("Failed to open slip replay file")?;

    let reader = BufReader::new(&file);
    for line in reader.lines() {
        let line = line.context("Failed to read line from slip replay file")?;
        if line.trim().to_lowercase() == normalized {
            return Err(anyhow::anyhow!(
                "Slip already used: replay of {normalized} rejected"
            ));
        }
    }

    let mut writer = std::io::BufWriter::new(&file);
    writer
        .seek(std::io::SeekFrom::End(0))
        .context("Failed to seek to end of file")?;
    writer
        .write_all(normalized.as_bytes())
        .context("Failed to write slip id")?;
    writer.write_all(b"\n").context("Failed to write newline")?;
    writer.flush().context("Failed to flush writer")?;

    Ok(())
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

    let path = &args.submission_file;
    let metadata = fs::metadata(path).with_context(|| {
        format!("Submission file does not exist: {}", path.display())
    })?;
    if metadata.len() > config.security.max_submission_file_size {
        return Err(anyhow::anyhow!(
            "Submission file too large: {} bytes (max {} bytes)",
            metadata.len(),
            config.security.max_submission_file_size
        ));
    }

    info!("Loading submission from: {}", path.display());
    let content = fs::read_to_string(path).context("Failed to read submission file")?;
    let submission: Submission =
        serde_json::from_str(&content).context("Failed to parse submission JSON")?;

    if let Some(message) = &submission.message {
        if eip191_hash(message.as_bytes()) != submission.message_hash {
            return Err(anyhow::anyhow!(
                "Submission message does not hash to its message hash"
            ));
        }
    }

    let mut store = DiskStore::new(&config.store.data_dir, &config.store.namespace);
    let session = Session::open(&mut store).context("Failed to open club store")?;
    let tree: MerkleTree<_> =
        MerkleTree::import(session).context("No club tree found; run `club update` first")?;
    let root = tree.root();
    drop(tree);
    debug!("Current club root: {root}");

    let embedded = MerkleProof::<TREE_DEPTH>::from_json(&submission.merkle_proof)
        .context("Invalid Merkle proof in submission")?;
    embedded
        .ensure_current(root)
        .context("Submission was built against an older club root")?;

    let statement = submission
        .to_statement::<TREE_DEPTH>(root)
        .context("Malformed submission")?;
    let predicate_config = config.predicate();

    let (satisfied, output_json, slip_id) = match &submission.slip {
        None => {
            let output = evaluate(&statement, &predicate_config)?;
            (
                output.is_satisfied(),
                serde_json::to_string_pretty(&output)?,
                None,
            )
        }
        Some(slip) => {
            let oracle_key = args
                .oracle_public_key
                .as_deref()
                .context("--oracle-public-key is required for slip submissions")?;
            let proposal = args
                .proposal
                .as_deref()
                .context("--proposal is required for slip submissions")?;
            let witness = SlipWitness {
                slip: *slip,
                trusted_oracle_key: PublicKey::from_hex(oracle_key)
                    .context("Invalid oracle public key")?,
                secret: config.oracle.secret_from_env()?,
                context: SlipContext::proposal(&config.oracle.space, proposal),
            };
            let output = evaluate_vote(&statement, &predicate_config, &witness)?;
            (
                output.is_satisfied(),
                serde_json::to_string_pretty(&output)?,
                Some(output.slip_id),
            )
        }
    };

    println!("{output_json}");

    if !satisfied {
        error!("Submission verification FAILED");
        println!("\n✗ Submission verification FAILED!");
        return Err(anyhow::anyhow!("Submission verification failed"));
    }

    info!("Submission verification PASSED");
    println!("\n✓ Submission verification PASSED!");

    if let Some(slip_id) = slip_id {
        let mut slip_log = path.clone();
        slip_log.set_extension("slips.txt");
        check_and_add_slip(&slip_log, &slip_id.to_string())
            .with_context(|| format!("Failed to record slip to: {}", slip_log.display()))?;
        info!("Slip recorded to: {}", slip_log.display());
    }

    Ok(())
}
