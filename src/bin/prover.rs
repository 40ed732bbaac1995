use anyhow::{Context, Result};
use clap::Parser;
use ethers::signers::{LocalWallet, Signer};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use zkp_anon_membership::{
    config::Config,
    ethereum::{address_to_string, eip191_hash, ethereum_address, validate_private_key},
    identity::IdentityMode,
    keys::{parse_signing_key, EcdsaSignature, SchnorrSignature},
    merkle::index_in_range,
    oracle::Slip,
    ownership::message_binding_hash,
    store::{DiskStore, Session},
    Hash, MerkleTree, PublicKey, Signature, Submission, TREE_DEPTH,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sign a message as an anonymous club member", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    namespace: Option<String>,

    #[arg(short, long, env = "ZKP_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    #[arg(short, long)]
    message: String,

    /// Slip JSON from the oracle, attached for votes.
    #[arg(long)]
    slip: Option<PathBuf>,

    #[arg(short, long, default_value = "submission.json")]
    output: PathBuf,
}

fn find_leaf<S: zkp_anon_membership::store::KeyValueStore>(
    tree: &MerkleTree<S>,
    identity: Hash,
) -> Result<Option<u64>> {
    let mut index = 0u64;
    while index_in_range(index, TREE_DEPTH) {
        if tree.leaf(index)? == identity {
            return Ok(Some(index));
        }
        index += 1;
    }
    Ok(None)
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

    validate_private_key(&args.private_key)?;
    let signing_key = parse_signing_key(&args.private_key)?;
    let public_key = PublicKey::from_signing_key(&signing_key);

    let wallet: LocalWallet = args
        .private_key
        .parse()
        .context("Failed to parse private key")?;
    let address = address_to_string(&ethereum_address(&public_key));
    if format!("{:?}", wallet.address()).to_lowercase() != address {
        return Err(anyhow::anyhow!(
            "Derived address {address} does not match wallet address {:?}",
            wallet.address()
        ));
    }
    info!("Prover address: {address}");

    let identity = config.identity.mode.derive(&public_key);
    debug!("Identity hash: {identity}");

    let mut store = DiskStore::new(&config.store.data_dir, &config.store.namespace);
    let session = Session::open(&mut store).context("Failed to open club store")?;
    let tree: MerkleTree<_> =
        MerkleTree::import(session).context("No club tree found; run `club update` first")?;

    let index = find_leaf(&tree, identity)?.with_context(|| {
        format!(
            "Prover identity for {address} is not in the club (mode {:?})",
            config.identity.mode
        )
    })?;
    info!("Found prover identity at index {index}");
    let proof = tree.prove(index)?;
    drop(tree);

    let message_hash = eip191_hash(args.message.as_bytes());
    let signature = match config.identity.mode {
        IdentityMode::Address => {
            let sig: k256::ecdsa::Signature = signing_key
                .sign_prehash(message_hash.as_bytes())
                .context("Failed to sign message")?;
            Signature::Ecdsa(EcdsaSignature::from(sig))
        }
        IdentityMode::RawKey => {
            let schnorr = k256::schnorr::SigningKey::from_bytes(&signing_key.to_bytes())
                .context("Failed to derive BIP-340 key")?;
            let sig = schnorr
                .sign_raw(message_hash.as_bytes(), &rand::random::<[u8; 32]>())
                .context("Failed to sign message")?;
            Signature::Bip340(SchnorrSignature::from(sig))
        }
    };

    // BIP-340 verifiers see the even-y point.
    let presented_key = match signature {
        Signature::Ecdsa(_) => public_key,
        Signature::Bip340(_) => PublicKey::from_x_only(&public_key.x_bytes())
            .context("Public key has no even-y lift")?,
    };

    let slip: Option<Slip> = match &args.slip {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read slip file: {}", path.display()))?;
            Some(serde_json::from_str(&content).context("Failed to parse slip JSON")?)
        }
        None => None,
    };

    let submission = Submission {
        signature,
        public_key: presented_key.to_bytes64(),
        message_hash,
        message_hash_hash: message_binding_hash(&message_hash),
        claimed_index: index.to_string(),
        merkle_proof: proof.to_json(),
        message: Some(args.message.clone()),
        slip,
    };

    let json_output = serde_json::to_string_pretty(&submission)
        .context("Failed to serialize submission to JSON")?;
    fs::write(&args.output, json_output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    info!("Submission written to {}", args.output.display());
    println!("Submission successfully generated and saved!");
    println!("Merkle Root: {}", proof.root);
    println!("Message hash: {message_hash}");

    Ok(())
}
