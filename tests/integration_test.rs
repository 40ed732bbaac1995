use ethers::signers::{LocalWallet, Signer};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::SigningKey;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zkp_anon_membership::{
    ethereum::{address_to_string, eip191_hash, ethereum_address},
    identity::{address_identity, raw_key_identity, IdentityMode},
    keys::{EcdsaSignature, SchnorrSignature},
    oracle::{handle_request, OracleKey, OracleSecret, SlipContext, SlipRequest},
    ownership::message_binding_hash,
    predicate::{evaluate, evaluate_vote, SlipWitness, Statement},
    store::{DiskStore, KeyValueStore, MemoryStore, Session, DATABASE_FILE},
    Hash, MerkleTree, PredicateConfig, PublicKey, Signature, Submission, TREE_DEPTH,
};

const ORACLE_SECRET: &str = "424242";
const ORACLE_PRIVATE_KEY: &str =
    "0x0707070707070707070707070707070707070707070707070707070707070707";

fn personal_sign(key: &SigningKey, message: &str) -> String {
    let prehash = eip191_hash(message.as_bytes());
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(prehash.as_bytes())
        .expect("Failed to sign");
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}

fn build_club(dir: &Path, wallets: &[LocalWallet]) -> Hash {
    let mut store = DiskStore::new(dir, "club");
    let session = Session::open(&mut store).expect("Failed to open store");
    let mut tree: MerkleTree<_> = MerkleTree::build(session).expect("Failed to build tree");
    let leaves = wallets
        .iter()
        .enumerate()
        .map(|(i, w)| (i as u64, address_identity(&PublicKey::from_signing_key(w.signer()))));
    tree.update_many(leaves).expect("Failed to update tree");
    let root = tree.root();
    tree.into_store().close().expect("Failed to close store");
    root
}

fn submission_for(dir: &Path, wallet: &LocalWallet, index: u64, message: &str) -> Submission {
    let mut store = DiskStore::new(dir, "club");
    let tree: MerkleTree<_> = MerkleTree::import(Session::open(&mut store).unwrap()).unwrap();
    let proof = tree.prove(index).unwrap();

    let message_hash = eip191_hash(message.as_bytes());
    let sig: k256::ecdsa::Signature = wallet.signer().sign_prehash(message_hash.as_bytes()).unwrap();
    Submission {
        signature: Signature::Ecdsa(EcdsaSignature::from(sig)),
        public_key: PublicKey::from_signing_key(wallet.signer()).to_bytes64(),
        message_hash,
        message_hash_hash: message_binding_hash(&message_hash),
        claimed_index: index.to_string(),
        merkle_proof: proof.to_json(),
        message: Some(message.to_string()),
        slip: None,
    }
}

fn random_wallets(count: usize) -> Vec<LocalWallet> {
    (0..count)
        .map(|_| LocalWallet::new(&mut rand::thread_rng()))
        .collect()
}

#[test]
fn test_address_derivation_matches_ethers() {
    for wallet in random_wallets(5) {
        let ours = address_to_string(&ethereum_address(&PublicKey::from_signing_key(
            wallet.signer(),
        )));
        assert_eq!(ours, format!("{:?}", wallet.address()).to_lowercase());
    }
}

#[test]
fn test_eip191_hash_matches_ethers() {
    for message in ["", "hello", "anon.eth/proposal/0x01", "a much longer message body"] {
        let ours = eip191_hash(message.as_bytes());
        let theirs = ethers::utils::hash_message(message);
        assert_eq!(ours.as_bytes(), &theirs.0);
    }
}

#[test]
fn test_disk_store_import_is_stable_across_sessions() {
    let temp_dir = TempDir::new().unwrap();
    let wallets = random_wallets(3);
    let root = build_club(temp_dir.path(), &wallets);

    for _ in 0..2 {
        let mut store = DiskStore::new(temp_dir.path(), "club");
        let tree: MerkleTree<_> =
            MerkleTree::import(Session::open(&mut store).unwrap()).unwrap();
        assert_eq!(tree.root(), root);
        drop(tree);
        assert!(!store.is_open());
    }
    assert!(temp_dir.path().join(DATABASE_FILE).exists());
}

#[test]
fn test_submission_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let wallets = random_wallets(3);
    let root = build_club(temp_dir.path(), &wallets);

    let submission = submission_for(temp_dir.path(), &wallets[1], 1, "hello club");
    let json = serde_json::to_string_pretty(&submission).unwrap();
    let parsed: Submission = serde_json::from_str(&json).unwrap();

    let statement = parsed.to_statement::<TREE_DEPTH>(root).unwrap();
    let output = evaluate(&statement, &PredicateConfig::default()).unwrap();
    assert!(output.verified_ownership);
    assert!(output.verified_membership);
    assert_eq!(output.bound_message_hash, submission.message_hash_hash);

    // Same proof, wrong claimed index.
    let mut wrong_index = parsed.clone();
    wrong_index.claimed_index = "2".into();
    let output = evaluate(
        &wrong_index.to_statement::<TREE_DEPTH>(root).unwrap(),
        &PredicateConfig::default(),
    )
    .unwrap();
    assert!(output.verified_ownership);
    assert!(!output.verified_membership);

    // An outsider signing with a member's proof owns nothing in the club.
    let outsider = LocalWallet::new(&mut rand::thread_rng());
    let mut forged = submission_for(temp_dir.path(), &outsider, 1, "hello club");
    forged.merkle_proof = parsed.merkle_proof.clone();
    let output = evaluate(
        &forged.to_statement::<TREE_DEPTH>(root).unwrap(),
        &PredicateConfig::default(),
    )
    .unwrap();
    assert!(output.verified_ownership);
    assert!(!output.verified_membership);
}

#[test]
fn test_stale_root_is_detected_after_update() {
    let temp_dir = TempDir::new().unwrap();
    let wallets = random_wallets(3);
    let old_root = build_club(temp_dir.path(), &wallets);
    let submission = submission_for(temp_dir.path(), &wallets[0], 0, "before");

    let mut store = DiskStore::new(temp_dir.path(), "club");
    let mut tree: MerkleTree<_> =
        MerkleTree::import(Session::open(&mut store).unwrap()).unwrap();
    tree.update(3, Hash::from_u64(99)).unwrap();
    let new_root = tree.root();
    drop(tree);
    assert_ne!(old_root, new_root);

    let proof = zkp_anon_membership::MerkleProof::<TREE_DEPTH>::from_json(&submission.merkle_proof)
        .unwrap();
    assert!(proof.ensure_current(old_root).is_ok());
    assert!(proof.ensure_current(new_root).is_err());
}

#[test]
fn test_vote_with_oracle_slip() {
    let temp_dir = TempDir::new().unwrap();
    let wallets = random_wallets(2);
    let root = build_club(temp_dir.path(), &wallets);

    let secret = OracleSecret::parse(ORACLE_SECRET).unwrap();
    let oracle_key = OracleKey::from_hex(ORACLE_PRIVATE_KEY).unwrap();
    let message = SlipContext::proposal_message("anon.eth", "0x01");
    let request = SlipRequest {
        signature: personal_sign(wallets[0].signer(), &message),
        space: "anon.eth".into(),
        proposal: "0x01".into(),
    };
    let slip = handle_request(&request, IdentityMode::Address, &secret, &oracle_key).unwrap();

    let submission = submission_for(temp_dir.path(), &wallets[0], 0, "yes");
    let statement = submission.to_statement::<TREE_DEPTH>(root).unwrap();
    let witness = SlipWitness {
        slip,
        trusted_oracle_key: oracle_key.public_key().unwrap(),
        secret: secret.clone(),
        context: SlipContext::proposal("anon.eth", "0x01"),
    };
    let output = evaluate_vote(&statement, &PredicateConfig::default(), &witness).unwrap();
    assert!(output.is_satisfied());

    // The slip belongs to wallet 0; wallet 1 cannot vote with it.
    let other = submission_for(temp_dir.path(), &wallets[1], 1, "yes");
    let statement = other.to_statement::<TREE_DEPTH>(root).unwrap();
    let output = evaluate_vote(&statement, &PredicateConfig::default(), &witness).unwrap();
    assert!(output.predicate.is_satisfied());
    assert!(!output.verified_slip);
}

#[test]
fn test_raw_key_vote_with_oracle_slip() {
    let key = SigningKey::random(&mut rand::thread_rng());
    let schnorr = k256::schnorr::SigningKey::from_bytes(&key.to_bytes()).unwrap();
    let presented = PublicKey::from_x_only(&PublicKey::from_signing_key(&key).x_bytes()).unwrap();

    let mut tree: MerkleTree<MemoryStore> = MerkleTree::build(MemoryStore::new()).unwrap();
    tree.update(4, raw_key_identity(&presented)).unwrap();

    let message_hash = eip191_hash(b"yes");
    let sig = schnorr.sign_raw(message_hash.as_bytes(), &[0u8; 32]).unwrap();
    let statement: Statement<TREE_DEPTH> = Statement {
        merkle_root: tree.root(),
        proof: tree.prove(4).unwrap(),
        claimed_index: 4,
        message_hash,
        message_hash_hash: message_binding_hash(&message_hash),
        signature: Signature::Bip340(SchnorrSignature::from(sig)),
        public_key: presented,
        public_key_bytes: presented.to_bytes64(),
    };

    let secret = OracleSecret::parse(ORACLE_SECRET).unwrap();
    let oracle_key = OracleKey::from_hex(ORACLE_PRIVATE_KEY).unwrap();
    let request = SlipRequest {
        signature: personal_sign(&key, &SlipContext::proposal_message("anon.eth", "0x02")),
        space: "anon.eth".into(),
        proposal: "0x02".into(),
    };
    let slip = handle_request(&request, IdentityMode::RawKey, &secret, &oracle_key).unwrap();

    let witness = SlipWitness {
        slip,
        trusted_oracle_key: oracle_key.public_key().unwrap(),
        secret,
        context: SlipContext::proposal("anon.eth", "0x02"),
    };
    let config = PredicateConfig {
        identity_mode: IdentityMode::RawKey,
        ..PredicateConfig::default()
    };
    let output = evaluate_vote(&statement, &config, &witness).unwrap();
    assert!(output.predicate.is_satisfied());
    assert!(output.verified_slip);
}

fn binary(name: &str) -> PathBuf {
    PathBuf::from(format!("./target/release/{name}"))
}

fn binaries_present(names: &[&str]) -> bool {
    let present = names.iter().all(|name| binary(name).exists());
    if !present {
        eprintln!("Skipping integration test: release binaries not found");
    }
    present
}

fn write_rows(dir: &Path, wallets: &[LocalWallet]) -> PathBuf {
    let rows = dir.join("rows.txt");
    let content: Vec<String> = wallets
        .iter()
        .map(|w| format!("{:?}", w.address()))
        .collect();
    fs::write(&rows, content.join("\n")).expect("Failed to write rows file");
    rows
}

fn run_club_update(data_dir: &Path, rows: &Path) {
    let output = std::process::Command::new(binary("club"))
        .arg("--data-dir")
        .arg(data_dir)
        .arg("update")
        .arg("--rows")
        .arg(rows)
        .output()
        .expect("Failed to execute club");
    assert!(
        output.status.success(),
        "club update failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn run_prover(
    data_dir: &Path,
    wallet: &LocalWallet,
    output_file: &Path,
    slip: Option<&Path>,
) -> std::process::Output {
    let mut command = std::process::Command::new(binary("prover"));
    command
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--message")
        .arg("hello club")
        .arg("--output")
        .arg(output_file)
        .env(
            "ZKP_PRIVATE_KEY",
            format!("0x{}", hex::encode(wallet.signer().to_bytes())),
        );
    if let Some(slip) = slip {
        command.arg("--slip").arg(slip);
    }
    command.output().expect("Failed to execute prover")
}

#[test]
fn test_end_to_end_club_prover_verifier_workflow() {
    if !binaries_present(&["club", "prover", "verifier"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = temp_dir.path().join("dbs");
    let submission_file = temp_dir.path().join("submission.json");
    let wallets = random_wallets(3);

    run_club_update(&data_dir, &write_rows(temp_dir.path(), &wallets));

    let prover_output = run_prover(&data_dir, &wallets[2], &submission_file, None);
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(submission_file.exists(), "Submission file was not created");

    let verifier_output = std::process::Command::new(binary("verifier"))
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--submission-file")
        .arg(&submission_file)
        .output()
        .expect("Failed to execute verifier");
    assert!(
        verifier_output.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&verifier_output.stderr)
    );
    let stdout = String::from_utf8_lossy(&verifier_output.stdout);
    assert!(
        stdout.contains("verification PASSED"),
        "Verification did not pass: {stdout}"
    );
}

#[test]
fn test_prover_rejects_non_member() {
    if !binaries_present(&["club", "prover"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = temp_dir.path().join("dbs");
    let wallets = random_wallets(2);
    run_club_update(&data_dir, &write_rows(temp_dir.path(), &wallets));

    let outsider = LocalWallet::new(&mut rand::thread_rng());
    let output = run_prover(
        &data_dir,
        &outsider,
        &temp_dir.path().join("submission.json"),
        None,
    );
    assert!(!output.status.success(), "Prover should fail for a non-member");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("not in the club"),
        "Error should mention membership: {stderr}"
    );
}

#[test]
fn test_stale_submission_rejected_after_club_update() {
    if !binaries_present(&["club", "prover", "verifier"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = temp_dir.path().join("dbs");
    let submission_file = temp_dir.path().join("submission.json");
    let mut wallets = random_wallets(2);
    run_club_update(&data_dir, &write_rows(temp_dir.path(), &wallets));

    let output = run_prover(&data_dir, &wallets[0], &submission_file, None);
    assert!(output.status.success());

    wallets.push(LocalWallet::new(&mut rand::thread_rng()));
    run_club_update(&data_dir, &write_rows(temp_dir.path(), &wallets));

    let verifier_output = std::process::Command::new(binary("verifier"))
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--submission-file")
        .arg(&submission_file)
        .output()
        .expect("Failed to execute verifier");
    assert!(
        !verifier_output.status.success(),
        "Verifier should reject a proof against an older root"
    );
}

#[test]
fn test_slip_replay_prevention() {
    if !binaries_present(&["club", "prover", "verifier", "oracle"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = temp_dir.path().join("dbs");
    let slip_file = temp_dir.path().join("slip.json");
    let submission_file = temp_dir.path().join("submission.json");
    let wallets = random_wallets(3);
    run_club_update(&data_dir, &write_rows(temp_dir.path(), &wallets));

    let message = SlipContext::proposal_message("anon.eth", "0x01");
    let oracle_output = std::process::Command::new(binary("oracle"))
        .arg("issue")
        .arg("--signature")
        .arg(personal_sign(wallets[0].signer(), &message))
        .arg("--proposal")
        .arg("0x01")
        .arg("--output")
        .arg(&slip_file)
        .env("ORACLE_SECRET", ORACLE_SECRET)
        .env("ORACLE_PRIVATE_KEY", ORACLE_PRIVATE_KEY)
        .output()
        .expect("Failed to execute oracle");
    assert!(
        oracle_output.status.success(),
        "Oracle failed: {}",
        String::from_utf8_lossy(&oracle_output.stderr)
    );

    let output = run_prover(&data_dir, &wallets[0], &submission_file, Some(&slip_file));
    assert!(
        output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let oracle_public_key = OracleKey::from_hex(ORACLE_PRIVATE_KEY)
        .unwrap()
        .public_key()
        .unwrap()
        .to_hex();
    let verify = || {
        std::process::Command::new(binary("verifier"))
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("--submission-file")
            .arg(&submission_file)
            .arg("--oracle-public-key")
            .arg(&oracle_public_key)
            .arg("--proposal")
            .arg("0x01")
            .env("ORACLE_SECRET", ORACLE_SECRET)
            .output()
            .expect("Failed to execute verifier")
    };

    let first = verify();
    assert!(
        first.status.success(),
        "First verification should succeed: {}",
        String::from_utf8_lossy(&first.stderr)
    );

    let second = verify();
    assert!(
        !second.status.success(),
        "Second verification should fail due to slip replay"
    );
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(
        stderr.contains("replay"),
        "Error should mention replay: {stderr}"
    );
}

#[test]
fn test_invalid_submission_structure() {
    if !binaries_present(&["verifier"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let submission_file = temp_dir.path().join("invalid.json");
    fs::write(
        &submission_file,
        r#"{"signature": {"scheme": "ecdsa"}, "claimed_index": "zero"}"#,
    )
    .expect("Failed to write invalid submission");

    let output = std::process::Command::new(binary("verifier"))
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--submission-file")
        .arg(&submission_file)
        .output()
        .expect("Failed to execute verifier");
    assert!(
        !output.status.success(),
        "Verifier should fail on an invalid submission"
    );
}

#[test]
fn test_club_rejects_duplicate_addresses_across_case() {
    if !binaries_present(&["club"]) {
        return;
    }
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let address = format!("{:?}", wallet.address());
    let rows = temp_dir.path().join("rows.txt");
    let shouted = address.to_uppercase().replacen("0X", "0x", 1);
    fs::write(&rows, format!("{address}\n{shouted}")).expect("Failed to write rows file");

    let output = std::process::Command::new(binary("club"))
        .arg("--data-dir")
        .arg(temp_dir.path().join("dbs"))
        .arg("update")
        .arg("--rows")
        .arg(&rows)
        .output()
        .expect("Failed to execute club");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Duplicate address at line 2"));
}
