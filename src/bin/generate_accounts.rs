use anyhow::{Context, Result};
use clap::Parser;
use ethers::signers::{LocalWallet, Signer};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use zkp_anon_membership::{ethereum::validate_addresses_batch, TREE_DEPTH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate random club member accounts", long_about = None)]
struct Args {
    #[arg(short = 'n', long, default_value_t = 100)]
    count: usize,

    #[arg(short, long, default_value = "test_accounts.txt")]
    output: PathBuf,

    /// Also write the matching private keys, one per line.
    #[arg(long)]
    keys_output: Option<PathBuf>,
}

fn generate_wallets(count: usize) -> Vec<LocalWallet> {
    (0..count)
        .map(|_| LocalWallet::new(&mut rand::thread_rng()))
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    let capacity = 1usize << TREE_DEPTH;
    if args.count == 0 || args.count > capacity {
        return Err(anyhow::anyhow!(
            "Count must be between 1 and {capacity}, got {}",
            args.count
        ));
    }

    println!("Generating {} random Ethereum accounts...", args.count);
    let wallets = generate_wallets(args.count);
    let addresses: Vec<String> = wallets
        .iter()
        .map(|wallet| format!("{:?}", wallet.address()))
        .collect();

    if !validate_addresses_batch(&addresses) {
        return Err(anyhow::anyhow!("Generated invalid addresses"));
    }
    let unique: HashSet<_> = addresses.iter().collect();
    if unique.len() != addresses.len() {
        return Err(anyhow::anyhow!("Generated duplicate addresses"));
    }

    println!("Writing addresses to {}...", args.output.display());
    let mut file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    for address in &addresses {
        writeln!(file, "{address}")?;
    }

    if let Some(keys_path) = &args.keys_output {
        let mut file = File::create(keys_path)
            .with_context(|| format!("Failed to create {}", keys_path.display()))?;
        for wallet in &wallets {
            writeln!(file, "0x{}", hex::encode(wallet.signer().to_bytes()))?;
        }
        println!("Private keys written to {}", keys_path.display());
    }

    println!("Successfully generated {} accounts", args.count);
    println!("First 5 addresses:");
    for (i, addr) in addresses.iter().take(5).enumerate() {
        println!("  {}: {}", i + 1, addr);
    }

    Ok(())
}
