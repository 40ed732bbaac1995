use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;
use zkp_anon_membership::{
    config::Config,
    oracle::{handle_request, SlipContext, SlipRequest},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Issue anti-replay slips for club votes", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a slip from a `personal_sign` signature over "<space>/proposal/<proposal>".
    Issue {
        #[arg(long)]
        signature: String,

        #[arg(long)]
        proposal: String,

        /// Defaults to `[oracle] space`.
        #[arg(long)]
        space: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the oracle public key voters and verifiers should trust.
    PublicKey,
    /// Print the message a voter must sign to request a slip.
    Message {
        #[arg(long)]
        proposal: String,

        #[arg(long)]
        space: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_optional(args.config.as_ref())?;

    match args.command {
        Command::Issue {
            signature,
            proposal,
            space,
            output,
        } => {
            let secret = config.oracle.secret_from_env()?;
            let key = config.oracle.key_from_env()?;
            let request = SlipRequest {
                signature,
                space: space.unwrap_or_else(|| config.oracle.space.clone()),
                proposal,
            };

            let slip = handle_request(&request, config.identity.mode, &secret, &key)
                .context("Failed to issue slip")?;
            let json = serde_json::to_string_pretty(&slip).context("Failed to serialize slip")?;
            match output {
                Some(path) => {
                    fs::write(&path, &json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Slip written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::PublicKey => {
            let key = config.oracle.key_from_env()?;
            println!("{}", key.public_key()?.to_hex());
        }
        Command::Message { proposal, space } => {
            let space = space.unwrap_or_else(|| config.oracle.space.clone());
            println!("{}", SlipContext::proposal_message(&space, &proposal));
        }
    }

    Ok(())
}
