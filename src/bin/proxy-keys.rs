use clap::{Parser, Subcommand};
use serde_json::json;

use idempotent_proxy::clock::unix_secs;
use idempotent_proxy::signing::{issue_token, RequestSigner};

#[derive(Parser)]
#[command(name = "proxy-keys")]
#[command(about = "Key and token tooling for the idempotency proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new signer key and print it with its address
    Generate,
    /// Print the address (verifier identifier) of a key
    Address {
        /// Hex private key; falls back to IDEMPOTENT_PROXY_SIGNER_KEY
        #[arg(long)]
        key: Option<String>,
    },
    /// Issue an inbound proxy token for an agent
    Token {
        /// Agent name embedded in the token
        #[arg(long)]
        agent: String,
        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
        /// Hex private key of a trusted agent; falls back to IDEMPOTENT_PROXY_SIGNER_KEY
        #[arg(long)]
        key: Option<String>,
    },
}

fn signer(key: Option<String>) -> Result<RequestSigner, Box<dyn std::error::Error>> {
    Ok(match key {
        Some(key) => RequestSigner::from_private_key(&key)?,
        None => RequestSigner::from_env()?,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate => {
            let signer = RequestSigner::random();
            let out = json!({
                "address": signer.address().to_string(),
                "private_key": signer.private_key_hex(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Address { key } => {
            println!("{}", signer(key)?.address());
        }
        Commands::Token { agent, ttl_secs, key } => {
            let signer = signer(key)?;
            let expire_at = unix_secs().saturating_add(ttl_secs);
            let token = issue_token(&signer, expire_at, &agent)?;
            let out = json!({
                "agent": agent,
                "signer": signer.address().to_string(),
                "expire_at": expire_at,
                "header": format!("Bearer {}", token),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}
