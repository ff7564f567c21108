//! Signer Administration CLI
//!
//! Register and revoke multisig signers, generate Ed25519 keypairs and
//! produce approval signatures for proposals.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use trustchain::audit::AuditLogger;
use trustchain::config::{AppConfig, ApprovalBinding};
use trustchain::crypto::SecretKeyMaterial;
use trustchain::database::Database;
use trustchain::multisig::{MultisigEngine, SignerRecord, SignerRegistry, SignerRole};
use trustchain::signing::ResolvedSigner;

use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Parser)]
#[command(name = "signer-admin")]
#[command(about = "Manage multisig signers and approval signatures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (overrides the configuration file)
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a signer
    Register {
        /// Signer id
        signer_id: String,

        /// Public key: PEM, hex (secp256k1), base64 (Ed25519) or a file path
        #[arg(short, long)]
        public_key: String,

        /// Role (signer, operator)
        #[arg(short, long, default_value = "signer")]
        role: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Revoke a signer
    Revoke {
        /// Signer id
        signer_id: String,

        /// Revocation reason
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// List signers
    List {
        /// Include revoked signers
        #[arg(short, long)]
        all: bool,
    },

    /// Show signer details
    Show {
        /// Signer id
        signer_id: String,
    },

    /// Generate an Ed25519 keypair
    Generate {
        /// Write `<name>.key` and `<name>.pub` into this directory instead of printing
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// File name stem
        #[arg(short, long, default_value = "signer")]
        name: String,
    },

    /// Sign a proposal's approval message
    Sign {
        /// Proposal id
        proposal_id: String,

        /// Private key: PEM, hex (secp256k1), base64 seed (Ed25519) or a file path
        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trustchain=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Key generation needs no store
    if let Commands::Generate { out_dir, name } = &cli.command {
        return generate(out_dir.as_ref(), name);
    }

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let database_url = cli
        .database_url
        .clone()
        .unwrap_or_else(|| config.database_url.clone());
    let db = Database::new(&database_url)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;

    let signer = ResolvedSigner::resolve(&config)?;
    let logger = AuditLogger::new(db.clone(), signer);
    let registry = SignerRegistry::new(db.pool().clone()).with_audit(logger.clone());

    match cli.command {
        Commands::Register {
            signer_id,
            public_key,
            role,
            comment,
        } => {
            let role: SignerRole = role.parse()?;
            let public_key = read_text(&public_key)?;
            let record = registry
                .register(&signer_id, &public_key, role, comment.as_deref())
                .await?;
            println!("Signer registered successfully:");
            print_signer_details(&record);
        }

        Commands::Revoke { signer_id, reason } => {
            let record = registry.revoke(&signer_id, reason.as_deref()).await?;
            println!("Signer revoked successfully: {}", record.signer_id);
        }

        Commands::List { all } => {
            let signers = registry.list(all).await?;
            print_signers(&signers);
        }

        Commands::Show { signer_id } => match registry.get(&signer_id).await? {
            Some(record) => print_signer_details(&record),
            None => println!("Signer not found: {}", signer_id),
        },

        Commands::Sign { proposal_id, key } => {
            let secret = SecretKeyMaterial::parse(&read_text(&key)?)?;
            let engine = MultisigEngine::new(db, logger, config.multisig.approval_binding);
            let message = engine.approval_message(&proposal_id).await?;
            let signature = secret.sign_message(&message)?;

            let binding = match engine.binding() {
                ApprovalBinding::Canonical => "canonical",
                ApprovalBinding::ProposalId => "proposal_id",
            };
            eprintln!("Signed {} approval message ({} bytes)", binding, message.len());
            println!("{}", STANDARD.encode(signature));
        }

        Commands::Generate { out_dir, name } => generate(out_dir.as_ref(), &name)?,
    }

    Ok(())
}

fn generate(out_dir: Option<&PathBuf>, name: &str) -> Result<()> {
    let secret = SecretKeyMaterial::generate_ed25519();
    let private_pem = secret.to_encoded()?;
    let public_pem = secret.public_key().to_encoded()?;

    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let key_path = dir.join(format!("{}.key", name));
            let pub_path = dir.join(format!("{}.pub", name));
            if key_path.exists() {
                return Err(anyhow!("refusing to overwrite {:?}", key_path));
            }
            std::fs::write(&key_path, &private_pem)?;
            std::fs::write(&pub_path, &public_pem)?;
            println!("Keypair generated:");
            println!("  Private key: {:?}", key_path);
            println!("  Public key:  {:?}", pub_path);
        }
        None => {
            print!("{}", private_pem);
            print!("{}", public_pem);
        }
    }
    Ok(())
}

/// Key material given inline or as a file path.
fn read_text(value: &str) -> Result<String> {
    let path = std::path::Path::new(value);
    if path.is_file() {
        return std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path));
    }
    Ok(value.trim().to_string())
}

fn print_signers(signers: &[SignerRecord]) {
    if signers.is_empty() {
        println!("No signers found");
        return;
    }

    println!(
        "{:<24} {:<10} {:<10} {:<10} {:<20}",
        "Signer ID", "Key Type", "Role", "Status", "Created"
    );
    println!("{}", "-".repeat(78));

    for signer in signers {
        println!(
            "{:<24} {:<10} {:<10} {:<10} {:<20}",
            signer.signer_id,
            signer.key_type,
            signer.role.as_str(),
            signer.status.as_str(),
            signer.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_signer_details(signer: &SignerRecord) {
    println!("  Signer ID: {}", signer.signer_id);
    println!("  Key Type: {}", signer.key_type);
    println!("  Role: {}", signer.role.as_str());
    println!("  Status: {}", signer.status.as_str());
    println!("  Created: {}", signer.created_at);
    if let Some(revoked_at) = signer.revoked_at {
        println!("  Revoked: {}", revoked_at);
    }
    if let Some(comment) = &signer.comment {
        println!("  Comment: {}", comment);
    }
    println!("  Public Key:\n{}", signer.public_key);
}
