//! Audit Chain Verification Tool
//!
//! Replays the audit chain from the live store or a frozen export and
//! reports chain, hash and signature status for every row.
//!
//! Exit codes: 0 all rows verified, 1 one or more failures, 2 tool error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{error, info};

use trustchain::audit::{
    load_export, read_range, write_export, ChainAnchor, ChainVerifier, VerifyOptions,
};
use trustchain::config::AppConfig;
use trustchain::crypto::PublicKeyMaterial;
use trustchain::database::Database;
use trustchain::signing::ResolvedSigner;

#[derive(Parser)]
#[command(name = "verify-audit-chain")]
#[command(about = "Verify audit chain integrity from the database or an export file")]
#[command(version)]
#[command(group(ArgGroup::new("source").required(true).args(["database_url", "export"])))]
struct Cli {
    /// Database URL for live verification
    #[arg(long)]
    database_url: Option<String>,

    /// Exported JSON array of events for offline verification
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Only verify events after this event id (live mode)
    #[arg(long, value_name = "ID")]
    start_after_id: Option<String>,

    /// Maximum number of events to verify
    #[arg(long)]
    limit: Option<u32>,

    /// Write the verified events to this export file
    #[arg(long, value_name = "PATH")]
    dump_to: Option<PathBuf>,

    /// The export starts at the first event ever written
    #[arg(long, conflicts_with = "anchor_hash")]
    genesis: bool,

    /// Hash the first exported event must link to
    #[arg(long, value_name = "HEX")]
    anchor_hash: Option<String>,

    /// Report unsigned rows as warnings
    #[arg(long)]
    allow_unsigned: bool,

    /// Expected Merkle root of the verified range
    #[arg(short, long, value_name = "HEX")]
    merkle_root: Option<String>,

    /// Public key for rows signed by KID, as KID=PATH or KID=KEY (repeatable)
    #[arg(long = "public-key", value_name = "KID=KEY")]
    public_keys: Vec<String>,

    /// Also trust every key in the signer registry (live mode)
    #[arg(long, requires = "database_url")]
    registry_keys: bool,

    /// Configuration file used to resolve the verifying backend
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only print failing rows and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("Verification could not complete: {:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_filter = if cli.quiet {
        "trustchain=error"
    } else if cli.verbose {
        "trustchain=debug"
    } else {
        "trustchain=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Returns whether every row verified.
async fn run(cli: &Cli) -> Result<bool> {
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let signer = ResolvedSigner::resolve(&config).context("resolving signing backend")?;
    let mut verifier = ChainVerifier::new(signer).with_options(VerifyOptions {
        allow_unsigned: cli.allow_unsigned,
    });
    for arg in &cli.public_keys {
        let (kid, key) = parse_public_key(arg)?;
        verifier = verifier.with_key(kid, key);
    }

    let (events, anchor) = match (&cli.database_url, &cli.export) {
        (Some(url), _) => {
            let db = Database::open_read_only(url)
                .await
                .with_context(|| format!("opening {}", url))?;
            if cli.registry_keys {
                verifier = verifier
                    .with_registry_keys(db.pool())
                    .await
                    .context("loading signer registry keys")?;
            }
            let range = read_range(db.pool(), cli.start_after_id.as_deref(), cli.limit).await?;
            let anchor = match range.anchor_hash {
                Some(hash) => ChainAnchor::Hash(hash),
                None => ChainAnchor::Genesis,
            };
            (range.events, anchor)
        }
        (None, Some(path)) => {
            if cli.start_after_id.is_some() {
                return Err(anyhow!("--start-after-id only applies to live verification"));
            }
            let mut events = load_export(path)?;
            if let Some(limit) = cli.limit {
                events.truncate(limit as usize);
            }
            let anchor = match (&cli.anchor_hash, cli.genesis) {
                (Some(hash), _) => ChainAnchor::Hash(hash.to_lowercase()),
                (None, true) => ChainAnchor::Genesis,
                (None, false) => ChainAnchor::Unknown,
            };
            (events, anchor)
        }
        (None, None) => return Err(anyhow!("either --database-url or --export is required")),
    };

    if let Some(path) = &cli.dump_to {
        write_export(path, &events)?;
    }

    info!("Verifying {} events", events.len());
    let report = verifier.verify_events(&events, anchor).await;

    for row in &report.rows {
        if !cli.quiet || row.has_failure() {
            println!("{}", row.line());
            if cli.verbose {
                for issue in &row.issues {
                    println!("       {}: {}", issue.code.as_str(), issue.message);
                }
            }
        }
    }

    let mut ok = report.is_valid();

    if let Some(expected) = &cli.merkle_root {
        match &report.merkle_root {
            Some(actual) if actual.eq_ignore_ascii_case(expected) => {
                if !cli.quiet {
                    println!("merkle root matches {}", actual);
                }
            }
            Some(actual) => {
                println!("merkle root MISMATCH: expected {}, computed {}", expected, actual);
                ok = false;
            }
            None => {
                println!("merkle root MISMATCH: no events to anchor");
                ok = false;
            }
        }
    }

    if !cli.quiet || !ok {
        println!("{}", report.summary());
    }
    Ok(ok)
}

/// `KID=PATH` or `KID=KEY`; a value naming an existing file is read from it.
fn parse_public_key(arg: &str) -> Result<(String, PublicKeyMaterial)> {
    let (kid, value) = arg
        .split_once('=')
        .filter(|(kid, value)| !kid.is_empty() && !value.is_empty())
        .ok_or_else(|| anyhow!("--public-key expects KID=KEY, got {}", arg))?;

    let path = Path::new(value);
    let text = if path.is_file() {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", value))?
    } else {
        value.to_string()
    };
    let key = PublicKeyMaterial::parse(text.trim())
        .with_context(|| format!("parsing public key for {}", kid))?;
    Ok((kid.to_string(), key))
}
