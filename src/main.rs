use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trustchain::api::{self, AppState};
use trustchain::audit::AuditLogger;
use trustchain::config::AppConfig;
use trustchain::database::Database;
use trustchain::multisig::{MultisigEngine, SignerRegistry};
use trustchain::signing::ResolvedSigner;

#[derive(Parser)]
#[command(name = "trustchain")]
#[command(about = "Signed audit chain and multisig approval service")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./trustchain.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trustchain=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting trustchain");

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref())?;
    info!(
        "Configuration loaded (environment: {}, strict: {})",
        config.environment.as_str(),
        config.strict()
    );

    // Initialize database (runs migrations)
    let database = Database::new(&config.database_url).await?;
    info!("Database ready");

    // Resolve the signing backend once for the life of the process
    let signer = ResolvedSigner::resolve(&config)?;

    let logger = AuditLogger::new(database.clone(), signer.clone());
    let registry = SignerRegistry::new(database.pool().clone()).with_audit(logger.clone());
    let engine = MultisigEngine::new(
        database.clone(),
        logger.clone(),
        config.multisig.approval_binding,
    );

    let app = api::router(AppState {
        environment: config.environment,
        logger,
        signer,
        engine,
        registry,
    });

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
