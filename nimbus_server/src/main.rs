//! NimbusVPN issuance server binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use nimbus_server::allocator::AddressAllocator;
use nimbus_server::api::{self, AppState};
use nimbus_server::auth::AuthGateway;
use nimbus_server::issuer::{ConfigIssuer, IssuerSettings, WgKeygen};
use nimbus_server::store::{AuditLog, ConnectionRegistry, CredentialStore};
use nimbus_shared::config::ServerConfig;
use nimbus_shared::logging::{self, LogOptions};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(author, version, about = "NimbusVPN issuance server")]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, default_value = "nimbus.toml")]
    config: PathBuf,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API server (the default)
    Run,
    /// Provision an identity, reading the password from stdin
    Adduser {
        username: String,
        email: String,
        /// Create the identity disabled
        #[clap(long)]
        disabled: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let _guard = logging::init_logging(LogOptions {
        level: logging::level_from_str(&config.log_level),
        ..Default::default()
    });

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Adduser {
            username,
            email,
            disabled,
        } => adduser(config, &username, &email, !disabled).await,
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("NimbusVPN server starting up");
    if config.server_public_key.is_empty() {
        warn!("server_public_key is not configured; issued profiles will not handshake");
    }

    let store = Arc::new(CredentialStore::new(config.identities_path()));
    store.load().await.context("loading identity store")?;

    let registry = Arc::new(ConnectionRegistry::new(config.registry_path()));
    registry.load().await.context("loading connection registry")?;

    let allocator = AddressAllocator::new(&config.pool, registry.addresses().await)
        .context("building address allocator")?;

    let audit = Arc::new(AuditLog::new(config.audit_path()));
    let gateway = AuthGateway::new(
        Arc::clone(&store),
        audit,
        Duration::from_secs(config.session_ttl_secs),
    );

    let issuer = ConfigIssuer::new(
        Arc::new(WgKeygen),
        allocator,
        Arc::clone(&registry),
        IssuerSettings {
            server_public_key: config.server_public_key.clone(),
            endpoint: config.endpoint.clone(),
            dns: config.dns.clone(),
        },
    );

    let state = Arc::new(AppState {
        gateway,
        issuer,
        store,
        registry,
    });

    let listener =
        tokio::net::TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    info!(
        "listening on {}:{} (pool {})",
        config.bind_address, config.port, config.pool
    );
    axum::serve(
        listener,
        api::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn adduser(
    config: ServerConfig,
    username: &str,
    email: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    let store = CredentialStore::new(config.identities_path());
    store.load().await.context("loading identity store")?;

    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("reading password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!password.is_empty(), "password must not be empty");

    let identity = store.upsert(username, email, password, enabled).await?;
    info!(
        username = %identity.username,
        enabled = identity.enabled,
        "identity provisioned"
    );
    Ok(())
}
