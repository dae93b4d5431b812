//! NimbusVPN client binary.
//!
//! Thin CLI over [`api::ApiClient`] and [`connector::ClientConnector`]:
//! authenticate, fetch a tunnel configuration, and apply it locally.

mod api;
mod connector;
mod platform;
mod settings;

use anyhow::{bail, Context};
use api::ApiClient;
use clap::{Parser, Subcommand};
use connector::{ClientConnector, TunnelStatus};
use nimbus_shared::logging::{self, LogOptions};
use settings::Settings;
use std::io::BufRead;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "NimbusVPN client")]
struct Args {
    /// Log level
    #[clap(short, long, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save the server URL for later commands
    Setup {
        /// Server base URL, e.g. https://vpn.example.com/
        server: String,
    },
    /// Authenticate and bring the tunnel up
    Connect {
        username: String,
        /// Override the saved server URL
        #[clap(long)]
        server: Option<String>,
        /// Accept self-signed server certificates (development only)
        #[clap(long)]
        insecure: bool,
    },
    /// Tear the tunnel down
    Disconnect,
    /// Show the local tunnel state
    Status,
    /// Show the server's status counters
    ServerStatus {
        #[clap(long)]
        server: Option<String>,
        #[clap(long)]
        insecure: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = logging::init_logging(LogOptions {
        level: logging::level_from_str(&args.log_level),
        ..Default::default()
    });

    match args.command {
        Command::Setup { server } => {
            let path = Settings { server_url: server }.save()?;
            info!(path = %path.display(), "settings saved");
            Ok(())
        }
        Command::Connect {
            username,
            server,
            insecure,
        } => connect(&username, server, insecure).await,
        Command::Disconnect => disconnect().await,
        Command::Status => status().await,
        Command::ServerStatus { server, insecure } => server_status(server, insecure).await,
    }
}

fn resolve_server(override_url: Option<String>) -> anyhow::Result<String> {
    if let Some(url) = override_url {
        return Ok(url);
    }
    match Settings::load()? {
        Some(settings) => Ok(settings.server_url),
        None => bail!("server URL not configured; run: nimbus_client setup <url>"),
    }
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("reading password from stdin")?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

async fn connect(username: &str, server: Option<String>, insecure: bool) -> anyhow::Result<()> {
    let server_url = resolve_server(server)?;

    let platform = platform::detect()?;
    platform.ensure_privileges()?;
    platform.check_dependencies().await?;

    let password = read_password()?;
    let client = ApiClient::new(&server_url, insecure)?;

    info!(username, "authenticating");
    let session = client.login(username, &password).await?;
    info!(username = %session.user.username, "authenticated");

    let bundle = client.generate_config(&session.token).await?;
    info!(assigned_ip = %bundle.assigned_ip, "configuration issued");

    let mut connector = ClientConnector::new(platform);
    connector.connect(&bundle.config).await?;
    println!("Connected ({})", bundle.assigned_ip);
    println!("Disconnect with: nimbus_client disconnect");
    Ok(())
}

async fn disconnect() -> anyhow::Result<()> {
    let platform = platform::detect()?;
    let mut connector = ClientConnector::new(platform);
    connector.disconnect().await?;
    println!("Disconnected");
    Ok(())
}

async fn status() -> anyhow::Result<()> {
    let platform = platform::detect()?;
    let connector = ClientConnector::new(platform);
    match connector.status().await {
        TunnelStatus::Connected(detail) => {
            println!("Connected");
            println!("{detail}");
        }
        TunnelStatus::NotConnected => println!("Not connected"),
    }
    Ok(())
}

async fn server_status(server: Option<String>, insecure: bool) -> anyhow::Result<()> {
    let server_url = resolve_server(server)?;
    let client = ApiClient::new(&server_url, insecure)?;
    let status = client.status().await?;
    println!(
        "{}: {} users, {} active connections",
        status.status, status.total_users, status.active_connections
    );
    Ok(())
}
