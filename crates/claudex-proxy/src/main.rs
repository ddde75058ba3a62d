//! `claudex` binary entrypoint.

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use claudex_auth::{CredentialManager, CredentialStatus};
use claudex_proxy::{serve, ProxyConfig, ServeError};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Claudex - Anthropic Messages API gateway backed by an OpenAI-style upstream
#[derive(Parser, Debug)]
#[command(name = "claudex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a claudex.yml configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway (default)
    Serve {
        /// Port to listen on (overrides PORT and the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Authorize with the upstream provider in a browser
    Login,

    /// Remove the stored upstream credential
    Logout,

    /// Show the stored upstream credential's state
    Status,
}

#[actix_web::main]
async fn main() {
    // Respect `RUST_LOG` if set; otherwise default to info.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        None => run_serve(cli.config, None).await,
        Some(Commands::Serve { port }) => run_serve(cli.config, port).await,
        Some(Commands::Login) => run_login(cli.config).await,
        Some(Commands::Logout) => run_logout(cli.config),
        Some(Commands::Status) => run_status(cli.config),
    };

    if let Err(e) = result {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        match e.downcast_ref::<ServeError>() {
            Some(ServeError::NotAuthenticated) => {
                eprintln!("Run {} to authorize the upstream first.", "claudex login".yellow());
            }
            Some(ServeError::Bind { .. }) => {
                eprintln!(
                    "Pick another port with {} or the {} variable.",
                    "--port".yellow(),
                    "PORT".yellow()
                );
            }
            None => {}
        }
        std::process::exit(1);
    }
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ProxyConfig::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.port = port;
    }
    serve(config).await
}

async fn run_login(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ProxyConfig::load(config_path.as_deref())?;
    let manager = CredentialManager::new(config.auth)?;

    println!("{}", "Authorizing upstream access".cyan().bold());
    let credential = manager
        .authorize(|url| {
            println!("Open this URL if the browser does not start:");
            println!("  {}", url.underline());
        })
        .await?;

    println!(
        "  {} Logged in; token valid until {}",
        "✓".green(),
        format_expiry(credential.expires_at).yellow()
    );
    println!(
        "  Credential stored at {}",
        manager.config().credential_path.display().to_string().dimmed()
    );
    Ok(())
}

fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ProxyConfig::load(config_path.as_deref())?;
    let manager = CredentialManager::new(config.auth)?;
    manager.clear()?;
    println!("  {} Logged out", "✓".green());
    Ok(())
}

fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ProxyConfig::load(config_path.as_deref())?;
    let manager = CredentialManager::new(config.auth)?;

    println!("{}", "Upstream credential:".cyan().bold());
    match manager.status() {
        CredentialStatus::Unauthenticated => {
            println!("  {} Not logged in", "✗".red());
            println!("  Run {} to authorize.", "claudex login".yellow());
        }
        CredentialStatus::Authenticated {
            expires_at,
            needs_refresh,
            expired,
        } => {
            if expired {
                println!(
                    "  {} Logged in; token expired at {}",
                    "!".yellow(),
                    format_expiry(expires_at).yellow()
                );
            } else {
                println!(
                    "  {} Logged in; token valid until {}",
                    "✓".green(),
                    format_expiry(expires_at).yellow()
                );
            }
            if needs_refresh {
                println!("  {}", "Token will be refreshed on next use".dimmed());
            }
        }
    }
    Ok(())
}

fn format_expiry(expires_at_ms: i64) -> String {
    Utc.timestamp_millis_opt(expires_at_ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| expires_at_ms.to_string())
}
