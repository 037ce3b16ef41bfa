//! Command-line host for the session core
//!
//! Each invocation is a fresh execution context: it builds a manager over
//! the configured storage, re-reads the persisted session, runs one command
//! and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{handle_message, AuthRequest};
use crate::config::Config;
use crate::services::{HttpAuthClient, SessionManager, SessionSettings, SessionStore};
use crate::storage::create_storage;

#[derive(Parser, Debug)]
#[command(name = "gifcap-session")]
#[command(about = "Sign in to the GIF capture backend and manage the local session")]
#[command(version)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yml", value_name = "FILE")]
    pub config: PathBuf,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the current session state, refreshing it if near expiry
    Status,

    /// Sign in with email and password
    Login {
        email: String,
        #[arg(short, long)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        email: String,
        username: String,
        #[arg(short, long)]
        password: String,
        /// Defaults to the password
        #[arg(long)]
        password_confirmation: Option<String>,
    },

    /// Sign in with a Google ID token
    Google { id_token: String },

    /// Sign out and revoke the token
    Logout,

    /// Fetch the signed-in user's profile
    Whoami,

    /// Make an authenticated request to the backend API
    #[command(alias = "req")]
    Request {
        /// HTTP method, e.g. GET or POST
        method: String,
        /// API path, e.g. /api/v1/gifs/feed
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

impl Cli {
    /// Default log filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "gifcap_session=info",
            1 => "gifcap_session=debug",
            _ => "gifcap_session=trace",
        }
    }
}

/// Build the session manager described by `config`
pub async fn build_manager(config: &Config) -> Result<SessionManager> {
    let storage = create_storage(&config.storage).await?;
    let api = HttpAuthClient::from_config(&config.backend).context("Failed to create HTTP client")?;

    Ok(SessionManager::new(
        Arc::new(api),
        SessionStore::new(storage),
        SessionSettings::from(&config.session),
    ))
}

/// Run one command
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_with_env(&cli.config)?;
    tracing::debug!("Backend: {}", config.backend.base_url);

    let manager = build_manager(&config).await?;
    manager.init().await;

    let request = match cli.command {
        Commands::Status => AuthRequest::Mount,
        Commands::Login { email, password } => AuthRequest::Login { email, password },
        Commands::Register {
            email,
            username,
            password,
            password_confirmation,
        } => AuthRequest::Register {
            email,
            username,
            password_confirmation: password_confirmation.unwrap_or_else(|| password.clone()),
            password,
        },
        Commands::Google { id_token } => AuthRequest::GoogleLogin { id_token },
        Commands::Logout => AuthRequest::Logout,
        Commands::Whoami => AuthRequest::RefreshProfile,
        Commands::Request { method, path, data } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;
            let body = data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("Request body is not valid JSON")?;

            let value = manager.authorized_json(method, &path, body).await?;
            return print_json(&value);
        }
    };

    let response = handle_message(&manager, request).await;
    print_json(&response)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
