use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use coverhub::auth::{TokenKind, generate_token};
use coverhub::config::{ServerConfig, log_filter};
use coverhub::error::Error;
use coverhub::oidc::OidcClient;
use coverhub::server::{AppState, bootstrap_first_admin, create_router};
use coverhub::session::{SWEEP_INTERVAL, SessionStore};
use coverhub::store::{SqliteStore, Store};
use coverhub::types::NewUser;

#[derive(Parser)]
#[command(name = "coverhub")]
#[command(about = "A self-hosted code coverage server", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create the database schema
    Init,

    /// Pre-seed a user; they are linked to their identity on first login
    CreateUser {
        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        name: String,

        #[arg(long)]
        admin: bool,
    },

    /// Grant admin rights to an existing user
    Promote {
        #[arg(long)]
        email: String,
    },
}

fn open_store(config: &ServerConfig) -> anyhow::Result<SqliteStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    Ok(store)
}

fn run_admin(config: &ServerConfig, command: AdminCommands) -> anyhow::Result<()> {
    let store = open_store(config)?;

    match command {
        AdminCommands::Init => {
            println!("Database ready at {}", config.db_path().display());
        }
        AdminCommands::CreateUser { email, name, admin } => {
            let email = email.trim().to_string();
            if !email.contains('@') {
                bail!("'{email}' is not an email address");
            }

            let token = generate_token(TokenKind::Legacy);
            let user = match store.create_user(&NewUser {
                email: email.clone(),
                name,
                admin,
                token: Some(token.clone()),
                ..Default::default()
            }) {
                Ok(user) => user,
                Err(Error::AlreadyExists) => bail!("A user with email {email} already exists"),
                Err(e) => return Err(e.into()),
            };

            println!();
            println!("========================================");
            println!("Created user {} (id {})", user.email, user.id);
            println!("Token (save this, it won't be shown again):");
            println!();
            println!("  {token}");
            println!();
            println!("========================================");
            println!();
        }
        AdminCommands::Promote { email } => {
            let Some(mut user) = store.get_user_by_email(email.trim())? else {
                bail!("No user with email {email}");
            };
            user.admin = true;
            store.update_user(&user)?;
            println!("{} is now an admin", user.email);
        }
    }

    Ok(())
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    bootstrap_first_admin(&store, &config)?;

    let oidc = match config.oidc_settings() {
        Some(settings) => {
            info!("Discovering OIDC provider {}", settings.issuer);
            let client = OidcClient::discover(settings)
                .await
                .context("OIDC discovery failed")?;
            Some(Arc::new(client))
        }
        None => {
            info!("OIDC is not configured; only token authentication is available");
            None
        }
    };

    let sessions = Arc::new(SessionStore::new());
    sessions.clone().spawn_sweeper(SWEEP_INTERVAL);

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(Arc::new(store), sessions, oidc, config));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Admin { command } => run_admin(&config, command)?,
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            run_server(config).await?;
        }
    }

    Ok(())
}
