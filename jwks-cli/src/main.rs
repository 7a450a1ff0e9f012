use clap::{Parser, Subcommand};
use jwks_admin::RepositoryConfig;
use jwks_cli::commands;
use jwks_cli::error::Result;
use jwks_cli::output::{self, OutputFormat};
use jwks_cli::workspace::{self, AdminWorkspace};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "jwks-cli",
    about = "Administration of a JSON Web Key Set and its credential keystore",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    debug: bool,

    /// Data directory [default: $JWKS_HOME or ~/.jwks]
    #[arg(long, global = true)]
    root: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the published key set
    Keys {
        #[command(subcommand)]
        cmd: commands::keys::KeyCommands,
    },
    /// Manage keystore credentials
    Credential {
        #[command(subcommand)]
        cmd: commands::credential::CredentialCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    // Initialize logging to stderr
    let level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("jwks_cli={},jwks_admin={}", level, level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .init();

    if let Err(e) = run(&cli).await {
        output::print_error(format, &e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let root = workspace::resolve_root(cli.root.as_deref())?;
    let config = RepositoryConfig::from_env()?;
    let workspace = AdminWorkspace::open(root, config)?;
    info!(root = %workspace.root().display(), "JWKS CLI initialized");

    match &cli.command {
        Commands::Keys { cmd } => commands::keys::handle(cmd, cli.format, &workspace).await,
        Commands::Credential { cmd } => {
            commands::credential::handle(cmd, cli.format, &workspace).await
        }
    }
}
