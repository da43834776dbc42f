use std::io::IsTerminal;

use clap::{Parser, Subcommand};

use beacon_hub::auth::TokenService;
use beacon_hub::config::Config;

#[derive(Parser)]
#[command(name = "beacon", about = "Realtime coordination hub for multi-device clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub server (default)
    Serve,

    /// Mint a bearer token for local development
    Token {
        /// User id to embed in the token
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Token { user }) => mint_token(&user),
        Some(Commands::Serve) | None => serve().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::load()?;
    beacon_hub::run_server(config).await
}

fn mint_token(user: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let tokens = TokenService::new(config.master_secret, config.token_expiry, "beacon");
    println!("{}", tokens.create_token(user)?);
    Ok(())
}
