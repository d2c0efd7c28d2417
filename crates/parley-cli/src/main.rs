//! parley: chat client CLI.
//!
//! Logs in to a parley server and runs an interactive chat session, or
//! manages accounts and tokens over the REST API.

mod commands;
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use parley_client::ChatClient;
use std::path::PathBuf;
use tracing::error;

/// parley chat client
#[derive(Parser)]
#[command(name = "parley", version, about = "Chat client for parley servers")]
struct Cli {
    /// Server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join the chat room
    Connect {
        /// Login name (defaults to config, then the system user)
        user: Option<String>,

        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Join as an anonymous guest
        #[arg(long, conflicts_with_all = ["user", "password"])]
        guest: bool,
    },

    /// Create an account
    Register {
        user: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Obtain a bearer token for the REST API
    Token {
        user: Option<String>,

        #[arg(long)]
        password: Option<String>,
    },

    /// Print a salted password verifier (JSON)
    GenPassword {
        #[arg(long)]
        password: Option<String>,

        /// PBKDF2 iteration count
        #[arg(long, default_value_t = 10_000)]
        iterations: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let default_filter = if cli.verbose {
        "parley=debug,parley_client=debug,parley_core=debug"
    } else {
        "parley=warn,parley_client=warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("parley: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let cfg = Config::load(&config_path)?;

    let host = cli.host.clone().unwrap_or_else(|| cfg.default.host.clone());
    let port = cli.port.unwrap_or(cfg.default.port);
    let client = ChatClient::new(&host, port).context("invalid server address")?;

    match cli.command {
        Command::Connect { user, password, guest } => {
            let user = config::resolve_username(user.as_deref(), &cfg);
            commands::connect::run(&client, &user, password, guest).await
        }
        Command::Register { user, password } => commands::register::run(&client, &user, password).await,
        Command::Token { user, password } => {
            let user = config::resolve_username(user.as_deref(), &cfg);
            commands::token::run(&client, &user, password).await
        }
        Command::GenPassword { password, iterations } => commands::gen_password::run(password, iterations),
    }
}
