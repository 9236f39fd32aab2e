use std::net::SocketAddr;
use std::path::PathBuf;

use burrow_common::Did;
use burrow_pds::config::Config;
use burrow_pds::keys::{KeyStore, create_key_file, generate_key};
use burrow_pds::{Pds, run_with_config_until_ctrl_c};
use burrow_repo::SigningKey as _;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Repository storage and sync server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Override `data_dir` from the config
    #[arg(long, global = true, env = "BURROW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the sync endpoints until Ctrl-C
    Run {
        /// Override `http.bind_addr` from the config
        #[arg(long, env = "BURROW_BIND_ADDR")]
        bind_addr: Option<SocketAddr>,
    },
    /// Write the server's secp256k1 rotation key
    CreateRotationKey {
        /// Output file; defaults to `rotation_key_path` from the config
        #[arg(long)]
        out: Option<PathBuf>,
        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Write a secp256k1 signing key for one repository into the key directory
    CreateSigningKey {
        /// DID the repository belongs to
        #[arg(long)]
        did: String,
    },
    /// Create a repository, signed with its stored key or a fresh one
    CreateRepo {
        /// DID the repository belongs to
        #[arg(long)]
        did: String,
    },
}

async fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli).await?;

    let filter =
        EnvFilter::try_from_env("BURROW_LOG").unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(filter)
        .init();
    debug!(?config, "loaded config");

    match cli.command {
        Command::Run { bind_addr } => {
            if let Some(addr) = bind_addr {
                config.http.bind_addr = addr;
            }
            run_with_config_until_ctrl_c(config).await?;
        }
        Command::CreateRotationKey { out, force } => {
            let path = out.unwrap_or_else(|| config.rotation_key_file());
            let key = create_key_file(&path, force).into_diagnostic()?;
            println!("{}", key.public_key().did_key());
        }
        Command::CreateSigningKey { did } => {
            let did = Did::new(&did).into_diagnostic()?;
            let key = KeyStore::new(config.keys_dir()).generate(&did).await?;
            println!("{}", key.public_key().did_key());
        }
        Command::CreateRepo { did } => {
            let did = Did::new(&did).into_diagnostic()?;
            let keys = KeyStore::new(config.keys_dir());
            let key = if keys.key_path(&did).exists() {
                keys.load(&did).await?
            } else {
                generate_key()
            };
            let pds = Pds::open(&config)?;
            let created = pds.create_repo(&did, &key).await?;
            println!("{} {} {}", did, created.commit.cid, created.commit.rev);
        }
    }
    Ok(())
}
