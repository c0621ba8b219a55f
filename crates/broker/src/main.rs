use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wallet_broker::config::DEFAULT_LISTEN;
use wallet_broker::{
    Address, AppState, BrokerConfig, KeyInfo, KeyType, LocalWallet, LoggedWallet, MultiWallet,
    OfflineWallet, RemoteWallet, SafeWallet, WalletApi, WalletServer, run,
};

/// File inside the keystore directory holding the offline signer's watch set.
const OFFLINE_WATCH_FILE: &str = "offline-watch.json";

#[derive(Parser)]
#[clap(version, about = "Key-custody broker routing signing requests to wallet backends")]
struct Cli {
    /// Keystore directory of the local wallet
    #[clap(long, env = "WALLET_PATH", default_value = ".wallet-broker")]
    wallet_path: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the wallet endpoints over HTTP
    Run(RunArgs),
    /// Manage keys in the local keystore
    #[clap(subcommand)]
    Wallet(WalletCommand),
}

#[derive(Args)]
struct RunArgs {
    #[clap(long, env = "BROKER_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,
    /// Refuse key creation and export on the local keystore
    #[clap(long, env = "SAFE_WALLET")]
    safe: bool,
    /// Accept relay peers on /ws
    #[clap(long)]
    server: bool,
    /// Queue chain messages for an external signer
    #[clap(long)]
    offline: bool,
    /// Forward to another broker at this URL
    #[clap(long, env = "REMOTE_WALLET")]
    remote: Option<String>,
    /// Seconds an offline request waits for its signature
    #[clap(long, default_value = "300")]
    offline_timeout: u64,
    /// Seconds between relay heartbeat pings
    #[clap(long, default_value = "10")]
    heartbeat_interval: u64,
    /// Seconds a relay peer has to answer the handshake
    #[clap(long, default_value = "30")]
    handshake_timeout: u64,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a new key
    New {
        #[clap(default_value = "secp256k1")]
        key_type: KeyType,
    },
    /// List keys
    List,
    /// Import a hex-encoded key; read from stdin when omitted
    Import { key: Option<String> },
    /// Print a key as hex
    Export { address: Address },
    /// Delete a key
    Delete { address: Address },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wallet_broker=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Cli {
        wallet_path,
        command,
    } = Cli::parse();

    match command {
        Command::Run(args) => run_broker(&wallet_path, args).await,
        Command::Wallet(command) => manage_keystore(&wallet_path, command).await,
    }
}

async fn run_broker(wallet_path: &Path, args: RunArgs) -> Result<()> {
    let config = BrokerConfig {
        listen: args.listen,
        offline_timeout: Duration::from_secs(args.offline_timeout),
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
        handshake_timeout: Duration::from_secs(args.handshake_timeout),
    };
    config.validate().map_err(|e| anyhow!(e))?;

    let shutdown = CancellationToken::new();
    let local = LocalWallet::open(wallet_path).context("opening local keystore")?;

    let mut wallets = MultiWallet::new();
    if args.safe {
        info!("safe wallet enabled");
        wallets.add(Arc::new(SafeWallet::new(local)));
    } else {
        wallets.add(Arc::new(local));
    }

    let offline = if args.offline {
        let offline = OfflineWallet::open(wallet_path.join(OFFLINE_WATCH_FILE))
            .context("opening offline watch set")?
            .with_timeout(config.offline_timeout)
            .with_shutdown(shutdown.child_token());
        let offline = Arc::new(offline);
        wallets.add(offline.clone());
        info!("offline signer enabled");
        Some(offline)
    } else {
        None
    };

    let relay = if args.server {
        let relay = Arc::new(
            WalletServer::new()
                .with_heartbeat_interval(config.heartbeat_interval)
                .with_handshake_timeout(config.handshake_timeout)
                .with_shutdown(shutdown.child_token()),
        );
        wallets.add(relay.clone());
        info!("relay server enabled");
        Some(relay)
    } else {
        None
    };

    if let Some(url) = &args.remote {
        wallets.add(Arc::new(RemoteWallet::new(url)));
        info!(%url, "remote wallet enabled");
    }

    let state = AppState {
        wallet: Arc::new(LoggedWallet::new(wallets)),
        offline,
        relay,
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    run(config.listen, state, shutdown).await
}

async fn manage_keystore(wallet_path: &Path, command: WalletCommand) -> Result<()> {
    let wallet = LocalWallet::open(wallet_path).context("opening local keystore")?;

    match command {
        WalletCommand::New { key_type } => {
            println!("{}", wallet.new_key(key_type).await?);
        }
        WalletCommand::List => {
            let mut addresses = wallet.list_keys().await?;
            addresses.sort();
            for address in addresses {
                println!("{address}");
            }
        }
        WalletCommand::Import { key } => {
            let hex = match key {
                Some(key) => key,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading key from stdin")?;
                    buf
                }
            };
            let info = KeyInfo::from_hex(&hex).context("decoding key")?;
            println!("imported key {}", wallet.import_key(&info).await?);
        }
        WalletCommand::Export { address } => {
            println!("{}", wallet.export_key(&address).await?.to_hex()?);
        }
        WalletCommand::Delete { address } => {
            wallet.delete_key(&address).await?;
            println!("deleted {address}");
        }
    }
    Ok(())
}
