use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wallet_broker::relay::connect;
use wallet_broker::{
    Address, KeyInfo, LocalWallet, RemoteWallet, SignedMessage, UnsignedMessage, WalletApi,
};

#[derive(Parser)]
#[clap(version, about = "Operator tool for a wallet broker")]
struct Cli {
    /// Keystore directory used for relay and detached signing
    #[clap(long, env = "WALLET_PATH", default_value = ".wallet-broker-client")]
    wallet_path: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the local keystore to a broker over its relay endpoint
    Connect {
        #[clap(default_value = "ws://127.0.0.1:1777")]
        url: String,
    },
    /// Manage a broker's offline signer
    Node {
        #[clap(long, env = "BROKER_URL", default_value = "http://127.0.0.1:1777")]
        server: String,
        #[clap(subcommand)]
        command: NodeCommand,
    },
    /// Sign a hex-encoded unsigned message with the local keystore
    Sign { message: String },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// List addresses the broker custodies
    List,
    /// Watch an address on the broker's offline signer
    Import { address: Address },
    /// Stop watching an address
    Delete { address: Address },
    /// Print every request waiting for a signature, one hex message per line
    Pending,
    /// Submit a hex-encoded signed message
    Submit { message: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wallet_broker=info,wallet_broker_client=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Connect { url } => {
            let wallet = LocalWallet::open(&cli.wallet_path).context("opening local keystore")?;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => signal.cancel(),
                    Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
                }
            });
            connect(&url, &wallet, shutdown)
                .await
                .with_context(|| format!("relaying to {url}"))?;
            info!("relay connection closed");
        }
        Command::Node { server, command } => node(RemoteWallet::new(&server), command).await?,
        Command::Sign { message } => {
            let wallet = LocalWallet::open(&cli.wallet_path).context("opening local keystore")?;
            let message = UnsignedMessage::from_hex(&message).context("decoding message")?;
            let signature = wallet
                .sign(&message.address, &message.to_sign, &message.meta)
                .await
                .with_context(|| format!("signing with {}", message.address))?;
            let signed = SignedMessage { message, signature };
            println!("{}", signed.to_hex()?);
        }
    }
    Ok(())
}

async fn node(remote: RemoteWallet, command: NodeCommand) -> Result<()> {
    match command {
        NodeCommand::List => {
            for address in remote.list_keys().await? {
                println!("{address}");
            }
        }
        NodeCommand::Import { address } => {
            let address = remote.import_key(&KeyInfo::watch_only(&address)).await?;
            println!("watching {address}");
        }
        NodeCommand::Delete { address } => {
            remote.delete_key(&address).await?;
            println!("deleted {address}");
        }
        NodeCommand::Pending => {
            for message in remote.list_pending().await? {
                println!("{}", message.to_hex()?);
            }
        }
        NodeCommand::Submit { message } => {
            let signed = SignedMessage::from_hex(&message).context("decoding signed message")?;
            let cid = remote.submit_signature(&signed).await?;
            println!("submitted {cid}");
        }
    }
    Ok(())
}
