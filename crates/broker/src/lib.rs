pub mod config;
pub mod error;
pub mod offline;
pub mod relay;
pub mod server;
pub mod sigs;
pub mod types;
pub mod wallet;

mod sync;

pub use config::BrokerConfig;
pub use error::{WalletError, WalletResult};
pub use offline::OfflineWallet;
pub use relay::{ConnectionState, WalletServer, serve_wallet};
pub use server::{AppState, router, run, serve};
pub use sigs::{SigsVerifier, Verifier};
pub use types::{
    Address, ContentId, KeyInfo, KeyType, MsgMeta, MsgType, Signature, SignedMessage,
    UnsignedMessage,
};
pub use wallet::{LocalWallet, LoggedWallet, MultiWallet, RemoteWallet, SafeWallet, WalletApi};
