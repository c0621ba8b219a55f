use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::WalletResult;
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};

use super::WalletApi;

/// Traces every call made through the wrapped wallet.
pub struct LoggedWallet<W> {
    under: W,
}

impl<W> LoggedWallet<W> {
    pub fn new(under: W) -> Self {
        Self { under }
    }
}

fn traced<T>(op: &'static str, result: WalletResult<T>) -> WalletResult<T> {
    if let Err(e) = &result {
        warn!(op, error = %e, "wallet call failed");
    }
    result
}

#[async_trait]
impl<W: WalletApi> WalletApi for LoggedWallet<W> {
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address> {
        info!(%key_type, "WalletNew");
        traced("WalletNew", self.under.new_key(key_type).await)
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        info!(%address, "WalletHas");
        traced("WalletHas", self.under.has_key(address).await)
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        info!("WalletList");
        traced("WalletList", self.under.list_keys().await)
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        info!(%address, msg_type = %meta.msg_type, len = payload.len(), "WalletSign");
        traced("WalletSign", self.under.sign(address, payload, meta).await)
    }

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo> {
        info!(%address, "WalletExport");
        traced("WalletExport", self.under.export_key(address).await)
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        info!(key_type = %info.key_type, "WalletImport");
        traced("WalletImport", self.under.import_key(info).await)
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        info!(%address, "WalletDelete");
        traced("WalletDelete", self.under.delete_key(address).await)
    }
}
