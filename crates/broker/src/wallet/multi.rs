use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{WalletError, WalletResult};
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};

use super::WalletApi;

/// Routes every operation to the backend that owns the address.
///
/// Backends are consulted in registration order. The first one whose
/// `has_key` answers yes owns the address; an error from `has_key` aborts the
/// lookup and is returned to the caller.
#[derive(Default)]
pub struct MultiWallet {
    wallets: Vec<Arc<dyn WalletApi>>,
}

impl MultiWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, wallet: Arc<dyn WalletApi>) {
        self.wallets.push(wallet);
    }

    pub fn with(mut self, wallet: Arc<dyn WalletApi>) -> Self {
        self.add(wallet);
        self
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    async fn find(&self, address: &Address) -> WalletResult<Option<&Arc<dyn WalletApi>>> {
        for wallet in &self.wallets {
            if wallet.has_key(address).await? {
                return Ok(Some(wallet));
            }
        }
        Ok(None)
    }

    async fn owner(&self, address: &Address) -> WalletResult<&Arc<dyn WalletApi>> {
        self.find(address)
            .await?
            .ok_or_else(|| WalletError::KeyNotFound(address.clone()))
    }
}

#[async_trait]
impl WalletApi for MultiWallet {
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address> {
        for (index, wallet) in self.wallets.iter().enumerate() {
            match wallet.new_key(key_type).await {
                Ok(address) => return Ok(address),
                Err(e) => debug!(backend = index, %key_type, error = %e, "backend declined new key"),
            }
        }
        Err(WalletError::UnsupportedKeyType(key_type.to_string()))
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        Ok(self.find(address).await?.is_some())
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for wallet in &self.wallets {
            for address in wallet.list_keys().await? {
                if seen.insert(address.clone()) {
                    out.push(address);
                }
            }
        }
        Ok(out)
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        meta.ensure_known()?;
        self.owner(address).await?.sign(address, payload, meta).await
    }

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo> {
        self.owner(address).await?.export_key(address).await
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        for (index, wallet) in self.wallets.iter().enumerate() {
            match wallet.import_key(info).await {
                Ok(address) => return Ok(address),
                Err(e) => debug!(backend = index, key_type = %info.key_type, error = %e, "backend declined import"),
            }
        }
        Err(WalletError::UnsupportedKeyType(info.key_type.to_string()))
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        self.owner(address).await?.delete_key(address).await
    }
}
