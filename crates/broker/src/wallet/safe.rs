use async_trait::async_trait;

use crate::error::{WalletError, WalletResult};
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};

use super::WalletApi;

/// Wraps a backend so that keys can neither be created nor exported through it.
///
/// Everything else is delegated untouched.
pub struct SafeWallet<W> {
    inner: W,
}

impl<W> SafeWallet<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }
}

#[async_trait]
impl<W: WalletApi> WalletApi for SafeWallet<W> {
    async fn new_key(&self, _key_type: KeyType) -> WalletResult<Address> {
        Err(WalletError::unsupported(
            "safe wallet is enabled, use import instead of new",
        ))
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        self.inner.has_key(address).await
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        self.inner.list_keys().await
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        self.inner.sign(address, payload, meta).await
    }

    async fn export_key(&self, _address: &Address) -> WalletResult<KeyInfo> {
        Err(WalletError::unsupported(
            "safe wallet is enabled, export is disabled",
        ))
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        self.inner.import_key(info).await
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        self.inner.delete_key(address).await
    }
}
