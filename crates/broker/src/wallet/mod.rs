mod local;
mod logged;
mod multi;
mod remote;
mod safe;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WalletResult;
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};

pub use local::LocalWallet;
pub use logged::LoggedWallet;
pub use multi::MultiWallet;
pub use remote::RemoteWallet;
pub use safe::SafeWallet;

/// The capability every key-holding backend, decorator and the router expose.
///
/// Unsupported operations return an error, never panic. `sign` may block for
/// a long time on backends that wait for a human or a network peer; callers
/// that need to give up early drop the future.
#[async_trait]
pub trait WalletApi: Send + Sync {
    /// Create and persist a new key of the given family.
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address>;

    /// Whether this backend custodies `address`. Never mutates state.
    async fn has_key(&self, address: &Address) -> WalletResult<bool>;

    /// Every address this backend custodies, in no particular order.
    async fn list_keys(&self) -> WalletResult<Vec<Address>>;

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature>;

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo>;

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address>;

    /// Remove `address` from custody. Fails for addresses this backend does not own.
    async fn delete_key(&self, address: &Address) -> WalletResult<()>;
}

#[async_trait]
impl<W: WalletApi + ?Sized> WalletApi for Arc<W> {
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address> {
        (**self).new_key(key_type).await
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        (**self).has_key(address).await
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        (**self).list_keys().await
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        (**self).sign(address, payload, meta).await
    }

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo> {
        (**self).export_key(address).await
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        (**self).import_key(info).await
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        (**self).delete_key(address).await
    }
}
