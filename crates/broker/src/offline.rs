//! Offline signer: a backend with no private keys that parks signing requests
//! until an external signer submits a signature for them.
//!
//! Requests are keyed by (address, content id). Byte-identical requests for
//! the same address share one entry, and every caller waiting on it receives
//! the submitted signature.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{WalletError, WalletResult};
use crate::sigs::{SigsVerifier, Verifier};
use crate::sync::lock;
use crate::types::{
    Address, ContentId, KeyInfo, KeyType, MsgMeta, MsgType, Signature, SignedMessage,
    UnsignedMessage,
};
use crate::wallet::WalletApi;

/// How long `sign` waits for a submission before giving up.
pub const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Signature>,
}

struct PendingEntry {
    message: UnsignedMessage,
    waiters: Vec<Waiter>,
}

type PendingMap = HashMap<Address, HashMap<ContentId, PendingEntry>>;

pub struct OfflineWallet {
    pending: Mutex<PendingMap>,
    watched: Mutex<BTreeSet<Address>>,
    path: Option<PathBuf>,
    timeout: Duration,
    verifier: Arc<dyn Verifier>,
    shutdown: CancellationToken,
    next_ticket: AtomicU64,
}

impl Default for OfflineWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineWallet {
    /// An offline signer whose watch set lives only in memory.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            watched: Mutex::new(BTreeSet::new()),
            path: None,
            timeout: DEFAULT_SIGN_TIMEOUT,
            verifier: Arc::new(SigsVerifier),
            shutdown: CancellationToken::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Opens an offline signer whose watch set is stored as a JSON array of
    /// addresses at `path`. A missing file is an empty set.
    pub fn open(path: impl Into<PathBuf>) -> WalletResult<Self> {
        let path = path.into();
        let watched = match fs::read(&path) {
            Ok(contents) => serde_json::from_slice::<BTreeSet<Address>>(&contents).map_err(|e| {
                WalletError::Keystore(format!("parsing {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(WalletError::Keystore(format!("{}: {e}", path.display()))),
        };
        info!(path = %path.display(), addresses = watched.len(), "opened offline watch set");

        let mut wallet = Self::new();
        wallet.watched = Mutex::new(watched);
        wallet.path = Some(path);
        Ok(wallet)
    }

    /// Sets how long `sign` waits for a submission. A zero timeout is ignored.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("ignoring zero offline sign timeout");
        } else {
            self.timeout = timeout;
        }
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Ties pending `sign` calls to an external shutdown signal.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Releases every blocked `sign` call with [`WalletError::Cancelled`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Snapshot of the requests currently waiting for a signature.
    pub fn list_pending(&self) -> Vec<UnsignedMessage> {
        lock(&self.pending)
            .values()
            .flat_map(|by_cid| by_cid.values())
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Accepts an externally produced signature for a pending request.
    ///
    /// The signature is verified before anything else; a rejected submission
    /// leaves the request pending.
    pub fn submit_signature(&self, signed: &SignedMessage) -> WalletResult<ContentId> {
        let message = &signed.message;
        self.verifier
            .verify(&signed.signature, &message.address, &message.to_sign)
            .map_err(|e| match e {
                WalletError::VerificationFailed(_) => e,
                other => WalletError::VerificationFailed(other.to_string()),
            })?;

        let cid = message.content_id();
        let entry = {
            let mut pending = lock(&self.pending);
            let entry = pending
                .get_mut(&message.address)
                .and_then(|by_cid| by_cid.remove(&cid));
            if pending
                .get(&message.address)
                .is_some_and(|by_cid| by_cid.is_empty())
            {
                pending.remove(&message.address);
            }
            entry
        };
        let entry = entry.ok_or_else(|| WalletError::PendingNotFound {
            address: message.address.clone(),
            cid,
        })?;

        info!(address = %message.address, %cid, waiters = entry.waiters.len(), "signature submitted");
        for waiter in entry.waiters {
            // The caller may have given up between removal and delivery.
            let _ = waiter.tx.send(signed.signature.clone());
        }
        Ok(cid)
    }

    fn is_watched(&self, address: &Address) -> bool {
        lock(&self.watched).contains(address)
    }

    fn persist(&self, watched: &BTreeSet<Address>) -> WalletResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_vec_pretty(watched)
            .map_err(|e| WalletError::Keystore(format!("serializing watch set: {e}")))?;
        fs::write(path, contents)
            .map_err(|e| WalletError::Keystore(format!("{}: {e}", path.display())))
    }

    fn enqueue(&self, message: UnsignedMessage) -> (PendingGuard<'_>, oneshot::Receiver<Signature>) {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let address = message.address.clone();
        let cid = message.content_id();

        lock(&self.pending)
            .entry(address.clone())
            .or_default()
            .entry(cid)
            .or_insert_with(|| PendingEntry {
                message,
                waiters: Vec::new(),
            })
            .waiters
            .push(Waiter { ticket, tx });

        let guard = PendingGuard {
            wallet: self,
            address,
            cid,
            ticket,
        };
        (guard, rx)
    }
}

/// Removes its waiter from the pending map on every exit from `sign`,
/// including the caller dropping the future.
struct PendingGuard<'a> {
    wallet: &'a OfflineWallet,
    address: Address,
    cid: ContentId,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.wallet.pending);
        let Some(by_cid) = pending.get_mut(&self.address) else {
            return;
        };
        if let Some(entry) = by_cid.get_mut(&self.cid) {
            entry.waiters.retain(|waiter| waiter.ticket != self.ticket);
            if entry.waiters.is_empty() {
                by_cid.remove(&self.cid);
            }
        }
        if by_cid.is_empty() {
            pending.remove(&self.address);
        }
    }
}

#[async_trait]
impl WalletApi for OfflineWallet {
    async fn new_key(&self, _key_type: KeyType) -> WalletResult<Address> {
        Err(WalletError::unsupported(
            "offline wallet holds no private keys, import a watch-only address instead",
        ))
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        Ok(self.is_watched(address))
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        Ok(lock(&self.watched).iter().cloned().collect())
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        if meta.msg_type != MsgType::ChainMsg {
            return Err(WalletError::UnsupportedMessageType(meta.msg_type));
        }
        if !self.is_watched(address) {
            return Err(WalletError::KeyNotFound(address.clone()));
        }

        let message = UnsignedMessage {
            address: address.clone(),
            to_sign: payload.to_vec(),
            meta: meta.clone(),
        };
        let (guard, rx) = self.enqueue(message);
        info!(%address, cid = %guard.cid, "waiting for offline signature");

        tokio::select! {
            received = rx => received.map_err(|_| WalletError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(%address, cid = %guard.cid, timeout = ?self.timeout, "offline signature timed out");
                Err(WalletError::Timeout(self.timeout))
            }
            _ = self.shutdown.cancelled() => {
                debug!(%address, cid = %guard.cid, "offline signer shutting down");
                Err(WalletError::Cancelled)
            }
        }
    }

    async fn export_key(&self, _address: &Address) -> WalletResult<KeyInfo> {
        Err(WalletError::unsupported(
            "offline wallet holds no private keys to export",
        ))
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        let address: Address = std::str::from_utf8(&info.private_key)
            .map_err(|_| WalletError::InvalidKey("watch-only key must carry an address".into()))?
            .parse()?;
        if address.key_type() != info.key_type {
            return Err(WalletError::InvalidKey(format!(
                "{} key carries {} address {address}",
                info.key_type,
                address.key_type()
            )));
        }

        let mut watched = lock(&self.watched);
        if watched.insert(address.clone()) {
            self.persist(&watched)?;
        }
        info!(%address, "watching address");
        Ok(address)
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        let mut watched = lock(&self.watched);
        if !watched.remove(address) {
            return Err(WalletError::KeyNotFound(address.clone()));
        }
        self.persist(&watched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigs;

    fn watched_wallet() -> (OfflineWallet, Address) {
        let wallet = OfflineWallet::new();
        let address = sigs::address_of(&sigs::generate(KeyType::Secp256k1)).unwrap();
        let mut watched = lock(&wallet.watched);
        watched.insert(address.clone());
        drop(watched);
        (wallet, address)
    }

    #[test]
    fn zero_timeout_keeps_default() {
        let wallet = OfflineWallet::new().with_timeout(Duration::ZERO);
        assert_eq!(wallet.timeout(), DEFAULT_SIGN_TIMEOUT);
        let wallet = wallet.with_timeout(Duration::from_secs(1));
        assert_eq!(wallet.timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rejects_non_chain_messages() {
        let (wallet, address) = watched_wallet();
        for msg_type in [MsgType::Unknown, MsgType::Block, MsgType::DealProposal] {
            let err = wallet
                .sign(&address, b"x", &MsgMeta::new(msg_type))
                .await
                .unwrap_err();
            assert!(matches!(err, WalletError::UnsupportedMessageType(t) if t == msg_type));
        }
        assert!(wallet.list_pending().is_empty());
    }

    #[tokio::test]
    async fn unwatched_address_is_key_not_found() {
        let wallet = OfflineWallet::new();
        let address = sigs::address_of(&sigs::generate(KeyType::Ed25519)).unwrap();
        let err = wallet
            .sign(&address, b"x", &MsgMeta::chain_message())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn import_accepts_watch_only_addresses() {
        let wallet = OfflineWallet::new();
        let address = sigs::address_of(&sigs::generate(KeyType::Ed25519)).unwrap();

        let imported = wallet.import_key(&KeyInfo::watch_only(&address)).await.unwrap();
        assert_eq!(imported, address);
        assert!(wallet.has_key(&address).await.unwrap());
        assert_eq!(wallet.list_keys().await.unwrap(), vec![address.clone()]);

        assert!(matches!(
            wallet.export_key(&address).await,
            Err(WalletError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            wallet.new_key(KeyType::Ed25519).await,
            Err(WalletError::UnsupportedOperation(_))
        ));

        wallet.delete_key(&address).await.unwrap();
        assert!(matches!(
            wallet.delete_key(&address).await,
            Err(WalletError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn import_rejects_real_private_keys() {
        let wallet = OfflineWallet::new();
        let err = wallet
            .import_key(&sigs::generate(KeyType::Secp256k1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::InvalidKey(_) | WalletError::InvalidAddress(_)
        ));
    }

    #[tokio::test]
    async fn import_rejects_mismatched_family() {
        let wallet = OfflineWallet::new();
        let address = sigs::address_of(&sigs::generate(KeyType::Ed25519)).unwrap();
        let mut info = KeyInfo::watch_only(&address);
        info.key_type = KeyType::Secp256k1;
        assert!(matches!(
            wallet.import_key(&info).await,
            Err(WalletError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn watch_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched.json");
        let address = sigs::address_of(&sigs::generate(KeyType::Secp256k1)).unwrap();

        OfflineWallet::open(&path)
            .unwrap()
            .import_key(&KeyInfo::watch_only(&address))
            .await
            .unwrap();

        let reopened = OfflineWallet::open(&path).unwrap();
        assert!(reopened.has_key(&address).await.unwrap());
    }

    #[tokio::test]
    async fn dropping_the_future_removes_the_entry() {
        let (wallet, address) = watched_wallet();
        {
            let meta = MsgMeta::chain_message();
            let sign = wallet.sign(&address, b"abandoned", &meta);
            let outcome = tokio::time::timeout(Duration::from_millis(20), sign).await;
            assert!(outcome.is_err(), "nobody submitted, sign must still be waiting");
        }
        assert!(wallet.list_pending().is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let (wallet, address) = watched_wallet();
        let wallet = Arc::new(wallet);

        let signer = {
            let wallet = wallet.clone();
            let address = address.clone();
            tokio::spawn(async move {
                wallet
                    .sign(&address, b"stuck", &MsgMeta::chain_message())
                    .await
            })
        };
        while wallet.list_pending().is_empty() {
            tokio::task::yield_now().await;
        }

        wallet.shutdown();
        let err = signer.await.unwrap().unwrap_err();
        assert!(matches!(err, WalletError::Cancelled));
        assert!(wallet.list_pending().is_empty());
    }

    #[test]
    fn submit_without_pending_entry_is_not_found() {
        let key = sigs::generate(KeyType::Ed25519);
        let address = sigs::address_of(&key).unwrap();
        let wallet = OfflineWallet::new();

        let signed = SignedMessage {
            message: UnsignedMessage {
                address,
                to_sign: b"never asked".to_vec(),
                meta: MsgMeta::chain_message(),
            },
            signature: sigs::sign(&key, b"never asked").unwrap(),
        };
        assert!(matches!(
            wallet.submit_signature(&signed),
            Err(WalletError::PendingNotFound { .. })
        ));
    }
}
