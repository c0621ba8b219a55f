use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use wallet_broker::sigs;
use wallet_broker::{
    Address, ContentId, KeyInfo, KeyType, MsgMeta, OfflineWallet, SignedMessage, UnsignedMessage,
    WalletApi, WalletError,
};

async fn watching(wallet: &OfflineWallet, key_type: KeyType) -> (KeyInfo, Address) {
    let key = sigs::generate(key_type);
    let address = sigs::address_of(&key).unwrap();
    wallet.import_key(&KeyInfo::watch_only(&address)).await.unwrap();
    (key, address)
}

/// Polls until the queue holds `count` requests.
async fn wait_for_pending(wallet: &OfflineWallet, count: usize) -> Vec<UnsignedMessage> {
    timeout(Duration::from_secs(1), async {
        loop {
            let pending = wallet.list_pending();
            if pending.len() == count {
                return pending;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pending requests did not show up within 1s")
}

fn signed_with(key: &KeyInfo, message: UnsignedMessage) -> SignedMessage {
    let signature = sigs::sign(key, &message.to_sign).unwrap();
    SignedMessage { message, signature }
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_and_is_removed() {
    let wallet = OfflineWallet::new();
    let (_, address) = watching(&wallet, KeyType::Secp256k1).await;

    let err = wallet
        .sign(&address, b"nobody home", &MsgMeta::chain_message())
        .await
        .unwrap_err();

    assert!(matches!(err, WalletError::Timeout(d) if d == Duration::from_secs(300)));
    assert!(wallet.list_pending().is_empty());
}

#[tokio::test]
async fn end_to_end_submission_unblocks_signer() {
    let wallet = Arc::new(OfflineWallet::new());
    let (key, address) = watching(&wallet, KeyType::Secp256k1).await;

    // 1. Caller blocks on a chain message.
    let signer = {
        let wallet = wallet.clone();
        let address = address.clone();
        tokio::spawn(async move {
            wallet
                .sign(&address, b"transfer 10", &MsgMeta::chain_message())
                .await
        })
    };

    // 2. The request becomes visible to the external signer.
    let pending = wait_for_pending(&wallet, 1).await;
    assert_eq!(pending[0].address, address);
    assert_eq!(pending[0].to_sign, b"transfer 10");

    // 3. A valid submission releases the caller with that signature.
    let signed = signed_with(&key, pending[0].clone());
    let cid = wallet.submit_signature(&signed).unwrap();
    assert_eq!(cid, ContentId::of(b"transfer 10"));

    let signature = timeout(Duration::from_secs(1), signer)
        .await
        .expect("signer was not released within 1s")
        .unwrap()
        .unwrap();
    assert_eq!(signature, signed.signature);
    assert!(wallet.list_pending().is_empty());
}

#[tokio::test]
async fn rejected_submission_leaves_request_pending() {
    let wallet = Arc::new(OfflineWallet::new());
    let (key, address) = watching(&wallet, KeyType::Ed25519).await;
    let impostor = sigs::generate(KeyType::Ed25519);

    let signer = {
        let wallet = wallet.clone();
        let address = address.clone();
        tokio::spawn(async move {
            wallet
                .sign(&address, b"vote yes", &MsgMeta::chain_message())
                .await
        })
    };
    let pending = wait_for_pending(&wallet, 1).await;

    let forged = signed_with(&impostor, pending[0].clone());
    let err = wallet.submit_signature(&forged).unwrap_err();
    assert!(matches!(err, WalletError::VerificationFailed(_)));
    assert_eq!(wallet.list_pending().len(), 1, "entry must survive a bad signature");

    let genuine = signed_with(&key, pending[0].clone());
    wallet.submit_signature(&genuine).unwrap();
    let signature = signer.await.unwrap().unwrap();
    sigs::verify(&signature, &address, b"vote yes").unwrap();
}

#[tokio::test]
async fn identical_requests_share_one_entry() {
    let wallet = Arc::new(OfflineWallet::new());
    let (key, address) = watching(&wallet, KeyType::Secp256k1).await;

    let spawn_signer = || {
        let wallet = wallet.clone();
        let address = address.clone();
        tokio::spawn(async move {
            wallet
                .sign(&address, b"same bytes", &MsgMeta::chain_message())
                .await
        })
    };
    let first = spawn_signer();
    let second = spawn_signer();

    // Give both callers time to enqueue; they collapse into one entry.
    sleep(Duration::from_millis(50)).await;
    let pending = wait_for_pending(&wallet, 1).await;

    let signed = signed_with(&key, pending[0].clone());
    wallet.submit_signature(&signed).unwrap();

    assert_eq!(first.await.unwrap().unwrap(), signed.signature);
    assert_eq!(second.await.unwrap().unwrap(), signed.signature);
    assert!(wallet.list_pending().is_empty());
}

#[tokio::test]
async fn submissions_only_complete_their_own_request() {
    let wallet = Arc::new(OfflineWallet::new());
    let (key, address) = watching(&wallet, KeyType::Ed25519).await;

    let mut signers = Vec::new();
    for payload in [&b"first"[..], &b"second"[..]] {
        let wallet = wallet.clone();
        let address = address.clone();
        signers.push(tokio::spawn(async move {
            wallet.sign(&address, payload, &MsgMeta::chain_message()).await
        }));
    }
    let pending = wait_for_pending(&wallet, 2).await;
    let first = pending
        .into_iter()
        .find(|message| message.to_sign == b"first")
        .unwrap();

    wallet.submit_signature(&signed_with(&key, first)).unwrap();
    let remaining = wait_for_pending(&wallet, 1).await;
    assert_eq!(remaining[0].to_sign, b"second");

    signers.remove(0).await.unwrap().unwrap();
    wallet.shutdown();
    assert!(matches!(
        signers.remove(0).await.unwrap(),
        Err(WalletError::Cancelled)
    ));
}

#[tokio::test]
async fn submission_for_finished_request_is_not_found() {
    let wallet = Arc::new(OfflineWallet::new().with_timeout(Duration::from_millis(20)));
    let (key, address) = watching(&wallet, KeyType::Secp256k1).await;

    let message = UnsignedMessage {
        address: address.clone(),
        to_sign: b"too late".to_vec(),
        meta: MsgMeta::chain_message(),
    };
    assert!(matches!(
        wallet.sign(&address, &message.to_sign, &message.meta).await,
        Err(WalletError::Timeout(_))
    ));

    let err = wallet.submit_signature(&signed_with(&key, message)).unwrap_err();
    assert!(matches!(err, WalletError::PendingNotFound { .. }));
}
