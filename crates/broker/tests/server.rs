use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use wallet_broker::sigs;
use wallet_broker::{
    AppState, KeyType, LocalWallet, MsgMeta, MultiWallet, OfflineWallet, SignedMessage,
    UnsignedMessage, WalletApi, WalletServer, router,
};

fn test_state() -> AppState {
    AppState {
        wallet: Arc::new(LocalWallet::in_memory()),
        offline: None,
        relay: None,
    }
}

fn full_state() -> (AppState, Arc<OfflineWallet>) {
    let offline = Arc::new(OfflineWallet::new());
    let relay = Arc::new(WalletServer::new());
    let wallet = MultiWallet::new()
        .with(Arc::new(LocalWallet::in_memory()))
        .with(offline.clone())
        .with(relay.clone());
    let state = AppState {
        wallet: Arc::new(wallet),
        offline: Some(offline.clone()),
        relay: Some(relay),
    };
    (state, offline)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn healthcheck_returns_200() {
    let app = router(test_state());

    let response = app.oneshot(get("/healthcheck")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Ok");
}

#[tokio::test]
async fn new_key_shows_up_in_list() {
    let state = test_state();

    let response = router(state.clone())
        .oneshot(post("/rpc/v0/wallet/new", json!({ "type": "ed25519" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let address = json_body(response).await["address"].clone();
    assert!(address.as_str().unwrap().starts_with("w2"));

    let response = router(state).oneshot(get("/rpc/v0/wallet/list")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([address]));
}

#[tokio::test]
async fn sign_returns_verifiable_signature() {
    let state = test_state();
    let address = state.wallet.new_key(KeyType::Secp256k1).await.unwrap();

    let response = router(state)
        .oneshot(post(
            "/rpc/v0/wallet/sign",
            json!({
                "address": address,
                "payload": hex::encode(b"over http"),
                "meta": { "type": "message" },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let signature = serde_json::from_value(json_body(response).await).unwrap();
    sigs::verify(&signature, &address, b"over http").unwrap();
}

#[tokio::test]
async fn has_reports_ownership() {
    let state = test_state();
    let address = state.wallet.new_key(KeyType::Ed25519).await.unwrap();

    let response = router(state)
        .oneshot(post("/rpc/v0/wallet/has", json!({ "address": address })))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!({ "has": true }));
}

#[tokio::test]
async fn export_of_unknown_key_returns_404() {
    let stranger = sigs::address_of(&sigs::generate(KeyType::Secp256k1)).unwrap();

    let response = router(test_state())
        .oneshot(post("/rpc/v0/wallet/export", json!({ "address": stranger })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_address_is_rejected() {
    let response = router(test_state())
        .oneshot(post("/rpc/v0/wallet/has", json!({ "address": "nope" })))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn offline_routes_absent_without_offline_signer() {
    let response = router(test_state())
        .oneshot(get("/rpc/v0/offline/pending"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn offline_pending_lists_waiting_requests() {
    let (state, offline) = full_state();
    let key = sigs::generate(KeyType::Secp256k1);
    let address = sigs::address_of(&key).unwrap();
    offline
        .import_key(&wallet_broker::KeyInfo::watch_only(&address))
        .await
        .unwrap();

    let response = router(state.clone())
        .oneshot(get("/rpc/v0/offline/pending"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!([]));

    let signer = {
        let offline = offline.clone();
        let address = address.clone();
        tokio::spawn(async move {
            offline
                .sign(&address, b"via http", &MsgMeta::chain_message())
                .await
        })
    };
    while offline.list_pending().is_empty() {
        tokio::task::yield_now().await;
    }

    let response = router(state.clone())
        .oneshot(get("/rpc/v0/offline/pending"))
        .await
        .unwrap();
    let pending: Vec<UnsignedMessage> = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(pending.len(), 1);

    let message = pending.into_iter().next().unwrap();
    let signed = SignedMessage {
        signature: sigs::sign(&key, &message.to_sign).unwrap(),
        message,
    };
    let response = router(state)
        .oneshot(post(
            "/rpc/v0/offline/submit",
            serde_json::to_value(&signed).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(signer.await.unwrap().unwrap(), signed.signature);
}

#[tokio::test]
async fn offline_submit_with_bad_signature_returns_403() {
    let (state, offline) = full_state();
    let address = sigs::address_of(&sigs::generate(KeyType::Ed25519)).unwrap();
    offline
        .import_key(&wallet_broker::KeyInfo::watch_only(&address))
        .await
        .unwrap();

    let forged = SignedMessage {
        message: UnsignedMessage {
            address,
            to_sign: b"forged".to_vec(),
            meta: MsgMeta::chain_message(),
        },
        signature: sigs::sign(&sigs::generate(KeyType::Ed25519), b"forged").unwrap(),
    };
    let response = router(state)
        .oneshot(post(
            "/rpc/v0/offline/submit",
            serde_json::to_value(&forged).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn relay_endpoint_rejects_plain_http() {
    let (state, _) = full_state();

    let response = router(state).oneshot(get("/ws")).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = router(test_state());

    let response = app.oneshot(get("/nonexistent")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
