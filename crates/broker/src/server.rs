pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{WalletError, WalletResult};
use crate::offline::OfflineWallet;
use crate::relay::WalletServer;
use crate::types::{Address, KeyInfo, Signature, SignedMessage, UnsignedMessage};
use crate::wallet::WalletApi;
use api::{
    AddressRequest, AddressResponse, HasKeyResponse, NewKeyRequest, SignRequest, SubmitResponse,
};

#[derive(Clone)]
pub struct AppState {
    /// Backend answering the `/rpc/v0/wallet` endpoints, usually the router.
    pub wallet: Arc<dyn WalletApi>,
    pub offline: Option<Arc<OfflineWallet>>,
    pub relay: Option<Arc<WalletServer>>,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            "/healthcheck",
            get(|| async move { (StatusCode::OK, "Ok").into_response() }),
        )
        .route("/rpc/v0/wallet/new", post(wallet_new))
        .route("/rpc/v0/wallet/has", post(wallet_has))
        .route("/rpc/v0/wallet/list", get(wallet_list))
        .route("/rpc/v0/wallet/sign", post(wallet_sign))
        .route("/rpc/v0/wallet/export", post(wallet_export))
        .route("/rpc/v0/wallet/import", post(wallet_import))
        .route("/rpc/v0/wallet/delete", post(wallet_delete));

    if state.offline.is_some() {
        router = router
            .route("/rpc/v0/offline/pending", get(offline_pending))
            .route("/rpc/v0/offline/submit", post(offline_submit));
    }
    if state.relay.is_some() {
        router = router.route("/ws", get(relay_upgrade));
    }

    router.with_state(state)
}

/// Binds `listen` and serves the broker until `shutdown` fires.
pub async fn run(listen: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    serve(listener, state, shutdown).await
}

pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    info!(addr = %listener.local_addr()?, "broker listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving http")?;
    info!("broker stopped");
    Ok(())
}

// ── Wallet endpoints ───────────────────────────────────────────────────────

async fn wallet_new(
    State(state): State<AppState>,
    Json(request): Json<NewKeyRequest>,
) -> WalletResult<Json<AddressResponse>> {
    let address = state.wallet.new_key(request.key_type).await?;
    Ok(Json(AddressResponse { address }))
}

async fn wallet_has(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> WalletResult<Json<HasKeyResponse>> {
    let has = state.wallet.has_key(&request.address).await?;
    Ok(Json(HasKeyResponse { has }))
}

async fn wallet_list(State(state): State<AppState>) -> WalletResult<Json<Vec<Address>>> {
    Ok(Json(state.wallet.list_keys().await?))
}

async fn wallet_sign(
    State(state): State<AppState>,
    Json(request): Json<SignRequest>,
) -> WalletResult<Json<Signature>> {
    let signature = state
        .wallet
        .sign(&request.address, &request.payload, &request.meta)
        .await?;
    Ok(Json(signature))
}

async fn wallet_export(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> WalletResult<Json<KeyInfo>> {
    Ok(Json(state.wallet.export_key(&request.address).await?))
}

async fn wallet_import(
    State(state): State<AppState>,
    Json(info): Json<KeyInfo>,
) -> WalletResult<Json<AddressResponse>> {
    let address = state.wallet.import_key(&info).await?;
    Ok(Json(AddressResponse { address }))
}

async fn wallet_delete(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> WalletResult<StatusCode> {
    state.wallet.delete_key(&request.address).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Offline signer ─────────────────────────────────────────────────────────

fn offline(state: &AppState) -> WalletResult<&OfflineWallet> {
    state
        .offline
        .as_deref()
        .ok_or_else(|| WalletError::unsupported("offline signer is not enabled"))
}

async fn offline_pending(State(state): State<AppState>) -> WalletResult<Json<Vec<UnsignedMessage>>> {
    Ok(Json(offline(&state)?.list_pending()))
}

async fn offline_submit(
    State(state): State<AppState>,
    Json(signed): Json<SignedMessage>,
) -> WalletResult<Json<SubmitResponse>> {
    let cid = offline(&state)?.submit_signature(&signed)?;
    Ok(Json(SubmitResponse {
        cid: cid.to_string(),
    }))
}

// ── Relay ──────────────────────────────────────────────────────────────────

async fn relay_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let Some(relay) = state.relay else {
        return WalletError::unsupported("relay server is not enabled").into_response();
    };
    ws.on_upgrade(move |socket| async move { relay.serve(socket).await })
}
