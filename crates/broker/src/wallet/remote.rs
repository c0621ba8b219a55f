use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{WalletError, WalletResult};
use crate::server::api::{
    AddressRequest, AddressResponse, HasKeyResponse, NewKeyRequest, RPC_PREFIX, SignRequest,
    SubmitResponse,
};
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature, SignedMessage, UnsignedMessage};

use super::WalletApi;

/// Backend forwarding every call to another broker's HTTP endpoints.
///
/// Each operation is exactly one HTTP request. Non-success statuses surface as
/// [`WalletError::Remote`] carrying the status and response body.
#[derive(Clone)]
pub struct RemoteWallet {
    client: Client,
    base: String,
}

impl RemoteWallet {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl AsRef<str>) -> Self {
        let base = format!("{}{RPC_PREFIX}", url.as_ref().trim_end_matches('/'));
        Self { client, base }
    }

    /// Requests queued by the remote broker's offline signer.
    pub async fn list_pending(&self) -> WalletResult<Vec<UnsignedMessage>> {
        let response = self
            .client
            .get(format!("{}/offline/pending", self.base))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    /// Hands a signature to the remote broker's offline signer; returns the
    /// content id of the request it completed.
    pub async fn submit_signature(&self, signed: &SignedMessage) -> WalletResult<String> {
        let response: SubmitResponse = self.post("offline/submit", signed).await?;
        Ok(response.cid)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> WalletResult<T> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> WalletResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WalletError::Remote(format!("{status}: {body}")));
    }
    response
        .json()
        .await
        .map_err(|e| WalletError::Protocol(format!("decoding remote response: {e}")))
}

fn transport(error: reqwest::Error) -> WalletError {
    WalletError::Transport(error.to_string())
}

#[async_trait]
impl WalletApi for RemoteWallet {
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address> {
        let response: AddressResponse = self.post("wallet/new", &NewKeyRequest { key_type }).await?;
        Ok(response.address)
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        let response: HasKeyResponse = self
            .post(
                "wallet/has",
                &AddressRequest {
                    address: address.clone(),
                },
            )
            .await?;
        Ok(response.has)
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        let response = self
            .client
            .get(format!("{}/wallet/list", self.base))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        let request = SignRequest {
            address: address.clone(),
            payload: payload.to_vec(),
            meta: meta.clone(),
        };
        self.post("wallet/sign", &request).await
    }

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo> {
        self.post(
            "wallet/export",
            &AddressRequest {
                address: address.clone(),
            },
        )
        .await
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        let response: AddressResponse = self.post("wallet/import", info).await?;
        Ok(response.address)
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        let response = self
            .client
            .post(format!("{}/wallet/delete", self.base))
            .json(&AddressRequest {
                address: address.clone(),
            })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::Remote(format!("{status}: {body}")));
        }
        Ok(())
    }
}
