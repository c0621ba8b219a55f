//! JSON bodies of the `/rpc/v0` endpoints, shared by the server handlers and
//! [`RemoteWallet`](crate::wallet::RemoteWallet).

use serde::{Deserialize, Serialize};

use crate::types::{Address, KeyType, MsgMeta, hex_bytes};

pub const RPC_PREFIX: &str = "/rpc/v0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKeyRequest {
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

/// Request naming a single address: `has`, `export` and `delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRequest {
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressResponse {
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasKeyResponse {
    pub has: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub address: Address,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub meta: MsgMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub cid: String,
}
