use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{WalletError, WalletResult};
use crate::types::{Address, MsgMeta, Signature, hex_bytes};

const MAX_COMMAND_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Kind tag of a relay [`Command`]. Travels as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CommandKind {
    ListWalletRequest,
    ListWalletResponse,
    SignRequest,
    SignResponse,
}

impl From<CommandKind> for u8 {
    fn from(kind: CommandKind) -> u8 {
        match kind {
            CommandKind::ListWalletRequest => 0,
            CommandKind::ListWalletResponse => 1,
            CommandKind::SignRequest => 2,
            CommandKind::SignResponse => 3,
        }
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandKind::ListWalletRequest),
            1 => Ok(CommandKind::ListWalletResponse),
            2 => Ok(CommandKind::SignRequest),
            3 => Ok(CommandKind::SignResponse),
            other => Err(format!("unknown command kind {other}")),
        }
    }
}

/// One relay frame: a kind tag plus the hex of the JSON-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub data: String,
}

impl Command {
    pub fn new<T: Serialize>(kind: CommandKind, payload: &T) -> WalletResult<Self> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| WalletError::Protocol(format!("serializing {kind:?} payload: {e}")))?;
        Ok(Self {
            kind,
            data: hex::encode(json),
        })
    }

    pub fn list_wallet_request() -> WalletResult<Self> {
        Self::new(CommandKind::ListWalletRequest, &ListWalletRequest {})
    }

    /// Decodes the payload, checking that the frame is of the expected kind.
    pub fn decode<T: DeserializeOwned>(&self, expected: CommandKind) -> WalletResult<T> {
        if self.kind != expected {
            return Err(WalletError::Protocol(format!(
                "expected {expected:?}, got {:?}",
                self.kind
            )));
        }
        let json = hex::decode(&self.data)
            .map_err(|e| WalletError::Protocol(format!("decoding {:?} hex: {e}", self.kind)))?;
        serde_json::from_slice(&json)
            .map_err(|e| WalletError::Protocol(format!("deserializing {:?}: {e}", self.kind)))
    }

    pub fn to_text(&self) -> WalletResult<String> {
        serde_json::to_string(self)
            .map_err(|e| WalletError::Protocol(format!("serializing command: {e}")))
    }

    pub fn from_text(text: &str) -> WalletResult<Self> {
        if text.len() > MAX_COMMAND_SIZE {
            return Err(WalletError::Protocol(format!(
                "command too large: {} bytes (max {MAX_COMMAND_SIZE})",
                text.len()
            )));
        }
        serde_json::from_str(text)
            .map_err(|e| WalletError::Protocol(format!("deserializing command: {e}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWalletRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWalletResponse {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ListWalletResponse {
    pub fn from_result(result: WalletResult<Vec<Address>>) -> Self {
        match result {
            Ok(addresses) => Self {
                addresses,
                error: String::new(),
            },
            Err(e) => Self {
                addresses: Vec::new(),
                error: e.to_string(),
            },
        }
    }

    /// A non-empty `error` wins over whatever `addresses` holds.
    pub fn into_result(self) -> WalletResult<Vec<Address>> {
        if !self.error.is_empty() {
            return Err(WalletError::Remote(self.error));
        }
        Ok(self.addresses)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub signer: Address,
    #[serde(with = "hex_bytes")]
    pub to_sign: Vec<u8>,
    pub meta: MsgMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl SignResponse {
    pub fn from_result(result: WalletResult<Signature>) -> Self {
        match result {
            Ok(signature) => Self {
                signature: Some(signature),
                error: String::new(),
            },
            Err(e) => Self {
                signature: None,
                error: e.to_string(),
            },
        }
    }

    pub fn into_result(self) -> WalletResult<Signature> {
        if !self.error.is_empty() {
            return Err(WalletError::Remote(self.error));
        }
        self.signature
            .ok_or_else(|| WalletError::Protocol("sign response carries no signature".into()))
    }
}
