use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};

use crate::error::{WalletError, WalletResult};

/// Leading character of every textual address.
pub const ADDRESS_PREFIX: char = 'w';

/// Key families the broker knows how to route and verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Secp256k1,
    Ed25519,
}

impl KeyType {
    /// Protocol digit embedded in the textual address.
    pub fn protocol(self) -> u8 {
        match self {
            KeyType::Secp256k1 => 1,
            KeyType::Ed25519 => 2,
        }
    }

    pub fn from_protocol(protocol: u8) -> Option<Self> {
        match protocol {
            1 => Some(KeyType::Secp256k1),
            2 => Some(KeyType::Ed25519),
            _ => None,
        }
    }

    /// Length of the address payload for this family.
    pub fn payload_len(self) -> usize {
        match self {
            KeyType::Secp256k1 => 20,
            KeyType::Ed25519 => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Secp256k1 => "secp256k1",
            KeyType::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = WalletError;

    fn from_str(s: &str) -> WalletResult<Self> {
        match s {
            "secp256k1" => Ok(KeyType::Secp256k1),
            "ed25519" => Ok(KeyType::Ed25519),
            other => Err(WalletError::UnsupportedKeyType(other.to_string())),
        }
    }
}

/// Identifier of a key: a key-type tag plus the family-specific payload.
///
/// secp256k1 addresses carry the first 20 bytes of the SHA-256 of the
/// uncompressed public key; ed25519 addresses carry the public key itself.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    key_type: KeyType,
    payload: Vec<u8>,
}

impl Address {
    pub fn new(key_type: KeyType, payload: Vec<u8>) -> WalletResult<Self> {
        if payload.len() != key_type.payload_len() {
            return Err(WalletError::InvalidAddress(format!(
                "{key_type} address payload must be {} bytes, got {}",
                key_type.payload_len(),
                payload.len()
            )));
        }
        Ok(Self { key_type, payload })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ADDRESS_PREFIX}{}{}",
            self.key_type.protocol(),
            hex::encode(&self.payload)
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> WalletResult<Self> {
        let invalid = |reason: &str| WalletError::InvalidAddress(format!("{s:?}: {reason}"));

        let rest = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| invalid("missing address prefix"))?;
        let mut chars = rest.chars();
        let protocol = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| invalid("missing protocol"))?;
        let key_type =
            KeyType::from_protocol(protocol as u8).ok_or_else(|| invalid("unknown protocol"))?;
        let payload = hex::decode(chars.as_str()).map_err(|e| invalid(&e.to_string()))?;
        Address::new(key_type, payload)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Signing context of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    #[default]
    Unknown,
    /// A chain message; the only context the offline signer accepts.
    #[serde(rename = "message")]
    ChainMsg,
    Block,
    DealProposal,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::Unknown => "unknown",
            MsgType::ChainMsg => "message",
            MsgType::Block => "block",
            MsgType::DealProposal => "deal_proposal",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMeta {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    #[serde(with = "hex_bytes", default)]
    pub extra: Vec<u8>,
}

impl MsgMeta {
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            extra: Vec::new(),
        }
    }

    pub fn chain_message() -> Self {
        Self::new(MsgType::ChainMsg)
    }

    /// Every backend refuses to sign without a recognised signing context.
    pub fn ensure_known(&self) -> WalletResult<()> {
        match self.msg_type {
            MsgType::Unknown => Err(WalletError::UnsupportedMessageType(self.msg_type)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "type")]
    pub sig_type: KeyType,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Raw key material as exported from or imported into a wallet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(with = "hex_bytes")]
    pub private_key: Vec<u8>,
}

impl KeyInfo {
    /// A watch-only entry for the offline signer: the private key slot
    /// carries the textual address instead of secret material.
    pub fn watch_only(address: &Address) -> Self {
        Self {
            key_type: address.key_type(),
            private_key: address.to_string().into_bytes(),
        }
    }

    pub fn to_hex(&self) -> WalletResult<String> {
        to_hex_json(self)
    }

    pub fn from_hex(text: &str) -> WalletResult<Self> {
        from_hex_json(text)
    }
}

impl fmt::Debug for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyInfo")
            .field("key_type", &self.key_type)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// SHA-256 of the exact bytes to be signed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; 32]);

impl ContentId {
    pub fn of(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A signing request waiting for an out-of-band signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedMessage {
    pub address: Address,
    #[serde(with = "hex_bytes")]
    pub to_sign: Vec<u8>,
    pub meta: MsgMeta,
}

impl UnsignedMessage {
    pub fn content_id(&self) -> ContentId {
        ContentId::of(&self.to_sign)
    }

    pub fn to_hex(&self) -> WalletResult<String> {
        to_hex_json(self)
    }

    pub fn from_hex(text: &str) -> WalletResult<Self> {
        from_hex_json(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: UnsignedMessage,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn to_hex(&self) -> WalletResult<String> {
        to_hex_json(self)
    }

    pub fn from_hex(text: &str) -> WalletResult<Self> {
        from_hex_json(text)
    }
}

fn to_hex_json<T: Serialize>(value: &T) -> WalletResult<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| WalletError::Protocol(format!("serializing message: {e}")))?;
    Ok(hex::encode(json))
}

fn from_hex_json<T: de::DeserializeOwned>(text: &str) -> WalletResult<T> {
    let json = hex::decode(text.trim())
        .map_err(|e| WalletError::Protocol(format!("decoding message hex: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| WalletError::Protocol(format!("deserializing message: {e}")))
}

/// Serde adapter storing byte fields as lowercase hex strings.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(de::Error::custom)
    }
}
