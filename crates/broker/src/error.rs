use std::time::Duration;

use axum::http::StatusCode;
use axum_core::response::{IntoResponse as AxumCoreIntoResponse, Response};

use crate::types::{Address, ContentId, MsgType};

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("key not found: {0}")]
    KeyNotFound(Address),
    #[error("no wallet backends supporting key type: {0}")]
    UnsupportedKeyType(String),
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(MsgType),
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
    #[error("timed out after {0:?} waiting for a signature")]
    Timeout(Duration),
    #[error("signing request was cancelled")]
    Cancelled,
    #[error("message {cid} for {address} does not exist")]
    PendingNotFound { address: Address, cid: ContentId },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("relay protocol error: {0}")]
    Protocol(String),
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("remote wallet error: {0}")]
    Remote(String),
    #[error("keystore error: {0}")]
    Keystore(String),
}

impl WalletError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }
}

/// Trait implementation to convert this error into an axum http response
impl AxumCoreIntoResponse for WalletError {
    fn into_response(self) -> Response {
        let status = match &self {
            WalletError::InvalidAddress(_)
            | WalletError::InvalidKey(_)
            | WalletError::UnsupportedKeyType(_)
            | WalletError::UnsupportedMessageType(_) => StatusCode::BAD_REQUEST,
            WalletError::UnsupportedOperation(_) | WalletError::VerificationFailed(_) => {
                StatusCode::FORBIDDEN
            }
            WalletError::KeyNotFound(_) | WalletError::PendingNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            WalletError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            WalletError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            WalletError::Protocol(_) | WalletError::Transport(_) | WalletError::Remote(_) => {
                StatusCode::BAD_GATEWAY
            }
            WalletError::Keystore(_) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something wrong happened.",
                )
                    .into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::new(crate::types::KeyType::Ed25519, vec![7u8; 32]).unwrap()
    }

    #[test]
    fn invalid_address_returns_400() {
        let response = WalletError::InvalidAddress("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unsupported_operation_returns_403() {
        let response = WalletError::unsupported("no new keys").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn key_not_found_returns_404() {
        let response = WalletError::KeyNotFound(address()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn timeout_returns_504() {
        let response = WalletError::Timeout(Duration::from_secs(300)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn transport_error_returns_502() {
        let response = WalletError::Transport("reset".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn keystore_error_returns_500() {
        let response = WalletError::Keystore("disk full".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn pending_not_found_names_the_message() {
        let cid = ContentId::of(b"hello");
        let error = WalletError::PendingNotFound {
            address: address(),
            cid,
        };
        assert!(error.to_string().contains(&cid.to_string()));
    }
}
