use async_tungstenite::tungstenite::{self, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{Command, CommandKind, ListWalletResponse, SignRequest, SignResponse};
use crate::error::{WalletError, WalletResult};
use crate::wallet::WalletApi;

/// Dials a broker's relay endpoint and serves `wallet` over it until the
/// broker hangs up or `shutdown` fires.
pub async fn connect(
    url: &str,
    wallet: &dyn WalletApi,
    shutdown: CancellationToken,
) -> WalletResult<()> {
    let endpoint = format!("{}/ws", url.trim_end_matches('/'));
    let (socket, _) = async_tungstenite::tokio::connect_async(endpoint.as_str())
        .await
        .map_err(|e| WalletError::Transport(format!("connecting to {endpoint}: {e}")))?;
    info!(%endpoint, "connected to broker");

    serve_wallet(socket, wallet, shutdown).await
}

/// Peer side of the relay: answers the broker's commands from `wallet`.
///
/// Commands are handled one at a time in arrival order. Failures of the
/// wallet itself travel back in the response's `error` field; only transport
/// failures end the loop with an error.
pub async fn serve_wallet<S>(
    mut socket: S,
    wallet: &dyn WalletApi,
    shutdown: CancellationToken,
) -> WalletResult<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = SinkExt::close(&mut socket).await;
                return Ok(());
            }
            frame = socket.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let command = match Command::from_text(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed relay command");
                        continue;
                    }
                };
                let Some(response) = dispatch(wallet, &command).await? else {
                    continue;
                };
                socket
                    .send(Message::Text(response.to_text()?))
                    .await
                    .map_err(|e| WalletError::Transport(format!("sending response: {e}")))?;
            }
            Some(Ok(Message::Binary(_))) => warn!("ignoring binary relay frame"),
            Some(Ok(Message::Close(_))) | None => {
                info!("broker closed the relay connection");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(WalletError::Transport(format!("reading from broker: {e}")));
            }
        }
    }
}

async fn dispatch(wallet: &dyn WalletApi, command: &Command) -> WalletResult<Option<Command>> {
    match command.kind {
        CommandKind::ListWalletRequest => {
            let response = ListWalletResponse::from_result(wallet.list_keys().await);
            debug!(addresses = response.addresses.len(), "answering list request");
            Command::new(CommandKind::ListWalletResponse, &response).map(Some)
        }
        CommandKind::SignRequest => {
            let result = match command.decode::<SignRequest>(CommandKind::SignRequest) {
                Ok(request) => {
                    debug!(signer = %request.signer, msg_type = %request.meta.msg_type, "answering sign request");
                    wallet
                        .sign(&request.signer, &request.to_sign, &request.meta)
                        .await
                }
                Err(e) => Err(e),
            };
            Command::new(CommandKind::SignResponse, &SignResponse::from_result(result)).map(Some)
        }
        other => {
            warn!(kind = ?other, "ignoring unexpected relay command");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigs;
    use crate::types::{KeyType, MsgMeta};
    use crate::wallet::LocalWallet;

    #[tokio::test]
    async fn list_request_is_answered_with_wallet_keys() {
        let wallet = LocalWallet::in_memory();
        let address = wallet.new_key(KeyType::Ed25519).await.unwrap();

        let response = dispatch(&wallet, &Command::list_wallet_request().unwrap())
            .await
            .unwrap()
            .unwrap();
        let listed: ListWalletResponse = response.decode(CommandKind::ListWalletResponse).unwrap();
        assert_eq!(listed.into_result().unwrap(), vec![address]);
    }

    #[tokio::test]
    async fn sign_failure_travels_as_error_string() {
        let wallet = LocalWallet::in_memory();
        let stranger = sigs::address_of(&sigs::generate(KeyType::Secp256k1)).unwrap();
        let request = Command::new(
            CommandKind::SignRequest,
            &SignRequest {
                signer: stranger,
                to_sign: b"x".to_vec(),
                meta: MsgMeta::chain_message(),
            },
        )
        .unwrap();

        let response: SignResponse = dispatch(&wallet, &request)
            .await
            .unwrap()
            .unwrap()
            .decode(CommandKind::SignResponse)
            .unwrap();
        assert!(response.signature.is_none());
        assert!(response.error.contains("key not found"));
    }

    #[tokio::test]
    async fn undecodable_sign_request_is_answered_with_error() {
        let wallet = LocalWallet::in_memory();
        let request = Command {
            kind: CommandKind::SignRequest,
            data: hex::encode(b"{}"),
        };
        let response: SignResponse = dispatch(&wallet, &request)
            .await
            .unwrap()
            .unwrap()
            .decode(CommandKind::SignResponse)
            .unwrap();
        assert!(!response.error.is_empty());
    }

    #[tokio::test]
    async fn responses_are_not_answered() {
        let wallet = LocalWallet::in_memory();
        let stray = Command::new(CommandKind::SignResponse, &SignResponse::default()).unwrap();
        assert!(dispatch(&wallet, &stray).await.unwrap().is_none());
    }
}
