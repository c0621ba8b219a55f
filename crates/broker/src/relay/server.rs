use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConnectionState;
use super::protocol::{Command, CommandKind, ListWalletResponse, SignRequest, SignResponse};
use crate::error::{WalletError, WalletResult};
use crate::sync::lock;
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};
use crate::wallet::WalletApi;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A request for the connection driver: one command out, one command back.
struct Call {
    command: Command,
    reply: oneshot::Sender<WalletResult<Command>>,
}

struct Connection {
    id: u64,
    addresses: HashSet<Address>,
    calls: mpsc::Sender<Call>,
    /// At most one round trip in flight per connection.
    single_flight: Semaphore,
    closed: CancellationToken,
    /// Why the broker hung up, when it was not the peer's doing.
    close_reason: Mutex<Option<WalletError>>,
}

impl Connection {
    fn new(
        id: u64,
        addresses: HashSet<Address>,
        calls: mpsc::Sender<Call>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            addresses,
            calls,
            single_flight: Semaphore::new(1),
            closed,
            close_reason: Mutex::new(None),
        }
    }

    /// Tears the connection down, reporting `error` as the cause.
    fn fail(&self, error: WalletError) {
        lock(&self.close_reason).get_or_insert(error);
        self.closed.cancel();
    }

    fn outcome_on_close(&self) -> WalletResult<()> {
        match lock(&self.close_reason).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Broker side of the relay: a backend whose keys live on connected peers.
///
/// Each peer advertises its addresses once during the handshake. That set is
/// frozen for the lifetime of the connection; a peer that gains keys must
/// reconnect.
pub struct WalletServer {
    connections: Mutex<BTreeMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
    heartbeat_interval: Duration,
    handshake_timeout: Duration,
    shutdown: CancellationToken,
}

impl Default for WalletServer {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletServer {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the ping period. A zero interval is ignored.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("ignoring zero relay heartbeat interval");
        } else {
            self.heartbeat_interval = interval;
        }
        self
    }

    /// Sets how long a peer has to answer the handshake. A zero timeout is ignored.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("ignoring zero relay handshake timeout");
        } else {
            self.handshake_timeout = timeout;
        }
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Number of peers that completed the handshake and are still connected.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Closes every connection and stops accepting round trips.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs one peer connection to completion.
    ///
    /// Performs the handshake, registers the peer, then drives the socket
    /// until the peer leaves, a write fails or the server shuts down.
    pub async fn serve<S>(&self, socket: S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send,
    {
        let mut state = ConnectionState::Connecting;
        let (mut sink, mut stream) = socket.split();

        transition(&mut state, ConnectionState::Handshaking);
        let handshake = tokio::time::timeout(
            self.handshake_timeout,
            handshake(&mut sink, &mut stream),
        )
        .await
        .unwrap_or(Err(WalletError::Timeout(self.handshake_timeout)));

        let addresses = match handshake {
            Ok(addresses) => addresses,
            Err(e) => {
                transition(&mut state, ConnectionState::Closed);
                warn!(error = %e, "relay handshake failed, dropping peer");
                let _ = sink.close().await;
                return;
            }
        };

        let (calls_tx, calls_rx) = mpsc::channel(1);
        let connection = Arc::new(Connection::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            addresses,
            calls_tx,
            self.shutdown.child_token(),
        ));
        lock(&self.connections).insert(connection.id, connection.clone());
        transition(&mut state, ConnectionState::Active);
        info!(
            connection = connection.id,
            addresses = connection.addresses.len(),
            "relay peer registered"
        );

        let outcome = self.drive(&connection, &mut sink, &mut stream, calls_rx).await;

        lock(&self.connections).remove(&connection.id);
        connection.single_flight.close();
        connection.closed.cancel();
        transition(&mut state, ConnectionState::Closed);
        match outcome {
            Ok(()) => info!(connection = connection.id, "relay peer disconnected"),
            Err(e) => warn!(connection = connection.id, error = %e, "relay connection torn down"),
        }
        let _ = sink.close().await;
    }

    async fn drive<Tx, Rx>(
        &self,
        connection: &Connection,
        sink: &mut Tx,
        stream: &mut Rx,
        mut calls: mpsc::Receiver<Call>,
    ) -> WalletResult<()>
    where
        Tx: Sink<Message, Error = axum::Error> + Unpin,
        Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<oneshot::Sender<WalletResult<Command>>> = None;

        let result = loop {
            tokio::select! {
                _ = connection.closed.cancelled() => break connection.outcome_on_close(),
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        break Err(transport("heartbeat failed", e));
                    }
                }
                call = calls.recv(), if in_flight.is_none() => {
                    let Some(call) = call else { break Ok(()) };
                    let text = match call.command.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            let _ = call.reply.send(Err(e));
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Err(transport("sending command", e));
                    }
                    debug!(connection = connection.id, kind = ?call.command.kind, "command sent");
                    in_flight = Some(call.reply);
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let command = Command::from_text(text.as_str());
                        let Some(reply) = in_flight.take() else {
                            warn!(connection = connection.id, "unsolicited relay frame ignored");
                            continue;
                        };
                        match command {
                            Ok(command) => {
                                let _ = reply.send(Ok(command));
                            }
                            Err(e) => {
                                let reason = e.to_string();
                                let _ = reply.send(Err(e));
                                break Err(WalletError::Protocol(reason));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        break Err(WalletError::Protocol("unexpected binary frame".into()));
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(transport("reading frame", e)),
                },
            }
        };

        if let Some(reply) = in_flight {
            let _ = reply.send(Err(WalletError::Transport(
                "relay connection closed mid round trip".into(),
            )));
        }
        result
    }

    fn owner(&self, address: &Address) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .values()
            .find(|connection| connection.addresses.contains(address))
            .cloned()
    }

    async fn round_trip(&self, connection: &Connection, command: Command) -> WalletResult<Command> {
        let closed = || WalletError::Transport(format!("relay connection {} closed", connection.id));

        let _permit = connection.single_flight.acquire().await.map_err(|_| closed())?;
        let (reply, response) = oneshot::channel();
        connection
            .calls
            .send(Call { command, reply })
            .await
            .map_err(|_| closed())?;
        response.await.map_err(|_| closed())?
    }
}

async fn handshake<Tx, Rx>(sink: &mut Tx, stream: &mut Rx) -> WalletResult<HashSet<Address>>
where
    Tx: Sink<Message, Error = axum::Error> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let request = Command::list_wallet_request()?.to_text()?;
    sink.send(Message::Text(request.into()))
        .await
        .map_err(|e| transport("sending handshake", e))?;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let response: ListWalletResponse =
                    Command::from_text(text.as_str())?.decode(CommandKind::ListWalletResponse)?;
                return Ok(response.into_result()?.into_iter().collect());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                return Err(WalletError::Protocol("unexpected binary frame".into()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(WalletError::Transport("peer left during handshake".into()));
            }
            Some(Err(e)) => return Err(transport("reading handshake", e)),
        }
    }
}

fn transition(state: &mut ConnectionState, next: ConnectionState) {
    let from = *state;
    if state.advance(next) {
        debug!(?from, to = ?next, "relay connection state");
    } else {
        debug_assert!(false, "relay connection cannot go from {from:?} to {next:?}");
        warn!(?from, to = ?next, "refused relay connection state change");
    }
}

fn transport(context: &str, error: axum::Error) -> WalletError {
    WalletError::Transport(format!("{context}: {error}"))
}

#[async_trait]
impl WalletApi for WalletServer {
    async fn new_key(&self, _key_type: KeyType) -> WalletResult<Address> {
        Err(WalletError::unsupported("relay peers cannot create keys"))
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        Ok(self.owner(address).is_some())
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        let connections = lock(&self.connections);
        let mut seen = HashSet::new();
        Ok(connections
            .values()
            .flat_map(|connection| connection.addresses.iter())
            .filter(|address| seen.insert(*address))
            .cloned()
            .collect())
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        meta.ensure_known()?;
        let connection = self
            .owner(address)
            .ok_or_else(|| WalletError::KeyNotFound(address.clone()))?;

        let request = Command::new(
            CommandKind::SignRequest,
            &SignRequest {
                signer: address.clone(),
                to_sign: payload.to_vec(),
                meta: meta.clone(),
            },
        )?;
        debug!(connection = connection.id, %address, "relaying sign request");

        let response = self.round_trip(&connection, request).await?;
        match response.decode::<SignResponse>(CommandKind::SignResponse) {
            Ok(response) => response.into_result(),
            Err(e) => {
                connection.fail(WalletError::Protocol(format!("bad sign response: {e}")));
                Err(e)
            }
        }
    }

    async fn export_key(&self, _address: &Address) -> WalletResult<KeyInfo> {
        Err(WalletError::unsupported("relay peers never export keys"))
    }

    async fn import_key(&self, _info: &KeyInfo) -> WalletResult<Address> {
        Err(WalletError::unsupported(
            "relay peers advertise their keys when they connect",
        ))
    }

    async fn delete_key(&self, _address: &Address) -> WalletResult<()> {
        Err(WalletError::unsupported("relay peers manage their own keys"))
    }
}
