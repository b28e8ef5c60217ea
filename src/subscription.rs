//! Live `Roll` events over a WebSocket JSON-RPC `eth_subscribe("logs")`.
//!
//! Used to learn a bet's outcome as soon as it settles, without waiting for
//! the next poll. One subscription follows one contract and can be narrowed
//! to a single player.

use std::time::Duration;

use alloy_primitives::Address;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::abi::ROLL_TOPIC;
use crate::decoder::decode_log;
use crate::error::SubscriptionError;
use crate::types::{GameEvent, GameType, RawLog};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Which events a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub contract: Address,
    pub game: GameType,
    /// Only deliver bets placed by this player.
    pub player: Option<Address>,
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &GameEvent) -> bool {
        event.contract == self.contract && self.player.is_none_or(|p| p == event.player)
    }
}

pub fn subscribe_request(id: u64, contract: Address) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_subscribe",
        "params": ["logs", { "address": contract, "topics": [ROLL_TOPIC] }],
    })
}

pub fn unsubscribe_request(id: u64, subscription_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_unsubscribe",
        "params": [subscription_id],
    })
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Interpret `text` as the reply to request `id`.
///
/// Returns `None` for any other message.
pub fn parse_subscription_ack(text: &str, id: u64) -> Option<Result<String, SubscriptionError>> {
    let reply: RpcReply = serde_json::from_str(text).ok()?;
    if reply.id != Some(id) {
        return None;
    }
    if let Some(error) = reply.error {
        return Some(Err(SubscriptionError::Rejected(error.to_string())));
    }
    match reply.result {
        Some(Value::String(sub_id)) => Some(Ok(sub_id)),
        other => Some(Err(SubscriptionError::Rejected(format!(
            "unexpected subscription id {other:?}"
        )))),
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    method: String,
    params: NotificationParams,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: String,
    result: RawLog,
}

/// Extract the log carried by an `eth_subscription` notification for
/// `subscription_id`.
pub fn parse_notification(text: &str, subscription_id: &str) -> Option<RawLog> {
    let notification: Notification = serde_json::from_str(text).ok()?;
    (notification.method == "eth_subscription"
        && notification.params.subscription == subscription_id)
        .then_some(notification.params.result)
}

/// Reconnect delay: doubles from [`RECONNECT_BASE`] up to
/// [`MAX_RECONNECT_DELAY`], back to the base once a session is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    next: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            next: RECONNECT_BASE,
        }
    }
}

impl ReconnectBackoff {
    /// Delay to wait now; the following one doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    pub fn reset(&mut self) {
        self.next = RECONNECT_BASE;
    }
}

enum SessionEnd {
    /// Cancelled by the owner, or the receiver went away.
    Stopped,
    /// Server closed the connection.
    Closed,
}

/// Handle to a running subscription task.
///
/// Dropping the handle aborts the task without unsubscribing; call
/// [`RollSubscription::unsubscribe`] for a clean shutdown.
pub struct RollSubscription {
    rx: mpsc::UnboundedReceiver<GameEvent>,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RollSubscription {
    /// Connect to `ws_url` in the background and start delivering events.
    pub fn spawn(ws_url: String, filter: SubscriptionFilter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_subscription(ws_url, filter, tx, cancel_rx));
        Self {
            rx,
            cancel: Some(cancel_tx),
            handle,
        }
    }

    /// Next matching event. `None` once the task has stopped.
    pub async fn next(&mut self) -> Option<GameEvent> {
        self.rx.recv().await
    }

    /// Send `eth_unsubscribe`, close the socket and wait for the task to end.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for RollSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_subscription(
    ws_url: String,
    filter: SubscriptionFilter,
    tx: mpsc::UnboundedSender<GameEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut backoff = ReconnectBackoff::default();

    loop {
        info!(url = %ws_url, contract = %filter.contract, "connecting to log subscription");

        match stream_rolls(&ws_url, &filter, &tx, &mut cancel, &mut backoff).await {
            Ok(SessionEnd::Stopped) => {
                info!(contract = %filter.contract, "log subscription stopped");
                return;
            }
            Ok(SessionEnd::Closed) => {
                info!(contract = %filter.contract, "log subscription closed by server");
            }
            Err(e) => {
                warn!(contract = %filter.contract, error = %e, "log subscription failed");
            }
        }

        let delay = backoff.next_delay();
        info!(delay = ?delay, "reconnecting log subscription");
        tokio::select! {
            _ = &mut cancel => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn stream_rolls(
    ws_url: &str,
    filter: &SubscriptionFilter,
    tx: &mpsc::UnboundedSender<GameEvent>,
    cancel: &mut oneshot::Receiver<()>,
    backoff: &mut ReconnectBackoff,
) -> Result<SessionEnd, SubscriptionError> {
    let (ws_stream, _response) = connect_async(ws_url).await?;
    let (mut write, mut read) = ws_stream.split();

    let request = subscribe_request(SUBSCRIBE_ID, filter.contract);
    write.send(Message::Text(request.to_string().into())).await?;

    let subscription_id = tokio::time::timeout(ACK_TIMEOUT, async {
        while let Some(msg) = read.next().await {
            if let Message::Text(text) = msg? {
                if let Some(ack) = parse_subscription_ack(text.as_str(), SUBSCRIBE_ID) {
                    return ack;
                }
            }
        }
        Err(SubscriptionError::Closed)
    })
    .await
    .map_err(|_| SubscriptionError::AckTimeout(ACK_TIMEOUT))??;

    info!(contract = %filter.contract, subscription = %subscription_id, "subscribed to Roll logs");
    backoff.reset();

    loop {
        tokio::select! {
            _ = &mut *cancel => {
                let request = unsubscribe_request(UNSUBSCRIBE_ID, &subscription_id);
                let _ = write.send(Message::Text(request.to_string().into())).await;
                let _ = write.close().await;
                return Ok(SessionEnd::Stopped);
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some(raw) = parse_notification(text.as_str(), &subscription_id) else {
                        debug!(message = %text.as_str(), "ignoring non-notification message");
                        continue;
                    };
                    if raw.removed {
                        debug!(tx = %raw.transaction_hash, "ignoring log removed by reorg");
                        continue;
                    }
                    match decode_log(&raw, filter.contract, filter.game) {
                        Ok(event) if filter.matches(&event) => {
                            if tx.send(event).is_err() {
                                return Ok(SessionEnd::Stopped);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(tx = %raw.transaction_hash, error = %e, "skipping undecodable live log");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "received close frame");
                    return Ok(SessionEnd::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::Closed),
            }
        }
    }
}
