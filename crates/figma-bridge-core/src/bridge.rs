//! Connection bridge to the plugin.
//!
//! Holds at most one plugin WebSocket. Any number of tasks may call
//! [`Bridge::send`] concurrently; each registers a one-shot reply slot keyed by
//! a fresh request ID, and a single reader task per connection routes response
//! envelopes back to their slots.
//!
//! # Locking
//!
//! The current connection and the pending-reply map sit behind separate
//! locks, and neither is held across an await point. Writes to the socket
//! are serialized by a per-connection async mutex.

use crate::cancel::CancellationToken;
use crate::config::BridgeConfig;
use crate::protocol::{BridgeRequest, BridgeResponse, Params};
use crate::{BridgeError, Result};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// One accepted plugin connection.
struct PeerConnection {
    id: u64,
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
    /// Fires when the connection is superseded or the bridge closes.
    closed: CancellationToken,
}

impl PeerConnection {
    async fn write(&self, payload: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload))
            .await
            .map_err(|e| BridgeError::Transport {
                message: e.to_string(),
            })
    }

    /// Fires `closed` first so writers stuck on this socket give up the sink.
    async fn close(&self) {
        self.closed.cancel();
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(BridgeConfig::CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Closing plugin connection {} failed: {}", self.id, e),
            Err(_) => debug!("Closing plugin connection {} timed out", self.id),
        }
    }
}

type ReplySlot = oneshot::Sender<BridgeResponse>;

/// Registration in the pending map, removed when the sending call finishes
/// for any reason (reply, write failure, cancellation, or the call's future
/// being dropped).
struct PendingSlot<'a> {
    bridge: &'a Bridge,
    request_id: String,
}

impl<'a> PendingSlot<'a> {
    fn register(bridge: &'a Bridge, request_id: String, slot: ReplySlot) -> Self {
        bridge.lock_pending().insert(request_id.clone(), slot);
        Self { bridge, request_id }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.bridge.lock_pending().remove(&self.request_id);
    }
}

/// Correlating request/response bridge over the plugin connection.
#[derive(Default)]
pub struct Bridge {
    conn: RwLock<Option<Arc<PeerConnection>>>,
    pending: Mutex<HashMap<String, ReplySlot>>,
    counter: AtomicU64,
    conn_ids: AtomicU64,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a plugin connection is installed.
    pub fn is_connected(&self) -> bool {
        self.read_conn().is_some()
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Install a freshly upgraded socket, closing whichever one it replaces,
    /// and run its reader until the connection ends.
    pub async fn serve_connection(self: Arc<Self>, socket: WebSocket) {
        let (sink, stream) = socket.split();
        let conn = Arc::new(PeerConnection {
            id: self.conn_ids.fetch_add(1, Ordering::Relaxed) + 1,
            sink: tokio::sync::Mutex::new(sink),
            closed: CancellationToken::new(),
        });

        let previous = self.write_conn().replace(conn.clone());
        if let Some(previous) = previous {
            warn!(
                "Plugin connection {} superseded by {}",
                previous.id, conn.id
            );
            tokio::spawn(async move { previous.close().await });
        }
        info!("Plugin connected (connection {})", conn.id);

        self.read_loop(conn, stream).await;
    }

    async fn read_loop(&self, conn: Arc<PeerConnection>, mut stream: SplitStream<WebSocket>) {
        loop {
            let frame = tokio::select! {
                _ = conn.closed.cancelled() => break,
                frame = stream.next() => frame,
            };

            let payload = match frame {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => bytes,
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Plugin connection {} closed", conn.id);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Plugin connection {} read error: {}", conn.id, e);
                    break;
                }
            };

            match serde_json::from_slice::<BridgeResponse>(&payload) {
                Ok(resp) => self.deliver(resp),
                Err(e) => warn!("Invalid response from plugin: {}", e),
            }
        }

        self.clear_conn(conn.id);
    }

    /// Hand a response to its waiting caller. Unknown IDs are dropped.
    fn deliver(&self, resp: BridgeResponse) {
        let slot = self.lock_pending().remove(&resp.request_id);
        match slot {
            Some(slot) => {
                // The receiver may have been dropped by a cancelled caller.
                let _ = slot.send(resp);
            }
            None => debug!("Dropping response for unknown request {}", resp.request_id),
        }
    }

    /// Forget the connection only if it is still the current one.
    fn clear_conn(&self, id: u64) {
        let mut current = self.write_conn();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            info!("Plugin disconnected (connection {})", id);
        }
    }

    pub async fn send(
        &self,
        kind: &str,
        node_ids: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.send_with_params(kind, node_ids, None, cancel).await
    }

    /// Send one request to the plugin and wait for its matching response.
    pub async fn send_with_params(
        &self,
        kind: &str,
        node_ids: Option<Vec<String>>,
        params: Option<Params>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let conn = self.read_conn().ok_or(BridgeError::NotConnected)?;

        let request_id = self.next_id();
        let request = BridgeRequest::new(kind, request_id.clone(), node_ids, params);
        let payload = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        let _slot = PendingSlot::register(self, request_id.clone(), tx);

        cancel.check()?;
        debug!("Bridge request {} ({})", request_id, kind);
        tokio::select! {
            written = conn.write(payload) => written?,
            _ = conn.closed.cancelled() => return Err(BridgeError::BridgeClosed),
            reason = cancel.cancelled() => {
                debug!("Bridge request {} abandoned during write: {:?}", request_id, reason);
                return Err(reason.into());
            }
        }

        let resp = tokio::select! {
            reply = rx => reply.map_err(|_| BridgeError::BridgeClosed)?,
            reason = cancel.cancelled() => {
                debug!("Bridge request {} abandoned: {:?}", request_id, reason);
                return Err(reason.into());
            }
        };

        if let Some(message) = resp.peer_error() {
            return Err(BridgeError::Peer(message.to_string()));
        }
        Ok(resp.data.unwrap_or(Value::Null))
    }

    /// Close the current connection and fail every pending request.
    pub async fn close(&self) {
        let conn = self.write_conn().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        // Dropping the slots wakes each waiter with BridgeClosed.
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            debug!("Failing {} pending bridge requests", drained.len());
        }
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "{}-{}-{}",
            BridgeConfig::REQUEST_ID_PREFIX,
            chrono::Local::now().format("%H%M%S"),
            n
        )
    }

    fn read_conn(&self) -> Option<Arc<PeerConnection>> {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_conn(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<PeerConnection>>> {
        self.conn.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, ReplySlot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
