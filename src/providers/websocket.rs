//! WebSocket newHeads Subscription
//!
//! Optional wake-up signal for the block watcher. Polling stays the source
//! of truth; a new head only shortens the wait before the next poll.
//!
//! - Reconnects with exponential backoff (1s → 30s)
//! - Gives up after WS_MAX_RECONNECT_ATTEMPTS consecutive failures and tells
//!   the receiver, which falls back to plain polling
//! - Answers server pings

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::providers::rpc::{mask_url, parse_quantity};
use crate::utils::constants::{WS_MAX_RECONNECT_ATTEMPTS, WS_RECONNECT_BASE_MS, WS_RECONNECT_MAX_MS};
use crate::utils::retry::Backoff;

// ============================================
// EVENT TYPES
// ============================================

/// Header fields the watcher cares about
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub number: String,
    #[serde(default)]
    pub hash: Option<String>,
}

impl BlockHeader {
    pub fn block_number(&self) -> Option<u64> {
        parse_quantity(&self.number).ok()
    }
}

#[derive(Debug, Clone)]
pub enum WsEvent {
    NewBlock(BlockHeader),
    Connected,
    Disconnected,
    /// Reconnect budget exhausted; no more events will follow
    GaveUp(String),
}

// ============================================
// CLIENT
// ============================================

/// newHeads subscriber
pub struct HeadSubscriber {
    url: String,
    is_connected: Arc<AtomicBool>,
    backoff: Backoff,
}

impl HeadSubscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_connected: Arc::new(AtomicBool::new(false)),
            backoff: Backoff::new(
                WS_RECONNECT_BASE_MS,
                WS_RECONNECT_MAX_MS,
                WS_MAX_RECONNECT_ATTEMPTS,
            ),
        }
    }

    /// Spawn the subscription task and hand back its event stream
    pub fn subscribe(&self) -> mpsc::Receiver<WsEvent> {
        let (tx, rx) = mpsc::channel(64);
        let url = self.url.clone();
        let is_connected = self.is_connected.clone();
        let backoff = self.backoff;

        tokio::spawn(async move {
            Self::run_subscription(url, tx, is_connected, backoff).await;
        });

        rx
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    async fn run_subscription(
        url: String,
        tx: mpsc::Sender<WsEvent>,
        is_connected: Arc<AtomicBool>,
        backoff: Backoff,
    ) {
        let mut failures = 0u32;
        let masked = mask_url(&url);

        loop {
            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("🔌 newHeads connected to {}", masked);
                    is_connected.store(true, Ordering::SeqCst);
                    failures = 0;

                    if tx.send(WsEvent::Connected).await.is_err() {
                        return;
                    }

                    let (mut write, mut read) = ws_stream.split();

                    let subscribe_msg = serde_json::json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscribe",
                        "params": ["newHeads"],
                        "id": 1
                    });

                    if let Err(e) = write.send(Message::Text(subscribe_msg.to_string())).await {
                        error!("❌ Failed to send subscription: {}", e);
                    } else {
                        while let Some(msg_result) = read.next().await {
                            match msg_result {
                                Ok(Message::Text(text)) => {
                                    if let Some(header) = parse_new_head(&text) {
                                        debug!("📨 newHead {}", header.number);
                                        if tx.send(WsEvent::NewBlock(header)).await.is_err() {
                                            info!("📪 Watcher gone, closing newHeads");
                                            return;
                                        }
                                    }
                                }
                                Ok(Message::Ping(data)) => {
                                    let _ = write.send(Message::Pong(data)).await;
                                }
                                Ok(Message::Close(_)) => {
                                    warn!("🔌 newHeads closed by server");
                                    break;
                                }
                                Err(e) => {
                                    error!("❌ WebSocket error: {}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }

                    is_connected.store(false, Ordering::SeqCst);
                    if tx.send(WsEvent::Disconnected).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("❌ newHeads connection to {} failed: {}", masked, e);
                }
            }

            failures += 1;
            if backoff.exhausted(failures) {
                error!("❌ newHeads gave up after {} attempts, polling only", failures);
                let _ = tx
                    .send(WsEvent::GaveUp(format!("{} reconnect attempts failed", failures)))
                    .await;
                return;
            }

            let delay = Duration::from_millis(backoff.capped_delay_ms(failures));
            warn!(
                "🔄 newHeads reconnect in {}ms (attempt {}/{})",
                delay.as_millis(),
                failures,
                backoff.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// `eth_subscription` notification → header; anything else → None
pub fn parse_new_head(msg: &str) -> Option<BlockHeader> {
    let json: serde_json::Value = serde_json::from_str(msg).ok()?;
    let result = json.get("params").and_then(|p| p.get("result"))?;
    serde_json::from_value(result.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_new_head() {
        let msg = r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0x9ce5","result":{"number":"0x1b4","hash":"0xabc","parentHash":"0x0"}}}"#;
        let header = parse_new_head(msg).unwrap();
        assert_eq!(header.block_number(), Some(436));
    }

    #[test]
    fn test_subscription_ack_ignored() {
        let ack = r#"{"jsonrpc":"2.0","id":1,"result":"0x9ce59a13059e417087c02d3236a0b1cc"}"#;
        assert!(parse_new_head(ack).is_none());
        assert!(parse_new_head("not json").is_none());
    }
}
