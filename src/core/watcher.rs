//! Block Watcher
//!
//! Polls the chain head, walks every block after the stored cursor and turns
//! qualifying transactions into `TxEvent`s:
//! - native transfers with a recipient and non-zero value
//! - ERC-20 `Transfer` logs (three topics, non-zero amount)
//!
//! Blocks are fetched in small batches (one `getLogs` per batch) and handed to
//! the pipeline strictly in order. The cursor only advances after every event
//! of a block has been handled, so a crash replays at most one block and the
//! store's `(block, tx)` key absorbs the replay.
//!
//! An optional newHeads stream shortens the wait between polls.

use alloy_primitives::Address;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::models::errors::{AppResult, ErrorCode};
use crate::models::types::{TransferKind, TxEvent};
use crate::providers::rpc::{
    parse_address, parse_b256, parse_quantity, parse_u256, topic_to_address, RpcBlock, RpcLog,
    RpcProvider,
};
use crate::providers::websocket::WsEvent;
use crate::storage::db::{Store, COUNTER_BLOCKS};
use crate::utils::constants::{
    BLOCK_BATCH, MAX_CATCHUP_BLOCKS, MAX_LAG_BLOCKS, POLL_JITTER_MS, RATE_LIMIT_PAUSE_SECS,
    RPC_BASE_RETRY_MS, START_OFFSET_BLOCKS, STATS_INTERVAL_SECS, TRANSFER_TOPIC,
    WATCHER_ERROR_BACKOFF_MAX_MS,
};
use crate::utils::retry::Backoff;
use crate::utils::telemetry::TelemetryCollector;

// ============================================
// SEAMS
// ============================================

/// Chain reads the watcher needs
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn head(&self) -> AppResult<u64>;

    /// `None` while the node has not produced the block yet
    async fn block(&self, number: u64) -> AppResult<Option<RpcBlock>>;

    async fn transfer_logs(&self, from: u64, to: u64) -> AppResult<Vec<RpcLog>>;

    async fn decimals(&self, token: &Address) -> u8;
}

#[async_trait]
impl BlockSource for RpcProvider {
    async fn head(&self) -> AppResult<u64> {
        self.get_block_number().await
    }

    async fn block(&self, number: u64) -> AppResult<Option<RpcBlock>> {
        self.get_block_by_number(number).await
    }

    async fn transfer_logs(&self, from: u64, to: u64) -> AppResult<Vec<RpcLog>> {
        self.get_transfer_logs(from, to).await
    }

    async fn decimals(&self, token: &Address) -> u8 {
        self.token_decimals(token).await
    }
}

/// Consumer of qualifying transactions, called in block order.
/// An error stops the block; it is retried on the next poll.
#[async_trait]
pub trait TxHandler: Send + Sync {
    async fn handle(&self, event: &TxEvent) -> AppResult<()>;
}

// ============================================
// RANGE PLANNING
// ============================================

/// Inclusive block range for the next cycle, or `None` when caught up
pub fn plan_range(cursor: Option<u64>, head: u64) -> Option<(u64, u64)> {
    let start = match cursor {
        None => head.saturating_sub(START_OFFSET_BLOCKS),
        Some(last) if head > last && head - last > MAX_LAG_BLOCKS => {
            warn!(
                "⏩ Cursor {} is {} blocks behind head, skipping to {}",
                last,
                head - last,
                head.saturating_sub(START_OFFSET_BLOCKS)
            );
            head.saturating_sub(START_OFFSET_BLOCKS)
        }
        Some(last) => last + 1,
    };
    if start > head {
        return None;
    }
    Some((start, head.min(start + MAX_CATCHUP_BLOCKS - 1)))
}

// ============================================
// EVENT EXTRACTION
// ============================================

/// Native transfers in a block
pub fn native_events(block: &RpcBlock) -> Vec<TxEvent> {
    let Ok(number) = parse_quantity(&block.number) else {
        return Vec::new();
    };
    block
        .transactions
        .iter()
        .filter_map(|tx| {
            let to = parse_address(tx.to.as_deref()?).ok()?;
            let amount = parse_u256(&tx.value).ok()?;
            if amount.is_zero() {
                return None;
            }
            Some(TxEvent {
                block_number: number,
                tx_hash: parse_b256(&tx.hash).ok()?,
                from: parse_address(&tx.from).ok()?,
                to,
                amount,
                kind: TransferKind::Native,
            })
        })
        .collect()
}

/// ERC-20 `Transfer` decoded from a log; decimals still unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub block_number: u64,
    pub event: TxEvent,
}

/// Decode one log. NFTs (four topics), zero amounts and removed logs yield `None`.
pub fn parse_transfer_log(log: &RpcLog) -> Option<TokenTransfer> {
    if log.removed || log.topics.len() != 3 {
        return None;
    }
    if !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return None;
    }
    let amount = parse_u256(&log.data).ok()?;
    if amount.is_zero() {
        return None;
    }
    let block_number = parse_quantity(log.block_number.as_deref()?).ok()?;
    let token = parse_address(&log.address).ok()?;
    Some(TokenTransfer {
        block_number,
        event: TxEvent {
            block_number,
            tx_hash: parse_b256(log.transaction_hash.as_deref()?).ok()?,
            from: topic_to_address(&log.topics[1]).ok()?,
            to: topic_to_address(&log.topics[2]).ok()?,
            amount,
            kind: TransferKind::Erc20 { token, decimals: 18 },
        },
    })
}

// ============================================
// WATCHER
// ============================================

enum Wake {
    Timer,
    Shutdown,
    Head(Option<WsEvent>),
}

pub struct BlockWatcher {
    source: Arc<dyn BlockSource>,
    handler: Arc<dyn TxHandler>,
    store: Arc<Store>,
    telemetry: Arc<TelemetryCollector>,
    poll_interval: Duration,
    heads: Option<mpsc::Receiver<WsEvent>>,
    backoff: Backoff,
}

impl BlockWatcher {
    pub fn new(
        source: Arc<dyn BlockSource>,
        handler: Arc<dyn TxHandler>,
        store: Arc<Store>,
        telemetry: Arc<TelemetryCollector>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            handler,
            store,
            telemetry,
            poll_interval,
            heads: None,
            backoff: Backoff::new(RPC_BASE_RETRY_MS, WATCHER_ERROR_BACKOFF_MAX_MS, u32::MAX),
        }
    }

    /// Wake early on newHeads
    pub fn with_heads(mut self, heads: mpsc::Receiver<WsEvent>) -> Self {
        self.heads = Some(heads);
        self
    }

    /// Run until `shutdown` flips to true. The block in flight is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("👀 Block watcher started (poll every {}s)", self.poll_interval.as_secs());
        let mut failures = 0u32;
        let mut last_stats = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once(&shutdown).await {
                Ok(processed) => {
                    failures = 0;
                    if processed > 0 {
                        debug!("📦 Processed {} block(s)", processed);
                    }
                    self.poll_interval + Duration::from_millis(rand::random::<u64>() % POLL_JITTER_MS.max(1))
                }
                Err(e) if e.code == ErrorCode::NetRateLimited => {
                    self.telemetry.record_rpc_error();
                    warn!("🐢 {} - pausing {}s", e, RATE_LIMIT_PAUSE_SECS);
                    Duration::from_secs(RATE_LIMIT_PAUSE_SECS)
                }
                Err(e) => {
                    self.telemetry.record_rpc_error();
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay(failures);
                    error!("❌ Poll failed ({}), retry in {:?}", e, delay);
                    delay
                }
            };

            if last_stats.elapsed() >= Duration::from_secs(STATS_INTERVAL_SECS) {
                self.log_stats();
                last_stats = Instant::now();
            }

            if !self.wait(delay, &mut shutdown).await {
                break;
            }
        }
        info!("👋 Block watcher stopped");
    }

    /// One cycle: plan from the cursor, process in batches. Returns blocks done.
    pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> AppResult<u64> {
        let head = self.source.head().await?;
        let Some((start, end)) = plan_range(self.store.cursor()?, head) else {
            return Ok(0);
        };

        let mut processed = 0;
        let mut from = start;
        while from <= end {
            if *shutdown.borrow() {
                break;
            }
            let to = end.min(from + BLOCK_BATCH - 1);
            let (done, complete) = self.process_batch(from, to).await?;
            processed += done;
            if !complete {
                break;
            }
            from = to + 1;
        }
        Ok(processed)
    }

    /// Returns (blocks done, whether the whole batch was available)
    async fn process_batch(&self, from: u64, to: u64) -> AppResult<(u64, bool)> {
        let blocks = join_all((from..=to).map(|n| self.source.block(n))).await;
        let logs = self.source.transfer_logs(from, to).await?;

        let mut transfers: HashMap<u64, Vec<TxEvent>> = HashMap::new();
        for log in &logs {
            if let Some(transfer) = parse_transfer_log(log) {
                transfers
                    .entry(transfer.block_number)
                    .or_default()
                    .push(transfer.event);
            }
        }

        let mut done = 0;
        for (number, block) in (from..=to).zip(blocks) {
            let Some(block) = block? else {
                debug!("⏳ Block {} not available yet", number);
                return Ok((done, false));
            };

            let mut events = native_events(&block);
            for mut event in transfers.remove(&number).unwrap_or_default() {
                if let TransferKind::Erc20 { token, .. } = event.kind {
                    let decimals = self.source.decimals(&token).await;
                    event.kind = TransferKind::Erc20 { token, decimals };
                }
                events.push(event);
            }

            for event in &events {
                self.telemetry.record_tx_seen();
                self.handler.handle(event).await?;
            }

            self.store.advance_cursor(number)?;
            self.store.bump_counter(COUNTER_BLOCKS, 1)?;
            self.telemetry.record_blocks(1);
            done += 1;
        }
        Ok((done, true))
    }

    /// Sleep for `delay` or until a new head arrives. False on shutdown.
    async fn wait(&mut self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            let wake = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => Wake::Timer,
                _ = shutdown.changed() => Wake::Shutdown,
                event = next_head(&mut self.heads) => Wake::Head(event),
            };
            match wake {
                Wake::Timer => return true,
                Wake::Shutdown => return false,
                Wake::Head(Some(WsEvent::NewBlock(header))) => {
                    debug!("🔔 newHead {}", header.number);
                    return true;
                }
                Wake::Head(Some(WsEvent::GaveUp(reason))) => {
                    warn!("🔌 newHeads unavailable ({}), polling only", reason);
                    self.heads = None;
                }
                Wake::Head(Some(_)) => {}
                Wake::Head(None) => self.heads = None,
            }
        }
    }

    fn log_stats(&self) {
        let stats = self.telemetry.get_stats();
        let cursor = self.store.cursor().ok().flatten().unwrap_or_default();
        info!(
            "📊 cursor={} blocks={} txs={} analyzed={} threats={} alerts={} attest={}/{}",
            cursor,
            stats.blocks_scanned,
            stats.txs_seen,
            stats.analyzed,
            stats.threats,
            stats.alerts_sent,
            stats.attestations_ok,
            stats.attestations_ok + stats.attestations_failed
        );
    }
}

async fn next_head(heads: &mut Option<mpsc::Receiver<WsEvent>>) -> Option<WsEvent> {
    match heads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
