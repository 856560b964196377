//! Scan Pipeline
//!
//! One `TxEvent` in, at most one `ScanRecord` out:
//! 1. ignore list (sender or recipient) and USD value against the owner threshold
//! 2. dedup on (block, tx)
//! 3. pre-filter; clean and honeypot contracts are decided without the LLM
//! 4. intent analysis with provider fallback
//! 5. persist the record and its counters in one transaction
//! 6. one alert, then queue `logScan`, then shield watched wallets
//!
//! Storage errors escape only up to the commit, so a failed event is replayed
//! in full. After the commit nothing can fail the event.

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::analyzer::IntentAnalyzer;
use crate::core::attestor::{AttestationJob, Attestor};
use crate::core::notifier::Notifier;
use crate::core::prefilter::PreFilter;
use crate::core::watcher::TxHandler;
use crate::models::errors::AppResult;
use crate::models::types::{
    AddressList, Analysis, PreFilterOutcome, Provenance, ScanRecord, TransferKind, TxEvent,
    Verdict,
};
use crate::providers::prices::PriceSource;
use crate::storage::db::Store;
use crate::utils::format::{addr_lower, format_usd};
use crate::utils::telemetry::{TelemetryCollector, ThreatEvent};

/// Confidence attached to verdicts taken from the pre-filter alone
const PREFILTER_SAFE_CONFIDENCE: u8 = 85;
const PREFILTER_HONEYPOT_CONFIDENCE: u8 = 95;

/// Everything the pipeline needs, wired by the binary
pub struct PipelineParts {
    pub store: Arc<Store>,
    pub prefilter: Arc<dyn PreFilter>,
    pub analyzer: Arc<IntentAnalyzer>,
    pub prices: Arc<dyn PriceSource>,
    pub notifier: Arc<Notifier>,
    pub attestor: Attestor,
    pub telemetry: Arc<TelemetryCollector>,
    pub owner_id: i64,
    pub default_threshold_usd: f64,
    pub native_symbol: String,
}

pub struct Pipeline {
    parts: PipelineParts,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self { parts }
    }

    /// USD value of the transferred amount
    pub async fn value_usd(&self, event: &TxEvent) -> f64 {
        let price = match event.kind {
            TransferKind::Native => self.parts.prices.native_usd().await,
            TransferKind::Erc20 { token, .. } => self.parts.prices.token_usd(&token).await,
        };
        price * event.amount_units()
    }

    /// Run one event through every stage. `None` when it was skipped.
    pub async fn process(&self, event: &TxEvent) -> AppResult<Option<ScanRecord>> {
        let p = &self.parts;

        if p.store.in_list(AddressList::Ignore, &event.from)?
            || p.store.in_list(AddressList::Ignore, &event.to)?
        {
            p.telemetry.record_ignored();
            return Ok(None);
        }

        let value_usd = self.value_usd(event).await;
        let threshold = p.store.owner_threshold(p.owner_id, p.default_threshold_usd)?;
        if value_usd < threshold {
            p.telemetry.record_below_threshold();
            return Ok(None);
        }

        if p.store.has_scan(event.block_number, &event.tx_hash)? {
            p.telemetry.record_duplicate();
            return Ok(None);
        }

        info!(
            "🐳 Whale ${} in block {}: {} → {}",
            format_usd(value_usd),
            event.block_number,
            addr_lower(&event.from),
            addr_lower(&event.to)
        );

        let contract = event.contract_address();
        let prefilter = p.prefilter.check(&contract).await;
        if matches!(prefilter, PreFilterOutcome::Unavailable(_)) {
            p.telemetry.record_prefilter_unavailable();
        }

        let (analysis, provenance, latency_ms) = self.decide(event, value_usd, &prefilter).await;
        p.telemetry
            .record_analysis(&provenance.to_string(), analysis.is_known(), latency_ms);

        let mut watched = Vec::new();
        for wallet in watched_wallets(event) {
            if p.store.in_list(AddressList::Watch, &wallet)? {
                watched.push(wallet);
            }
        }

        let record = ScanRecord {
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            contract_address: contract,
            sender: event.from,
            value_usd,
            analysis,
            prefilter,
            provenance,
            timestamp: Utc::now(),
        };

        if !p.store.commit_scan(&record)? {
            p.telemetry.record_duplicate();
            return Ok(None);
        }

        if record.is_threat() {
            p.telemetry.record_threat(ThreatEvent::new(
                record.verdict(),
                value_usd,
                record.risk_factors(),
                latency_ms,
            ));
            warn!(
                "🚨 {} verdict for {} (score {})",
                record.verdict(),
                addr_lower(&contract),
                record.vibe_score()
            );
        }

        let delivery = p
            .notifier
            .notify_scan(event, &record, threshold, !watched.is_empty())
            .await;
        debug!("📨 Alerts sent={} failed={}", delivery.sent, delivery.failed);

        p.attestor.enqueue(AttestationJob::LogScan {
            contract,
            score: record.vibe_score(),
            is_safe: record.is_safe(),
        });

        for wallet in watched {
            if let Err(e) = p.attestor.shield(wallet, record.vibe_score()) {
                warn!("⚠️ Shield of {} not recorded: {}", addr_lower(&wallet), e);
            }
        }

        Ok(Some(record))
    }

    async fn decide(
        &self,
        event: &TxEvent,
        value_usd: f64,
        prefilter: &PreFilterOutcome,
    ) -> (Analysis, Provenance, u64) {
        if !prefilter.needs_analysis() {
            return (prefilter_verdict(prefilter), Provenance::PreFilter, 0);
        }

        let outcome = self
            .parts
            .analyzer
            .analyze(event, value_usd, prefilter, &self.parts.native_symbol)
            .await;
        if outcome.fallbacks > 0 {
            self.parts.telemetry.record_llm_fallback();
        }
        (outcome.analysis, outcome.provenance, outcome.latency_ms)
    }
}

/// Verdict for outcomes the scanner settles alone: honeypot or clean
fn prefilter_verdict(prefilter: &PreFilterOutcome) -> Analysis {
    if prefilter.is_obviously_malicious() {
        Analysis::Known {
            verdict: Verdict::Malicious,
            confidence: PREFILTER_HONEYPOT_CONFIDENCE,
            risk_factors: vec!["honeypot".to_string()],
            summary: "Honeypot: the token can be bought but not sold".to_string(),
        }
    } else {
        Analysis::Known {
            verdict: Verdict::Safe,
            confidence: PREFILTER_SAFE_CONFIDENCE,
            risk_factors: Vec::new(),
            summary: "No risk flags from the token security scan".to_string(),
        }
    }
}

/// Sender then recipient, without duplicates
fn watched_wallets(event: &TxEvent) -> Vec<Address> {
    if event.from == event.to {
        vec![event.from]
    } else {
        vec![event.from, event.to]
    }
}

#[async_trait]
impl TxHandler for Pipeline {
    async fn handle(&self, event: &TxEvent) -> AppResult<()> {
        self.process(event).await.map(|_| ())
    }
}
