//! Shared fakes for integration tests
#![allow(dead_code)]

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vibeguard_sentinel::core::{
    attestation_channel, AttestationWorker, Attestor, IntentAnalyzer, Notifier, Pipeline,
    PipelineParts, PreFilter,
};
use vibeguard_sentinel::models::errors::{AppError, AppResult, ErrorCode};
use vibeguard_sentinel::models::types::{PreFilterOutcome, TransferKind, TxEvent};
use vibeguard_sentinel::providers::{LlmProvider, MessageSender, ScanLedger, StaticPrices};
use vibeguard_sentinel::utils::retry::Backoff;
use vibeguard_sentinel::{Store, TelemetryCollector};

pub const OWNER: i64 = 42;
pub const NATIVE_PRICE: f64 = 600.0;

// ============================================
// FAKES
// ============================================

/// Records every message instead of calling Telegram
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(&self, chat_id: i64, html: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push((chat_id, html.to_string()));
        Ok(())
    }
}

/// Fixed outcome per address, `NoData` otherwise
#[derive(Default)]
pub struct FixedPreFilter {
    pub outcomes: HashMap<Address, PreFilterOutcome>,
    pub calls: AtomicUsize,
}

impl FixedPreFilter {
    pub fn with(address: Address, outcome: PreFilterOutcome) -> Self {
        Self {
            outcomes: HashMap::from([(address, outcome)]),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PreFilter for FixedPreFilter {
    async fn check(&self, address: &Address) -> PreFilterOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .get(address)
            .cloned()
            .unwrap_or(PreFilterOutcome::NoData)
    }
}

/// LLM stand-in returning a canned reply (or error)
pub struct ScriptedLlm {
    pub name: String,
    pub reply: Result<String, String>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn answering(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Ok(reply.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers `reply`, but only after `delay`
    pub fn stalling(name: &str, reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Ok(reply.to_string()),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Err("HTTP 503".to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(AppError::llm_failed(&self.name, e.clone())),
        }
    }
}

/// Ledger that only remembers what it was asked to write
#[derive(Default)]
pub struct RecordingLedger {
    pub log_scans: Mutex<Vec<(Address, u8, bool)>>,
    pub shields: Mutex<Vec<(Address, u8)>>,
    pub learnings: Mutex<Vec<(U256, B256, U256)>>,
    pub attests: Mutex<Vec<(U256, Address, u8)>>,
    pub minted: AtomicUsize,
    /// `shieldWallet` calls left to revert
    pub fail_shields: AtomicUsize,
}

impl RecordingLedger {
    pub fn shield_count(&self) -> usize {
        self.shields.lock().unwrap().len()
    }
}

#[async_trait]
impl ScanLedger for RecordingLedger {
    fn is_enabled(&self) -> bool {
        true
    }

    fn signer(&self) -> Address {
        Address::repeat_byte(0xee)
    }

    async fn log_scan(&self, contract: Address, score: u8, is_safe: bool) -> AppResult<B256> {
        self.log_scans.lock().unwrap().push((contract, score, is_safe));
        Ok(B256::repeat_byte(1))
    }

    async fn shield_wallet(&self, wallet: Address, score: u8) -> AppResult<B256> {
        let reverting = self
            .fail_shields
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if reverting {
            return Err(AppError::new(ErrorCode::ChainReverted, "shieldWallet reverted"));
        }
        self.shields.lock().unwrap().push((wallet, score));
        Ok(B256::repeat_byte(2))
    }

    async fn mint_guardian(&self, _name: &str, _image_uri: &str) -> AppResult<(B256, U256)> {
        let id = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((B256::repeat_byte(3), U256::from(id)))
    }

    async fn update_learning(&self, token_id: U256, root: B256, protected: U256) -> AppResult<B256> {
        self.learnings.lock().unwrap().push((token_id, root, protected));
        Ok(B256::repeat_byte(4))
    }

    async fn attest_protection(&self, token_id: U256, wallet: Address, risk: u8) -> AppResult<B256> {
        self.attests.lock().unwrap().push((token_id, wallet, risk));
        Ok(B256::repeat_byte(5))
    }
}

// ============================================
// HARNESS
// ============================================

/// Pipeline over in-memory storage and recording fakes
pub struct Harness {
    pub store: Arc<Store>,
    pub telemetry: Arc<TelemetryCollector>,
    pub sender: Arc<RecordingSender>,
    pub ledger: Arc<RecordingLedger>,
    pub prefilter: Arc<FixedPreFilter>,
    pub pipeline: Pipeline,
    pub attestor: Attestor,
    worker: Option<AttestationWorker>,
}

impl Harness {
    pub fn new(prefilter: FixedPreFilter, llms: Vec<Arc<dyn LlmProvider>>, threshold: f64) -> Self {
        Self::with_store(
            Store::open_in_memory().unwrap(),
            prefilter,
            llms,
            threshold,
            Duration::from_secs(2),
        )
    }

    /// Same wiring over a caller-provided store and LLM timeout
    pub fn with_store(
        store: Store,
        prefilter: FixedPreFilter,
        llms: Vec<Arc<dyn LlmProvider>>,
        threshold: f64,
        llm_timeout: Duration,
    ) -> Self {
        let store = Arc::new(store);
        store.ensure_owner(OWNER, threshold).unwrap();
        let telemetry = Arc::new(TelemetryCollector::new());
        let sender = Arc::new(RecordingSender::default());
        let ledger = Arc::new(RecordingLedger::default());
        let prefilter = Arc::new(prefilter);

        let notifier = Arc::new(Notifier::new(
            sender.clone(),
            vec![OWNER],
            telemetry.clone(),
            "BNB",
        ));
        let (attestor, worker) =
            attestation_channel(ledger.clone(), store.clone(), telemetry.clone());
        let worker = worker.with_backoff(Backoff::new(1, 2, 2));

        let pipeline = Pipeline::new(PipelineParts {
            store: store.clone(),
            prefilter: prefilter.clone(),
            analyzer: Arc::new(IntentAnalyzer::new(llms, llm_timeout)),
            prices: Arc::new(StaticPrices {
                native: NATIVE_PRICE,
                tokens: HashMap::new(),
            }),
            notifier,
            attestor: attestor.clone(),
            telemetry: telemetry.clone(),
            owner_id: OWNER,
            default_threshold_usd: threshold,
            native_symbol: "BNB".to_string(),
        });

        Self {
            store,
            telemetry,
            sender,
            ledger,
            prefilter,
            pipeline,
            attestor,
            worker: Some(worker),
        }
    }

    /// Close the queue and run the worker until it is empty
    pub async fn drain(mut self) -> Arc<RecordingLedger> {
        let ledger = self.ledger.clone();
        let worker = self.worker.take();
        drop(self);
        if let Some(worker) = worker {
            worker.run().await;
        }
        ledger
    }
}

/// Native transfer of `bnb` whole coins
pub fn native_event(block: u64, tx_byte: u8, from: Address, to: Address, bnb: u64) -> TxEvent {
    TxEvent {
        block_number: block,
        tx_hash: B256::repeat_byte(tx_byte),
        from,
        to,
        amount: U256::from(bnb) * U256::from(1_000_000_000_000_000_000u128),
        kind: TransferKind::Native,
    }
}

pub const SAFE_REPLY: &str =
    r#"{"verdict":"safe","confidence":90,"risk_factors":[],"summary":"Plain transfer"}"#;
pub const MALICIOUS_REPLY: &str = r#"Here you go: {"verdict":"malicious","confidence":88,"risk_factors":["drainer pattern"],"summary":"Looks like a drainer"}"#;
