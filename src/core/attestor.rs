//! On-chain Attestor
//!
//! Scan results and wallet shields are written on-chain from a background
//! worker so a slow or failing chain never blocks block processing. Jobs go
//! through a bounded queue; when it is full new jobs are dropped and counted.
//! Each job is retried with exponential backoff, then logged and skipped.
//! A shield only counts as on-chain once its transaction is recorded; until
//! then every protection event resubmits it, and the worker skips shields
//! that were confirmed while the job sat in the queue.
//! Dropping every `Attestor` handle closes the queue; the worker drains what
//! is left and exits.

use alloy_primitives::{Address, B256};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::models::errors::AppResult;
use crate::providers::contract::ScanLedger;
use crate::storage::db::Store;
use crate::utils::constants::{
    ATTEST_BASE_RETRY_MS, ATTEST_MAX_RETRIES, ATTEST_MAX_RETRY_MS, ATTEST_QUEUE_SIZE,
};
use crate::utils::format::addr_lower;
use crate::utils::retry::Backoff;
use crate::utils::telemetry::TelemetryCollector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationJob {
    /// `logScan(contract, score, isSafe, signer)`
    LogScan {
        contract: Address,
        score: u8,
        is_safe: bool,
    },
    /// `shieldWallet(wallet, score)`, until one is confirmed
    ShieldWallet { wallet: Address, score: u8 },
}

impl AttestationJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LogScan { .. } => "log_scan",
            Self::ShieldWallet { .. } => "shield_wallet",
        }
    }

    pub fn target(&self) -> Address {
        match self {
            Self::LogScan { contract, .. } => *contract,
            Self::ShieldWallet { wallet, .. } => *wallet,
        }
    }
}

pub fn attestation_backoff() -> Backoff {
    Backoff::new(ATTEST_BASE_RETRY_MS, ATTEST_MAX_RETRY_MS, ATTEST_MAX_RETRIES)
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out
pub async fn submit_with_retry<F, Fut, T>(label: &str, backoff: Backoff, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || backoff.exhausted(attempt) => return Err(e),
            Err(e) => {
                let delay = backoff.delay(attempt);
                warn!("🔁 {} attempt {} failed ({}), retry in {:?}", label, attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ============================================
// PRODUCER HANDLE
// ============================================

/// Cloneable enqueue handle
#[derive(Clone)]
pub struct Attestor {
    tx: mpsc::Sender<AttestationJob>,
    enabled: bool,
    store: Arc<Store>,
    telemetry: Arc<TelemetryCollector>,
}

/// Build the queue. The worker must be spawned by the caller.
pub fn attestation_channel(
    ledger: Arc<dyn ScanLedger>,
    store: Arc<Store>,
    telemetry: Arc<TelemetryCollector>,
) -> (Attestor, AttestationWorker) {
    let (tx, rx) = mpsc::channel(ATTEST_QUEUE_SIZE);
    let attestor = Attestor {
        tx,
        enabled: ledger.is_enabled(),
        store: store.clone(),
        telemetry: telemetry.clone(),
    };
    let worker = AttestationWorker {
        rx,
        ledger,
        store,
        telemetry,
        backoff: attestation_backoff(),
    };
    (attestor, worker)
}

impl Attestor {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queue a job without waiting. False when disabled or the queue is full.
    pub fn enqueue(&self, job: AttestationJob) -> bool {
        if !self.enabled {
            return false;
        }
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.telemetry.record_attestation_dropped();
                warn!("🗑️ Attestation queue full, dropped {} for {}", job.kind(), addr_lower(&job.target()));
                false
            }
            Err(TrySendError::Closed(job)) => {
                self.telemetry.record_attestation_dropped();
                warn!("🗑️ Attestation worker gone, dropped {}", job.kind());
                false
            }
        }
    }

    /// Mark `wallet` as protected and make sure `shieldWallet` lands once.
    /// Later events refresh the stored score. Returns true for a new shield.
    pub fn shield(&self, wallet: Address, score: u8) -> AppResult<bool> {
        let first = self.store.insert_shielded(&wallet, score)?;
        if first {
            self.telemetry.record_shield();
            info!("🛡️ Shielded {} (score {})", addr_lower(&wallet), score);
        } else {
            self.store.update_shield_score(&wallet, score)?;
            let confirmed = self
                .store
                .get_shielded(&wallet)?
                .is_some_and(|w| w.is_onchain());
            if confirmed {
                return Ok(false);
            }
            if self.enabled {
                debug!("🛡️ {} not confirmed on-chain, resubmitting", addr_lower(&wallet));
            }
        }
        self.enqueue(AttestationJob::ShieldWallet { wallet, score });
        Ok(first)
    }
}

// ============================================
// WORKER
// ============================================

pub struct AttestationWorker {
    rx: mpsc::Receiver<AttestationJob>,
    ledger: Arc<dyn ScanLedger>,
    store: Arc<Store>,
    telemetry: Arc<TelemetryCollector>,
    backoff: Backoff,
}

impl AttestationWorker {
    /// Shorter delays for tests
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Process jobs until every sender is dropped and the queue is empty
    pub async fn run(mut self) {
        debug!("📝 Attestation worker started");
        let mut processed = 0u64;
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
            processed += 1;
        }
        info!("📝 Attestation worker drained ({} job(s))", processed);
    }

    /// A queued shield may have been confirmed by an earlier job
    fn already_shielded(&self, wallet: &Address) -> bool {
        match self.store.get_shielded(wallet) {
            Ok(found) => found.is_some_and(|w| w.is_onchain()),
            Err(e) => {
                // unknown state: skip, the next protection event resubmits
                warn!("⚠️ Shield state for {} unreadable: {}", addr_lower(wallet), e);
                true
            }
        }
    }

    async fn process(&self, job: AttestationJob) {
        if let AttestationJob::ShieldWallet { wallet, .. } = &job {
            if self.already_shielded(wallet) {
                debug!("🛡️ {} already shielded on-chain, job skipped", addr_lower(wallet));
                return;
            }
        }

        let ledger = self.ledger.clone();
        let result: AppResult<B256> = submit_with_retry(job.kind(), self.backoff, || {
            let ledger = ledger.clone();
            let job = job.clone();
            async move {
                match job {
                    AttestationJob::LogScan {
                        contract,
                        score,
                        is_safe,
                    } => ledger.log_scan(contract, score, is_safe).await,
                    AttestationJob::ShieldWallet { wallet, score } => {
                        ledger.shield_wallet(wallet, score).await
                    }
                }
            }
        })
        .await;

        let target = addr_lower(&job.target());
        let logged = match &result {
            Ok(hash) => {
                self.telemetry.record_attestation(true);
                info!("⛓️ {} {} → {:#x}", job.kind(), target, hash);
                if let AttestationJob::ShieldWallet { wallet, .. } = &job {
                    if let Err(e) = self.store.confirm_shield(wallet, hash) {
                        warn!("⚠️ Could not confirm shield for {}: {}", target, e);
                    }
                }
                self.store.record_attestation(job.kind(), &target, Some(hash), None)
            }
            Err(e) => {
                self.telemetry.record_attestation(false);
                error!("⛓️ {} {} skipped: {}", job.kind(), target, e);
                self.store
                    .record_attestation(job.kind(), &target, None, Some(&e.to_string()))
            }
        };
        if let Err(e) = logged {
            warn!("⚠️ Could not record attestation: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::{AppError, ErrorCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = submit_with_retry("t", Backoff::new(1, 1, 3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::new(ErrorCode::ChainReverted, "reverted")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = submit_with_retry("t", Backoff::new(1, 1, 3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::chain_submit("nonce too low")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::ChainSubmitFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = submit_with_retry("t", Backoff::new(1, 1, 3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::timeout("receipt"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_job_metadata() {
        let job = AttestationJob::ShieldWallet {
            wallet: Address::repeat_byte(3),
            score: 90,
        };
        assert_eq!(job.kind(), "shield_wallet");
        assert_eq!(job.target(), Address::repeat_byte(3));
    }
}
