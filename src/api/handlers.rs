//! API Request Handlers
//!
//! Read-only views over the store and the session telemetry.

use alloy_primitives::Address;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use super::middleware::RateLimiter;
use super::types::*;
use crate::models::config::SentinelConfig;
use crate::models::errors::AppError;
use crate::models::types::AddressList;
use crate::storage::db::Store;
use crate::utils::constants::{API_MAX_SCANS, APP_VERSION, HISTORY_LIMIT};
use crate::utils::format::addr_lower;
use crate::utils::telemetry::TelemetryCollector;

/// Shared application state
pub struct AppState {
    pub store: Arc<Store>,
    pub telemetry: Arc<TelemetryCollector>,
    pub config: Arc<SentinelConfig>,
    pub limiter: RateLimiter,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        telemetry: Arc<TelemetryCollector>,
        config: Arc<SentinelConfig>,
    ) -> Self {
        Self {
            store,
            telemetry,
            config,
            limiter: RateLimiter::default(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type HandlerResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn fail(err: AppError, start: Instant) -> (StatusCode, Json<ApiResponse<()>>) {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("❌ API error: {}", err);
    }
    (status, Json(ApiResponse::error(ApiError::from(&err), elapsed_ms(start))))
}

// ============================================
// Health Check
// ============================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let start = Instant::now();

    let data = HealthData {
        status: "healthy".to_string(),
        version: APP_VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        chain_id: state.config.chain.chain_id,
        cursor: state.store.cursor().ok().flatten(),
    };

    Json(ApiResponse::success(data, elapsed_ms(start)))
}

// ============================================
// Stats
// ============================================

pub async fn get_stats(State(state): State<Arc<AppState>>) -> HandlerResult<StatsData> {
    let start = Instant::now();
    let store = &state.store;

    let collect = || -> Result<StatsData, AppError> {
        let (attestations_ok, attestations_failed) = store.attestation_counts()?;
        let session = state.telemetry.get_stats();
        Ok(StatsData {
            counters: store.counters()?,
            scans_stored: store.scan_count()?,
            wallets_shielded: store.shielded_count()?,
            wallets_shielded_onchain: store.shielded_onchain_count()?,
            protected_usd: store.protected_usd_total()?,
            attestations_ok,
            attestations_failed,
            session: SessionStats {
                txs_seen: session.txs_seen,
                analyzed: session.analyzed,
                unknown_verdicts: session.unknown_verdicts,
                llm_fallbacks: session.llm_fallbacks,
                prefilter_unavailable: session.prefilter_unavailable,
                alerts_sent: session.alerts_sent,
                alerts_failed: session.alerts_failed,
                avg_analysis_ms: session.avg_analysis_ms,
                verdicts_by_source: session.verdicts_by_source,
            },
        })
    };

    collect()
        .map(|data| Json(ApiResponse::success(data, elapsed_ms(start))))
        .map_err(|e| fail(e, start))
}

// ============================================
// Scans
// ============================================

pub async fn list_scans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScansQuery>,
) -> HandlerResult<Vec<ScanData>> {
    let start = Instant::now();
    let limit = query.limit.unwrap_or(20).clamp(1, API_MAX_SCANS);

    state
        .store
        .recent_scans(limit)
        .map(|records| {
            let data = records.iter().map(ScanData::from).collect();
            Json(ApiResponse::success(data, elapsed_ms(start)))
        })
        .map_err(|e| fail(e, start))
}

// ============================================
// Wallets
// ============================================

pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> HandlerResult<WalletData> {
    let start = Instant::now();

    let wallet = Address::from_str(address.trim())
        .map_err(|_| fail(AppError::bad_request("Invalid address format"), start))?;

    let store = &state.store;
    let collect = || -> Result<WalletData, AppError> {
        Ok(WalletData {
            address: addr_lower(&wallet),
            shielded: store.get_shielded(&wallet)?,
            watched: store.in_list(AddressList::Watch, &wallet)?,
            ignored: store.in_list(AddressList::Ignore, &wallet)?,
            recent_scans: store
                .scans_for_address(&wallet, HISTORY_LIMIT)?
                .iter()
                .map(ScanData::from)
                .collect(),
        })
    };

    collect()
        .map(|data| Json(ApiResponse::success(data, elapsed_ms(start))))
        .map_err(|e| fail(e, start))
}
