//! API Request/Response Types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::errors::AppError;
use crate::models::types::{Counters, ScanRecord, ShieldedWallet};
use crate::utils::format::addr_lower;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub latency_ms: f64,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, latency_ms: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: ApiError, latency_ms: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// API Error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "API_BAD_REQUEST".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            code: "API_UNAUTHORIZED".to_string(),
            message: "Invalid or missing API key".to_string(),
            details: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: "NET_RATE_LIMITED".to_string(),
            message: format!("Rate limit exceeded. Retry after {} seconds", retry_after),
            details: Some(format!("retry_after: {}", retry_after)),
        }
    }
}

impl From<&AppError> for ApiError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code_str().to_string(),
            message: err.message.clone(),
            details: None,
        }
    }
}

// ============================================
// Health & Stats
// ============================================

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub chain_id: u64,
    pub cursor: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatsData {
    pub counters: Counters,
    pub scans_stored: u64,
    pub wallets_shielded: u64,
    pub wallets_shielded_onchain: u64,
    pub protected_usd: f64,
    pub attestations_ok: u64,
    pub attestations_failed: u64,
    pub session: SessionStats,
}

/// In-memory counters since process start
#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub txs_seen: u64,
    pub analyzed: u64,
    pub unknown_verdicts: u64,
    pub llm_fallbacks: u64,
    pub prefilter_unavailable: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub avg_analysis_ms: f64,
    pub verdicts_by_source: HashMap<String, u64>,
}

// ============================================
// Scans & Wallets
// ============================================

#[derive(Debug, Deserialize)]
pub struct ScansQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ScanData {
    pub block_number: u64,
    pub tx_hash: String,
    pub contract_address: String,
    pub sender: String,
    pub value_usd: f64,
    pub verdict: String,
    pub confidence: u8,
    pub vibe_score: u8,
    pub is_threat: bool,
    pub risk_factors: Vec<String>,
    pub provenance: String,
    pub timestamp: i64,
}

impl From<&ScanRecord> for ScanData {
    fn from(r: &ScanRecord) -> Self {
        Self {
            block_number: r.block_number,
            tx_hash: format!("{:#x}", r.tx_hash),
            contract_address: addr_lower(&r.contract_address),
            sender: addr_lower(&r.sender),
            value_usd: r.value_usd,
            verdict: r.verdict().to_string(),
            confidence: r.confidence(),
            vibe_score: r.vibe_score(),
            is_threat: r.is_threat(),
            risk_factors: r.risk_factors(),
            provenance: r.provenance.to_string(),
            timestamp: r.timestamp.timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletData {
    pub address: String,
    pub shielded: Option<ShieldedWallet>,
    pub watched: bool,
    pub ignored: bool,
    pub recent_scans: Vec<ScanData>,
}
