//! Core types for the scan pipeline

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::constants::{SAFE_SCORE_THRESHOLD, SCORE_FLAGGED, SCORE_UNKNOWN};

// ============================================
// WATCHER EVENTS
// ============================================

/// What moved in a qualifying transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferKind {
    /// Native coin transfer (tx.value > 0)
    Native,
    /// ERC-20 `Transfer` log emitted by `token`
    Erc20 { token: Address, decimals: u8 },
}

/// One qualifying transaction, emitted by the block watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEvent {
    pub block_number: u64,
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    /// Raw amount in the smallest unit of the asset
    pub amount: U256,
    pub kind: TransferKind,
}

impl TxEvent {
    /// Address handed to the pre-filter: token contract for ERC-20, recipient otherwise
    pub fn contract_address(&self) -> Address {
        match self.kind {
            TransferKind::Native => self.to,
            TransferKind::Erc20 { token, .. } => token,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self.kind {
            TransferKind::Native => 18,
            TransferKind::Erc20 { decimals, .. } => decimals,
        }
    }

    /// Human amount (raw / 10^decimals)
    pub fn amount_units(&self) -> f64 {
        units_to_f64(self.amount, self.decimals())
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, TransferKind::Native)
    }
}

/// Convert a raw token amount to a float, saturating at u128::MAX
pub fn units_to_f64(amount: U256, decimals: u8) -> f64 {
    let raw: u128 = amount.try_into().unwrap_or(u128::MAX);
    raw as f64 / 10f64.powi(decimals as i32)
}

// ============================================
// PRE-FILTER
// ============================================

/// Heuristic flags reported by the token security API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScamFlag {
    Honeypot,
    ClosedSource,
    Proxy,
    OwnershipReclaimable,
    HiddenOwner,
    Blacklist,
    SelfDestruct,
}

impl ScamFlag {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Honeypot => "🍯 HONEYPOT",
            Self::ClosedSource => "🔐 CLOSED SOURCE",
            Self::Proxy => "👤 PROXY",
            Self::OwnershipReclaimable => "👑 OWNERSHIP RECLAIMABLE",
            Self::HiddenOwner => "🕵️ HIDDEN OWNER",
            Self::Blacklist => "⛔ BLACKLIST",
            Self::SelfDestruct => "💣 SELFDESTRUCT",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Honeypot => "honeypot",
            Self::ClosedSource => "closed_source",
            Self::Proxy => "proxy",
            Self::OwnershipReclaimable => "ownership_reclaimable",
            Self::HiddenOwner => "hidden_owner",
            Self::Blacklist => "blacklist",
            Self::SelfDestruct => "selfdestruct",
        }
    }
}

/// Result of the cheap heuristic check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PreFilterOutcome {
    /// Known contract, no flags
    Clean,
    /// Known contract with at least one flag
    Flagged(Vec<ScamFlag>),
    /// The API has no data for this address (EOA, fresh contract)
    NoData,
    /// API error or timeout; the pipeline keeps going
    Unavailable(String),
}

impl PreFilterOutcome {
    pub fn flags(&self) -> &[ScamFlag] {
        match self {
            Self::Flagged(flags) => flags,
            _ => &[],
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.flags().is_empty()
    }

    /// Honeypots are rejected without spending an LLM call
    pub fn is_obviously_malicious(&self) -> bool {
        self.flags().contains(&ScamFlag::Honeypot)
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Whether the intent analyzer must look at this transaction
    pub fn needs_analysis(&self) -> bool {
        !self.is_clean() && !self.is_obviously_malicious()
    }
}

// ============================================
// ANALYSIS
// ============================================

/// Verdict values an analysis can settle on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Suspicious,
    Malicious,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Safe => "✅",
            Self::Suspicious => "⚠️",
            Self::Malicious => "🚨",
        }
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" | "benign" => Ok(Self::Safe),
            "suspicious" | "warning" => Ok(Self::Suspicious),
            "malicious" | "scam" | "dangerous" => Ok(Self::Malicious),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// Validated analysis result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Analysis {
    Known {
        verdict: Verdict,
        /// 0..=100
        confidence: u8,
        risk_factors: Vec<String>,
        summary: String,
    },
    Unknown {
        reason: String,
    },
}

impl Analysis {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::Unknown {
            reason: reason.into(),
        }
    }

    /// "safe" | "suspicious" | "malicious" | "unknown"
    pub fn verdict_label(&self) -> &'static str {
        match self {
            Self::Known { verdict, .. } => verdict.as_str(),
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn confidence(&self) -> u8 {
        match self {
            Self::Known { confidence, .. } => *confidence,
            Self::Unknown { .. } => 0,
        }
    }

    pub fn risk_factors(&self) -> &[String] {
        match self {
            Self::Known { risk_factors, .. } => risk_factors,
            Self::Unknown { .. } => &[],
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }
}

/// Which stage produced a record's verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Decided by the heuristic API alone
    PreFilter,
    /// Decided by the named LLM provider
    Llm(String),
    /// Every analyzer failed
    Unavailable,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreFilter => write!(f, "prefilter"),
            Self::Llm(name) => write!(f, "llm:{}", name),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefilter" => Ok(Self::PreFilter),
            "unavailable" => Ok(Self::Unavailable),
            other => other
                .strip_prefix("llm:")
                .map(|name| Self::Llm(name.to_string()))
                .ok_or_else(|| format!("unknown provenance '{}'", other)),
        }
    }
}

impl Serialize for Provenance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================
// PERSISTED ENTITIES
// ============================================

/// One analyzed transaction. Immutable once stored.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub block_number: u64,
    pub tx_hash: B256,
    pub contract_address: Address,
    pub sender: Address,
    pub value_usd: f64,
    pub analysis: Analysis,
    pub prefilter: PreFilterOutcome,
    pub provenance: Provenance,
    pub timestamp: DateTime<Utc>,
}

impl ScanRecord {
    pub fn verdict(&self) -> &'static str {
        self.analysis.verdict_label()
    }

    pub fn confidence(&self) -> u8 {
        self.analysis.confidence()
    }

    /// LLM risk factors followed by pre-filter flags
    pub fn risk_factors(&self) -> Vec<String> {
        let mut factors: Vec<String> = self.analysis.risk_factors().to_vec();
        factors.extend(self.prefilter.flags().iter().map(|f| f.as_str().to_string()));
        factors
    }

    /// 0..=100 safety score submitted on-chain
    pub fn vibe_score(&self) -> u8 {
        let base = match &self.analysis {
            Analysis::Known {
                verdict: Verdict::Safe,
                confidence,
                ..
            } => 70 + (*confidence as u16 * 30 / 100) as u8,
            Analysis::Known {
                verdict: Verdict::Suspicious,
                ..
            } => 40,
            Analysis::Known {
                verdict: Verdict::Malicious,
                ..
            } => 10,
            Analysis::Unknown { .. } => SCORE_UNKNOWN,
        };
        if self.prefilter.is_flagged() {
            base.min(SCORE_FLAGGED)
        } else {
            base
        }
    }

    pub fn is_safe(&self) -> bool {
        self.vibe_score() >= SAFE_SCORE_THRESHOLD
    }

    pub fn is_threat(&self) -> bool {
        matches!(
            self.analysis,
            Analysis::Known {
                verdict: Verdict::Malicious | Verdict::Suspicious,
                ..
            }
        ) || self.prefilter.is_flagged()
    }

    /// Leaf hash used for the Guardian learning root
    pub fn digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(8 + 32 + 20 + 1);
        buf.extend_from_slice(&self.block_number.to_be_bytes());
        buf.extend_from_slice(self.tx_hash.as_slice());
        buf.extend_from_slice(self.contract_address.as_slice());
        buf.push(self.vibe_score());
        alloy_primitives::keccak256(&buf)
    }
}

/// A wallet that received at least one protection event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShieldedWallet {
    pub address: Address,
    pub vibe_score: u8,
    pub shielded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scan_count: u64,
    /// `shieldWallet` transaction, once mined
    pub onchain_tx: Option<B256>,
}

impl ShieldedWallet {
    pub fn is_onchain(&self) -> bool {
        self.onchain_tx.is_some()
    }
}

/// Per-user bot settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPreference {
    pub telegram_user_id: i64,
    pub alert_threshold_usd: f64,
    pub is_owner: bool,
}

/// Local mirror of a Guardian NFT
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardianToken {
    pub token_id: U256,
    pub owner: Address,
    pub name: String,
    pub learning_root: B256,
    /// USD, whole dollars
    pub protected_amount: U256,
    pub scan_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Owner-managed address sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressList {
    Watch,
    Ignore,
}

impl AddressList {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Ignore => "ignore",
        }
    }
}

/// Persistent counters shown in /status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub blocks: u64,
    pub whales: u64,
    pub threats: u64,
}
