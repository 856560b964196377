//! VibeGuard Sentinel Library
//!
//! Block-scan-and-alert pipeline for EVM chains:
//! - Watches new blocks for whale-sized native and ERC-20 transfers
//! - Screens contracts with a token security API before any LLM spend
//! - Asks LLM providers (with fallback) for an intent verdict
//! - Alerts owners on Telegram and attests results on-chain
//! - Keeps history, shields and preferences in SQLite

pub mod api;
pub mod core;
pub mod models;
pub mod providers;
pub mod storage;
pub mod utils;

pub use crate::core::{
    BlockWatcher, CommandBot, GuardianService, IntentAnalyzer, Notifier, Pipeline, PipelineParts,
};
pub use models::{AppError, AppResult, ErrorCode, SentinelConfig};
pub use storage::Store;
pub use utils::telemetry::{TelemetryCollector, TelemetryStats};
