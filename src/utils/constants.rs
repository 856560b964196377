//! Constants Module - Single Source of Truth
//!
//! Every endpoint, limit, timeout and gas figure used by the sentinel lives
//! here. Other modules import from this file instead of hardcoding values.

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "VibeGuard Sentinel";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for outbound HTTP requests
pub const USER_AGENT: &str = "VibeGuardSentinel/0.1";

// ============================================
// CHAIN IDS
// ============================================

/// Ethereum Mainnet
pub const CHAIN_ID_ETHEREUM: u64 = 1;
/// BNB Smart Chain
pub const CHAIN_ID_BSC: u64 = 56;
/// opBNB (default deployment chain)
pub const CHAIN_ID_OPBNB: u64 = 204;

/// Human chain name
pub fn get_chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        CHAIN_ID_ETHEREUM => "Ethereum",
        CHAIN_ID_BSC => "BNB Smart Chain",
        CHAIN_ID_OPBNB => "opBNB",
        _ => "Unknown",
    }
}

/// Native coin symbol
pub fn get_native_symbol(chain_id: u64) -> &'static str {
    match chain_id {
        CHAIN_ID_ETHEREUM => "ETH",
        CHAIN_ID_BSC | CHAIN_ID_OPBNB => "BNB",
        _ => "NATIVE",
    }
}

/// Public RPC used when the configured pool is exhausted
pub fn get_public_rpc_fallback(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        CHAIN_ID_ETHEREUM => Some("https://eth.llamarpc.com"),
        CHAIN_ID_BSC => Some("https://bsc-dataseed.binance.org"),
        CHAIN_ID_OPBNB => Some("https://opbnb-mainnet-rpc.bnbchain.org"),
        _ => None,
    }
}

/// CoinGecko (native coin id, token platform id)
pub fn get_coingecko_ids(chain_id: u64) -> (&'static str, &'static str) {
    match chain_id {
        CHAIN_ID_ETHEREUM => ("ethereum", "ethereum"),
        CHAIN_ID_OPBNB => ("binancecoin", "opbnb"),
        _ => ("binancecoin", "binance-smart-chain"),
    }
}

// ============================================
// RPC CONSTANTS
// ============================================

/// Default timeout for RPC requests (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 12;

/// Base retry delay in milliseconds
pub const RPC_BASE_RETRY_MS: u64 = 1000;

/// Maximum retry delay in milliseconds
pub const RPC_MAX_RETRY_MS: u64 = 8000;

/// Attempts per endpoint before moving to the next one
pub const RPC_MAX_RETRIES: u32 = 3;

/// Jitter applied to every backoff delay (percent)
pub const RETRY_JITTER_PERCENT: u64 = 20;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Decimals assumed when the token does not answer
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

// ============================================
// WEBSOCKET CONSTANTS
// ============================================

/// Reconnection base delay (milliseconds)
pub const WS_RECONNECT_BASE_MS: u64 = 1000;

/// Maximum reconnection delay (milliseconds)
pub const WS_RECONNECT_MAX_MS: u64 = 30000;

/// Maximum reconnection attempts before falling back to polling only
pub const WS_MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ============================================
// BLOCK WATCHER
// ============================================

/// Fixed poll interval (seconds)
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Random jitter added to every poll (milliseconds)
pub const POLL_JITTER_MS: u64 = 1000;

/// Blocks fetched per batch
pub const BLOCK_BATCH: u64 = 2;

/// Blocks processed per poll cycle at most
pub const MAX_CATCHUP_BLOCKS: u64 = 50;

/// Lag above which the cursor jumps close to head
pub const MAX_LAG_BLOCKS: u64 = 1000;

/// Distance behind head used on first start
pub const START_OFFSET_BLOCKS: u64 = 5;

/// Pause after an upstream 429 (seconds)
pub const RATE_LIMIT_PAUSE_SECS: u64 = 60;

/// Cap for the error backoff of the poll loop (milliseconds)
pub const WATCHER_ERROR_BACKOFF_MAX_MS: u64 = 30000;

/// Stats line interval (seconds)
pub const STATS_INTERVAL_SECS: u64 = 60;

// ============================================
// PRE-FILTER (GoPlus)
// ============================================

pub const GOPLUS_BASE_URL: &str = "https://api.gopluslabs.io/api/v1";

/// Short timeout so one slow dependency never halts block processing
pub const GOPLUS_TIMEOUT_SECS: u64 = 8;

/// Verdict cache per contract (seconds)
pub const PREFILTER_CACHE_TTL_SECS: u64 = 300;

// ============================================
// LLM PROVIDERS
// ============================================

pub const XAI_CHAT_URL: &str = "https://api.x.ai/v1/chat/completions";
pub const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const DEFAULT_XAI_MODEL: &str = "grok-2-latest";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Per-call LLM timeout (seconds)
pub const LLM_TIMEOUT_SECS: u64 = 20;

// ============================================
// TELEGRAM
// ============================================

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// getUpdates long-poll timeout (seconds)
pub const TELEGRAM_POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram hard limit per message
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

// ============================================
// PRICES (CoinGecko)
// ============================================

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Price cache TTL (seconds)
pub const PRICE_CACHE_TTL_SECS: u64 = 120;

/// Used when the price API is down
pub const FALLBACK_NATIVE_PRICE_USD: f64 = 600.0;

pub const PRICE_TIMEOUT_SECS: u64 = 8;

// ============================================
// ALERT THRESHOLDS (USD)
// ============================================

pub const ALERT_LIMIT_DEFAULT_USD: f64 = 10_000.0;
pub const ALERT_LIMIT_MIN_USD: f64 = 100.0;
pub const ALERT_LIMIT_MAX_USD: f64 = 1_000_000_000.0;

// ============================================
// ON-CHAIN ATTESTATION
// ============================================

pub const GAS_LOG_SCAN: u64 = 130_000;
pub const GAS_SHIELD_WALLET: u64 = 100_000;
pub const GAS_MINT_GUARDIAN: u64 = 250_000;
pub const GAS_UPDATE_LEARNING: u64 = 150_000;
pub const GAS_ATTEST_PROTECTION: u64 = 100_000;

/// Submission attempts per attestation
pub const ATTEST_MAX_RETRIES: u32 = 3;

/// First retry delay (milliseconds), doubled per attempt
pub const ATTEST_BASE_RETRY_MS: u64 = 2000;

pub const ATTEST_MAX_RETRY_MS: u64 = 16000;

/// Pending attestation jobs before new ones are dropped
pub const ATTEST_QUEUE_SIZE: usize = 256;

/// Receipt wait (seconds)
pub const RECEIPT_TIMEOUT_SECS: u64 = 60;

/// Placeholder image for minted Guardians
pub const DEFAULT_GUARDIAN_IMAGE_URI: &str = "ipfs://vibeguard/guardian.png";

// ============================================
// SCORING
// ============================================

/// Score cap when the pre-filter raised any flag
pub const SCORE_FLAGGED: u8 = 25;

/// Score when analysis was unavailable and nothing was flagged
pub const SCORE_UNKNOWN: u8 = 60;

/// Minimum score reported as `isSafe = true`
pub const SAFE_SCORE_THRESHOLD: u8 = 60;

// ============================================
// STORAGE / API
// ============================================

pub const DEFAULT_DATABASE_PATH: &str = "sentinel.db";

pub const DEFAULT_API_PORT: u16 = 8080;

/// Records shown by /history
pub const HISTORY_LIMIT: usize = 5;

/// Max records returned by /v1/scans
pub const API_MAX_SCANS: usize = 100;

/// In-flight status API requests
pub const API_MAX_CONCURRENT_REQUESTS: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_helpers() {
        assert_eq!(get_chain_name(CHAIN_ID_OPBNB), "opBNB");
        assert_eq!(get_native_symbol(CHAIN_ID_OPBNB), "BNB");
        assert!(get_public_rpc_fallback(CHAIN_ID_OPBNB).is_some());
        assert!(get_public_rpc_fallback(999).is_none());
        assert_eq!(get_coingecko_ids(CHAIN_ID_OPBNB).0, "binancecoin");
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(ALERT_LIMIT_MIN_USD < ALERT_LIMIT_DEFAULT_USD);
        assert!(ALERT_LIMIT_DEFAULT_USD < ALERT_LIMIT_MAX_USD);
        assert!(SCORE_FLAGGED < SAFE_SCORE_THRESHOLD);
    }
}
