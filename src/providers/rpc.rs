//! JSON-RPC Client Module
//!
//! HTTP JSON-RPC over an ordered endpoint pool:
//! 1. Endpoints tried in order (configured pool, then the chain's public RPC)
//! 2. Exponential backoff with jitter per endpoint (1s→2s→4s, capped)
//! 3. HTTP 429 skips straight to the next endpoint; if every endpoint is
//!    rate limited the caller gets `NetRateLimited` and decides how long to pause
//! 4. gzip responses, fixed User-Agent, URLs masked in logs
//!
//! ERC-20 decimals lookups are cached for the lifetime of the process.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolCall};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::config::ChainConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::cache::TtlCache;
use crate::utils::constants::{
    DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_TOKEN_DECIMALS, RPC_BASE_RETRY_MS,
    RPC_MAX_RETRIES, RPC_MAX_RETRY_MS, TRANSFER_TOPIC, USER_AGENT as USER_AGENT_CONST,
};
use crate::utils::retry::Backoff;

/// Decimals never change; a day is effectively forever
const DECIMALS_CACHE_TTL: Duration = Duration::from_secs(86_400);

sol! {
    function decimals() external view returns (uint8);
}

// ============================================
// WIRE TYPES
// ============================================

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub result: Option<T>,
    pub error: Option<RpcError>,
    #[allow(dead_code)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// -32005 is the de-facto "limit exceeded" code across node providers
    pub fn is_rate_limit(&self) -> bool {
        self.code == -32005 || self.message.to_lowercase().contains("rate limit")
    }
}

/// Block with full transaction objects
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

// ============================================
// HEX HELPERS
// ============================================

/// `0x1a` → 26
pub fn parse_quantity(value: &str) -> AppResult<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|_| AppError::invalid_hex(value))
}

/// 0x quantity or 32-byte word → U256 (empty means zero)
pub fn parse_u256(value: &str) -> AppResult<U256> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|_| AppError::invalid_hex(value))
}

pub fn parse_address(value: &str) -> AppResult<Address> {
    Address::from_str(value.trim()).map_err(|_| AppError::invalid_hex(value))
}

pub fn parse_b256(value: &str) -> AppResult<B256> {
    B256::from_str(value.trim()).map_err(|_| AppError::invalid_hex(value))
}

/// Address held in the low 20 bytes of an indexed topic
pub fn topic_to_address(topic: &str) -> AppResult<Address> {
    let word = parse_b256(topic)?;
    Ok(Address::from_slice(&word[12..]))
}

/// Strip everything after the host so API keys in paths never reach logs
pub fn mask_url(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) if path_start + 1 < rest.len() => {
                    format!("{}/***", &url[..scheme_end + 3 + path_start])
                }
                _ => url.to_string(),
            }
        }
        None => "***".to_string(),
    }
}

// ============================================
// PROVIDER
// ============================================

/// RPC provider with retry logic and endpoint fallback
#[derive(Clone)]
pub struct RpcProvider {
    /// Endpoint pool, tried in order
    urls: Vec<String>,
    client: reqwest::Client,
    chain_id: u64,
    backoff: Backoff,
    decimals: TtlCache<u8>,
}

impl RpcProvider {
    /// Provider over the chain's full pool (configured + public fallback)
    pub fn new(chain: &ChainConfig) -> AppResult<Self> {
        let provider = Self::with_urls(chain.chain_id, chain.rpc_pool())?;
        info!(
            "📡 RPC pool for {}: {}",
            chain.name,
            provider
                .urls
                .iter()
                .map(|u| mask_url(u))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(provider)
    }

    /// Provider over an explicit pool, no public fallback appended
    pub fn with_urls(chain_id: u64, urls: Vec<String>) -> AppResult<Self> {
        if urls.is_empty() {
            return Err(AppError::new(ErrorCode::NetNoEndpoints, "empty RPC pool"));
        }
        Ok(Self {
            urls,
            client: Self::build_client()?,
            chain_id,
            backoff: Backoff::new(RPC_BASE_RETRY_MS, RPC_MAX_RETRY_MS, RPC_MAX_RETRIES),
            decimals: TtlCache::new("decimals", DECIMALS_CACHE_TTL),
        })
    }

    /// Override the retry policy (tests use millisecond delays)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn build_client() -> AppResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .map_err(|e| AppError::with_source(ErrorCode::NetConnectionFailed, "HTTP client build failed", e))
    }

    /// Execute a JSON-RPC call across the pool
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AppResult<T> {
        self.call_nullable(method, params).await?.ok_or_else(|| {
            AppError::new(
                ErrorCode::RespInvalidJson,
                format!("{}: null result in RPC response", method),
            )
        })
    }

    /// Same as `call` but a `null` result is `Ok(None)`
    pub async fn call_nullable<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AppResult<Option<T>> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut rate_limited = 0usize;
        let mut last_error = None;

        for (idx, url) in self.urls.iter().enumerate() {
            if idx > 0 {
                info!("🔄 {} falling back to {}", method, mask_url(url));
            }
            match self.call_with_retry(url, &payload).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!("⚠️ {} failed on {}: {}", method, mask_url(url), e);
                    if e.code == ErrorCode::NetRateLimited {
                        rate_limited += 1;
                    }
                    last_error = Some(e);
                }
            }
        }

        if rate_limited == self.urls.len() {
            return Err(AppError::rate_limited("RPC pool"));
        }
        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(AppError::new(
            ErrorCode::NetNoEndpoints,
            format!("all {} RPC endpoints failed for {}: {}", self.urls.len(), method, detail),
        ))
    }

    /// Retry one endpoint; rate limits and non-retryable errors return at once
    async fn call_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> AppResult<Option<T>> {
        let mut attempt = 0u32;
        loop {
            match self.execute_call::<T>(url, payload).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if e.code == ErrorCode::NetRateLimited
                        || !e.is_retryable()
                        || self.backoff.exhausted(attempt)
                    {
                        return Err(e);
                    }
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        "⏳ Retry {}/{} after {}ms: {}",
                        attempt + 1,
                        self.backoff.max_attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_call<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> AppResult<Option<T>> {
        let response = self.client.post(url).json(payload).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::rate_limited("RPC"));
        }
        if !status.is_success() {
            return Err(AppError::new(
                ErrorCode::NetConnectionFailed,
                format!("HTTP {}", status),
            ));
        }

        let body: RpcResponse<T> = response.json().await?;

        if let Some(error) = body.error {
            if error.is_rate_limit() {
                return Err(AppError::rate_limited("RPC"));
            }
            return Err(AppError::rpc(format!("{} (code: {})", error.message, error.code)));
        }

        Ok(body.result)
    }

    // ============================================
    // TYPED CALLS
    // ============================================

    pub async fn get_block_number(&self) -> AppResult<u64> {
        let hex: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&hex)
    }

    /// `None` when the node has not seen the block yet
    pub async fn get_block_by_number(&self, number: u64) -> AppResult<Option<RpcBlock>> {
        let params = serde_json::json!([format!("0x{:x}", number), true]);
        self.call_nullable::<RpcBlock>("eth_getBlockByNumber", params).await
    }

    /// ERC-20 `Transfer` logs in [from, to]
    pub async fn get_transfer_logs(&self, from: u64, to: u64) -> AppResult<Vec<RpcLog>> {
        let params = serde_json::json!([{
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
            "topics": [TRANSFER_TOPIC]
        }]);
        self.call("eth_getLogs", params).await
    }

    pub async fn eth_call(&self, to: &Address, data: &str) -> AppResult<String> {
        let params = serde_json::json!([{ "to": format!("{:#x}", to), "data": data }, "latest"]);
        self.call::<String>("eth_call", params).await
    }

    /// `decimals()` of an ERC-20, 18 when the call fails or returns garbage
    pub async fn token_decimals(&self, token: &Address) -> u8 {
        let key = format!("{:#x}", token);
        if let Some(decimals) = self.decimals.get(&key) {
            return decimals;
        }

        let data = format!("0x{}", hex::encode(decimalsCall {}.abi_encode()));
        match self.eth_call(token, &data).await {
            Ok(raw) => match parse_u256(&raw) {
                Ok(v) if v <= U256::from(77u8) && !raw.trim_start_matches("0x").is_empty() => {
                    let decimals = v.to::<u8>();
                    self.decimals.set(&key, decimals);
                    decimals
                }
                _ => DEFAULT_TOKEN_DECIMALS,
            },
            Err(e) => {
                debug!("decimals() failed for {}: {}", key, e);
                DEFAULT_TOKEN_DECIMALS
            }
        }
    }

    pub async fn fetch_chain_id(&self) -> AppResult<u64> {
        let hex: String = self.call("eth_chainId", serde_json::json!([])).await?;
        parse_quantity(&hex)
    }

    pub async fn get_code(&self, address: &Address) -> AppResult<String> {
        let params = serde_json::json!([format!("{:#x}", address), "latest"]);
        self.call::<String>("eth_getCode", params).await
    }

    pub async fn get_balance(&self, address: &Address) -> AppResult<U256> {
        let params = serde_json::json!([format!("{:#x}", address), "latest"]);
        let hex: String = self.call("eth_getBalance", params).await?;
        parse_u256(&hex)
    }

    /// First endpoint, masked for logging
    pub fn masked_url(&self) -> String {
        self.urls.first().map(|u| mask_url(u)).unwrap_or_default()
    }

    /// First endpoint, unmasked (signer transport)
    pub fn primary_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or_default()
    }

    /// Configured chain id
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_parse_u256_word() {
        let word = "0x00000000000000000000000000000000000000000000000000000000000f4240";
        assert_eq!(parse_u256(word).unwrap(), U256::from(1_000_000u64));
    }

    #[test]
    fn test_topic_to_address() {
        let topic = "0x000000000000000000000000dac17f958d2ee523a2206206994597c13d831ec7";
        let addr = topic_to_address(topic).unwrap();
        assert_eq!(
            format!("{:#x}", addr),
            "0xdac17f958d2ee523a2206206994597c13d831ec7"
        );
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://opbnb-mainnet.nodereal.io/v1/secretkey"),
            "https://opbnb-mainnet.nodereal.io/***"
        );
        assert_eq!(
            mask_url("https://opbnb-mainnet-rpc.bnbchain.org"),
            "https://opbnb-mainnet-rpc.bnbchain.org"
        );
    }

    #[test]
    fn test_rpc_error_rate_limit() {
        let err = RpcError {
            code: -32005,
            message: "limit exceeded".into(),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(RpcProvider::with_urls(204, vec![]).is_err());
    }
}
