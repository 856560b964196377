//! USD Price Oracle
//!
//! CoinGecko `simple/price` for the native coin and `simple/token_price` for
//! ERC-20s, both cached for PRICE_CACHE_TTL_SECS. Pricing never fails the
//! pipeline: the native coin falls back to a fixed price, unknown tokens are
//! worth zero (and therefore never cross the whale threshold).

use alloy_primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::{
    get_coingecko_ids, COINGECKO_BASE_URL, FALLBACK_NATIVE_PRICE_USD, PRICE_CACHE_TTL_SECS,
    PRICE_TIMEOUT_SECS, USER_AGENT,
};

const NATIVE_KEY: &str = "native";

/// USD valuation seam used by the pipeline
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD per whole native coin
    async fn native_usd(&self) -> f64;

    /// USD per whole token, 0 when unknown
    async fn token_usd(&self, token: &Address) -> f64;
}

type PriceMap = HashMap<String, HashMap<String, f64>>;

/// CoinGecko-backed oracle
#[derive(Clone)]
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
    native_id: &'static str,
    platform: &'static str,
    cache: TtlCache<f64>,
}

impl CoinGeckoOracle {
    pub fn new(chain_id: u64) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PRICE_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::with_source(ErrorCode::ProviderPriceFailed, "HTTP client build failed", e))?;
        let (native_id, platform) = get_coingecko_ids(chain_id);
        Ok(Self {
            client,
            base_url: COINGECKO_BASE_URL.to_string(),
            native_id,
            platform,
            cache: TtlCache::new("prices", Duration::from_secs(PRICE_CACHE_TTL_SECS)),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn get_prices(&self, url: &str, query: &[(&str, &str)]) -> AppResult<PriceMap> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::rate_limited("CoinGecko"));
        }
        if !status.is_success() {
            return Err(AppError::new(
                ErrorCode::ProviderPriceFailed,
                format!("CoinGecko HTTP {}", status),
            ));
        }
        Ok(response.json::<PriceMap>().await?)
    }

    pub async fn fetch_native(&self) -> AppResult<f64> {
        let url = format!("{}/simple/price", self.base_url);
        let prices = self
            .get_prices(&url, &[("ids", self.native_id), ("vs_currencies", "usd")])
            .await?;
        prices
            .get(self.native_id)
            .and_then(|p| p.get("usd"))
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| AppError::new(ErrorCode::ProviderPriceFailed, "native price missing"))
    }

    pub async fn fetch_token(&self, token: &Address) -> AppResult<f64> {
        let addr = format!("{:#x}", token);
        let url = format!("{}/simple/token_price/{}", self.base_url, self.platform);
        let prices = self
            .get_prices(&url, &[("contract_addresses", addr.as_str()), ("vs_currencies", "usd")])
            .await?;
        Ok(prices
            .get(&addr)
            .and_then(|p| p.get("usd"))
            .copied()
            .filter(|p| p.is_finite() && *p >= 0.0)
            .unwrap_or(0.0))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoOracle {
    async fn native_usd(&self) -> f64 {
        if let Some(price) = self.cache.get(NATIVE_KEY) {
            return price;
        }
        let price = match self.fetch_native().await {
            Ok(price) => {
                info!("💰 {} = ${:.2}", self.native_id, price);
                price
            }
            Err(e) => {
                warn!("⚠️ Native price fetch failed, using ${}: {}", FALLBACK_NATIVE_PRICE_USD, e);
                FALLBACK_NATIVE_PRICE_USD
            }
        };
        // Fallback is cached too so an outage costs one request per TTL
        self.cache.set(NATIVE_KEY, price);
        price
    }

    async fn token_usd(&self, token: &Address) -> f64 {
        let key = format!("{:#x}", token);
        if let Some(price) = self.cache.get(&key) {
            return price;
        }
        let price = match self.fetch_token(token).await {
            Ok(price) => price,
            Err(e) => {
                debug!("Token price fetch failed for {}: {}", key, e);
                0.0
            }
        };
        self.cache.set(&key, price);
        price
    }
}

/// Fixed prices (check binary, tests)
pub struct StaticPrices {
    pub native: f64,
    pub tokens: HashMap<Address, f64>,
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn native_usd(&self) -> f64 {
        self.native
    }

    async fn token_usd(&self, token: &Address) -> f64 {
        self.tokens.get(token).copied().unwrap_or(0.0)
    }
}
