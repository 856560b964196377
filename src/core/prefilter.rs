//! Scam Pre-Filter Stage
//!
//! Cheap heuristic verdict before any LLM spend. Fails open: an API error
//! becomes `Unavailable`, which routes the transaction to full analysis and
//! is visible in the stored record.

use alloy_primitives::Address;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::types::PreFilterOutcome;
use crate::providers::goplus::GoPlusClient;
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::PREFILTER_CACHE_TTL_SECS;

#[async_trait]
pub trait PreFilter: Send + Sync {
    /// Never fails; problems are reported as `PreFilterOutcome::Unavailable`
    async fn check(&self, address: &Address) -> PreFilterOutcome;
}

/// GoPlus with a per-address TTL cache
pub struct GoPlusPreFilter {
    client: GoPlusClient,
    cache: TtlCache<PreFilterOutcome>,
}

impl GoPlusPreFilter {
    pub fn new(client: GoPlusClient) -> Self {
        Self {
            client,
            cache: TtlCache::new("prefilter", Duration::from_secs(PREFILTER_CACHE_TTL_SECS)),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl PreFilter for GoPlusPreFilter {
    async fn check(&self, address: &Address) -> PreFilterOutcome {
        let key = format!("{:#x}", address);
        if let Some(outcome) = self.cache.get(&key) {
            return outcome;
        }

        match self.client.check(address).await {
            Ok(outcome) => {
                debug!("🔎 Pre-filter {}: {:?}", key, outcome);
                self.cache.set(&key, outcome.clone());
                outcome
            }
            Err(e) => {
                // Not cached: the next sighting gets a fresh attempt
                warn!("⚠️ Pre-filter unavailable for {}: {}", key, e);
                PreFilterOutcome::Unavailable(e.to_string())
            }
        }
    }
}
