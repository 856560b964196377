//! Configuration for the sentinel
//!
//! Everything comes from the environment (a `.env` file is loaded first by
//! the binaries). Secrets are never logged; `log_summary` prints only what is
//! safe to show.

use alloy_primitives::Address;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::models::errors::{AppError, AppResult};
use crate::utils::constants::{
    get_chain_name, get_native_symbol, get_public_rpc_fallback, ALERT_LIMIT_DEFAULT_USD,
    ALERT_LIMIT_MAX_USD, ALERT_LIMIT_MIN_USD, CHAIN_ID_OPBNB, DEFAULT_API_PORT,
    DEFAULT_DATABASE_PATH, DEFAULT_GEMINI_MODEL, DEFAULT_GROQ_MODEL, DEFAULT_XAI_MODEL,
    LLM_TIMEOUT_SECS, POLL_INTERVAL_SECS,
};

/// Chain-specific configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub symbol: String,
    /// HTTP RPC pool, tried in order
    pub rpc_urls: Vec<String>,
    /// Optional WebSocket endpoint for newHeads
    pub ws_url: Option<String>,
}

impl ChainConfig {
    pub fn new(chain_id: u64, rpc_urls: Vec<String>) -> Self {
        Self {
            chain_id,
            name: get_chain_name(chain_id).to_string(),
            symbol: get_native_symbol(chain_id).to_string(),
            rpc_urls,
            ws_url: None,
        }
    }

    /// Configured pool plus the chain's public endpoint, deduplicated
    pub fn rpc_pool(&self) -> Vec<String> {
        let mut pool = self.rpc_urls.clone();
        if let Some(public) = get_public_rpc_fallback(self.chain_id) {
            if !pool.iter().any(|u| u == public) {
                pool.push(public.to_string());
            }
        }
        pool
    }
}

/// LLM provider keys and models. Each provider may hold several keys.
#[derive(Clone, Default)]
pub struct LlmConfig {
    pub xai_keys: Vec<String>,
    pub groq_keys: Vec<String>,
    pub gemini_keys: Vec<String>,
    pub xai_model: String,
    pub groq_model: String,
    pub gemini_model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        !(self.xai_keys.is_empty() && self.groq_keys.is_empty() && self.gemini_keys.is_empty())
    }
}

/// On-chain attestation settings
#[derive(Clone, Default)]
pub struct OnchainConfig {
    pub enabled: bool,
    pub private_key: Option<String>,
    pub scan_contract: Option<Address>,
    pub guardian_contract: Option<Address>,
}

impl OnchainConfig {
    /// logScan / shieldWallet can be submitted
    pub fn can_attest(&self) -> bool {
        self.enabled && self.private_key.is_some() && self.scan_contract.is_some()
    }
}

/// Top-level sentinel configuration
#[derive(Clone)]
pub struct SentinelConfig {
    pub chain: ChainConfig,
    pub telegram_token: String,
    /// SQLite path (`DATABASE_URL`, `sqlite://` prefix allowed)
    pub database_path: String,
    /// The single owner of this deployment
    pub owner_id: i64,
    /// Extra chats that receive owner alerts
    pub additional_owners: Vec<i64>,
    pub alert_limit_default_usd: f64,
    pub alert_limit_min_usd: f64,
    pub alert_limit_max_usd: f64,
    pub llm: LlmConfig,
    pub goplus_app_key: Option<String>,
    pub goplus_app_secret: Option<String>,
    pub onchain: OnchainConfig,
    pub poll_interval: Duration,
    pub api_host: String,
    pub api_port: u16,
    pub api_key: Option<String>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::new(CHAIN_ID_OPBNB, Vec::new()),
            telegram_token: String::new(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            owner_id: 0,
            additional_owners: Vec::new(),
            alert_limit_default_usd: ALERT_LIMIT_DEFAULT_USD,
            alert_limit_min_usd: ALERT_LIMIT_MIN_USD,
            alert_limit_max_usd: ALERT_LIMIT_MAX_USD,
            llm: LlmConfig {
                xai_model: DEFAULT_XAI_MODEL.to_string(),
                groq_model: DEFAULT_GROQ_MODEL.to_string(),
                gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
                timeout: Duration::from_secs(LLM_TIMEOUT_SECS),
                ..Default::default()
            },
            goplus_app_key: None,
            goplus_app_secret: None,
            onchain: OnchainConfig::default(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            api_host: "0.0.0.0".to_string(),
            api_port: DEFAULT_API_PORT,
            api_key: None,
        }
    }
}

impl SentinelConfig {
    /// Load from process environment
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| AppError::missing_env(key));
        let list = |key: &str| split_list(get(key).as_deref().unwrap_or(""));

        let defaults = Self::default();

        let chain_id = parse_or(get("CHAIN_ID"), "CHAIN_ID", CHAIN_ID_OPBNB)?;
        let rpc_urls = split_list(&require("OPBNB_HTTP_URL")?);
        let mut chain = ChainConfig::new(chain_id, rpc_urls);
        chain.ws_url = get("WS_URL");

        let owner_id = parse_or(Some(require("PRIMARY_OWNER_ID")?), "PRIMARY_OWNER_ID", 0i64)?;
        let additional_owners = list("ADDITIONAL_OWNERS")
            .iter()
            .map(|v| v.parse::<i64>().map_err(|_| AppError::invalid_config("ADDITIONAL_OWNERS", v)))
            .collect::<AppResult<Vec<_>>>()?;

        let alert_limit_min_usd = parse_or(get("ALERT_LIMIT_MIN_USD"), "ALERT_LIMIT_MIN_USD", ALERT_LIMIT_MIN_USD)?;
        let alert_limit_max_usd = parse_or(get("ALERT_LIMIT_MAX_USD"), "ALERT_LIMIT_MAX_USD", ALERT_LIMIT_MAX_USD)?;
        let alert_limit_default_usd = parse_or(
            get("ALERT_LIMIT_DEFAULT_USD"),
            "ALERT_LIMIT_DEFAULT_USD",
            ALERT_LIMIT_DEFAULT_USD,
        )?;
        if alert_limit_min_usd > alert_limit_max_usd
            || !(alert_limit_min_usd..=alert_limit_max_usd).contains(&alert_limit_default_usd)
        {
            return Err(AppError::invalid_config(
                "ALERT_LIMIT_DEFAULT_USD",
                format!(
                    "{} outside [{}, {}]",
                    alert_limit_default_usd, alert_limit_min_usd, alert_limit_max_usd
                ),
            ));
        }

        let llm = LlmConfig {
            xai_keys: list("XAI_API_KEY"),
            groq_keys: list("GROQ_API_KEY"),
            gemini_keys: list("GEMINI_API_KEY"),
            xai_model: get("XAI_MODEL").unwrap_or(defaults.llm.xai_model),
            groq_model: get("GROQ_MODEL").unwrap_or(defaults.llm.groq_model),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.llm.gemini_model),
            timeout: Duration::from_secs(parse_or(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", LLM_TIMEOUT_SECS)?),
        };

        let onchain = OnchainConfig {
            enabled: get("ENABLE_ONCHAIN_LOG").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
            private_key: get("WEB3_PRIVATE_KEY"),
            scan_contract: parse_address(get("VIBEGUARD_CONTRACT"), "VIBEGUARD_CONTRACT")?,
            guardian_contract: parse_address(get("GUARDIAN_CONTRACT"), "GUARDIAN_CONTRACT")?,
        };

        Ok(Self {
            chain,
            telegram_token: require("TELEGRAM_TOKEN")?,
            database_path: get("DATABASE_URL")
                .map(|url| normalize_database_url(&url))
                .unwrap_or(defaults.database_path),
            owner_id,
            additional_owners,
            alert_limit_default_usd,
            alert_limit_min_usd,
            alert_limit_max_usd,
            llm,
            goplus_app_key: get("GOPLUS_APP_KEY"),
            goplus_app_secret: get("GOPLUS_APP_SECRET"),
            onchain,
            poll_interval: Duration::from_secs(parse_or(
                get("POLL_INTERVAL_SECS"),
                "POLL_INTERVAL_SECS",
                POLL_INTERVAL_SECS,
            )?),
            api_host: get("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_or(get("PORT").or_else(|| get("API_PORT")), "PORT", DEFAULT_API_PORT)?,
            api_key: get("API_KEY"),
        })
    }

    /// Owner first, then additional owners
    pub fn owner_chats(&self) -> Vec<i64> {
        let mut chats = vec![self.owner_id];
        for id in &self.additional_owners {
            if !chats.contains(id) {
                chats.push(*id);
            }
        }
        chats
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        user_id == self.owner_id || self.additional_owners.contains(&user_id)
    }

    /// Threshold accepted by `/limit`
    pub fn threshold_in_bounds(&self, value: f64) -> bool {
        value.is_finite() && value >= self.alert_limit_min_usd && value <= self.alert_limit_max_usd
    }

    /// Startup summary without secrets
    pub fn log_summary(&self) {
        info!("⛓️ Chain: {} ({})", self.chain.name, self.chain.chain_id);
        info!("📡 RPC pool: {} endpoint(s)", self.chain.rpc_pool().len());
        if self.chain.ws_url.is_some() {
            info!("🔌 newHeads subscription enabled");
        }
        info!("🗄️ Database: {}", self.database_path);
        info!(
            "👑 Owner: {} (+{} additional)",
            self.owner_id,
            self.additional_owners.len()
        );
        info!(
            "🐳 Whale threshold: ${:.0} (bounds ${:.0}..${:.0})",
            self.alert_limit_default_usd, self.alert_limit_min_usd, self.alert_limit_max_usd
        );
        info!(
            "🧠 LLM keys: xai={} groq={} gemini={} (keys hidden)",
            self.llm.xai_keys.len(),
            self.llm.groq_keys.len(),
            self.llm.gemini_keys.len()
        );
        info!(
            "📝 On-chain attestation: {}",
            if self.onchain.can_attest() { "enabled" } else { "disabled" }
        );
    }
}

/// Split a comma-separated env value
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> AppResult<T> {
    match raw {
        Some(v) => v.parse::<T>().map_err(|_| AppError::invalid_config(key, v)),
        None => Ok(default),
    }
}

fn parse_address(raw: Option<String>, key: &str) -> AppResult<Option<Address>> {
    raw.map(|v| Address::from_str(&v).map_err(|_| AppError::invalid_config(key, v)))
        .transpose()
}

fn normalize_database_url(url: &str) -> String {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("TELEGRAM_TOKEN", "123:abc"),
        ("PRIMARY_OWNER_ID", "42"),
        ("OPBNB_HTTP_URL", "https://a.example, https://b.example"),
    ];

    #[test]
    fn test_required_vars() {
        let err = SentinelConfig::from_lookup(lookup(&[])).err().unwrap();
        assert_eq!(err.code_str(), "CFG_MISSING_ENV");

        let cfg = SentinelConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(cfg.owner_id, 42);
        assert_eq!(cfg.chain.rpc_urls.len(), 2);
        assert_eq!(cfg.chain.chain_id, CHAIN_ID_OPBNB);
        assert!(!cfg.onchain.can_attest());
    }

    #[test]
    fn test_owner_chats_and_lists() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ADDITIONAL_OWNERS", "7, 42 ,9"));
        pairs.push(("GROQ_API_KEY", "k1,k2"));
        pairs.push(("DATABASE_URL", "sqlite:///tmp/s.db"));
        let cfg = SentinelConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.owner_chats(), vec![42, 7, 9]);
        assert!(cfg.is_owner(9));
        assert!(!cfg.is_owner(10));
        assert_eq!(cfg.llm.groq_keys, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(cfg.database_path, "/tmp/s.db");
    }

    #[test]
    fn test_threshold_bounds() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ALERT_LIMIT_DEFAULT_USD", "50"));
        let err = SentinelConfig::from_lookup(lookup(&pairs)).err().unwrap();
        assert_eq!(err.code_str(), "CFG_INVALID_VALUE");

        let cfg = SentinelConfig::default();
        assert!(cfg.threshold_in_bounds(100.0));
        assert!(!cfg.threshold_in_bounds(99.0));
        assert!(!cfg.threshold_in_bounds(f64::NAN));
    }

    #[test]
    fn test_invalid_contract_address() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("VIBEGUARD_CONTRACT", "0xnothex"));
        assert!(SentinelConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_rpc_pool_appends_public_endpoint() {
        let chain = ChainConfig::new(CHAIN_ID_OPBNB, vec!["https://private.example".into()]);
        let pool = chain.rpc_pool();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0], "https://private.example");
    }
}
