//! GoPlus Token Security Client
//!
//! `GET /token_security/{chain}?contract_addresses={addr}`. The response maps
//! lowercase addresses to string flags ("0"/"1"); an address the API has never
//! indexed is simply missing from `result`.

use alloy_primitives::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{PreFilterOutcome, ScamFlag};
use crate::utils::constants::{GOPLUS_BASE_URL, GOPLUS_TIMEOUT_SECS, USER_AGENT};

/// Raw flags for one token; every field is a "0"/"1" string or absent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenSecurity {
    pub is_honeypot: Option<String>,
    pub is_open_source: Option<String>,
    pub is_proxy: Option<String>,
    pub can_take_back_ownership: Option<String>,
    pub hidden_owner: Option<String>,
    pub is_blacklisted: Option<String>,
    pub selfdestruct: Option<String>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
}

impl TokenSecurity {
    /// Flags in a fixed order, honeypot first
    pub fn flags(&self) -> Vec<ScamFlag> {
        let is = |field: &Option<String>, value: &str| field.as_deref() == Some(value);
        let checks = [
            (is(&self.is_honeypot, "1"), ScamFlag::Honeypot),
            (is(&self.is_open_source, "0"), ScamFlag::ClosedSource),
            (is(&self.is_proxy, "1"), ScamFlag::Proxy),
            (is(&self.can_take_back_ownership, "1"), ScamFlag::OwnershipReclaimable),
            (is(&self.hidden_owner, "1"), ScamFlag::HiddenOwner),
            (is(&self.is_blacklisted, "1"), ScamFlag::Blacklist),
            (is(&self.selfdestruct, "1"), ScamFlag::SelfDestruct),
        ];
        checks
            .into_iter()
            .filter_map(|(hit, flag)| hit.then_some(flag))
            .collect()
    }

    pub fn outcome(&self) -> PreFilterOutcome {
        let flags = self.flags();
        if flags.is_empty() {
            PreFilterOutcome::Clean
        } else {
            PreFilterOutcome::Flagged(flags)
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoPlusResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<HashMap<String, TokenSecurity>>,
}

/// HTTP client for the GoPlus API
#[derive(Clone)]
pub struct GoPlusClient {
    client: reqwest::Client,
    base_url: String,
    chain_id: u64,
    app_key: Option<String>,
    app_secret: Option<String>,
}

impl GoPlusClient {
    pub fn new(chain_id: u64, app_key: Option<String>, app_secret: Option<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GOPLUS_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::with_source(ErrorCode::ProviderPreFilterFailed, "HTTP client build failed", e))?;

        Ok(Self {
            client,
            base_url: GOPLUS_BASE_URL.to_string(),
            chain_id,
            app_key,
            app_secret,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Look up one contract. Errors mean "unavailable", never "clean".
    pub async fn token_security(&self, address: &Address) -> AppResult<Option<TokenSecurity>> {
        let addr = format!("{:#x}", address);
        let url = format!("{}/token_security/{}", self.base_url, self.chain_id);

        let mut query = vec![("contract_addresses", addr.clone())];
        if let (Some(key), Some(secret)) = (&self.app_key, &self.app_secret) {
            query.push(("app_key", key.clone()));
            query.push(("app_secret", secret.clone()));
        }

        let response = self.client.get(&url).query(&query).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::rate_limited("GoPlus"));
        }
        if !status.is_success() {
            return Err(AppError::new(
                ErrorCode::ProviderPreFilterFailed,
                format!("GoPlus HTTP {}", status),
            ));
        }

        let body: GoPlusResponse = response.json().await?;
        if let Some(code) = body.code {
            // 1 = ok, 2 = partial data; anything else is an API-level failure
            if code != 1 && code != 2 {
                return Err(AppError::new(
                    ErrorCode::ProviderPreFilterFailed,
                    format!(
                        "GoPlus code {}: {}",
                        code,
                        body.message.unwrap_or_default()
                    ),
                ));
            }
        }

        let entry = body
            .result
            .and_then(|mut result| result.remove(&addr));
        debug!("🔎 GoPlus {}: {}", addr, if entry.is_some() { "indexed" } else { "no data" });
        Ok(entry)
    }

    /// Lookup folded into a pre-filter outcome
    pub async fn check(&self, address: &Address) -> AppResult<PreFilterOutcome> {
        Ok(match self.token_security(address).await? {
            Some(security) => security.outcome(),
            None => PreFilterOutcome::NoData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_order() {
        let sec = TokenSecurity {
            is_honeypot: Some("1".into()),
            is_open_source: Some("0".into()),
            hidden_owner: Some("1".into()),
            is_proxy: Some("0".into()),
            ..Default::default()
        };
        assert_eq!(
            sec.flags(),
            vec![ScamFlag::Honeypot, ScamFlag::ClosedSource, ScamFlag::HiddenOwner]
        );
        assert!(sec.outcome().is_obviously_malicious());
    }

    #[test]
    fn test_clean_token() {
        let sec = TokenSecurity {
            is_honeypot: Some("0".into()),
            is_open_source: Some("1".into()),
            ..Default::default()
        };
        assert_eq!(sec.outcome(), PreFilterOutcome::Clean);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"code":1,"message":"OK","result":{"0xabc":{"is_honeypot":"0","is_open_source":"1","is_proxy":"1"}}}"#;
        let body: GoPlusResponse = serde_json::from_str(raw).unwrap();
        let sec = body.result.unwrap().remove("0xabc").unwrap();
        assert_eq!(sec.flags(), vec![ScamFlag::Proxy]);
    }
}
