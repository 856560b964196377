//! Intent Analyzer Stage
//!
//! Sends a fixed prompt to the LLM providers in order and validates the
//! answer into `Analysis::Known`. A provider error, timeout, rate limit or a
//! reply that is not a valid verdict object moves on to the next provider.
//! When nobody produces a valid verdict the result is `Analysis::Unknown`.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{Analysis, PreFilterOutcome, Provenance, TransferKind, TxEvent, Verdict};
use crate::providers::llm::LlmProvider;
use crate::utils::format::format_usd;

const MAX_RISK_FACTORS: usize = 8;
const MAX_SUMMARY_CHARS: usize = 400;

/// What the analyzer settled on, and who said it
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub provenance: Provenance,
    /// Providers skipped before the answer (0 = primary answered)
    pub fallbacks: usize,
    pub latency_ms: u64,
}

/// Verdict object as the model writes it
#[derive(Debug, Deserialize)]
struct RawVerdict {
    verdict: String,
    confidence: serde_json::Value,
    #[serde(default, alias = "riskFactors")]
    risk_factors: Vec<String>,
    #[serde(default)]
    summary: String,
}

pub struct IntentAnalyzer {
    providers: Vec<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl IntentAnalyzer {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, timeout: Duration) -> Self {
        if providers.is_empty() {
            warn!("⚠️ No LLM provider configured, unflagged transactions will be recorded as unknown");
        } else {
            info!(
                "🧠 LLM chain: {}",
                providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(" → ")
            );
        }
        Self { providers, timeout }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Verdict for one transaction; never fails
    pub async fn analyze(
        &self,
        event: &TxEvent,
        value_usd: f64,
        prefilter: &PreFilterOutcome,
        native_symbol: &str,
    ) -> AnalysisOutcome {
        let prompt = build_prompt(event, value_usd, prefilter, native_symbol);
        let start = Instant::now();
        let mut failures = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            let result = match self.complete(provider.as_ref(), &prompt).await {
                Ok(text) => parse_verdict(&text),
                Err(e) => Err(e),
            };
            match result {
                Ok(analysis) => {
                    if idx > 0 {
                        info!("🔁 Verdict from fallback provider {} (#{})", provider.name(), idx + 1);
                    }
                    return AnalysisOutcome {
                        analysis,
                        provenance: Provenance::Llm(provider.name().to_string()),
                        fallbacks: idx,
                        latency_ms: start.elapsed().as_millis() as u64,
                    };
                }
                Err(e) => {
                    warn!("⚠️ {} gave no verdict: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e.code_str()));
                }
            }
        }

        let reason = if failures.is_empty() {
            "analysis unavailable: no LLM provider configured".to_string()
        } else {
            format!("analysis unavailable ({})", failures.join(", "))
        };
        AnalysisOutcome {
            analysis: Analysis::unknown(reason),
            provenance: Provenance::Unavailable,
            fallbacks: self.providers.len(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Free-form answer for `/check`; returns (provider, text)
    pub async fn ask(&self, prompt: &str) -> AppResult<(String, String)> {
        if self.providers.is_empty() {
            return Err(AppError::new(
                ErrorCode::ProviderLlmNotConfigured,
                "no LLM provider configured",
            ));
        }
        let mut last_error = None;
        for provider in &self.providers {
            match self.complete(provider.as_ref(), prompt).await {
                Ok(text) => return Ok((provider.name().to_string(), text.trim().to_string())),
                Err(e) => {
                    warn!("⚠️ {} failed on ask: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AppError::new(ErrorCode::ProviderLlmFailed, "all providers failed")))
    }

    async fn complete(&self, provider: &dyn LlmProvider, prompt: &str) -> AppResult<String> {
        match tokio::time::timeout(self.timeout, provider.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(format!(
                "{} timed out after {}s",
                provider.name(),
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

// ============================================
// PROMPT
// ============================================

pub fn build_prompt(
    event: &TxEvent,
    value_usd: f64,
    prefilter: &PreFilterOutcome,
    native_symbol: &str,
) -> String {
    let asset = match event.kind {
        TransferKind::Native => format!("{:.4} {}", event.amount_units(), native_symbol),
        TransferKind::Erc20 { token, .. } => {
            format!("{:.2} tokens of contract {:#x}", event.amount_units(), token)
        }
    };
    let heuristics = match prefilter {
        PreFilterOutcome::Clean => "no flags".to_string(),
        PreFilterOutcome::Flagged(flags) => flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        PreFilterOutcome::NoData => "no data (EOA or unindexed contract)".to_string(),
        PreFilterOutcome::Unavailable(_) => "security API unavailable".to_string(),
    };

    format!(
        "You are a blockchain security analyst. Assess the intent of this transaction.\n\
         Transfer: {asset} (~${usd})\n\
         From: {from:#x}\n\
         To: {to:#x}\n\
         Block: {block}\n\
         Token security flags: {heuristics}\n\n\
         Answer with ONLY a JSON object, no prose:\n\
         {{\"verdict\": \"safe|suspicious|malicious\", \"confidence\": 0-100, \
         \"risk_factors\": [\"...\"], \"summary\": \"one sentence\"}}",
        asset = asset,
        usd = format_usd(value_usd),
        from = event.from,
        to = event.to,
        block = event.block_number,
        heuristics = heuristics,
    )
}

/// Prompt for the `/check` command
pub fn build_check_prompt(address: &str, prefilter: &PreFilterOutcome) -> String {
    let flags = match prefilter {
        PreFilterOutcome::Flagged(flags) => flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        PreFilterOutcome::Clean => "none".to_string(),
        PreFilterOutcome::NoData => "no data".to_string(),
        PreFilterOutcome::Unavailable(_) => "unavailable".to_string(),
    };
    format!(
        "Briefly assess the risk of interacting with contract {} on opBNB. \
         Security scanner flags: {}. Plain text, no HTML, at most 5 sentences.",
        address, flags
    )
}

// ============================================
// RESPONSE VALIDATION
// ============================================

/// Pull the verdict object out of a model reply (fenced or surrounded by prose)
pub fn parse_verdict(text: &str) -> AppResult<Analysis> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => return Err(AppError::invalid_verdict("no JSON object in reply")),
    };

    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|e| AppError::invalid_verdict(format!("bad verdict object: {}", e)))?;

    let verdict: Verdict = raw.verdict.parse().map_err(AppError::invalid_verdict)?;
    let confidence = parse_confidence(&raw.confidence)?;

    let risk_factors = raw
        .risk_factors
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .take(MAX_RISK_FACTORS)
        .collect();
    let summary: String = raw.summary.trim().chars().take(MAX_SUMMARY_CHARS).collect();

    debug!("🧠 Parsed verdict {} ({}%)", verdict.as_str(), confidence);
    Ok(Analysis::Known {
        verdict,
        confidence,
        risk_factors,
        summary,
    })
}

/// 0..=100 as number or numeric string. A value written as a fraction in
/// (0, 1] (`0.85`, `1.0`, `"0.5"`) is scaled to percent; integer `1` is 1%.
fn parse_confidence(value: &serde_json::Value) -> AppResult<u8> {
    let (number, fractional) = match value {
        serde_json::Value::Number(n) => (n.as_f64(), n.is_f64()),
        serde_json::Value::String(s) => {
            let s = s.trim().trim_end_matches('%');
            (s.parse::<f64>().ok(), s.contains('.'))
        }
        _ => (None, false),
    };
    let number = number
        .ok_or_else(|| AppError::invalid_verdict(format!("confidence is not a number: {}", value)))?;

    let scaled = if fractional && number > 0.0 && number <= 1.0 {
        number * 100.0
    } else {
        number
    };
    if !(0.0..=100.0).contains(&scaled) {
        return Err(AppError::invalid_verdict(format!(
            "confidence out of range: {}",
            number
        )));
    }
    Ok(scaled.round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};
    use crate::models::types::ScamFlag;

    fn event() -> TxEvent {
        TxEvent {
            block_number: 100,
            tx_hash: B256::ZERO,
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            amount: U256::from(10u64).pow(U256::from(19u64)),
            kind: TransferKind::Native,
        }
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Sure!\n```json\n{\"verdict\": \"Malicious\", \"confidence\": 92, \"risk_factors\": [\"drainer pattern\", \" \"], \"summary\": \"Looks like a drainer.\"}\n```";
        let analysis = parse_verdict(reply).unwrap();
        match analysis {
            Analysis::Known {
                verdict,
                confidence,
                risk_factors,
                summary,
            } => {
                assert_eq!(verdict, Verdict::Malicious);
                assert_eq!(confidence, 92);
                assert_eq!(risk_factors, vec!["drainer pattern".to_string()]);
                assert_eq!(summary, "Looks like a drainer.");
            }
            _ => panic!("expected known verdict"),
        }
    }

    #[test]
    fn test_parse_camel_case_and_fraction() {
        let reply = r#"{"verdict":"safe","confidence":0.8,"riskFactors":[]}"#;
        let analysis = parse_verdict(reply).unwrap();
        assert_eq!(analysis.confidence(), 80);
        assert_eq!(analysis.verdict_label(), "safe");
    }

    #[test]
    fn test_confidence_fraction_boundary() {
        use serde_json::json;
        assert_eq!(parse_confidence(&json!(1.0)).unwrap(), 100);
        assert_eq!(parse_confidence(&json!(1)).unwrap(), 1);
        assert_eq!(parse_confidence(&json!(0.85)).unwrap(), 85);
        assert_eq!(parse_confidence(&json!("0.5")).unwrap(), 50);
        assert_eq!(parse_confidence(&json!("70%")).unwrap(), 70);
        assert_eq!(parse_confidence(&json!(0)).unwrap(), 0);
        assert!(parse_confidence(&json!(-0.5)).is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_verdict("I think it is fine").is_err());
        assert!(parse_verdict(r#"{"verdict":"maybe","confidence":50}"#).is_err());
        assert!(parse_verdict(r#"{"verdict":"safe","confidence":250}"#).is_err());
        assert!(parse_verdict(r#"{"verdict":"safe","confidence":"high"}"#).is_err());
        let err = parse_verdict("{not json}").unwrap_err();
        assert_eq!(err.code, ErrorCode::RespInvalidVerdict);
    }

    #[test]
    fn test_prompt_mentions_flags() {
        let prompt = build_prompt(
            &event(),
            6_000.0,
            &PreFilterOutcome::Flagged(vec![ScamFlag::Proxy, ScamFlag::HiddenOwner]),
            "BNB",
        );
        assert!(prompt.contains("10.0000 BNB"));
        assert!(prompt.contains("~$6,000"));
        assert!(prompt.contains("proxy, hidden_owner"));
        assert!(prompt.contains("\"verdict\""));
    }

    #[tokio::test]
    async fn test_no_providers_is_unknown() {
        let analyzer = IntentAnalyzer::new(vec![], Duration::from_secs(1));
        let outcome = analyzer
            .analyze(&event(), 1.0, &PreFilterOutcome::NoData, "BNB")
            .await;
        assert!(!outcome.analysis.is_known());
        assert_eq!(outcome.provenance, Provenance::Unavailable);
        assert!(analyzer.ask("hi").await.is_err());
    }
}
