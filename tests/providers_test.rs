//! HTTP provider tests against wiremock servers

use alloy_primitives::{Address, U256};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vibeguard_sentinel::core::{GoPlusPreFilter, PreFilter};
use vibeguard_sentinel::models::errors::ErrorCode;
use vibeguard_sentinel::models::types::{PreFilterOutcome, ScamFlag};
use vibeguard_sentinel::providers::{
    CoinGeckoOracle, GeminiProvider, GoPlusClient, LlmProvider, MessageSender, OpenAiCompatible,
    PriceSource, RpcProvider, TelegramBot,
};
use vibeguard_sentinel::utils::retry::Backoff;

fn token() -> Address {
    Address::repeat_byte(0xab)
}

// ============================================
// GOPLUS
// ============================================

#[tokio::test]
async fn test_goplus_flags_honeypot() {
    let server = MockServer::start().await;
    let addr = format!("{:#x}", token());
    Mock::given(method("GET"))
        .and(path("/token_security/56"))
        .and(query_param("contract_addresses", addr.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "message": "OK",
            "result": {
                addr.clone(): {
                    "is_honeypot": "1",
                    "is_open_source": "0",
                    "is_proxy": "0"
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GoPlusClient::new(56, None, None).unwrap().with_base_url(server.uri());
    let prefilter = GoPlusPreFilter::new(client);

    let outcome = prefilter.check(&token()).await;
    assert_eq!(
        outcome,
        PreFilterOutcome::Flagged(vec![ScamFlag::Honeypot, ScamFlag::ClosedSource])
    );
    assert!(outcome.is_obviously_malicious());

    // second lookup is served from cache (mock expects exactly one call)
    assert_eq!(prefilter.check(&token()).await, outcome);
}

#[tokio::test]
async fn test_goplus_unknown_address_is_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token_security/56"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "message": "OK",
            "result": {}
        })))
        .mount(&server)
        .await;

    let client = GoPlusClient::new(56, None, None).unwrap().with_base_url(server.uri());
    assert_eq!(client.check(&token()).await.unwrap(), PreFilterOutcome::NoData);
}

#[tokio::test]
async fn test_goplus_failure_is_unavailable_not_clean() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token_security/56"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 4029,
            "message": "too many requests"
        })))
        .mount(&server)
        .await;

    let client = GoPlusClient::new(56, None, None).unwrap().with_base_url(server.uri());
    let err = client.check(&token()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderPreFilterFailed);

    let outcome = GoPlusPreFilter::new(client).check(&token()).await;
    assert!(matches!(outcome, PreFilterOutcome::Unavailable(_)));
    assert!(outcome.needs_analysis());
}

// ============================================
// LLM
// ============================================

#[tokio::test]
async fn test_openai_compatible_rotates_keys() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(wiremock::matchers::header("authorization", "Bearer bad"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid key"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(wiremock::matchers::header("authorization", "Bearer good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "{\"verdict\":\"safe\",\"confidence\":80}" } }]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiCompatible::new(
        "groq",
        format!("{}/v1/chat/completions", server.uri()),
        "llama",
        vec!["bad".to_string(), "good".to_string()],
        Duration::from_secs(5),
    )
    .unwrap();

    let text = provider.complete("analyze").await.unwrap();
    assert!(text.contains("\"safe\""));
}

#[tokio::test]
async fn test_openai_compatible_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = OpenAiCompatible::new(
        "xai",
        format!("{}/v1/chat/completions", server.uri()),
        "grok",
        vec!["k".to_string()],
        Duration::from_secs(5),
    )
    .unwrap();

    let err = provider.complete("analyze").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NetRateLimited);
}

#[tokio::test]
async fn test_gemini_reads_first_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gemini-test:generateContent"))
        .and(query_param("key", "gk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        })))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("gemini-test", vec!["gk".to_string()], Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    assert_eq!(provider.complete("hi").await.unwrap(), "hello");
}

// ============================================
// TELEGRAM
// ============================================

#[tokio::test]
async fn test_telegram_send_and_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "message_id": 5 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bot123:abc/getUpdates"))
        .and(query_param("offset", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [{
                "update_id": 11,
                "message": {
                    "message_id": 2,
                    "from": { "id": 42, "is_bot": false },
                    "chat": { "id": 42, "type": "private" },
                    "text": "/limit 25k"
                }
            }]
        })))
        .mount(&server)
        .await;

    let bot = TelegramBot::new("123:abc").unwrap().with_base_url(server.uri());
    bot.send_message(42, "<b>hi</b>").await.unwrap();

    let updates = bot.get_updates(11, 0).await.unwrap();
    assert_eq!(updates.len(), 1);
    let text = updates[0].message.as_ref().and_then(|m| m.text.clone());
    assert_eq!(text.as_deref(), Some("/limit 25k"));
}

#[tokio::test]
async fn test_telegram_api_error_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;

    let bot = TelegramBot::new("123:abc").unwrap().with_base_url(server.uri());
    let err = bot.send_message(1, "x").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderTelegramFailed);
    assert!(err.message.contains("chat not found"));
}

// ============================================
// RPC
// ============================================

#[tokio::test]
async fn test_rpc_falls_back_to_next_endpoint() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&broken)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_blockNumber" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": "0x1b4"
        })))
        .mount(&healthy)
        .await;

    let rpc = RpcProvider::with_urls(56, vec![broken.uri(), healthy.uri()])
        .unwrap()
        .with_backoff(Backoff::new(1, 2, 2));
    assert_eq!(rpc.get_block_number().await.unwrap(), 436);
}

#[tokio::test]
async fn test_rpc_missing_block_and_balance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBalance" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": "0xde0b6b3a7640000"
        })))
        .mount(&server)
        .await;

    let rpc = RpcProvider::with_urls(56, vec![server.uri()])
        .unwrap()
        .with_backoff(Backoff::new(1, 2, 1));
    assert!(rpc.get_block_by_number(999).await.unwrap().is_none());
    assert_eq!(
        rpc.get_balance(&token()).await.unwrap(),
        U256::from(1_000_000_000_000_000_000u128)
    );
}

#[tokio::test]
async fn test_rpc_all_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let rpc = RpcProvider::with_urls(56, vec![server.uri()])
        .unwrap()
        .with_backoff(Backoff::new(1, 2, 3));
    let err = rpc.get_block_number().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NetRateLimited);
}

// ============================================
// COINGECKO
// ============================================

#[tokio::test]
async fn test_coingecko_native_and_token_prices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "binancecoin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "binancecoin": { "usd": 612.5 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let addr = format!("{:#x}", token());
    Mock::given(method("GET"))
        .and(path("/simple/token_price/binance-smart-chain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            addr: { "usd": 1.0 }
        })))
        .mount(&server)
        .await;

    let oracle = CoinGeckoOracle::new(56).unwrap().with_base_url(server.uri());
    assert_eq!(oracle.native_usd().await, 612.5);
    // cached
    assert_eq!(oracle.native_usd().await, 612.5);
    assert_eq!(oracle.token_usd(&token()).await, 1.0);
    assert_eq!(oracle.token_usd(&Address::repeat_byte(0x01)).await, 0.0);
}

#[tokio::test]
async fn test_coingecko_outage_uses_fallback_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let oracle = CoinGeckoOracle::new(56).unwrap().with_base_url(server.uri());
    assert_eq!(
        oracle.native_usd().await,
        vibeguard_sentinel::utils::constants::FALLBACK_NATIVE_PRICE_USD
    );
}
