//! End-to-end pipeline tests over in-memory storage and fake providers

mod common;

use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use vibeguard_sentinel::models::types::{
    AddressList, Analysis, PreFilterOutcome, Provenance, ScamFlag, Verdict,
};
use vibeguard_sentinel::providers::LlmProvider;
use vibeguard_sentinel::Store;

const THRESHOLD: f64 = 10_000.0;

fn whale() -> Address {
    Address::repeat_byte(0xaa)
}

fn target() -> Address {
    Address::repeat_byte(0xbb)
}

#[tokio::test]
async fn test_clean_whale_records_alerts_and_attests_once() {
    let llm = ScriptedLlm::answering("xai", SAFE_REPLY);
    let h = Harness::new(
        FixedPreFilter::with(target(), PreFilterOutcome::Clean),
        vec![llm.clone() as Arc<dyn LlmProvider>],
        THRESHOLD,
    );

    // 20 BNB at $600 = $12,000
    let event = native_event(100, 1, whale(), target(), 20);
    let record = h.pipeline.process(&event).await.unwrap().expect("record");

    assert_eq!(record.provenance, Provenance::PreFilter);
    assert_eq!(record.verdict(), "safe");
    assert!(record.is_safe());
    assert_eq!(llm.call_count(), 0, "clean contracts skip the LLM");
    assert_eq!(h.store.scan_count().unwrap(), 1);
    assert_eq!(h.store.counters().unwrap().whales, 1);

    let messages = h.sender.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("WHALE"));

    let ledger = h.drain().await;
    let scans = ledger.log_scans.lock().unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].0, target());
    assert!(scans[0].2);
}

#[tokio::test]
async fn test_below_threshold_is_silent() {
    let h = Harness::new(FixedPreFilter::default(), vec![], THRESHOLD);

    // 1 BNB = $600
    let event = native_event(100, 1, whale(), target(), 1);
    assert!(h.pipeline.process(&event).await.unwrap().is_none());

    assert_eq!(h.store.scan_count().unwrap(), 0);
    assert!(h.sender.messages().is_empty());
    assert_eq!(h.prefilter.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.telemetry.get_stats().below_threshold, 1);

    let ledger = h.drain().await;
    assert!(ledger.log_scans.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_owner_threshold_change_applies() {
    let h = Harness::new(FixedPreFilter::default(), vec![], THRESHOLD);
    h.store.set_threshold(OWNER, 500.0).unwrap();

    let event = native_event(100, 1, whale(), target(), 1);
    assert!(h.pipeline.process(&event).await.unwrap().is_some());
}

#[tokio::test]
async fn test_fallback_provider_verdict_is_attributed() {
    let primary = ScriptedLlm::failing("xai");
    let secondary = ScriptedLlm::answering("groq", MALICIOUS_REPLY);
    let h = Harness::new(
        FixedPreFilter::default(),
        vec![
            primary.clone() as Arc<dyn LlmProvider>,
            secondary.clone() as Arc<dyn LlmProvider>,
        ],
        THRESHOLD,
    );

    let event = native_event(101, 2, whale(), target(), 50);
    let record = h.pipeline.process(&event).await.unwrap().unwrap();

    assert_eq!(record.provenance, Provenance::Llm("groq".to_string()));
    assert!(matches!(
        record.analysis,
        Analysis::Known {
            verdict: Verdict::Malicious,
            confidence: 88,
            ..
        }
    ));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 1);

    let stats = h.telemetry.get_stats();
    assert_eq!(stats.llm_fallbacks, 1);
    assert_eq!(h.store.counters().unwrap().threats, 1);

    // threat section rides on the whale alert
    let messages = h.sender.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("WHALE"));
    assert!(messages[0].contains("SCAM THREAT"));

    let stored = h.store.recent_scans(1).unwrap();
    assert_eq!(stored[0].provenance, Provenance::Llm("groq".to_string()));
}

#[tokio::test]
async fn test_malformed_replies_become_unknown() {
    let h = Harness::new(
        FixedPreFilter::default(),
        vec![
            ScriptedLlm::answering("xai", "I think it is probably fine") as Arc<dyn LlmProvider>,
            ScriptedLlm::answering("groq", r#"{"verdict":"maybe","confidence":50}"#)
                as Arc<dyn LlmProvider>,
        ],
        THRESHOLD,
    );

    let event = native_event(102, 3, whale(), target(), 50);
    let record = h.pipeline.process(&event).await.unwrap().unwrap();

    assert_eq!(record.verdict(), "unknown");
    assert_eq!(record.provenance, Provenance::Unavailable);
    assert!(!record.is_threat());
    assert_eq!(h.telemetry.get_stats().unknown_verdicts, 1);

    // still alerted as a whale
    let messages = h.sender.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("unknown"));
}

#[tokio::test]
async fn test_honeypot_rejected_without_llm() {
    let llm = ScriptedLlm::answering("xai", SAFE_REPLY);
    let h = Harness::new(
        FixedPreFilter::with(target(), PreFilterOutcome::Flagged(vec![ScamFlag::Honeypot])),
        vec![llm.clone() as Arc<dyn LlmProvider>],
        THRESHOLD,
    );

    let event = native_event(103, 4, whale(), target(), 50);
    let record = h.pipeline.process(&event).await.unwrap().unwrap();

    assert_eq!(llm.call_count(), 0);
    assert_eq!(record.provenance, Provenance::PreFilter);
    assert!(record.is_threat());
    assert!(!record.is_safe());
    assert!(h.sender.messages().iter().any(|m| m.contains("HONEYPOT")));
}

#[tokio::test]
async fn test_replayed_transaction_is_not_reprocessed() {
    let h = Harness::new(FixedPreFilter::default(), vec![], THRESHOLD);
    let event = native_event(104, 5, whale(), target(), 50);

    assert!(h.pipeline.process(&event).await.unwrap().is_some());
    assert!(h.pipeline.process(&event).await.unwrap().is_none());

    assert_eq!(h.store.scan_count().unwrap(), 1);
    assert_eq!(h.sender.messages().len(), 1);
    assert_eq!(h.telemetry.get_stats().duplicates, 1);

    let ledger = h.drain().await;
    assert_eq!(ledger.log_scans.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ignored_address_is_skipped() {
    let h = Harness::new(FixedPreFilter::default(), vec![], THRESHOLD);
    h.store.add_to_list(AddressList::Ignore, &whale()).unwrap();

    let event = native_event(105, 6, whale(), target(), 50);
    assert!(h.pipeline.process(&event).await.unwrap().is_none());
    assert_eq!(h.telemetry.get_stats().ignored, 1);
    assert!(h.sender.messages().is_empty());
}

#[tokio::test]
async fn test_watched_wallet_is_shielded_once() {
    let h = Harness::new(
        FixedPreFilter::with(target(), PreFilterOutcome::Clean),
        vec![],
        THRESHOLD,
    );
    h.store.add_to_list(AddressList::Watch, &target()).unwrap();

    let first = native_event(106, 7, whale(), target(), 50);
    let second = native_event(107, 8, whale(), target(), 60);
    h.pipeline.process(&first).await.unwrap().unwrap();
    h.pipeline.process(&second).await.unwrap().unwrap();

    // one alert per transaction
    let messages = h.sender.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("🎯 <b>WATCHLIST HIT</b>"));
    assert!(messages[0].contains("WHALE"));

    let shielded = h.store.get_shielded(&target()).unwrap().expect("shielded");
    assert_eq!(shielded.address, target());
    assert!(h.store.get_shielded(&whale()).unwrap().is_none());
    assert_eq!(h.store.shielded_count().unwrap(), 1);

    let ledger = h.drain().await;
    let shields = ledger.shields.lock().unwrap();
    assert_eq!(shields.len(), 1);
    assert_eq!(shields[0].0, target());
    assert_eq!(ledger.log_scans.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_primary_timeout_falls_back() {
    let primary = ScriptedLlm::stalling("xai", SAFE_REPLY, Duration::from_secs(10));
    let secondary = ScriptedLlm::answering("groq", MALICIOUS_REPLY);
    let h = Harness::with_store(
        Store::open_in_memory().unwrap(),
        FixedPreFilter::default(),
        vec![
            primary.clone() as Arc<dyn LlmProvider>,
            secondary.clone() as Arc<dyn LlmProvider>,
        ],
        THRESHOLD,
        Duration::from_millis(100),
    );

    let event = native_event(110, 11, whale(), target(), 50);
    let record = h.pipeline.process(&event).await.unwrap().unwrap();

    assert_eq!(record.provenance, Provenance::Llm("groq".to_string()));
    assert_eq!(record.verdict(), "malicious");
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 1);
    assert_eq!(h.telemetry.get_stats().llm_fallbacks, 1);
}

#[tokio::test]
async fn test_flagged_watched_threat_sends_one_alert() {
    let llm = ScriptedLlm::answering("xai", MALICIOUS_REPLY);
    let h = Harness::new(
        FixedPreFilter::with(target(), PreFilterOutcome::Flagged(vec![ScamFlag::Proxy])),
        vec![llm.clone() as Arc<dyn LlmProvider>],
        THRESHOLD,
    );
    h.store.add_to_list(AddressList::Watch, &whale()).unwrap();

    let event = native_event(111, 12, whale(), target(), 50);
    let record = h.pipeline.process(&event).await.unwrap().unwrap();
    assert_eq!(llm.call_count(), 1);
    assert!(record.is_threat());

    let messages = h.sender.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("WATCHLIST HIT"));
    assert!(messages[0].contains("WHALE"));
    assert!(messages[0].contains("SCAM THREAT"));
}

#[tokio::test]
async fn test_failed_commit_leaves_event_replayable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sentinel.db");
    let h = Harness::with_store(
        Store::open(&path).unwrap(),
        FixedPreFilter::with(target(), PreFilterOutcome::Clean),
        vec![],
        THRESHOLD,
        Duration::from_secs(2),
    );
    let side = rusqlite::Connection::open(&path).unwrap();
    side.execute_batch("DROP TABLE counters").unwrap();

    let event = native_event(112, 13, whale(), target(), 50);
    assert!(h.pipeline.process(&event).await.is_err());
    assert_eq!(h.store.scan_count().unwrap(), 0);
    assert!(h.sender.messages().is_empty());

    side.execute_batch(
        "CREATE TABLE counters (key TEXT PRIMARY KEY NOT NULL, value INTEGER NOT NULL DEFAULT 0)",
    )
    .unwrap();

    let record = h.pipeline.process(&event).await.unwrap();
    assert!(record.is_some(), "replay after a failed commit is processed");
    assert_eq!(h.store.scan_count().unwrap(), 1);
    assert_eq!(h.store.counters().unwrap().whales, 1);
    assert_eq!(h.sender.messages().len(), 1);

    let ledger = h.drain().await;
    assert_eq!(ledger.log_scans.lock().unwrap().len(), 1);
}
