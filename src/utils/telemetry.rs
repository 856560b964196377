//! Pipeline telemetry
//!
//! Lock-free counters for every pipeline stage plus a small buffer of threat
//! events. Backs /status, /v1/stats and the shutdown report.
//!
//! No wallet addresses or transaction hashes are kept here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// One detected threat (anonymized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub timestamp: u64,
    pub verdict: String,
    /// USD rounded to the nearest 100
    pub value_usd: f64,
    pub flags: Vec<String>,
    pub latency_ms: u64,
}

impl ThreatEvent {
    pub fn new(verdict: &str, value_usd: f64, flags: Vec<String>, latency_ms: u64) -> Self {
        Self {
            timestamp: current_timestamp(),
            verdict: verdict.to_string(),
            value_usd: (value_usd / 100.0).round() * 100.0,
            flags,
            latency_ms,
        }
    }
}

/// Snapshot of all counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryStats {
    pub blocks_scanned: u64,
    pub txs_seen: u64,
    pub below_threshold: u64,
    pub ignored: u64,
    pub duplicates: u64,
    pub analyzed: u64,
    pub threats: u64,
    pub unknown_verdicts: u64,
    pub llm_fallbacks: u64,
    pub prefilter_unavailable: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub attestations_ok: u64,
    pub attestations_failed: u64,
    pub attestations_dropped: u64,
    pub wallets_shielded: u64,
    pub rpc_errors: u64,
    /// Records per provenance ("prefilter", "llm:xai", ...)
    pub verdicts_by_source: HashMap<String, u64>,
    pub avg_analysis_ms: f64,
    pub period_start: u64,
    pub period_end: u64,
}

impl TelemetryStats {
    pub fn uptime_secs(&self) -> u64 {
        self.period_end.saturating_sub(self.period_start)
    }

    /// Box report printed on shutdown
    pub fn summary_report(&self) -> String {
        let hours = self.uptime_secs() as f64 / 3600.0;
        format!(
            r#"
╔══════════════════════════════════════════════════════════════╗
║              🛡️ VIBEGUARD SENTINEL - SESSION REPORT          ║
╠══════════════════════════════════════════════════════════════╣
║   ⏱️ Uptime:               {:>10.1} h                        ║
║   🧱 Blocks scanned:       {:>10}                            ║
║   🔍 Transactions seen:    {:>10}                            ║
║   🐳 Analyzed (whales):    {:>10}                            ║
║   🚨 Threats:              {:>10}                            ║
║   ❓ Unknown verdicts:     {:>10}                            ║
║   🔄 LLM fallbacks:        {:>10}                            ║
║   📨 Alerts sent:          {:>10}                            ║
║   📝 Attestations ok:      {:>10}                            ║
║   🛡️ Wallets shielded:     {:>10}                            ║
║   ⚡ Avg analysis:         {:>10.1} ms                       ║
╚══════════════════════════════════════════════════════════════╝
"#,
            hours,
            self.blocks_scanned,
            self.txs_seen,
            self.analyzed,
            self.threats,
            self.unknown_verdicts,
            self.llm_fallbacks,
            self.alerts_sent,
            self.attestations_ok,
            self.wallets_shielded,
            self.avg_analysis_ms,
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{:.2}\n",
            self.period_start,
            self.period_end,
            self.blocks_scanned,
            self.analyzed,
            self.threats,
            self.unknown_verdicts,
            self.alerts_sent,
            self.attestations_ok,
            self.avg_analysis_ms,
        )
    }
}

/// Stage counters, shared through `Arc`
pub struct TelemetryCollector {
    blocks_scanned: AtomicU64,
    txs_seen: AtomicU64,
    below_threshold: AtomicU64,
    ignored: AtomicU64,
    duplicates: AtomicU64,
    analyzed: AtomicU64,
    threats: AtomicU64,
    unknown_verdicts: AtomicU64,
    llm_fallbacks: AtomicU64,
    prefilter_unavailable: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
    attestations_ok: AtomicU64,
    attestations_failed: AtomicU64,
    attestations_dropped: AtomicU64,
    wallets_shielded: AtomicU64,
    rpc_errors: AtomicU64,
    total_analysis_ms: AtomicU64,
    verdicts_by_source: RwLock<HashMap<String, u64>>,
    threat_events: RwLock<Vec<ThreatEvent>>,
    session_start: u64,
    export_dir: PathBuf,
    max_buffer_size: usize,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::with_config(PathBuf::from("./telemetry"), 500)
    }

    pub fn with_config(export_dir: PathBuf, max_buffer_size: usize) -> Self {
        Self {
            blocks_scanned: AtomicU64::new(0),
            txs_seen: AtomicU64::new(0),
            below_threshold: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            analyzed: AtomicU64::new(0),
            threats: AtomicU64::new(0),
            unknown_verdicts: AtomicU64::new(0),
            llm_fallbacks: AtomicU64::new(0),
            prefilter_unavailable: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            attestations_ok: AtomicU64::new(0),
            attestations_failed: AtomicU64::new(0),
            attestations_dropped: AtomicU64::new(0),
            wallets_shielded: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
            total_analysis_ms: AtomicU64::new(0),
            verdicts_by_source: RwLock::new(HashMap::new()),
            threat_events: RwLock::new(Vec::with_capacity(max_buffer_size)),
            session_start: current_timestamp(),
            export_dir,
            max_buffer_size,
        }
    }

    // ============================================
    // Recorders
    // ============================================

    pub fn record_blocks(&self, n: u64) {
        self.blocks_scanned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_tx_seen(&self) {
        self.txs_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_below_threshold(&self) {
        self.below_threshold.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefilter_unavailable(&self) {
        self.prefilter_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_llm_fallback(&self) {
        self.llm_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished analysis and the stage that produced it
    pub fn record_analysis(&self, provenance: &str, known: bool, latency_ms: u64) {
        self.analyzed.fetch_add(1, Ordering::Relaxed);
        self.total_analysis_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if !known {
            self.unknown_verdicts.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut by_source) = self.verdicts_by_source.write() {
            *by_source.entry(provenance.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_threat(&self, event: ThreatEvent) {
        self.threats.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut events) = self.threat_events.write() {
            events.push(event);
            if events.len() >= self.max_buffer_size {
                let to_flush = std::mem::take(&mut *events);
                drop(events);
                let _ = self.flush_events(&to_flush);
            }
        }
    }

    pub fn record_alert(&self, delivered: bool) {
        if delivered {
            self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alerts_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_attestation(&self, ok: bool) {
        if ok {
            self.attestations_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.attestations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_attestation_dropped(&self) {
        self.attestations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shield(&self) {
        self.wallets_shielded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    // ============================================
    // Readers / export
    // ============================================

    pub fn get_stats(&self) -> TelemetryStats {
        let analyzed = self.analyzed.load(Ordering::Relaxed);
        let total_ms = self.total_analysis_ms.load(Ordering::Relaxed);

        TelemetryStats {
            blocks_scanned: self.blocks_scanned.load(Ordering::Relaxed),
            txs_seen: self.txs_seen.load(Ordering::Relaxed),
            below_threshold: self.below_threshold.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            analyzed,
            threats: self.threats.load(Ordering::Relaxed),
            unknown_verdicts: self.unknown_verdicts.load(Ordering::Relaxed),
            llm_fallbacks: self.llm_fallbacks.load(Ordering::Relaxed),
            prefilter_unavailable: self.prefilter_unavailable.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            attestations_ok: self.attestations_ok.load(Ordering::Relaxed),
            attestations_failed: self.attestations_failed.load(Ordering::Relaxed),
            attestations_dropped: self.attestations_dropped.load(Ordering::Relaxed),
            wallets_shielded: self.wallets_shielded.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            verdicts_by_source: self
                .verdicts_by_source
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
            avg_analysis_ms: if analyzed > 0 {
                total_ms as f64 / analyzed as f64
            } else {
                0.0
            },
            period_start: self.session_start,
            period_end: current_timestamp(),
        }
    }

    /// Threat events still in memory
    pub fn recent_threats(&self) -> Vec<ThreatEvent> {
        self.threat_events.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn export_stats_json(&self) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.export_dir)?;
        let stats = self.get_stats();
        let path = self
            .export_dir
            .join(format!("stats_{}.json", current_timestamp()));
        fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
        Ok(path)
    }

    /// Append one row to the session history CSV
    pub fn export_stats_csv(&self) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.export_dir)?;
        let path = self.export_dir.join("sessions.csv");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(
                file,
                "period_start,period_end,blocks,analyzed,threats,unknown,alerts,attestations,avg_analysis_ms"
            )?;
        }
        write!(file, "{}", self.get_stats().to_csv_row())?;
        Ok(path)
    }

    /// Flush buffered threat events (also called on shutdown)
    pub fn flush(&self) -> Result<(), std::io::Error> {
        let events = match self.threat_events.write() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => return Ok(()),
        };
        self.flush_events(&events)
    }

    fn flush_events(&self, events: &[ThreatEvent]) -> Result<(), std::io::Error> {
        if events.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.export_dir)?;
        let path = self
            .export_dir
            .join(format!("threats_{}.jsonl", current_timestamp()));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for event in events {
            if let Ok(json) = serde_json::to_string(event) {
                writeln!(file, "{}", json)?;
            }
        }
        Ok(())
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_event_rounding() {
        let event = ThreatEvent::new("malicious", 12_345.0, vec!["honeypot".into()], 40);
        assert_eq!(event.value_usd, 12_300.0);
        assert_eq!(event.verdict, "malicious");
    }

    #[test]
    fn test_collector_counts() {
        let collector = TelemetryCollector::new();
        collector.record_blocks(3);
        collector.record_analysis("llm:xai", true, 100);
        collector.record_analysis("llm:groq", true, 300);
        collector.record_analysis("unavailable", false, 200);
        collector.record_llm_fallback();
        collector.record_threat(ThreatEvent::new("suspicious", 20_000.0, vec![], 10));

        let stats = collector.get_stats();
        assert_eq!(stats.blocks_scanned, 3);
        assert_eq!(stats.analyzed, 3);
        assert_eq!(stats.unknown_verdicts, 1);
        assert_eq!(stats.threats, 1);
        assert_eq!(stats.verdicts_by_source.get("llm:groq"), Some(&1));
        assert!((stats.avg_analysis_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(collector.recent_threats().len(), 1);
    }

    #[test]
    fn test_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let collector = TelemetryCollector::with_config(dir.path().to_path_buf(), 10);
        collector.record_blocks(1);
        let json = collector.export_stats_json().unwrap();
        assert!(std::fs::read_to_string(json).unwrap().contains("blocks_scanned"));
        let csv = collector.export_stats_csv().unwrap();
        let content = std::fs::read_to_string(csv).unwrap();
        assert!(content.starts_with("period_start"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_summary_report() {
        let stats = TelemetryStats {
            blocks_scanned: 1200,
            analyzed: 7,
            ..Default::default()
        };
        let report = stats.summary_report();
        assert!(report.contains("1200"));
        assert!(report.contains("SESSION REPORT"));
    }
}
