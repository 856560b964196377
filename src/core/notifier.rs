//! Notifier Stage
//!
//! Renders the HTML alerts and fans them out to the owner chats. Every
//! interpolated value is escaped. Delivery failures are logged and counted,
//! never returned: a dead Telegram must not stall the block loop.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::types::{Analysis, ScanRecord, TransferKind, TxEvent};
use crate::providers::telegram::MessageSender;
use crate::utils::format::{addr_lower, escape_html, format_usd};
use crate::utils::telemetry::TelemetryCollector;

/// Delivery tally for one notification round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

pub struct Notifier {
    sender: Arc<dyn MessageSender>,
    chats: Vec<i64>,
    telemetry: Arc<TelemetryCollector>,
    native_symbol: String,
}

impl Notifier {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        chats: Vec<i64>,
        telemetry: Arc<TelemetryCollector>,
        native_symbol: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            chats,
            telemetry,
            native_symbol: native_symbol.into(),
        }
    }

    /// Send one message to every owner chat
    pub async fn broadcast(&self, html: &str) -> Delivery {
        let mut delivery = Delivery::default();
        for chat in &self.chats {
            match self.sender.send_message(*chat, html).await {
                Ok(()) => {
                    delivery.sent += 1;
                    self.telemetry.record_alert(true);
                }
                Err(e) => {
                    delivery.failed += 1;
                    self.telemetry.record_alert(false);
                    warn!("📪 Alert to {} failed: {}", chat, e);
                }
            }
        }
        delivery
    }

    /// Send one message to a single chat (bot replies)
    pub async fn reply(&self, chat_id: i64, html: &str) -> bool {
        match self.sender.send_message(chat_id, html).await {
            Ok(()) => true,
            Err(e) => {
                warn!("📪 Reply to {} failed: {}", chat_id, e);
                false
            }
        }
    }

    /// One alert per transaction: whale details, with the watchlist banner
    /// and threat section folded in when they apply. Nothing is sent below
    /// `threshold_usd`.
    pub async fn notify_scan(
        &self,
        event: &TxEvent,
        record: &ScanRecord,
        threshold_usd: f64,
        watch_hit: bool,
    ) -> Delivery {
        if record.value_usd < threshold_usd {
            debug!(
                "🔕 ${} below alert threshold ${}",
                format_usd(record.value_usd),
                format_usd(threshold_usd)
            );
            return Delivery::default();
        }

        let html = render_alert(event, record, &self.native_symbol, watch_hit);
        self.broadcast(&html).await
    }
}

// ============================================
// TEMPLATES
// ============================================

pub fn render_alert(
    event: &TxEvent,
    record: &ScanRecord,
    native_symbol: &str,
    watch_hit: bool,
) -> String {
    let mut out = String::new();
    if watch_hit {
        out.push_str("🎯 <b>WATCHLIST HIT</b>\n\n");
    }
    out.push_str(&render_whale(event, record, native_symbol));
    if record.is_threat() {
        out.push_str("\n\n");
        out.push_str(&render_threat(record));
    }
    out
}

pub fn render_whale(event: &TxEvent, record: &ScanRecord, native_symbol: &str) -> String {
    let mut out = match event.kind {
        TransferKind::Native => format!(
            "🐳 <b>WHALE — {sym}</b>\n💰 <b>{amount:.4} {sym}</b> (≈ ${usd})\n",
            sym = escape_html(native_symbol),
            amount = event.amount_units(),
            usd = format_usd(record.value_usd),
        ),
        TransferKind::Erc20 { token, .. } => format!(
            "🐋 <b>WHALE — TOKEN</b>\n💰 <b>{amount:.2} tokens</b> (≈ ${usd})\nToken: <code>{token}</code>\n",
            amount = event.amount_units(),
            usd = format_usd(record.value_usd),
            token = escape_html(&addr_lower(&token)),
        ),
    };
    out.push_str(&format!(
        "From: <code>{}</code>\nTo:   <code>{}</code>\n\n",
        escape_html(&addr_lower(&event.from)),
        escape_html(&addr_lower(&event.to)),
    ));

    match &record.analysis {
        Analysis::Known {
            verdict,
            confidence,
            summary,
            ..
        } => {
            out.push_str(&format!(
                "{} <b>Verdict:</b> {} ({}%) · {}\n",
                verdict.emoji(),
                verdict.as_str(),
                confidence,
                escape_html(&record.provenance.to_string()),
            ));
            if !summary.is_empty() {
                out.push_str(&format!("🧠 {}\n", escape_html(summary)));
            }
        }
        Analysis::Unknown { .. } => {
            out.push_str("❔ <b>Verdict:</b> unknown (analysis unavailable)\n");
        }
    }

    let risks = record.risk_factors();
    if !risks.is_empty() {
        out.push_str(&format!("⚠️ Risks: {}\n", escape_html(&risks.join(", "))));
    }
    out.push_str(&format!("🛡️ Vibe score: {}/100\n", record.vibe_score()));
    out.push_str(&format!("🔗 <code>{:#x}</code>", record.tx_hash));
    out
}

pub fn render_threat(record: &ScanRecord) -> String {
    let labels: Vec<&str> = record.prefilter.flags().iter().map(|f| f.label()).collect();
    let risks = if labels.is_empty() {
        record.analysis.risk_factors().join(", ")
    } else {
        labels.join(", ")
    };
    format!(
        "🚨 <b>SCAM THREAT</b>\n<code>{}</code>\nVerdict: {}\nRisks: {}\nVibe score: {}/100",
        escape_html(&addr_lower(&record.contract_address)),
        record.verdict(),
        escape_html(if risks.is_empty() { "-" } else { &risks }),
        record.vibe_score(),
    )
}
