//! Telegram command bot
//!
//! Long-polls `getUpdates` and answers owner commands. Parsing is a plain
//! enum so the handlers can be tested without Telegram. Mutating commands
//! are owner-only; anyone may read `/status`, `/limit`, `/check` and
//! `/history`.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::analyzer::{build_check_prompt, IntentAnalyzer};
use crate::core::attestor::Attestor;
use crate::core::guardian::GuardianService;
use crate::core::notifier::Notifier;
use crate::core::prefilter::PreFilter;
use crate::models::config::SentinelConfig;
use crate::models::errors::AppResult;
use crate::models::types::{AddressList, PreFilterOutcome};
use crate::providers::telegram::{TelegramBot, Update};
use crate::storage::db::Store;
use crate::utils::constants::{
    APP_NAME, APP_VERSION, HISTORY_LIMIT, RPC_BASE_RETRY_MS, TELEGRAM_POLL_TIMEOUT_SECS,
    WATCHER_ERROR_BACKOFF_MAX_MS,
};
use crate::utils::format::{addr_lower, escape_html, format_uptime, format_usd, short_addr};
use crate::utils::retry::Backoff;
use crate::utils::telemetry::TelemetryCollector;

const OWNER_ONLY: &str = "⛔ Owner only.";

// ============================================
// COMMANDS
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardianCommand {
    List,
    Mint(String),
    Learn(String),
    Attest(String, String),
    Usage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Limit(Option<String>),
    Check(Option<String>),
    Watch(Option<String>),
    Unwatch(Option<String>),
    Ignore(Option<String>),
    Unignore(Option<String>),
    Shield(Option<String>),
    Guardian(GuardianCommand),
    History,
    Unknown(String),
}

impl Command {
    /// `None` for plain text. `/cmd@BotName` is accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();
        let first = args.first().cloned();

        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "status" | "stats" => Self::Status,
            "limit" => Self::Limit(first),
            "check" => Self::Check(first),
            "watch" => Self::Watch(first),
            "unwatch" => Self::Unwatch(first),
            "ignore" => Self::Ignore(first),
            "unignore" => Self::Unignore(first),
            "shield" => Self::Shield(first),
            "history" => Self::History,
            "guardian" => Self::Guardian(match args.first().map(|s| s.to_ascii_lowercase()).as_deref() {
                None | Some("list") => GuardianCommand::List,
                Some("mint") if args.len() >= 2 => GuardianCommand::Mint(args[1..].join(" ")),
                Some("learn") if args.len() == 2 => GuardianCommand::Learn(args[1].clone()),
                Some("attest") if args.len() == 3 => {
                    GuardianCommand::Attest(args[1].clone(), args[2].clone())
                }
                _ => GuardianCommand::Usage,
            }),
            other => Self::Unknown(other.to_string()),
        })
    }

    fn mutates(&self) -> bool {
        match self {
            Self::Limit(arg) => arg.is_some(),
            Self::Watch(_)
            | Self::Unwatch(_)
            | Self::Ignore(_)
            | Self::Unignore(_)
            | Self::Shield(_)
            | Self::Guardian(_) => true,
            _ => false,
        }
    }
}

/// `$50,000` / `50000` / `50k` → 50000.0
pub fn parse_usd(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(d) = lower.strip_suffix('k') {
        (d, 1_000.0)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1_000_000.0)
    } else {
        (lower.as_str(), 1.0)
    };
    digits
        .parse::<f64>()
        .ok()
        .map(|v| v * multiplier)
        .filter(|v| v.is_finite())
}

fn parse_address_arg(arg: Option<&String>) -> Result<Address, String> {
    let raw = arg.ok_or_else(|| "Missing address.".to_string())?;
    Address::from_str(raw.trim()).map_err(|_| format!("Not an address: <code>{}</code>", escape_html(raw)))
}

// ============================================
// UPDATE SOURCE
// ============================================

#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn updates(&self, offset: i64) -> AppResult<Vec<Update>>;
}

#[async_trait]
impl UpdateSource for TelegramBot {
    async fn updates(&self, offset: i64) -> AppResult<Vec<Update>> {
        self.get_updates(offset, TELEGRAM_POLL_TIMEOUT_SECS).await
    }
}

// ============================================
// BOT
// ============================================

pub struct CommandBot {
    pub config: Arc<SentinelConfig>,
    pub store: Arc<Store>,
    pub telemetry: Arc<TelemetryCollector>,
    pub prefilter: Arc<dyn PreFilter>,
    pub analyzer: Arc<IntentAnalyzer>,
    pub attestor: Attestor,
    pub guardian: Arc<GuardianService>,
    pub notifier: Arc<Notifier>,
    pub started: Instant,
}

impl CommandBot {
    /// Poll until shutdown
    pub async fn run(self: Arc<Self>, source: Arc<dyn UpdateSource>, mut shutdown: watch::Receiver<bool>) {
        info!("🤖 Command bot listening");
        let backoff = Backoff::new(RPC_BASE_RETRY_MS, WATCHER_ERROR_BACKOFF_MAX_MS, u32::MAX);
        let mut offset = 0i64;
        let mut failures = 0u32;

        loop {
            let batch = tokio::select! {
                batch = source.updates(offset) => batch,
                _ = shutdown.changed() => break,
            };

            match batch {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.dispatch(update).await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff.delay(failures);
                    warn!("📭 getUpdates failed ({}), retry in {:?}", e, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        info!("🤖 Command bot stopped");
    }

    async fn dispatch(&self, update: Update) {
        let Some(message) = update.message else { return };
        let (Some(user), Some(text)) = (message.from, message.text) else {
            return;
        };
        let Some(command) = Command::parse(&text) else {
            return;
        };
        debug!("💬 {:?} from {}", command, user.id);
        let reply = self.handle(user.id, command).await;
        self.notifier.reply(message.chat.id, &reply).await;
    }

    /// Reply HTML for one command
    pub async fn handle(&self, user_id: i64, command: Command) -> String {
        let is_owner = self.config.is_owner(user_id);
        if command.mutates() && !is_owner {
            return OWNER_ONLY.to_string();
        }

        let result = match command {
            Command::Start | Command::Help => self.help(user_id, is_owner),
            Command::Status => self.status(),
            Command::Limit(arg) => self.limit(arg),
            Command::Check(arg) => self.check(arg).await,
            Command::Watch(arg) => self.list_edit(AddressList::Watch, true, arg),
            Command::Unwatch(arg) => self.list_edit(AddressList::Watch, false, arg),
            Command::Ignore(arg) => self.list_edit(AddressList::Ignore, true, arg),
            Command::Unignore(arg) => self.list_edit(AddressList::Ignore, false, arg),
            Command::Shield(arg) => self.shield(arg),
            Command::Guardian(sub) => self.guardian(sub).await,
            Command::History => self.history(),
            Command::Unknown(name) => Ok(format!(
                "Unknown command /{}. Try /help.",
                escape_html(&name)
            )),
        };

        result.unwrap_or_else(|e| {
            warn!("⚠️ Command failed: {}", e);
            format!("❌ {}", escape_html(&e.to_string()))
        })
    }

    fn help(&self, user_id: i64, is_owner: bool) -> AppResult<String> {
        self.store
            .upsert_user(user_id, self.config.alert_limit_default_usd, is_owner)?;
        let mut text = format!(
            "🛡️ <b>{}</b> v{}\nWatching {} for whale transactions.\n\n\
             /status - counters and cursor\n\
             /limit - whale threshold\n\
             /check &lt;address&gt; - scan a contract\n\
             /history - latest scans",
            APP_NAME,
            APP_VERSION,
            escape_html(&self.config.chain.name)
        );
        if is_owner {
            text.push_str(
                "\n\n<b>Owner</b>\n\
                 /limit &lt;usd&gt;\n\
                 /watch, /unwatch &lt;address&gt;\n\
                 /ignore, /unignore &lt;address&gt;\n\
                 /shield &lt;address&gt;\n\
                 /guardian [mint &lt;name&gt; | learn &lt;id&gt; | attest &lt;id&gt; &lt;wallet&gt;]",
            );
        }
        Ok(text)
    }

    fn status(&self) -> AppResult<String> {
        let counters = self.store.counters()?;
        let cursor = self
            .store
            .cursor()?
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        let threshold = self.current_threshold()?;
        let (ok, failed) = self.store.attestation_counts()?;
        let stats = self.telemetry.get_stats();

        Ok(format!(
            "📊 <b>Status</b>\n\
             ⏱️ Uptime: {}\n\
             🧱 Cursor: {}\n\
             🔢 Blocks: {}\n\
             🐳 Whales: {}\n\
             🚨 Threats: {}\n\
             💵 Threshold: ${}\n\
             🎯 Watching: {} · 🙈 Ignoring: {}\n\
             🛡️ Shielded: {} ({} on-chain)\n\
             ⛓️ Attestations: {} ok / {} failed{}\n\
             🧠 LLM: {}",
            format_uptime(self.started.elapsed().as_secs()),
            cursor,
            counters.blocks,
            counters.whales,
            counters.threats,
            format_usd(threshold),
            self.store.list(AddressList::Watch)?.len(),
            self.store.list(AddressList::Ignore)?.len(),
            self.store.shielded_count()?,
            self.store.shielded_onchain_count()?,
            ok,
            failed,
            if self.attestor.is_enabled() { "" } else { " (disabled)" },
            if stats.analyzed == 0 {
                self.analyzer.provider_names().join(" → ")
            } else {
                format!(
                    "{} · {} fallback(s)",
                    self.analyzer.provider_names().join(" → "),
                    stats.llm_fallbacks
                )
            },
        ))
    }

    fn current_threshold(&self) -> AppResult<f64> {
        self.store
            .owner_threshold(self.config.owner_id, self.config.alert_limit_default_usd)
    }

    fn limit(&self, arg: Option<String>) -> AppResult<String> {
        let Some(raw) = arg else {
            return Ok(format!(
                "💵 Whale threshold: <b>${}</b>",
                format_usd(self.current_threshold()?)
            ));
        };
        let Some(value) = parse_usd(&raw).filter(|v| self.config.threshold_in_bounds(*v)) else {
            return Ok(format!(
                "Threshold must be between ${} and ${}.",
                format_usd(self.config.alert_limit_min_usd),
                format_usd(self.config.alert_limit_max_usd)
            ));
        };
        // One threshold per deployment, stored on the primary owner's row
        self.store.set_threshold(self.config.owner_id, value)?;
        info!("💵 Whale threshold set to ${}", format_usd(value));
        Ok(format!("✅ Whale threshold set to <b>${}</b>", format_usd(value)))
    }

    async fn check(&self, arg: Option<String>) -> AppResult<String> {
        let address = match parse_address_arg(arg.as_ref()) {
            Ok(a) => a,
            Err(msg) => return Ok(format!("{}\nUsage: /check &lt;address&gt;", msg)),
        };
        let outcome = self.prefilter.check(&address).await;
        let scanner = match &outcome {
            PreFilterOutcome::Clean => "✅ No flags".to_string(),
            PreFilterOutcome::Flagged(flags) => flags
                .iter()
                .map(|f| f.label())
                .collect::<Vec<_>>()
                .join("\n"),
            PreFilterOutcome::NoData => "❔ No data (EOA or unindexed)".to_string(),
            PreFilterOutcome::Unavailable(_) => "⚠️ Scanner unavailable".to_string(),
        };

        let prompt = build_check_prompt(&addr_lower(&address), &outcome);
        let ai = match self.analyzer.ask(&prompt).await {
            Ok((provider, text)) => format!("🧠 <i>{}</i>\n{}", escape_html(&provider), escape_html(&text)),
            Err(_) => "🧠 AI explanation unavailable".to_string(),
        };

        Ok(format!(
            "🔎 <b>Check</b> <code>{}</code>\n\n{}\n\n{}",
            addr_lower(&address),
            scanner,
            ai
        ))
    }

    fn list_edit(&self, list: AddressList, add: bool, arg: Option<String>) -> AppResult<String> {
        let address = match parse_address_arg(arg.as_ref()) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let changed = if add {
            self.store.add_to_list(list, &address)?
        } else {
            self.store.remove_from_list(list, &address)?
        };
        let verb = match (add, changed) {
            (true, true) => "added to",
            (true, false) => "already on",
            (false, true) => "removed from",
            (false, false) => "not on",
        };
        Ok(format!(
            "<code>{}</code> {} the {} list",
            addr_lower(&address),
            verb,
            list.as_str()
        ))
    }

    fn shield(&self, arg: Option<String>) -> AppResult<String> {
        let wallet = match parse_address_arg(arg.as_ref()) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let score = 100 - self.guardian.risk_score_for(&wallet)?;
        if self.attestor.shield(wallet, score)? {
            Ok(format!(
                "🛡️ <code>{}</code> shielded (score {}){}",
                addr_lower(&wallet),
                score,
                if self.attestor.is_enabled() { ", attestation queued" } else { "" }
            ))
        } else {
            let onchain = self
                .store
                .get_shielded(&wallet)?
                .is_some_and(|w| w.is_onchain());
            Ok(format!(
                "🛡️ <code>{}</code> already shielded, score updated to {}{}",
                addr_lower(&wallet),
                score,
                match (onchain, self.attestor.is_enabled()) {
                    (true, _) => "",
                    (false, true) => ", on-chain shield resubmitted",
                    (false, false) => " (local only)",
                }
            ))
        }
    }

    async fn guardian(&self, sub: GuardianCommand) -> AppResult<String> {
        match sub {
            GuardianCommand::List => {
                let tokens = self.guardian.list()?;
                if tokens.is_empty() {
                    return Ok("🦾 No Guardians yet. /guardian mint &lt;name&gt;".to_string());
                }
                let lines: Vec<String> = tokens
                    .iter()
                    .map(|t| {
                        format!(
                            "#{} <b>{}</b> · {} scans · ${} protected",
                            t.token_id,
                            escape_html(&t.name),
                            t.scan_count,
                            t.protected_amount
                        )
                    })
                    .collect();
                Ok(format!("🦾 <b>Guardians</b>\n{}", lines.join("\n")))
            }
            GuardianCommand::Mint(name) => {
                let token = self.guardian.mint(&name).await?;
                Ok(format!(
                    "🦾 Guardian #{} <b>{}</b> minted",
                    token.token_id,
                    escape_html(&token.name)
                ))
            }
            GuardianCommand::Learn(id) => {
                let Ok(token_id) = U256::from_str(id.trim()) else {
                    return Ok(format!("Not a token id: {}", escape_html(&id)));
                };
                let token = self.guardian.learn(token_id).await?;
                Ok(format!(
                    "🧬 Guardian #{} learned {} scan(s)\nRoot <code>{:#x}</code>\nProtected ${}",
                    token.token_id, token.scan_count, token.learning_root, token.protected_amount
                ))
            }
            GuardianCommand::Attest(id, wallet) => {
                let Ok(token_id) = U256::from_str(id.trim()) else {
                    return Ok(format!("Not a token id: {}", escape_html(&id)));
                };
                let wallet = match parse_address_arg(Some(&wallet)) {
                    Ok(a) => a,
                    Err(msg) => return Ok(msg),
                };
                let (tx, risk) = self.guardian.attest(token_id, wallet).await?;
                Ok(format!(
                    "🛡️ Guardian #{} attests <code>{}</code> (risk {})\nTx <code>{:#x}</code>",
                    token_id,
                    short_addr(&wallet),
                    risk,
                    tx
                ))
            }
            GuardianCommand::Usage => Ok(
                "Usage: /guardian [list | mint &lt;name&gt; | learn &lt;id&gt; | attest &lt;id&gt; &lt;wallet&gt;]"
                    .to_string(),
            ),
        }
    }

    fn history(&self) -> AppResult<String> {
        let records = self.store.recent_scans(HISTORY_LIMIT)?;
        if records.is_empty() {
            return Ok("📜 No scans yet.".to_string());
        }
        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                format!(
                    "#{} <code>{}</code> ${} · {} ({}) · {}",
                    r.block_number,
                    short_addr(&r.contract_address),
                    format_usd(r.value_usd),
                    r.verdict(),
                    r.vibe_score(),
                    escape_html(&r.provenance.to_string())
                )
            })
            .collect();
        Ok(format!("📜 <b>Latest scans</b>\n{}", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/stats@VibeGuardBot"), Some(Command::Status));
        assert_eq!(
            Command::parse("/limit 50k"),
            Some(Command::Limit(Some("50k".into())))
        );
        assert_eq!(Command::parse("/limit"), Some(Command::Limit(None)));
        assert_eq!(
            Command::parse("/guardian mint Night Watch"),
            Some(Command::Guardian(GuardianCommand::Mint("Night Watch".into())))
        );
        assert_eq!(
            Command::parse("/guardian attest 3 0xabc"),
            Some(Command::Guardian(GuardianCommand::Attest("3".into(), "0xabc".into())))
        );
        assert_eq!(
            Command::parse("/guardian learn"),
            Some(Command::Guardian(GuardianCommand::Usage))
        );
        assert_eq!(Command::parse("/nope"), Some(Command::Unknown("nope".into())));
    }

    #[test]
    fn test_mutating_commands() {
        assert!(Command::Limit(Some("1".into())).mutates());
        assert!(!Command::Limit(None).mutates());
        assert!(Command::Guardian(GuardianCommand::List).mutates());
        assert!(!Command::History.mutates());
        assert!(!Command::Check(None).mutates());
    }

    #[test]
    fn test_parse_usd() {
        assert_eq!(parse_usd("$50,000"), Some(50_000.0));
        assert_eq!(parse_usd("25k"), Some(25_000.0));
        assert_eq!(parse_usd("1.5M"), Some(1_500_000.0));
        assert_eq!(parse_usd("lots"), None);
        assert_eq!(parse_usd("inf"), None);
    }
}
