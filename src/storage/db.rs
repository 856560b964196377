//! SQLite store
//!
//! One connection behind a mutex; every call is short and synchronous. The
//! schema is created on open and WAL mode lets the status API read while the
//! pipeline writes.
//!
//! Addresses and hashes are stored as lowercase 0x hex, timestamps as unix
//! milliseconds.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{
    AddressList, Analysis, Counters, GuardianToken, PreFilterOutcome, Provenance, ScanRecord,
    ShieldedWallet, UserPreference,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_block INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_number INTEGER NOT NULL,
    tx_hash TEXT NOT NULL,
    contract_address TEXT NOT NULL,
    sender TEXT NOT NULL,
    value_usd REAL NOT NULL,
    verdict TEXT NOT NULL,
    confidence INTEGER NOT NULL,
    risk_factors TEXT NOT NULL,
    vibe_score INTEGER NOT NULL,
    is_threat INTEGER NOT NULL,
    analysis TEXT NOT NULL,
    prefilter TEXT NOT NULL,
    provenance TEXT NOT NULL,
    digest TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    UNIQUE (block_number, tx_hash)
);
CREATE INDEX IF NOT EXISTS idx_scan_records_contract ON scan_records(contract_address);
CREATE INDEX IF NOT EXISTS idx_scan_records_sender ON scan_records(sender);

CREATE TABLE IF NOT EXISTS shielded_wallets (
    address TEXT PRIMARY KEY NOT NULL,
    vibe_score INTEGER NOT NULL,
    shielded_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    scan_count INTEGER NOT NULL DEFAULT 1,
    onchain_tx TEXT
);

CREATE TABLE IF NOT EXISTS user_preferences (
    telegram_user_id INTEGER PRIMARY KEY NOT NULL,
    alert_threshold_usd REAL NOT NULL,
    is_owner INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS address_lists (
    address TEXT NOT NULL,
    list TEXT NOT NULL,
    added_at_ms INTEGER NOT NULL,
    PRIMARY KEY (address, list)
);

CREATE TABLE IF NOT EXISTS counters (
    key TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS guardian_tokens (
    token_id TEXT PRIMARY KEY NOT NULL,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    learning_root TEXT NOT NULL,
    protected_amount TEXT NOT NULL,
    scan_count INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attestations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    target TEXT NOT NULL,
    tx_hash TEXT,
    status TEXT NOT NULL,
    error TEXT,
    created_at_ms INTEGER NOT NULL
);
"#;

/// Counter keys
pub const COUNTER_BLOCKS: &str = "blocks";
pub const COUNTER_WHALES: &str = "whales";
pub const COUNTER_THREATS: &str = "threats";

/// SQLite-backed persistence for the whole sentinel
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!("🗄️ Store ready at {}", path.as_ref().display());
        Ok(store)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            // databases created before shields were confirmed on-chain
            let has_onchain_tx = conn
                .prepare("SELECT 1 FROM pragma_table_info('shielded_wallets') WHERE name = 'onchain_tx'")?
                .exists([])?;
            if !has_onchain_tx {
                conn.execute_batch("ALTER TABLE shielded_wallets ADD COLUMN onchain_tx TEXT")?;
            }
            // In-memory databases refuse WAL; that is fine.
            let _ = conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            );
            Ok(())
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> AppResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::new(ErrorCode::DbPoisoned, "store mutex poisoned"))?;
        f(&conn).map_err(AppError::from)
    }

    // ============================================
    // BLOCK CURSOR
    // ============================================

    /// Last fully processed block, if any
    pub fn cursor(&self) -> AppResult<Option<u64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT last_block FROM cursor WHERE id = 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()
            .map(|v| v.map(|b| b as u64))
        })
    }

    /// Move the cursor forward. Returns false when `block` is not ahead.
    pub fn advance_cursor(&self, block: u64) -> AppResult<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cursor (id, last_block) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET last_block = excluded.last_block
                 WHERE cursor.last_block < excluded.last_block",
                params![block as i64],
            )
        })?;
        if changed > 0 {
            debug!("📍 Cursor → {}", block);
        }
        Ok(changed > 0)
    }

    // ============================================
    // SCAN RECORDS
    // ============================================

    /// Persist a record. Returns false when (block, tx) already exists.
    pub fn insert_scan(&self, record: &ScanRecord) -> AppResult<bool> {
        let encoded = EncodedScan::new(record)?;
        let inserted = self.with_conn(|conn| insert_scan_row(conn, record, &encoded))?;
        Ok(inserted > 0)
    }

    /// Insert a record and bump the whale (and threat) counters atomically.
    /// Returns false, with nothing written, when (block, tx) already exists.
    pub fn commit_scan(&self, record: &ScanRecord) -> AppResult<bool> {
        let encoded = EncodedScan::new(record)?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if insert_scan_row(&tx, record, &encoded)? == 0 {
                return Ok(false);
            }
            bump_counter_row(&tx, COUNTER_WHALES, 1)?;
            if record.is_threat() {
                bump_counter_row(&tx, COUNTER_THREATS, 1)?;
            }
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn has_scan(&self, block_number: u64, tx_hash: &B256) -> AppResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM scan_records WHERE block_number = ?1 AND tx_hash = ?2",
                params![block_number as i64, hex_b256(tx_hash)],
                |_| Ok(()),
            )
            .optional()
            .map(|hit| hit.is_some())
        })
    }

    /// Newest first
    pub fn recent_scans(&self, limit: usize) -> AppResult<Vec<ScanRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT block_number, tx_hash, contract_address, sender, value_usd,
                        analysis, prefilter, provenance, created_at_ms
                 FROM scan_records ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], scan_from_row)?;
            rows.collect()
        })
    }

    /// Records touching `address` as sender or contract, newest first
    pub fn scans_for_address(&self, address: &Address, limit: usize) -> AppResult<Vec<ScanRecord>> {
        let addr = hex_addr(address);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT block_number, tx_hash, contract_address, sender, value_usd,
                        analysis, prefilter, provenance, created_at_ms
                 FROM scan_records WHERE sender = ?1 OR contract_address = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![addr, limit as i64], scan_from_row)?;
            rows.collect()
        })
    }

    /// Record digests in insertion order (Merkle leaves)
    pub fn scan_digests(&self) -> AppResult<Vec<B256>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT digest FROM scan_records ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| parse_b256(row, 0))?;
            rows.collect()
        })
    }

    pub fn scan_count(&self) -> AppResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM scan_records", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        })
    }

    /// USD value of every transaction recorded as a threat
    pub fn protected_usd_total(&self) -> AppResult<f64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(value_usd), 0.0) FROM scan_records WHERE is_threat = 1",
                [],
                |row| row.get::<_, f64>(0),
            )
        })
    }

    // ============================================
    // ATTESTATION LOG
    // ============================================

    pub fn record_attestation(
        &self,
        kind: &str,
        target: &str,
        tx_hash: Option<&B256>,
        error: Option<&str>,
    ) -> AppResult<()> {
        let status = if error.is_none() { "ok" } else { "failed" };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attestations (kind, target, tx_hash, status, error, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    kind,
                    target,
                    tx_hash.map(hex_b256),
                    status,
                    error,
                    now_ms()
                ],
            )
            .map(|_| ())
        })
    }

    /// (ok, failed) attestation counts
    pub fn attestation_counts(&self) -> AppResult<(u64, u64)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN status = 'ok' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                 FROM attestations",
                [],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
        })
    }

    // ============================================
    // SHIELDED WALLETS
    // ============================================

    pub fn get_shielded(&self, address: &Address) -> AppResult<Option<ShieldedWallet>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT address, vibe_score, shielded_at_ms, updated_at_ms, scan_count, onchain_tx
                 FROM shielded_wallets WHERE address = ?1",
                params![hex_addr(address)],
                shielded_from_row,
            )
            .optional()
        })
    }

    /// First protection event. Returns false if the wallet was already shielded.
    pub fn insert_shielded(&self, address: &Address, vibe_score: u8) -> AppResult<bool> {
        let now = now_ms();
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO shielded_wallets
                    (address, vibe_score, shielded_at_ms, updated_at_ms, scan_count)
                 VALUES (?1, ?2, ?3, ?3, 1)",
                params![hex_addr(address), vibe_score as i64, now],
            )
        })?;
        Ok(inserted > 0)
    }

    /// Later scans only refresh the score
    pub fn update_shield_score(&self, address: &Address, vibe_score: u8) -> AppResult<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE shielded_wallets
                 SET vibe_score = ?2, updated_at_ms = ?3, scan_count = scan_count + 1
                 WHERE address = ?1",
                params![hex_addr(address), vibe_score as i64, now_ms()],
            )
        })?;
        Ok(changed > 0)
    }

    /// Record the `shieldWallet` transaction. False if already confirmed.
    pub fn confirm_shield(&self, address: &Address, tx_hash: &B256) -> AppResult<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE shielded_wallets SET onchain_tx = ?2
                 WHERE address = ?1 AND onchain_tx IS NULL",
                params![hex_addr(address), hex_b256(tx_hash)],
            )
        })?;
        Ok(changed > 0)
    }

    /// Shields whose `shieldWallet` call has been mined
    pub fn shielded_onchain_count(&self) -> AppResult<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM shielded_wallets WHERE onchain_tx IS NOT NULL",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    pub fn shielded_count(&self) -> AppResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM shielded_wallets", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        })
    }

    // ============================================
    // USER PREFERENCES
    // ============================================

    /// Create the owner row if missing and make sure it carries the owner flag
    pub fn ensure_owner(&self, owner_id: i64, default_threshold: f64) -> AppResult<UserPreference> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (telegram_user_id, alert_threshold_usd, is_owner)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(telegram_user_id) DO UPDATE SET is_owner = 1",
                params![owner_id, default_threshold],
            )
        })?;
        self.get_preference(owner_id)?
            .ok_or_else(|| AppError::new(ErrorCode::DbError, "owner row missing after upsert"))
    }

    /// Register a user on first contact; existing rows are left untouched
    pub fn upsert_user(
        &self,
        user_id: i64,
        default_threshold: f64,
        is_owner: bool,
    ) -> AppResult<UserPreference> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_preferences
                    (telegram_user_id, alert_threshold_usd, is_owner)
                 VALUES (?1, ?2, ?3)",
                params![user_id, default_threshold, is_owner],
            )
        })?;
        self.get_preference(user_id)?
            .ok_or_else(|| AppError::new(ErrorCode::DbError, "user row missing after insert"))
    }

    pub fn get_preference(&self, user_id: i64) -> AppResult<Option<UserPreference>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT telegram_user_id, alert_threshold_usd, is_owner
                 FROM user_preferences WHERE telegram_user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserPreference {
                        telegram_user_id: row.get(0)?,
                        alert_threshold_usd: row.get(1)?,
                        is_owner: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn set_threshold(&self, user_id: i64, threshold_usd: f64) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (telegram_user_id, alert_threshold_usd, is_owner)
                 VALUES (?1, ?2, 0)
                 ON CONFLICT(telegram_user_id) DO UPDATE SET alert_threshold_usd = excluded.alert_threshold_usd",
                params![user_id, threshold_usd],
            )
            .map(|_| ())
        })
    }

    /// Owner's whale threshold, or `default` if the owner never set one
    pub fn owner_threshold(&self, owner_id: i64, default: f64) -> AppResult<f64> {
        Ok(self
            .get_preference(owner_id)?
            .map(|p| p.alert_threshold_usd)
            .unwrap_or(default))
    }

    // ============================================
    // WATCH / IGNORE LISTS
    // ============================================

    /// Returns false if the address was already listed
    pub fn add_to_list(&self, list: AddressList, address: &Address) -> AppResult<bool> {
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO address_lists (address, list, added_at_ms) VALUES (?1, ?2, ?3)",
                params![hex_addr(address), list.as_str(), now_ms()],
            )
        })?;
        Ok(inserted > 0)
    }

    /// Returns false if the address was not listed
    pub fn remove_from_list(&self, list: AddressList, address: &Address) -> AppResult<bool> {
        let removed = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM address_lists WHERE address = ?1 AND list = ?2",
                params![hex_addr(address), list.as_str()],
            )
        })?;
        Ok(removed > 0)
    }

    pub fn list(&self, list: AddressList) -> AppResult<Vec<Address>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT address FROM address_lists WHERE list = ?1 ORDER BY added_at_ms ASC",
            )?;
            let rows = stmt.query_map(params![list.as_str()], |row| parse_addr(row, 0))?;
            rows.collect()
        })
    }

    pub fn in_list(&self, list: AddressList, address: &Address) -> AppResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM address_lists WHERE address = ?1 AND list = ?2",
                params![hex_addr(address), list.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|hit| hit.is_some())
        })
    }

    // ============================================
    // COUNTERS
    // ============================================

    pub fn bump_counter(&self, key: &str, by: u64) -> AppResult<()> {
        self.with_conn(|conn| bump_counter_row(conn, key, by))
    }

    pub fn counters(&self) -> AppResult<Counters> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM counters")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            let mut counters = Counters::default();
            for row in rows {
                let (key, value) = row?;
                match key.as_str() {
                    COUNTER_BLOCKS => counters.blocks = value,
                    COUNTER_WHALES => counters.whales = value,
                    COUNTER_THREATS => counters.threats = value,
                    _ => {}
                }
            }
            Ok(counters)
        })
    }

    // ============================================
    // GUARDIAN MIRROR
    // ============================================

    pub fn upsert_guardian(&self, token: &GuardianToken) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO guardian_tokens
                    (token_id, owner, name, learning_root, protected_amount, scan_count, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(token_id) DO UPDATE SET
                    owner = excluded.owner,
                    name = excluded.name,
                    learning_root = excluded.learning_root,
                    protected_amount = excluded.protected_amount,
                    scan_count = excluded.scan_count,
                    updated_at_ms = excluded.updated_at_ms",
                params![
                    token.token_id.to_string(),
                    hex_addr(&token.owner),
                    token.name,
                    hex_b256(&token.learning_root),
                    token.protected_amount.to_string(),
                    token.scan_count as i64,
                    token.updated_at.timestamp_millis(),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn guardian(&self, token_id: U256) -> AppResult<Option<GuardianToken>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token_id, owner, name, learning_root, protected_amount, scan_count, updated_at_ms
                 FROM guardian_tokens WHERE token_id = ?1",
                params![token_id.to_string()],
                guardian_from_row,
            )
            .optional()
        })
    }

    pub fn guardians(&self) -> AppResult<Vec<GuardianToken>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT token_id, owner, name, learning_root, protected_amount, scan_count, updated_at_ms
                 FROM guardian_tokens ORDER BY updated_at_ms DESC",
            )?;
            let rows = stmt.query_map([], guardian_from_row)?;
            rows.collect()
        })
    }
}

// ============================================
// ROW MAPPING
// ============================================

fn hex_addr(address: &Address) -> String {
    format!("{:#x}", address)
}

fn hex_b256(hash: &B256) -> String {
    format!("{:#x}", hash)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_addr(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    let raw: String = row.get(idx)?;
    Address::from_str(&raw).map_err(|e| conversion_error(idx, format!("{}: {}", raw, e)))
}

fn parse_b256(row: &Row<'_>, idx: usize) -> rusqlite::Result<B256> {
    let raw: String = row.get(idx)?;
    B256::from_str(&raw).map_err(|e| conversion_error(idx, format!("{}: {}", raw, e)))
}

fn parse_u256(row: &Row<'_>, idx: usize) -> rusqlite::Result<U256> {
    let raw: String = row.get(idx)?;
    U256::from_str(&raw).map_err(|e| conversion_error(idx, format!("{}: {}", raw, e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {}", ms)))
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let provenance: String = row.get(7)?;
    Ok(ScanRecord {
        block_number: row.get::<_, i64>(0)? as u64,
        tx_hash: parse_b256(row, 1)?,
        contract_address: parse_addr(row, 2)?,
        sender: parse_addr(row, 3)?,
        value_usd: row.get(4)?,
        analysis: parse_json::<Analysis>(row, 5)?,
        prefilter: parse_json::<PreFilterOutcome>(row, 6)?,
        provenance: Provenance::from_str(&provenance).map_err(|e| conversion_error(7, e))?,
        timestamp: parse_time(row, 8)?,
    })
}

struct EncodedScan {
    analysis: String,
    prefilter: String,
    risk_factors: String,
}

impl EncodedScan {
    fn new(record: &ScanRecord) -> AppResult<Self> {
        Ok(Self {
            analysis: serde_json::to_string(&record.analysis)?,
            prefilter: serde_json::to_string(&record.prefilter)?,
            risk_factors: serde_json::to_string(&record.risk_factors())?,
        })
    }
}

fn insert_scan_row(
    conn: &Connection,
    record: &ScanRecord,
    encoded: &EncodedScan,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO scan_records (
            block_number, tx_hash, contract_address, sender, value_usd,
            verdict, confidence, risk_factors, vibe_score, is_threat,
            analysis, prefilter, provenance, digest, created_at_ms
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            record.block_number as i64,
            hex_b256(&record.tx_hash),
            hex_addr(&record.contract_address),
            hex_addr(&record.sender),
            record.value_usd,
            record.verdict(),
            record.confidence() as i64,
            encoded.risk_factors,
            record.vibe_score() as i64,
            record.is_threat(),
            encoded.analysis,
            encoded.prefilter,
            record.provenance.to_string(),
            hex_b256(&record.digest()),
            record.timestamp.timestamp_millis(),
        ],
    )
}

fn bump_counter_row(conn: &Connection, key: &str, by: u64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO counters (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        params![key, by as i64],
    )
    .map(|_| ())
}

fn shielded_from_row(row: &Row<'_>) -> rusqlite::Result<ShieldedWallet> {
    Ok(ShieldedWallet {
        address: parse_addr(row, 0)?,
        vibe_score: row.get::<_, i64>(1)?.clamp(0, 100) as u8,
        shielded_at: parse_time(row, 2)?,
        updated_at: parse_time(row, 3)?,
        scan_count: row.get::<_, i64>(4)? as u64,
        onchain_tx: match row.get::<_, Option<String>>(5)? {
            Some(_) => Some(parse_b256(row, 5)?),
            None => None,
        },
    })
}

fn guardian_from_row(row: &Row<'_>) -> rusqlite::Result<GuardianToken> {
    Ok(GuardianToken {
        token_id: parse_u256(row, 0)?,
        owner: parse_addr(row, 1)?,
        name: row.get(2)?,
        learning_root: parse_b256(row, 3)?,
        protected_amount: parse_u256(row, 4)?,
        scan_count: row.get::<_, i64>(5)? as u64,
        updated_at: parse_time(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{ScamFlag, Verdict};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn record(block: u64, tx: u8) -> ScanRecord {
        ScanRecord {
            block_number: block,
            tx_hash: B256::repeat_byte(tx),
            contract_address: addr(0xaa),
            sender: addr(0xbb),
            value_usd: 25_000.0,
            analysis: Analysis::Known {
                verdict: Verdict::Suspicious,
                confidence: 70,
                risk_factors: vec!["fresh contract".into()],
                summary: "unverified token".into(),
            },
            prefilter: PreFilterOutcome::Flagged(vec![ScamFlag::Proxy]),
            provenance: Provenance::Llm("groq".into()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.cursor().unwrap(), None);
        assert!(store.advance_cursor(100).unwrap());
        assert!(!store.advance_cursor(99).unwrap());
        assert!(!store.advance_cursor(100).unwrap());
        assert!(store.advance_cursor(101).unwrap());
        assert_eq!(store.cursor().unwrap(), Some(101));
    }

    #[test]
    fn test_scan_unique_per_block_and_tx() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_scan(&record(10, 1)).unwrap());
        assert!(!store.insert_scan(&record(10, 1)).unwrap());
        assert!(store.insert_scan(&record(11, 1)).unwrap());
        assert_eq!(store.scan_count().unwrap(), 2);
        assert!(store.has_scan(10, &B256::repeat_byte(1)).unwrap());
        assert!(!store.has_scan(12, &B256::repeat_byte(1)).unwrap());
    }

    #[test]
    fn test_scan_readback() {
        let store = Store::open_in_memory().unwrap();
        let original = record(5, 9);
        store.insert_scan(&original).unwrap();

        let scans = store.recent_scans(10).unwrap();
        assert_eq!(scans.len(), 1);
        let back = &scans[0];
        assert_eq!(back.tx_hash, original.tx_hash);
        assert_eq!(back.analysis, original.analysis);
        assert_eq!(back.prefilter, original.prefilter);
        assert_eq!(back.provenance, original.provenance);
        assert_eq!(back.digest(), original.digest());
        assert_eq!(store.scan_digests().unwrap(), vec![original.digest()]);
        assert_eq!(store.scans_for_address(&addr(0xbb), 5).unwrap().len(), 1);
        assert!((store.protected_usd_total().unwrap() - 25_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_shield_once() {
        let store = Store::open_in_memory().unwrap();
        let wallet = addr(0x11);
        assert!(store.insert_shielded(&wallet, 80).unwrap());
        assert!(!store.insert_shielded(&wallet, 20).unwrap());
        assert!(store.update_shield_score(&wallet, 20).unwrap());

        let shielded = store.get_shielded(&wallet).unwrap().unwrap();
        assert_eq!(shielded.vibe_score, 20);
        assert_eq!(shielded.scan_count, 2);
        assert_eq!(store.shielded_count().unwrap(), 1);
    }

    #[test]
    fn test_shield_confirmation() {
        let store = Store::open_in_memory().unwrap();
        let wallet = addr(0x12);
        store.insert_shielded(&wallet, 80).unwrap();
        assert!(!store.get_shielded(&wallet).unwrap().unwrap().is_onchain());
        assert_eq!(store.shielded_onchain_count().unwrap(), 0);

        assert!(store.confirm_shield(&wallet, &B256::repeat_byte(7)).unwrap());
        assert!(!store.confirm_shield(&wallet, &B256::repeat_byte(8)).unwrap());

        let shielded = store.get_shielded(&wallet).unwrap().unwrap();
        assert_eq!(shielded.onchain_tx, Some(B256::repeat_byte(7)));
        assert_eq!(store.shielded_onchain_count().unwrap(), 1);
    }

    #[test]
    fn test_commit_scan_is_all_or_nothing() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| conn.execute_batch("DROP TABLE counters"))
            .unwrap();

        assert!(store.commit_scan(&record(9, 1)).is_err());
        assert!(!store.has_scan(9, &B256::repeat_byte(1)).unwrap());

        store.migrate().unwrap();
        assert!(store.commit_scan(&record(9, 1)).unwrap());
        assert!(!store.commit_scan(&record(9, 1)).unwrap());
        let counters = store.counters().unwrap();
        assert_eq!(counters.whales, 1);
        assert_eq!(counters.threats, 1);
    }

    #[test]
    fn test_preferences() {
        let store = Store::open_in_memory().unwrap();
        let owner = store.ensure_owner(42, 10_000.0).unwrap();
        assert!(owner.is_owner);
        store.set_threshold(42, 500.0).unwrap();
        assert_eq!(store.owner_threshold(42, 10_000.0).unwrap(), 500.0);
        assert_eq!(store.owner_threshold(7, 10_000.0).unwrap(), 10_000.0);

        let user = store.upsert_user(7, 10_000.0, false).unwrap();
        assert!(!user.is_owner);
        // Second contact keeps the stored threshold
        store.set_threshold(7, 300.0).unwrap();
        assert_eq!(store.upsert_user(7, 10_000.0, false).unwrap().alert_threshold_usd, 300.0);
    }

    #[test]
    fn test_lists_and_counters() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_to_list(AddressList::Watch, &addr(1)).unwrap());
        assert!(!store.add_to_list(AddressList::Watch, &addr(1)).unwrap());
        assert!(store.in_list(AddressList::Watch, &addr(1)).unwrap());
        assert!(!store.in_list(AddressList::Ignore, &addr(1)).unwrap());
        assert_eq!(store.list(AddressList::Watch).unwrap(), vec![addr(1)]);
        assert!(store.remove_from_list(AddressList::Watch, &addr(1)).unwrap());
        assert!(!store.remove_from_list(AddressList::Watch, &addr(1)).unwrap());

        store.bump_counter(COUNTER_BLOCKS, 3).unwrap();
        store.bump_counter(COUNTER_BLOCKS, 2).unwrap();
        store.bump_counter(COUNTER_THREATS, 1).unwrap();
        let counters = store.counters().unwrap();
        assert_eq!(counters.blocks, 5);
        assert_eq!(counters.whales, 0);
        assert_eq!(counters.threats, 1);
    }

    #[test]
    fn test_guardian_mirror() {
        let store = Store::open_in_memory().unwrap();
        let mut token = GuardianToken {
            token_id: U256::from(7u64),
            owner: addr(0x22),
            name: "Sentinel".into(),
            learning_root: B256::ZERO,
            protected_amount: U256::ZERO,
            scan_count: 0,
            updated_at: Utc::now(),
        };
        store.upsert_guardian(&token).unwrap();
        token.learning_root = B256::repeat_byte(3);
        token.scan_count = 12;
        store.upsert_guardian(&token).unwrap();

        let back = store.guardian(U256::from(7u64)).unwrap().unwrap();
        assert_eq!(back.learning_root, B256::repeat_byte(3));
        assert_eq!(back.scan_count, 12);
        assert_eq!(store.guardians().unwrap().len(), 1);
        assert!(store.guardian(U256::from(8u64)).unwrap().is_none());
    }

    #[test]
    fn test_attestation_log() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_attestation("log_scan", "0xabc", Some(&B256::ZERO), None)
            .unwrap();
        store
            .record_attestation("shield_wallet", "0xdef", None, Some("reverted"))
            .unwrap();
        assert_eq!(store.attestation_counts().unwrap(), (1, 1));
    }
}
