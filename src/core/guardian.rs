//! Guardian NFT operations
//!
//! Owner-invoked from the bot. Each call goes straight to the ledger (no
//! queue, the owner waits for the answer) and the result is mirrored in the
//! store so `/guardian` can list tokens without touching the chain.

use alloy_primitives::{keccak256, Address, B256, U256};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::core::attestor::{attestation_backoff, submit_with_retry};
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::GuardianToken;
use crate::providers::contract::ScanLedger;
use crate::storage::db::Store;
use crate::utils::constants::{DEFAULT_GUARDIAN_IMAGE_URI, SCORE_UNKNOWN};
use crate::utils::format::addr_lower;

/// Binary keccak256 Merkle root. Pairs hash as `keccak(left ‖ right)`; an odd
/// node at the end of a level is carried up unchanged. No leaves → zero.
pub fn merkle_root(leaves: &[B256]) -> B256 {
    if leaves.is_empty() {
        return B256::ZERO;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut buf = [0u8; 64];
                    buf[..32].copy_from_slice(left.as_slice());
                    buf[32..].copy_from_slice(right.as_slice());
                    keccak256(buf)
                }
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

pub struct GuardianService {
    ledger: Arc<dyn ScanLedger>,
    store: Arc<Store>,
}

impl GuardianService {
    pub fn new(ledger: Arc<dyn ScanLedger>, store: Arc<Store>) -> Self {
        Self { ledger, store }
    }

    pub fn list(&self) -> AppResult<Vec<GuardianToken>> {
        self.store.guardians()
    }

    /// Mint a Guardian for the deployment signer.
    /// Not retried: a lost receipt followed by a resend would mint twice.
    pub async fn mint(&self, name: &str) -> AppResult<GuardianToken> {
        self.ensure_enabled()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("guardian name is empty"));
        }

        let (tx_hash, token_id) = self
            .ledger
            .mint_guardian(name, DEFAULT_GUARDIAN_IMAGE_URI)
            .await?;

        let token = GuardianToken {
            token_id,
            owner: self.ledger.signer(),
            name: name.to_string(),
            learning_root: B256::ZERO,
            protected_amount: U256::ZERO,
            scan_count: 0,
            updated_at: Utc::now(),
        };
        self.store.upsert_guardian(&token)?;
        self.store.record_attestation("mint_guardian", &token_id.to_string(), Some(&tx_hash), None)?;
        info!("🦾 Guardian #{} minted ({:#x})", token_id, tx_hash);
        Ok(token)
    }

    /// Push the learning root over every stored scan plus the protected USD total
    pub async fn learn(&self, token_id: U256) -> AppResult<GuardianToken> {
        self.ensure_enabled()?;
        let digests = self.store.scan_digests()?;
        let root = merkle_root(&digests);
        let protected = usd_to_u256(self.store.protected_usd_total()?);

        let ledger = self.ledger.clone();
        let tx_hash = submit_with_retry("updateLearning", attestation_backoff(), || {
            let ledger = ledger.clone();
            async move { ledger.update_learning(token_id, root, protected).await }
        })
        .await?;

        let mut token = self.store.guardian(token_id)?.unwrap_or_else(|| GuardianToken {
            token_id,
            owner: self.ledger.signer(),
            name: String::new(),
            learning_root: B256::ZERO,
            protected_amount: U256::ZERO,
            scan_count: 0,
            updated_at: Utc::now(),
        });
        token.learning_root = root;
        token.protected_amount = protected;
        token.scan_count = digests.len() as u64;
        token.updated_at = Utc::now();
        self.store.upsert_guardian(&token)?;
        self.store.record_attestation("update_learning", &token_id.to_string(), Some(&tx_hash), None)?;
        info!(
            "🧬 Guardian #{} learned {} scan(s), root {:#x}",
            token_id,
            token.scan_count,
            root
        );
        Ok(token)
    }

    /// Attest that `wallet` is protected by Guardian `token_id`. Returns (tx, risk score).
    pub async fn attest(&self, token_id: U256, wallet: Address) -> AppResult<(B256, u8)> {
        self.ensure_enabled()?;
        let risk = self.risk_score_for(&wallet)?;

        let ledger = self.ledger.clone();
        let tx_hash = submit_with_retry("attestProtection", attestation_backoff(), || {
            let ledger = ledger.clone();
            async move { ledger.attest_protection(token_id, wallet, risk).await }
        })
        .await?;

        self.store
            .record_attestation("attest_protection", &addr_lower(&wallet), Some(&tx_hash), None)?;
        info!("🛡️ Guardian #{} attests {} (risk {})", token_id, addr_lower(&wallet), risk);
        Ok((tx_hash, risk))
    }

    /// Inverse of the wallet's latest vibe score
    pub fn risk_score_for(&self, wallet: &Address) -> AppResult<u8> {
        if let Some(shielded) = self.store.get_shielded(wallet)? {
            return Ok(100 - shielded.vibe_score.min(100));
        }
        let latest = self.store.scans_for_address(wallet, 1)?;
        Ok(match latest.first() {
            Some(record) => 100 - record.vibe_score().min(100),
            None => 100 - SCORE_UNKNOWN,
        })
    }

    fn ensure_enabled(&self) -> AppResult<()> {
        if self.ledger.is_enabled() {
            Ok(())
        } else {
            Err(AppError::new(
                ErrorCode::ChainNotConfigured,
                "on-chain logging is disabled",
            ))
        }
    }
}

/// Whole dollars, negative and NaN clamp to zero
fn usd_to_u256(value: f64) -> U256 {
    if value.is_finite() && value > 0.0 {
        U256::from(value.floor() as u128)
    } else {
        U256::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merkle_root_small_trees() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        let c = B256::repeat_byte(3);

        assert_eq!(merkle_root(&[]), B256::ZERO);
        assert_eq!(merkle_root(&[a]), a);

        let mut ab = [0u8; 64];
        ab[..32].copy_from_slice(a.as_slice());
        ab[32..].copy_from_slice(b.as_slice());
        let hab = keccak256(ab);
        assert_eq!(merkle_root(&[a, b]), hab);

        // c is carried to the second level
        let mut abc = [0u8; 64];
        abc[..32].copy_from_slice(hab.as_slice());
        abc[32..].copy_from_slice(c.as_slice());
        assert_eq!(merkle_root(&[a, b, c]), keccak256(abc));
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_usd_to_u256() {
        assert_eq!(usd_to_u256(1234.99), U256::from(1234u64));
        assert_eq!(usd_to_u256(-5.0), U256::ZERO);
        assert_eq!(usd_to_u256(f64::NAN), U256::ZERO);
    }
}
