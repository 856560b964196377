//! On-chain Ledger
//!
//! Owner-gated calls on the VibeGuard logging contract and the Guardian NFT
//! contract, signed with the deployment key:
//! - `logScan(contract, score, isSafe, user)`
//! - `shieldWallet(wallet, score)`
//! - `mintGuardian(name, imageURI)` → token id from `GuardianMinted`
//! - `updateLearning(tokenId, merkleRoot, protectedAmount)`
//! - `attestProtection(tokenId, wallet, riskScore)`
//!
//! Every call uses a fixed gas limit and waits for the receipt; a reverted
//! receipt is an error.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::config::OnchainConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{
    GAS_ATTEST_PROTECTION, GAS_LOG_SCAN, GAS_MINT_GUARDIAN, GAS_SHIELD_WALLET,
    GAS_UPDATE_LEARNING, RECEIPT_TIMEOUT_SECS,
};

sol! {
    function logScan(address _contract, uint256 _score, bool _isSafe, address _user) external;
    function shieldWallet(address wallet, uint256 score) external;
    function mintGuardian(string name, string imageURI) external;
    function updateLearning(uint256 tokenId, bytes32 merkleRoot, uint256 protectedAmount) external;
    function attestProtection(uint256 tokenId, address wallet, uint256 riskScore) external;

    event GuardianMinted(address indexed owner, uint256 indexed tokenId, string name);
}

/// Everything the attestor can write on-chain
#[async_trait]
pub trait ScanLedger: Send + Sync {
    /// False for the no-op ledger; callers skip queueing entirely
    fn is_enabled(&self) -> bool;

    /// Address that signs every call (zero when disabled)
    fn signer(&self) -> Address;

    async fn log_scan(&self, contract: Address, score: u8, is_safe: bool) -> AppResult<B256>;

    async fn shield_wallet(&self, wallet: Address, score: u8) -> AppResult<B256>;

    /// Returns (tx hash, minted token id)
    async fn mint_guardian(&self, name: &str, image_uri: &str) -> AppResult<(B256, U256)>;

    async fn update_learning(
        &self,
        token_id: U256,
        merkle_root: B256,
        protected_usd: U256,
    ) -> AppResult<B256>;

    async fn attest_protection(
        &self,
        token_id: U256,
        wallet: Address,
        risk_score: u8,
    ) -> AppResult<B256>;
}

// ============================================
// NO-OP LEDGER
// ============================================

/// Used when on-chain logging is disabled or unconfigured
pub struct NoopLedger;

#[async_trait]
impl ScanLedger for NoopLedger {
    fn is_enabled(&self) -> bool {
        false
    }

    fn signer(&self) -> Address {
        Address::ZERO
    }

    async fn log_scan(&self, _contract: Address, _score: u8, _is_safe: bool) -> AppResult<B256> {
        Err(not_configured("logScan"))
    }

    async fn shield_wallet(&self, _wallet: Address, _score: u8) -> AppResult<B256> {
        Err(not_configured("shieldWallet"))
    }

    async fn mint_guardian(&self, _name: &str, _image_uri: &str) -> AppResult<(B256, U256)> {
        Err(not_configured("mintGuardian"))
    }

    async fn update_learning(&self, _: U256, _: B256, _: U256) -> AppResult<B256> {
        Err(not_configured("updateLearning"))
    }

    async fn attest_protection(&self, _: U256, _: Address, _: u8) -> AppResult<B256> {
        Err(not_configured("attestProtection"))
    }
}

fn not_configured(call: &str) -> AppError {
    AppError::new(
        ErrorCode::ChainNotConfigured,
        format!("{}: on-chain logging disabled", call),
    )
}

// ============================================
// ALLOY LEDGER
// ============================================

/// Signed HTTP provider bound to the configured contracts
pub struct OnchainLedger<P> {
    provider: P,
    signer: Address,
    scan_contract: Option<Address>,
    guardian_contract: Option<Address>,
}

/// Build the ledger for this deployment, or the no-op one when disabled
pub fn connect_ledger(cfg: &OnchainConfig, rpc_url: &str) -> AppResult<Arc<dyn ScanLedger>> {
    if !cfg.enabled {
        info!("📝 On-chain logging disabled");
        return Ok(Arc::new(NoopLedger));
    }
    let Some(key) = cfg.private_key.as_deref() else {
        info!("📝 ENABLE_ONCHAIN_LOG set but WEB3_PRIVATE_KEY missing, on-chain logging off");
        return Ok(Arc::new(NoopLedger));
    };
    if cfg.scan_contract.is_none() && cfg.guardian_contract.is_none() {
        info!("📝 No contract addresses configured, on-chain logging off");
        return Ok(Arc::new(NoopLedger));
    }

    let signer = PrivateKeySigner::from_str(key.trim())
        .map_err(|_| AppError::invalid_config("WEB3_PRIVATE_KEY", "not a valid private key"))?;
    let signer_address = signer.address();
    let url = rpc_url
        .parse()
        .map_err(|_| AppError::invalid_config("OPBNB_HTTP_URL", "not a valid URL"))?;

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(url);

    info!(
        "📝 On-chain ledger ready (signer {:#x}, scan contract {}, guardian {})",
        signer_address,
        cfg.scan_contract.map(|a| format!("{:#x}", a)).unwrap_or_else(|| "-".into()),
        cfg.guardian_contract.map(|a| format!("{:#x}", a)).unwrap_or_else(|| "-".into()),
    );

    Ok(Arc::new(OnchainLedger {
        provider,
        signer: signer_address,
        scan_contract: cfg.scan_contract,
        guardian_contract: cfg.guardian_contract,
    }))
}

impl<P> OnchainLedger<P>
where
    P: Provider<Http<Client>> + 'static,
{
    fn scan_contract(&self) -> AppResult<Address> {
        self.scan_contract
            .ok_or_else(|| not_configured("VIBEGUARD_CONTRACT"))
    }

    fn guardian_contract(&self) -> AppResult<Address> {
        self.guardian_contract
            .ok_or_else(|| not_configured("GUARDIAN_CONTRACT"))
    }

    /// Send, wait for the receipt, fail on revert
    async fn submit(
        &self,
        label: &str,
        to: Address,
        calldata: Vec<u8>,
        gas: u64,
    ) -> AppResult<TransactionReceipt> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(calldata.into())
            .gas_limit(gas);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| AppError::chain_submit(format!("{}: {}", label, e)))?;
        let tx_hash = *pending.tx_hash();
        debug!("📤 {} sent: {:#x}", label, tx_hash);

        let receipt = tokio::time::timeout(
            Duration::from_secs(RECEIPT_TIMEOUT_SECS),
            pending.get_receipt(),
        )
        .await
        .map_err(|_| {
            AppError::new(
                ErrorCode::ChainReceiptTimeout,
                format!("{}: no receipt for {:#x} after {}s", label, tx_hash, RECEIPT_TIMEOUT_SECS),
            )
        })?
        .map_err(|e| AppError::chain_submit(format!("{}: receipt: {}", label, e)))?;

        if !receipt.status() {
            return Err(AppError::new(
                ErrorCode::ChainReverted,
                format!("{} reverted: {:#x}", label, tx_hash),
            ));
        }
        info!("✅ {} mined: {:#x} (gas {})", label, tx_hash, receipt.gas_used);
        Ok(receipt)
    }
}

#[async_trait]
impl<P> ScanLedger for OnchainLedger<P>
where
    P: Provider<Http<Client>> + 'static,
{
    fn is_enabled(&self) -> bool {
        true
    }

    fn signer(&self) -> Address {
        self.signer
    }

    async fn log_scan(&self, contract: Address, score: u8, is_safe: bool) -> AppResult<B256> {
        let call = logScanCall {
            _contract: contract,
            _score: U256::from(score),
            _isSafe: is_safe,
            _user: self.signer,
        };
        let receipt = self
            .submit("logScan", self.scan_contract()?, call.abi_encode(), GAS_LOG_SCAN)
            .await?;
        Ok(receipt.transaction_hash)
    }

    async fn shield_wallet(&self, wallet: Address, score: u8) -> AppResult<B256> {
        let call = shieldWalletCall {
            wallet,
            score: U256::from(score),
        };
        let receipt = self
            .submit("shieldWallet", self.scan_contract()?, call.abi_encode(), GAS_SHIELD_WALLET)
            .await?;
        Ok(receipt.transaction_hash)
    }

    async fn mint_guardian(&self, name: &str, image_uri: &str) -> AppResult<(B256, U256)> {
        let call = mintGuardianCall {
            name: name.to_string(),
            imageURI: image_uri.to_string(),
        };
        let receipt = self
            .submit("mintGuardian", self.guardian_contract()?, call.abi_encode(), GAS_MINT_GUARDIAN)
            .await?;

        let token_id = receipt
            .inner
            .logs()
            .iter()
            .map(|log| log.topics())
            .find(|topics| topics.len() >= 3 && topics[0] == GuardianMinted::SIGNATURE_HASH)
            .map(|topics| U256::from_be_bytes(topics[2].0))
            .ok_or_else(|| {
                AppError::new(
                    ErrorCode::RespInvalidJson,
                    format!("mintGuardian {:#x}: no GuardianMinted event", receipt.transaction_hash),
                )
            })?;
        Ok((receipt.transaction_hash, token_id))
    }

    async fn update_learning(
        &self,
        token_id: U256,
        merkle_root: B256,
        protected_usd: U256,
    ) -> AppResult<B256> {
        let call = updateLearningCall {
            tokenId: token_id,
            merkleRoot: merkle_root,
            protectedAmount: protected_usd,
        };
        let receipt = self
            .submit(
                "updateLearning",
                self.guardian_contract()?,
                call.abi_encode(),
                GAS_UPDATE_LEARNING,
            )
            .await?;
        Ok(receipt.transaction_hash)
    }

    async fn attest_protection(
        &self,
        token_id: U256,
        wallet: Address,
        risk_score: u8,
    ) -> AppResult<B256> {
        let call = attestProtectionCall {
            tokenId: token_id,
            wallet,
            riskScore: U256::from(risk_score),
        };
        let receipt = self
            .submit(
                "attestProtection",
                self.guardian_contract()?,
                call.abi_encode(),
                GAS_ATTEST_PROTECTION,
            )
            .await?;
        Ok(receipt.transaction_hash)
    }
}
