//! Deployment sanity check
//!
//! Reports the chain id, the signer address and balance, and whether the
//! configured logging and Guardian contracts have code.
//!
//! Usage:
//!   cargo run --bin check_contract
//!
//! Reads the same environment as the daemon (OPBNB_HTTP_URL, WEB3_PRIVATE_KEY,
//! VIBEGUARD_CONTRACT, GUARDIAN_CONTRACT).

use alloy::primitives::utils::format_ether;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vibeguard_sentinel::models::errors::AppError;
use vibeguard_sentinel::providers::RpcProvider;
use vibeguard_sentinel::SentinelConfig;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let config = SentinelConfig::from_env()?;
    let rpc = RpcProvider::new(&config.chain)?;

    println!("\n🔎 VibeGuard deployment check");
    println!("   RPC: {}", rpc.masked_url());

    match rpc.fetch_chain_id().await {
        Ok(id) if id == config.chain.chain_id => println!("   ✅ Chain id: {}", id),
        Ok(id) => println!(
            "   ⚠️ Chain id: {} (CHAIN_ID is {})",
            id, config.chain.chain_id
        ),
        Err(e) => println!("   ❌ Chain id: {}", e),
    }

    match config.onchain.private_key.as_deref() {
        Some(key) => match PrivateKeySigner::from_str(key.trim()) {
            Ok(signer) => {
                let address = signer.address();
                println!("   🔑 Signer: {:#x}", address);
                match rpc.get_balance(&address).await {
                    Ok(wei) => println!(
                        "   💰 Balance: {} {}",
                        format_ether(wei),
                        config.chain.symbol
                    ),
                    Err(e) => println!("   ❌ Balance: {}", e),
                }
            }
            Err(_) => println!("   ❌ WEB3_PRIVATE_KEY is not a valid private key"),
        },
        None => println!("   ⚠️ WEB3_PRIVATE_KEY not set"),
    }

    report_code(&rpc, "VIBEGUARD_CONTRACT", config.onchain.scan_contract).await;
    report_code(&rpc, "GUARDIAN_CONTRACT", config.onchain.guardian_contract).await;

    if config.onchain.can_attest() {
        info!("📝 On-chain logging would be enabled");
    } else {
        warn!("📝 On-chain logging would stay off");
    }
    println!();
    Ok(())
}

async fn report_code(rpc: &RpcProvider, name: &str, address: Option<Address>) {
    let Some(address) = address else {
        println!("   ⚠️ {}: not set", name);
        return;
    };
    let code = rpc
        .get_code(&address)
        .await
        .and_then(|raw| hex::decode(raw.trim_start_matches("0x")).map_err(|_| AppError::invalid_hex(&raw)));
    match code {
        Ok(bytes) if bytes.is_empty() => println!("   ❌ {} {:#x}: no code deployed", name, address),
        Ok(bytes) => println!("   ✅ {} {:#x}: {} bytes of code", name, address, bytes.len()),
        Err(e) => println!("   ❌ {} {:#x}: {}", name, address, e),
    }
}
