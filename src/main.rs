//! VibeGuard Sentinel - block-scan-and-alert daemon
//!
//! Wires the watcher, pipeline stages, command bot, attestation worker and
//! status API, then runs until Ctrl+C / SIGTERM.
//!
//! Shutdown order: stop the watcher (the block in flight finishes), stop the
//! bot and API, drain the attestation queue, export telemetry.

use eyre::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vibeguard_sentinel::api::{create_router, start_cleanup_task, AppState};
use vibeguard_sentinel::core::{
    attestation_channel, BlockWatcher, CommandBot, GoPlusPreFilter, GuardianService,
    IntentAnalyzer, Notifier, Pipeline, PipelineParts,
};
use vibeguard_sentinel::providers::{
    connect_ledger, providers_from_config, CoinGeckoOracle, GoPlusClient, HeadSubscriber,
    RpcProvider, TelegramBot,
};
use vibeguard_sentinel::utils::constants::{APP_NAME, APP_VERSION};
use vibeguard_sentinel::{SentinelConfig, Store, TelemetryCollector};

/// Upper bound for draining queued attestations on shutdown
const DRAIN_TIMEOUT_SECS: u64 = 120;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    print_banner();

    let config = Arc::new(SentinelConfig::from_env()?);
    config.log_summary();

    // Storage
    let store = Arc::new(Store::open(&config.database_path)?);
    let owner = store.ensure_owner(config.owner_id, config.alert_limit_default_usd)?;
    info!("👑 Owner threshold: ${:.0}", owner.alert_threshold_usd);
    let telemetry = Arc::new(TelemetryCollector::new());

    // Chain
    let rpc = Arc::new(RpcProvider::new(&config.chain)?);
    match rpc.fetch_chain_id().await {
        Ok(id) if id != config.chain.chain_id => warn!(
            "⚠️ RPC reports chain {} but CHAIN_ID is {}",
            id, config.chain.chain_id
        ),
        Ok(id) => info!("⛓️ Connected to chain {} via {}", id, rpc.masked_url()),
        Err(e) => warn!("⚠️ Chain id check failed: {}", e),
    }

    // Telegram
    let telegram = TelegramBot::new(config.telegram_token.clone())?;
    if let Err(e) = telegram.delete_webhook().await {
        warn!("⚠️ deleteWebhook failed: {}", e);
    }
    let notifier = Arc::new(Notifier::new(
        Arc::new(telegram.clone()),
        config.owner_chats(),
        telemetry.clone(),
        config.chain.symbol.clone(),
    ));

    // Stages
    let prefilter = Arc::new(GoPlusPreFilter::new(GoPlusClient::new(
        config.chain.chain_id,
        config.goplus_app_key.clone(),
        config.goplus_app_secret.clone(),
    )?));
    let analyzer = Arc::new(IntentAnalyzer::new(
        providers_from_config(&config.llm)?,
        config.llm.timeout,
    ));
    let prices = Arc::new(CoinGeckoOracle::new(config.chain.chain_id)?);

    let ledger = connect_ledger(&config.onchain, rpc.primary_url())?;
    let (attestor, worker) = attestation_channel(ledger.clone(), store.clone(), telemetry.clone());
    let worker_handle = tokio::spawn(worker.run());
    let guardian = Arc::new(GuardianService::new(ledger, store.clone()));

    let pipeline = Arc::new(Pipeline::new(PipelineParts {
        store: store.clone(),
        prefilter: prefilter.clone(),
        analyzer: analyzer.clone(),
        prices,
        notifier: notifier.clone(),
        attestor: attestor.clone(),
        telemetry: telemetry.clone(),
        owner_id: config.owner_id,
        default_threshold_usd: config.alert_limit_default_usd,
        native_symbol: config.chain.symbol.clone(),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Watcher
    let mut watcher = BlockWatcher::new(
        rpc.clone(),
        pipeline.clone(),
        store.clone(),
        telemetry.clone(),
        config.poll_interval,
    );
    if let Some(ws_url) = &config.chain.ws_url {
        watcher = watcher.with_heads(HeadSubscriber::new(ws_url.clone()).subscribe());
    }
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    // Command bot
    let bot = Arc::new(CommandBot {
        config: config.clone(),
        store: store.clone(),
        telemetry: telemetry.clone(),
        prefilter,
        analyzer,
        attestor,
        guardian,
        notifier,
        started: Instant::now(),
    });
    let bot_handle = tokio::spawn(bot.run(Arc::new(telegram), shutdown_rx.clone()));

    // Status API
    let state = Arc::new(AppState::new(store.clone(), telemetry.clone(), config.clone()));
    start_cleanup_task(state.clone());
    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("🌐 Status API on http://{}/v1/health", addr);
    let mut api_shutdown = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    info!("🚀 {} running. Press Ctrl+C to stop.", APP_NAME);
    shutdown_signal().await;

    info!("🛑 Shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    if let Err(e) = watcher_handle.await {
        error!("❌ Watcher task failed: {}", e);
    }
    if let Err(e) = bot_handle.await {
        error!("❌ Bot task failed: {}", e);
    }
    match api_handle.await {
        Ok(Err(e)) => error!("❌ API server error: {}", e),
        Err(e) => error!("❌ API task failed: {}", e),
        Ok(Ok(())) => {}
    }

    // Last Attestor handle goes with the pipeline; the worker then drains
    drop(pipeline);
    match tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), worker_handle).await {
        Ok(_) => info!("📝 Attestation queue drained"),
        Err(_) => warn!("⚠️ Attestation drain timed out after {}s", DRAIN_TIMEOUT_SECS),
    }

    let stats = telemetry.get_stats();
    println!("{}", stats.summary_report());

    match telemetry.export_stats_json() {
        Ok(path) => info!("   ✅ JSON exported to: {}", path.display()),
        Err(e) => warn!("   ❌ JSON export failed: {}", e),
    }
    match telemetry.export_stats_csv() {
        Ok(path) => info!("   ✅ CSV exported to: {}", path.display()),
        Err(e) => warn!("   ❌ CSV export failed: {}", e),
    }
    if let Err(e) = telemetry.flush() {
        warn!("   ❌ Threat log flush failed: {}", e);
    }

    info!("👋 {} stopped", APP_NAME);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║   __     ___ _           ____                     _          ║
    ║   \ \   / (_) |__   ___ / ___|_   _  __ _ _ __ __| |         ║
    ║    \ \ / /| | '_ \ / _ \ |  _| | | |/ _` | '__/ _` |         ║
    ║     \ V / | | |_) |  __/ |_| | |_| | (_| | | | (_| |         ║
    ║      \_/  |_|_.__/ \___|\____|\__,_|\__,_|_|  \__,_|         ║
    ║                                                              ║
    ║              S E N T I N E L   v{:<8}                     ║
    ║         Whale watch · Scam pre-filter · LLM intent          ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝
    "#,
        APP_VERSION
    );
}
