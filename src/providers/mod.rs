//! Providers Module - External Services
//!
//! Thin clients for everything outside the process: the chain (HTTP RPC,
//! newHeads, signed contract calls), GoPlus, the LLM APIs, CoinGecko and
//! Telegram. Trait seams live next to their production implementation.

pub mod contract;
pub mod goplus;
pub mod llm;
pub mod prices;
pub mod rpc;
pub mod telegram;
pub mod websocket;

pub use contract::{connect_ledger, NoopLedger, ScanLedger};
pub use goplus::GoPlusClient;
pub use llm::{providers_from_config, GeminiProvider, LlmProvider, OpenAiCompatible};
pub use prices::{CoinGeckoOracle, PriceSource, StaticPrices};
pub use rpc::RpcProvider;
pub use telegram::{MessageSender, TelegramBot};
pub use websocket::{HeadSubscriber, WsEvent};
