//! Core Module - Scan Pipeline
//!
//! The stages between a new block and an alert: watcher, pre-filter, intent
//! analyzer, notifier and attestor, plus the owner command bot and Guardian
//! operations.

pub mod analyzer;
pub mod attestor;
pub mod bot;
pub mod guardian;
pub mod notifier;
pub mod pipeline;
pub mod prefilter;
pub mod watcher;

pub use analyzer::{AnalysisOutcome, IntentAnalyzer};
pub use attestor::{attestation_channel, AttestationJob, AttestationWorker, Attestor};
pub use bot::{Command, CommandBot, UpdateSource};
pub use guardian::{merkle_root, GuardianService};
pub use notifier::Notifier;
pub use pipeline::{Pipeline, PipelineParts};
pub use prefilter::{GoPlusPreFilter, PreFilter};
pub use watcher::{BlockSource, BlockWatcher, TxHandler};
