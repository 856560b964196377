//! Utils Module - Helper Functions & Shared Utilities
//!
//! Constants, caching, backoff, telemetry and message formatting shared by
//! every stage.

pub mod cache;
pub mod constants;
pub mod format;
pub mod retry;
pub mod telemetry;

pub use cache::*;
pub use constants::*;
pub use format::*;
pub use retry::*;
pub use telemetry::*;
