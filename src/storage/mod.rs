//! Storage Module - SQLite persistence
//!
//! Scan history, shielded wallets, user preferences, the block cursor,
//! watch/ignore lists, counters and the Guardian mirror.

pub mod db;

pub use db::Store;
