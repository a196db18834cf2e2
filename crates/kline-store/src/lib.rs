//! Candle and price storage for the kline collector.
//!
//! - `CandleStore`: storage trait used by ingestion and gap detection
//! - `MemoryStore`: volatile ordered-map store
//! - `JsonlStore`: append-only JSON Lines files with an in-memory index

pub mod error;
pub mod jsonl;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use store::{CandleStore, CleanupReport, StoreStats};
