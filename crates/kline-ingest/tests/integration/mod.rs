//! Integration tests for kline-ingest.
//!
//! These tests drive the engine end to end against the mock exchange and
//! the in-memory and JSON Lines stores.

pub mod common;
