//! Integration tests for kline-daemon.
//!
//! These tests verify the assembled application:
//! - Preflight symbol filtering
//! - Scheduled jobs running against a scripted exchange
//! - HTTP status endpoints

pub mod common;
