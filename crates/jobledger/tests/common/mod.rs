//! Shared test utilities for jobledger integration tests.
//!
//! This module provides:
//! - `TestLedger`, a ledger over an in-memory database with a temporary
//!   `job` mount and a populated analysis
//! - Builders for job requests and config files

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{TestLedger, SAMPLES};
