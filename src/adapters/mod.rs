//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Alpaca: REST client for bars, account state and bracket orders
//! - Paper: in-process simulated brokerage account
//! - CLI: Command-line interface handlers

pub mod alpaca;
pub mod paper;
pub mod cli;

pub use alpaca::{AlpacaClient, AlpacaConfig};
pub use paper::PaperBroker;
pub use cli::CliApp;
