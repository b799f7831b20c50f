//! Alpaca Adapter
//!
//! REST client for Alpaca's trading API (account, positions, clock, bracket
//! orders) and its market data API (historical bars).

mod client;
pub mod types;

pub use client::{AlpacaClient, AlpacaConfig};
