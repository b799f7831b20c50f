//! Titan - Band-touch Mean Reversion Trader Library
//!
//! An offline approval batch scores each candidate ticker with a
//! gradient-boosted win-probability model trained on triple-barrier labels;
//! a live loop watches the approved tickers and enters lower-band touches
//! with bracket orders.
//!
//! # Modules
//!
//! - `domain`: Core types (Bar, BracketOrderSpec, SignalEvent, ApprovalSet)
//! - `ports`: Trait abstractions (BarSource, BrokeragePort) and test mocks
//! - `strategy`: Bands, features, labelling, classifier, resampling
//! - `adapters`: External implementations (Alpaca, paper broker, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Approval gate, live monitor, execution engine, orchestrator

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod adapters;
pub mod config;
pub mod application;
