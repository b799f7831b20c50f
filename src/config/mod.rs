//! Configuration Module
//!
//! Loads and validates configuration from TOML files with environment overrides.

pub mod loader;

pub use loader::{
    AppConfig, ApprovalSection, BandSource, BrokerSection, ConfigError, ExecutionSection,
    LiveSection, LoggingSection, SizingMode, UniverseEntry, expand_path, load_config,
    write_template,
};
