//! Domain Layer - Core types for the Titan trading pipeline
//!
//! Pure data types and file persistence with no broker or network access.
//! All external interactions happen through the ports layer.
//!
//! - `bar`: OHLCV samples
//! - `order`: order legs and bracket construction
//! - `signal`: entry signals and the monitor state machine
//! - `approval`: the approved set handed from the batch job to the live loop
//! - `outcome`: failure taxonomy shared across the pipeline

pub mod bar;
pub mod order;
pub mod signal;
pub mod approval;
pub mod outcome;

pub use bar::{Bar, is_ordered};
pub use order::{
    BracketOrderSpec, EntryOrderKind, OrderError, OrderRequest, OrderSide, OrderType, TimeInForce,
};
pub use signal::{MonitorState, SignalEvent};
pub use approval::{
    ApprovalError, ApprovalRecord, ApprovalSet, ApprovalStore, LoadStatus, DEFAULT_APPROVAL_FILE,
};
pub use outcome::FailureKind;
