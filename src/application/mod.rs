pub mod approval;
pub mod cancel;
pub mod execution;
pub mod monitor;
pub mod orchestrator;

pub use approval::{select_approved, ApprovalGate, ApprovalReport, TickerScore, DEFAULT_APPROVAL_THRESHOLD};
pub use cancel::CancellationToken;
pub use execution::{floor_price, round_price, size_quantity, ExecutionEngine, ExecutionOutcome, ExecutionSettings};
pub use monitor::{trigger_price, LiveMonitor, MonitorOutcome, MonitorSettings};
pub use orchestrator::{CycleError, CycleReport, LoopTiming, OrchestratorStatus, TradingOrchestrator};
