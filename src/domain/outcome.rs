//! Failure taxonomy shared by the approval batch and the live loop.
//!
//! None of these kinds terminate the process. Each error type in the crate
//! maps onto one of them so logs and tests can tell failures apart.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Too few bars or samples; asset skipped this cycle
    DataInsufficient,
    /// Feature, label or fit failure; probability defaults to 0
    ModelFitFailure,
    /// Network, auth or rate-limit failure talking to the broker or data API
    BrokerCallFailure,
    /// Approval file absent or corrupt; treated as an empty set
    ConfigMissing,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::DataInsufficient => "DataInsufficient",
            FailureKind::ModelFitFailure => "ModelFitFailure",
            FailureKind::BrokerCallFailure => "BrokerCallFailure",
            FailureKind::ConfigMissing => "ConfigMissing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(FailureKind::DataInsufficient.to_string(), "DataInsufficient");
        assert_eq!(FailureKind::BrokerCallFailure.to_string(), "BrokerCallFailure");
    }
}
