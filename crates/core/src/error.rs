//! Error types for the tapesim engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tapesim engine.
///
/// Order- and adjustment-level variants are local: they are reported on the
/// order or in the run report and never abort a run. Data-integrity
/// violations are fatal and terminate the run immediately.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Corrupted market data (e.g. precision not matching the instrument).
    /// Fatal: silently continuing would produce an invalid backtest.
    #[error("Data error: {0}")]
    Data(String),

    /// Malformed order parameters; the order never enters the book.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Pre-trade balance/margin check failure.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Ledger adjustment against a currency with no open balance line.
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// A stream yielded a timestamp earlier than the clock's position.
    /// Fatal: indicates corrupted or misconfigured input.
    #[error("Data ordering violation: {0}")]
    DataOrderingViolation(String),

    /// A simulation module's adjustment computation failed. Non-fatal.
    #[error("Module adjustment error: {0}")]
    ModuleAdjustment(String),

    /// Operation not valid in the engine's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create an invalid order error.
    pub fn invalid_order(msg: impl Into<String>) -> Self {
        Error::InvalidOrder(msg.into())
    }

    /// Create an insufficient balance error.
    pub fn insufficient_balance(msg: impl Into<String>) -> Self {
        Error::InsufficientBalance(msg.into())
    }

    /// Create a currency mismatch error.
    pub fn currency_mismatch(msg: impl Into<String>) -> Self {
        Error::CurrencyMismatch(msg.into())
    }

    /// Create a data ordering violation error.
    pub fn data_ordering(msg: impl Into<String>) -> Self {
        Error::DataOrderingViolation(msg.into())
    }

    /// Create a module adjustment error.
    pub fn module_adjustment(msg: impl Into<String>) -> Self {
        Error::ModuleAdjustment(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Whether this error aborts the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DataOrderingViolation(_) | Error::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_data_integrity_violations_are_fatal() {
        assert!(Error::data_ordering("stream 2 went backwards").is_fatal());
        assert!(Error::data("bar precision 3, expected 5").is_fatal());
        assert!(!Error::invalid_order("bad precision").is_fatal());
        assert!(!Error::module_adjustment("rate missing").is_fatal());
        assert!(!Error::currency_mismatch("no CHF line").is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::insufficient_balance("need 100.00 USD, free 50.00 USD");
        assert_eq!(
            err.to_string(),
            "Insufficient balance: need 100.00 USD, free 50.00 USD"
        );
    }
}
