use thiserror::Error;

pub type StrategyResult<T> = std::result::Result<T, StrategyError>;

/// Errors raised by the strategy core.
///
/// Per-race data gaps (no runners, no favorite, no price) are not errors; the
/// engine skips those races. Only caller contract violations end up here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// A rules or stake-management value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A pure function was called with arguments it cannot handle (e.g. odds <= 1).
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
}

impl StrategyError {
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}
