use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised anywhere in the simulation core.
///
/// Every fallible operation in this crate returns `Result<_, EngineError>`.
/// There is no recovery path inside the simulation loop itself: any error
/// aborts the backtest and is surfaced to the caller (see `engine.rs`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("look-ahead violation: tried to access {access_date} from a view current as of {reference_date}")]
    LookAhead {
        access_date: NaiveDate,
        reference_date: NaiveDate,
    },

    #[error("insufficient capital: required {required:.2}, available {available:.2}{}", symbol.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    InsufficientCapital {
        required: f64,
        available: f64,
        symbol: Option<String>,
    },

    #[error("invalid signal: {reason}")]
    InvalidSignal { reason: String },

    #[error("constraint violation ({constraint_name}): {details}")]
    ConstraintViolation {
        constraint_name: String,
        details: String,
    },

    #[error("strategy '{strategy_name}' failed on {date}: {message}")]
    Strategy {
        strategy_name: String,
        date: NaiveDate,
        message: String,
    },

    #[error("backtest error during {phase}: {message}")]
    Backtest { phase: String, message: String },

    #[error("execution error{}: {reason}", symbol.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    Execution {
        symbol: Option<String>,
        reason: String,
    },

    #[error("data quality check '{check_name}' failed{}: {details}", symbol.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    DataQuality {
        check_name: String,
        symbol: Option<String>,
        details: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
