//! Unified error types for Remailer.

use thiserror::Error;

/// Result type alias using RemailerError.
pub type Result<T> = std::result::Result<T, RemailerError>;

#[derive(Error, Debug)]
pub enum RemailerError {
    /// Cron grammar violation. Raised when a schedule is created or updated,
    /// never as evaluation-time control flow.
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    // Channel errors
    #[error("Channel error: {0}")]
    Channel(String),

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemailerError {
    pub fn invalid_expression(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
