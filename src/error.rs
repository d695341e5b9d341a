use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
    #[error("invalid OnCalendar expression '{expr}': {message}")]
    InvalidOnCalendar { expr: String, message: String },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("no occurrence found after {0} iterations")]
    NoOccurrence(u32),
}

/// Transport-level failure. `permanent` distinguishes a provider-signalled
/// revocation (disable the channel) from a transient network/5xx error
/// (record and move on).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub permanent: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("check not found: {0}")]
    CheckNotFound(String),
}
