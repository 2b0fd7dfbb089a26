use quotetier_core::{ConfigError, EngineError, ResolveError, SchedulerError, ValidationError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("command error: {0}")]
    Command(String),

    #[error("refresh run failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Command(_) => 2,
            Self::Engine(EngineError::Config(_) | EngineError::Validation(_)) => 2,
            Self::Scheduler(SchedulerError::Disabled) => 2,
            Self::Resolve(error) => resolve_exit_code(error),
            Self::RefreshFailed(_) => 3,
            Self::Engine(_)
            | Self::Scheduler(_)
            | Self::Warehouse(_)
            | Self::Serialization(_)
            | Self::Io(_) => 10,
        }
    }
}

const fn resolve_exit_code(error: &ResolveError) -> u8 {
    match error {
        ResolveError::TickerNotFound { .. } | ResolveError::DataUnavailable { .. } => 4,
        ResolveError::InvalidRange { .. } | ResolveError::Validation(_) => 2,
        ResolveError::Store(_) | ResolveError::Upstream(_) => 10,
    }
}
