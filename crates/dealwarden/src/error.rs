use crate::address::AddressError;
use thiserror::Error;

/// Fatal failures of a [`DealModule`](crate::DealModule) call.
///
/// Per-provider and per-proposal failures are not errors: they are logged and
/// reported in the call's outcome instead.
#[derive(Debug, Error)]
pub enum DealError {
    #[error("error when staging data to tmpfile")]
    TempFile(#[source] std::io::Error),

    #[error("error when importing data")]
    Import(#[source] anyhow::Error),

    #[error("invalid wallet address")]
    InvalidWallet(#[from] AddressError),

    #[error("deal duration must be positive")]
    InvalidDuration,

    #[error("error when listening to chain changes")]
    Subscribe(#[source] anyhow::Error),
}

/// Failures of the [`DealExecutor`](crate::DealExecutor) itself.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("error when listening to trigger")]
    Listen(#[source] anyhow::Error),

    #[error("executor was already started")]
    AlreadyStarted,

    #[error("log store error")]
    Log(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("import path can't be empty")]
    EmptyImportPath,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("error when preparing import directory")]
    Io(#[from] std::io::Error),

    #[error("invalid config")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T, E = DealError> = std::result::Result<T, E>;
