use launch_dispatch::DispatchError;
use thiserror::Error;

use crate::subsystems::SubsystemKind;

/// Errors raised while wiring or finishing startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("subsystem '{0}' is enabled but no adapter was registered")]
    MissingAdapter(SubsystemKind),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to persist launch state: {0:#}")]
    Persistence(anyhow::Error),
    #[error("startup is not ready to finalize")]
    NotReady,
    #[error("startup was already finalized")]
    AlreadyFinalized,
}
