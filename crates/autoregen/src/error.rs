//! Service error types.

use autoregen_core::{RegenError, VolumeId};
use thiserror::Error;

/// Errors returned by the regeneration service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The volume is not managed by this service.
    #[error("Volume {0} is not managed")]
    UnknownVolume(VolumeId),

    /// The volume's task is no longer running.
    #[error("Regeneration of {0} has stopped")]
    Stopped(VolumeId),

    /// No volume is left to manage after removing protected ones.
    #[error("No volumes to manage")]
    NoVolumes,

    /// A blocking worker panicked.
    #[error("Worker for {volume} failed: {reason}")]
    Worker {
        /// Volume the worker ran for.
        volume: VolumeId,
        /// Join error description.
        reason: String,
    },

    /// Core error.
    #[error(transparent)]
    Regen(#[from] RegenError),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
