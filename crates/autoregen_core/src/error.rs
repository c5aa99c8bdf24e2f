//! # Error Types
//!
//! All errors that can occur in the regeneration core. None of them is
//! process-fatal: the worst outcome is an abandoned or partial pass.

use thiserror::Error;

use crate::address::{CellAddress, RegionCoord, VolumeId};

/// Errors raised by host collaborators (volume storage, agent registry,
/// claims authority).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The region holding the cell is not loaded.
    #[error("region {0} is not loaded")]
    RegionUnloaded(RegionCoord),

    /// The volume does not exist on the host.
    #[error("volume {0} is not available")]
    VolumeUnavailable(VolumeId),

    /// A collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The host refused the operation.
    #[error("host rejected operation: {0}")]
    Rejected(String),
}

/// Errors reading or writing a persisted snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Underlying file operation failed.
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// File does not start with the snapshot magic.
    #[error("not a snapshot file (bad magic)")]
    BadMagic,

    /// File was written by an unknown format version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// File ends before the structure it declares.
    #[error("snapshot truncated at byte {0}")]
    Truncated(usize),

    /// Stored checksum does not match the contents.
    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum found in the trailer.
        stored: u32,
        /// Checksum of the bytes actually read.
        computed: u32,
    },

    /// A compressed frame is malformed.
    #[error("snapshot frame corrupt: {0}")]
    CorruptFrame(String),

    /// Header cell count disagrees with the frames.
    #[error("snapshot declares {declared} cells but holds {actual}")]
    CountMismatch {
        /// Count in the header.
        declared: u64,
        /// Count found in the frames.
        actual: u64,
    },

    /// The same address appears twice.
    #[error("duplicate cell {0:?} in snapshot")]
    DuplicateCell(CellAddress),

    /// Volume name in the header is not valid UTF-8.
    #[error("invalid volume name in snapshot header")]
    InvalidVolumeName,

    /// Snapshot was captured from a different volume.
    #[error("snapshot is for volume {found}, expected {expected}")]
    VolumeMismatch {
        /// Volume the store manages.
        expected: VolumeId,
        /// Volume named in the file.
        found: VolumeId,
    },
}

impl SnapshotError {
    /// Returns true if the snapshot file simply does not exist yet.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Errors that can occur in the regeneration core.
#[derive(Error, Debug)]
pub enum RegenError {
    /// A forced run was requested while a pass is executing.
    #[error("regeneration cycle {cycle} is already running")]
    CycleInFlight {
        /// Cycle currently executing.
        cycle: u64,
    },

    /// `complete` was called with no cycle executing.
    #[error("no regeneration cycle is in flight")]
    NoCycleInFlight,

    /// No baseline snapshot is available for the volume.
    #[error("no baseline snapshot for volume {0}")]
    NoSnapshot(VolumeId),

    /// A snapshot for one volume was handed to a pass on another.
    #[error("snapshot belongs to volume {found}, pass targets {expected}")]
    VolumeMismatch {
        /// Volume the pass targets.
        expected: VolumeId,
        /// Volume the snapshot was captured from.
        found: VolumeId,
    },

    /// Agent positions could not be read, so protection cannot be computed.
    #[error("agent registry unavailable for volume {volume}: {source}")]
    AgentRegistry {
        /// Volume being protected.
        volume: VolumeId,
        /// Underlying host error.
        #[source]
        source: HostError,
    },

    /// A host call failed outside of the per-cell restore loop.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Snapshot persistence failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for regeneration operations.
pub type RegenResult<T> = Result<T, RegenError>;
