//! # Host Collaborators
//!
//! Traits the host environment implements so the core can read and write
//! its world without owning it.
//!
//! ```text
//! core defines:          host implements:
//! ┌──────────────────┐   ┌──────────────────┐
//! │ trait VolumeAccess│ ←─│ impl VolumeAccess│
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! Every call except `broadcast` is fallible. The core never assumes reads
//! are synchronous with writes elsewhere, lock-free or side-effect free.

use std::collections::HashSet;

use crate::address::{CellAddress, RegionCoord, VolumeId};
use crate::cell::CellRecord;
use crate::error::HostError;

/// Host agent/session identifier.
pub type AgentId = u64;

/// Host claim identifier.
pub type ClaimId = u64;

/// Interface to the host's volume storage.
pub trait VolumeAccess: Send + Sync {
    /// Streams every currently resident cell of the volume into `visit`.
    ///
    /// Cells may change while the scan runs; the snapshot simply records
    /// whatever was observed.
    fn for_each_resident_cell(
        &self,
        volume: &VolumeId,
        visit: &mut dyn FnMut(CellAddress, CellRecord),
    ) -> Result<(), HostError>;

    /// Reads the live state of one cell.
    fn get_cell(&self, volume: &VolumeId, address: CellAddress) -> Result<CellRecord, HostError>;

    /// Overwrites one cell. A record with `aux == 0` carries no auxiliary state.
    fn set_cell(
        &self,
        volume: &VolumeId,
        address: CellAddress,
        record: CellRecord,
    ) -> Result<(), HostError>;

    /// Returns the regions currently loaded for the volume.
    fn loaded_regions(&self, volume: &VolumeId) -> Result<HashSet<RegionCoord>, HostError>;
}

/// An active agent (player/session) present in a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Agent {
    /// Host identifier.
    pub id: AgentId,
    /// Current cell position.
    pub position: CellAddress,
}

/// Interface to the host's agent/session registry.
pub trait AgentRegistry: Send + Sync {
    /// Returns the agents currently active in the volume.
    fn active_agents(&self, volume: &VolumeId) -> Result<Vec<Agent>, HostError>;
}

/// An externally-declared protected rectangle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    /// Claims authority identifier.
    pub id: ClaimId,
    /// Volume the claim lives in.
    pub volume: VolumeId,
    /// Lesser boundary corner, if the authority could resolve it.
    pub lesser: Option<CellAddress>,
    /// Greater boundary corner, if the authority could resolve it.
    pub greater: Option<CellAddress>,
}

impl Claim {
    /// Creates a claim with both corners resolved.
    #[must_use]
    pub fn new(id: ClaimId, volume: VolumeId, lesser: CellAddress, greater: CellAddress) -> Self {
        Self {
            id,
            volume,
            lesser: Some(lesser),
            greater: Some(greater),
        }
    }

    /// Returns the inclusive region rectangle `(min, max)` covered by the claim.
    ///
    /// Corners are normalised per axis. `None` if a corner is unresolved.
    #[must_use]
    pub fn region_bounds(&self) -> Option<(RegionCoord, RegionCoord)> {
        let (a, b) = (self.lesser?, self.greater?);
        let min = RegionCoord::from_cell_pos(a.x.min(b.x), a.z.min(b.z));
        let max = RegionCoord::from_cell_pos(a.x.max(b.x), a.z.max(b.z));
        Some((min, max))
    }
}

/// Interface to a third-party claims/ownership authority.
pub trait ClaimsAuthority: Send + Sync {
    /// Returns the claims that intersect the volume.
    fn claims_intersecting(&self, volume: &VolumeId) -> Result<Vec<Claim>, HostError>;
}

/// Fire-and-forget message broadcast to the volume's observers.
pub trait NotificationSink: Send + Sync {
    /// Broadcasts a message. Delivery failures are the sink's concern.
    fn broadcast(&self, volume: &VolumeId, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_bounds_normalised() {
        let claim = Claim::new(
            1,
            VolumeId::from("world"),
            CellAddress::new(31, 255, 31),
            CellAddress::new(0, 0, 0),
        );
        assert_eq!(
            claim.region_bounds(),
            Some((RegionCoord::new(0, 0), RegionCoord::new(1, 1)))
        );
    }

    #[test]
    fn test_claim_bounds_negative_corners() {
        let claim = Claim::new(
            2,
            VolumeId::from("world"),
            CellAddress::new(-1, 64, -33),
            CellAddress::new(16, 70, -17),
        );
        assert_eq!(
            claim.region_bounds(),
            Some((RegionCoord::new(-1, -3), RegionCoord::new(1, -2)))
        );
    }

    #[test]
    fn test_claim_unresolved_corner() {
        let claim = Claim {
            id: 3,
            volume: VolumeId::from("world"),
            lesser: Some(CellAddress::new(0, 0, 0)),
            greater: None,
        };
        assert_eq!(claim.region_bounds(), None);
    }
}
