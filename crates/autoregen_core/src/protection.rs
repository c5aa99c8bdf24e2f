//! # Protection Oracle
//!
//! Computes the regions a regeneration pass must not touch.
//!
//! ## Sources
//!
//! - **Proximity**: every active agent protects a square of regions of
//!   radius `R` around its own region (Chebyshev, inclusive).
//! - **Claims**: every claim in the volume protects the inclusive region
//!   rectangle covering its corners.
//!
//! The set is recomputed for every cycle and never cached. It may protect
//! more than necessary, never less.
//!
//! When the oracle is given bounds (the regions the baseline covers), every
//! zone is clipped to them first. A claim spanning the whole world costs no
//! more than the baseline itself.

use std::collections::HashSet;

use crate::address::{RegionCoord, VolumeId};
use crate::error::{RegenError, RegenResult};
use crate::host::{AgentRegistry, ClaimsAuthority};

/// Regions excluded from one regeneration pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    regions: HashSet<RegionCoord>,
}

impl ExclusionSet {
    /// Creates an empty set (the whole volume is eligible).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from explicit regions.
    #[must_use]
    pub fn from_regions(regions: impl IntoIterator<Item = RegionCoord>) -> Self {
        Self {
            regions: regions.into_iter().collect(),
        }
    }

    /// Adds every region in the inclusive rectangle `[min, max]`.
    ///
    /// Expands the rectangle region by region; clip it first.
    pub fn protect_rect(&mut self, min: RegionCoord, max: RegionCoord) {
        for x in min.x..=max.x {
            for z in min.z..=max.z {
                self.regions.insert(RegionCoord::new(x, z));
            }
        }
    }

    /// Returns true if the region is protected.
    #[inline]
    #[must_use]
    pub fn contains(&self, region: RegionCoord) -> bool {
        self.regions.contains(&region)
    }

    /// Number of distinct protected regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns true if nothing is protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Square of regions within `radius` of `center`, saturating at the grid edge.
fn square(center: RegionCoord, radius: u32) -> (RegionCoord, RegionCoord) {
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    (
        RegionCoord::new(center.x.saturating_sub(r), center.z.saturating_sub(r)),
        RegionCoord::new(center.x.saturating_add(r), center.z.saturating_add(r)),
    )
}

/// Combines agent proximity and claims into an [`ExclusionSet`].
///
/// Reads both authorities at call time; holds no state between calls.
pub struct ProtectionOracle<'a> {
    agents: &'a dyn AgentRegistry,
    claims: Option<&'a dyn ClaimsAuthority>,
    buffer_radius: u32,
    bounds: Option<(RegionCoord, RegionCoord)>,
}

impl<'a> ProtectionOracle<'a> {
    /// Creates an oracle with proximity protection only.
    #[must_use]
    pub fn new(agents: &'a dyn AgentRegistry, buffer_radius: u32) -> Self {
        Self {
            agents,
            claims: None,
            buffer_radius,
            bounds: None,
        }
    }

    /// Attaches the (optional) claims authority.
    #[must_use]
    pub fn with_claims(mut self, claims: Option<&'a dyn ClaimsAuthority>) -> Self {
        self.claims = claims;
        self
    }

    /// Only protects regions inside the inclusive rectangle `[min, max]`.
    ///
    /// Without bounds every zone is expanded in full.
    #[must_use]
    pub fn within(mut self, min: RegionCoord, max: RegionCoord) -> Self {
        self.bounds = Some((min, max));
        self
    }

    /// Intersects `[min, max]` with the bounds, `None` if nothing is left.
    fn clip(&self, min: RegionCoord, max: RegionCoord) -> Option<(RegionCoord, RegionCoord)> {
        let (min, max) = match self.bounds {
            None => (min, max),
            Some((lo, hi)) => (
                RegionCoord::new(min.x.max(lo.x), min.z.max(lo.z)),
                RegionCoord::new(max.x.min(hi.x), max.z.min(hi.z)),
            ),
        };
        (min.x <= max.x && min.z <= max.z).then_some((min, max))
    }

    fn protect(&self, set: &mut ExclusionSet, min: RegionCoord, max: RegionCoord) {
        if let Some((min, max)) = self.clip(min, max) {
            set.protect_rect(min, max);
        }
    }

    /// Computes the exclusions for `volume` right now.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::AgentRegistry`] if agent positions cannot be
    /// read: without them the occupied regions are unknown. A failing
    /// claims authority only degrades to proximity protection.
    pub fn compute_exclusions(&self, volume: &VolumeId) -> RegenResult<ExclusionSet> {
        let mut set = ExclusionSet::new();

        let agents = self
            .agents
            .active_agents(volume)
            .map_err(|source| RegenError::AgentRegistry {
                volume: volume.clone(),
                source,
            })?;

        for agent in &agents {
            let (min, max) = square(agent.position.region(), self.buffer_radius);
            self.protect(&mut set, min, max);
        }
        let proximity = set.len();

        let mut applied = 0usize;
        match self.claims {
            None => {
                tracing::debug!("No claims authority for {}, proximity protection only", volume);
            }
            Some(authority) => match authority.claims_intersecting(volume) {
                Ok(claims) => {
                    for claim in claims.iter().filter(|c| c.volume == *volume) {
                        if let Some((min, max)) = claim.region_bounds() {
                            self.protect(&mut set, min, max);
                            applied += 1;
                        } else {
                            tracing::warn!(
                                "Claim {} in {} has an unresolved corner, not protected",
                                claim.id,
                                volume
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Claims authority unavailable for {} ({}), using proximity protection only",
                        volume,
                        e
                    );
                }
            },
        }

        tracing::info!(
            "Protected regions for {}: {} total ({} agents -> {} regions, {} claims)",
            volume,
            set.len(),
            agents.len(),
            proximity,
            applied
        );

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CellAddress;
    use crate::error::HostError;
    use crate::host::{Agent, Claim};
    use crate::memory::{MemoryAgents, MemoryClaims};

    fn world() -> VolumeId {
        VolumeId::from("world")
    }

    /// Cell position inside region (rx, rz).
    fn in_region(rx: i32, rz: i32) -> CellAddress {
        CellAddress::new(rx * 16 + 5, 64, rz * 16 + 9)
    }

    #[test]
    fn test_agent_radius_two_is_25_regions() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(10, 10) });

        let set = ProtectionOracle::new(&agents, 2)
            .compute_exclusions(&world())
            .unwrap();

        let expected = ExclusionSet::from_regions(
            (8..=12).flat_map(|x| (8..=12).map(move |z| RegionCoord::new(x, z))),
        );
        assert_eq!(set.len(), 25);
        assert_eq!(set, expected);
    }

    #[test]
    fn test_agent_radius_zero_is_own_region() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(10, 10) });

        let set = ProtectionOracle::new(&agents, 0)
            .compute_exclusions(&world())
            .unwrap();

        assert_eq!(set, ExclusionSet::from_regions([RegionCoord::new(10, 10)]));
    }

    #[test]
    fn test_square_not_circle() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(0, 0) });

        let set = ProtectionOracle::new(&agents, 3)
            .compute_exclusions(&world())
            .unwrap();

        assert!(set.contains(RegionCoord::new(3, 3)));
        assert!(set.contains(RegionCoord::new(-3, 3)));
        assert!(!set.contains(RegionCoord::new(4, 0)));
    }

    #[test]
    fn test_claim_spanning_two_by_two() {
        let agents = MemoryAgents::new();
        let claims = MemoryClaims::new();
        claims.add(Claim::new(
            7,
            world(),
            CellAddress::new(0, 0, 0),
            CellAddress::new(31, 255, 31),
        ));

        let set = ProtectionOracle::new(&agents, 10)
            .with_claims(Some(&claims))
            .compute_exclusions(&world())
            .unwrap();

        let expected = ExclusionSet::from_regions([
            RegionCoord::new(0, 0),
            RegionCoord::new(0, 1),
            RegionCoord::new(1, 0),
            RegionCoord::new(1, 1),
        ]);
        assert_eq!(set, expected);
    }

    #[test]
    fn test_claims_in_other_volume_ignored() {
        let agents = MemoryAgents::new();
        let claims = MemoryClaims::new();
        claims.add(Claim::new(
            1,
            VolumeId::from("world_nether"),
            CellAddress::new(0, 0, 0),
            CellAddress::new(15, 0, 15),
        ));

        let set = ProtectionOracle::new(&agents, 10)
            .with_claims(Some(&claims))
            .compute_exclusions(&world())
            .unwrap();

        assert!(set.is_empty());
    }

    #[test]
    fn test_claims_outage_falls_back_to_proximity() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(4, 4) });
        let claims = MemoryClaims::new();
        claims.add(Claim::new(
            1,
            world(),
            CellAddress::new(-100, 0, -100),
            CellAddress::new(-90, 0, -90),
        ));
        claims.set_available(false);

        let set = ProtectionOracle::new(&agents, 1)
            .with_claims(Some(&claims))
            .compute_exclusions(&world())
            .unwrap();

        assert_eq!(set.len(), 9);
        assert!(set.contains(RegionCoord::new(4, 4)));
        assert!(!set.contains(RegionCoord::new(-7, -7)));
    }

    #[test]
    fn test_agent_registry_failure_abandons() {
        let agents = MemoryAgents::new();
        agents.set_available(false);

        let result = ProtectionOracle::new(&agents, 2).compute_exclusions(&world());

        assert!(matches!(
            result,
            Err(RegenError::AgentRegistry { source: HostError::Unavailable(_), .. })
        ));
    }

    #[test]
    fn test_overlapping_zones_deduplicated() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(0, 0) });
        agents.place(&world(), Agent { id: 2, position: in_region(1, 0) });

        let set = ProtectionOracle::new(&agents, 1)
            .compute_exclusions(&world())
            .unwrap();

        // 3x3 and 3x3 shifted by one column: 4 columns x 3 rows
        assert_eq!(set.len(), 12);
    }

    #[test]
    fn test_huge_claim_clipped_to_bounds() {
        let agents = MemoryAgents::new();
        let claims = MemoryClaims::new();
        claims.add(Claim::new(
            1,
            world(),
            CellAddress::new(-65_536, 0, -65_536),
            CellAddress::new(65_535, 255, 65_535),
        ));

        let set = ProtectionOracle::new(&agents, 0)
            .with_claims(Some(&claims))
            .within(RegionCoord::new(-2, -2), RegionCoord::new(5, 5))
            .compute_exclusions(&world())
            .unwrap();

        assert_eq!(set.len(), 64);
        assert!(set.contains(RegionCoord::new(-2, -2)));
        assert!(set.contains(RegionCoord::new(5, 5)));
        assert!(!set.contains(RegionCoord::new(6, 0)));
    }

    #[test]
    fn test_world_border_claim_and_radius_stay_bounded() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(0, 0) });
        let claims = MemoryClaims::new();
        claims.add(Claim::new(
            1,
            world(),
            CellAddress::new(-30_000_000, 0, -30_000_000),
            CellAddress::new(30_000_000, 0, 30_000_000),
        ));

        let set = ProtectionOracle::new(&agents, u32::MAX)
            .with_claims(Some(&claims))
            .within(RegionCoord::new(0, 0), RegionCoord::new(7, 7))
            .compute_exclusions(&world())
            .unwrap();

        assert_eq!(set.len(), 64);
    }

    #[test]
    fn test_zones_outside_bounds_dropped() {
        let agents = MemoryAgents::new();
        agents.place(&world(), Agent { id: 1, position: in_region(20, 20) });
        agents.place(&world(), Agent { id: 2, position: in_region(0, 0) });
        let claims = MemoryClaims::new();
        claims.add(Claim::new(1, world(), CellAddress::new(-64, 0, -64), CellAddress::new(-33, 0, -33)));

        let set = ProtectionOracle::new(&agents, 1)
            .with_claims(Some(&claims))
            .within(RegionCoord::new(0, 0), RegionCoord::new(7, 7))
            .compute_exclusions(&world())
            .unwrap();

        // Agent 2's square keeps only its in-bounds quarter
        assert_eq!(
            set,
            ExclusionSet::from_regions([
                RegionCoord::new(0, 0),
                RegionCoord::new(0, 1),
                RegionCoord::new(1, 0),
                RegionCoord::new(1, 1),
            ])
        );
    }
}
