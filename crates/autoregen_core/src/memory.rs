//! # In-Memory Host
//!
//! Implementations of every host trait backed by plain maps. Used by the
//! simulation binary, the benchmarks and the tests.
//!
//! Failure injection:
//! - [`MemoryWorld::unload_region`]: reads and writes in the region fail
//! - [`MemoryWorld::fail_writes_at`]: writes to one cell fail
//! - [`MemoryAgents::set_available`] / [`MemoryClaims::set_available`]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::address::{CellAddress, RegionCoord, VolumeId};
use crate::cell::CellRecord;
use crate::error::HostError;
use crate::host::{Agent, AgentId, AgentRegistry, Claim, ClaimsAuthority, NotificationSink, VolumeAccess};

#[derive(Default)]
struct MemoryVolume {
    regions: HashMap<RegionCoord, HashMap<CellAddress, CellRecord>>,
    unloaded: HashSet<RegionCoord>,
    failing_writes: HashSet<CellAddress>,
}

impl MemoryVolume {
    fn cell(&self, address: CellAddress) -> Option<CellRecord> {
        self.regions.get(&address.region())?.get(&address).copied()
    }

    fn insert(&mut self, address: CellAddress, record: CellRecord) {
        self.regions.entry(address.region()).or_default().insert(address, record);
    }

    fn resident(&self, region: RegionCoord) -> Vec<(CellAddress, CellRecord)> {
        if self.unloaded.contains(&region) {
            return Vec::new();
        }
        self.regions
            .get(&region)
            .map(|cells| cells.iter().map(|(a, r)| (*a, *r)).collect())
            .unwrap_or_default()
    }
}

/// In-memory volumes. Cells never written read as [`CellRecord::EMPTY`].
///
/// Cells are kept per region. A resident scan copies one region at a time
/// and never holds the lock while visiting, so writers are not blocked by
/// a capture.
#[derive(Default)]
pub struct MemoryWorld {
    volumes: RwLock<HashMap<VolumeId, MemoryVolume>>,
    /// Successful `set_cell` calls made through the trait.
    restores: AtomicU64,
}

impl MemoryWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a cell directly (an external mutation, not counted as a restore).
    pub fn set(&self, volume: &VolumeId, address: CellAddress, record: CellRecord) {
        self.volumes
            .write()
            .entry(volume.clone())
            .or_default()
            .insert(address, record);
    }

    /// Reads a cell directly, ignoring unloaded regions.
    #[must_use]
    pub fn get(&self, volume: &VolumeId, address: CellAddress) -> CellRecord {
        self.volumes
            .read()
            .get(volume)
            .and_then(|v| v.cell(address))
            .unwrap_or(CellRecord::EMPTY)
    }

    /// Fills the inclusive box `[min, max]` with one record.
    pub fn fill_box(&self, volume: &VolumeId, min: CellAddress, max: CellAddress, record: CellRecord) {
        let mut volumes = self.volumes.write();
        let v = volumes.entry(volume.clone()).or_default();
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    v.insert(CellAddress::new(x, y, z), record);
                }
            }
        }
    }

    /// Marks a region unloaded: its cells are no longer resident or accessible.
    pub fn unload_region(&self, volume: &VolumeId, region: RegionCoord) {
        self.volumes.write().entry(volume.clone()).or_default().unloaded.insert(region);
    }

    /// Makes every write to `address` fail.
    pub fn fail_writes_at(&self, volume: &VolumeId, address: CellAddress) {
        self.volumes
            .write()
            .entry(volume.clone())
            .or_default()
            .failing_writes
            .insert(address);
    }

    /// Number of successful restores issued through [`VolumeAccess::set_cell`].
    #[must_use]
    pub fn restore_count(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }

    /// Number of stored cells in a volume (including explicit empty cells).
    #[must_use]
    pub fn cell_count(&self, volume: &VolumeId) -> usize {
        self.volumes
            .read()
            .get(volume)
            .map_or(0, |v| v.regions.values().map(HashMap::len).sum())
    }
}

impl VolumeAccess for MemoryWorld {
    fn for_each_resident_cell(
        &self,
        volume: &VolumeId,
        visit: &mut dyn FnMut(CellAddress, CellRecord),
    ) -> Result<(), HostError> {
        let regions: Vec<RegionCoord> = {
            let volumes = self.volumes.read();
            let v = volumes
                .get(volume)
                .ok_or_else(|| HostError::VolumeUnavailable(volume.clone()))?;
            v.regions.keys().copied().collect()
        };

        for region in regions {
            let cells = self
                .volumes
                .read()
                .get(volume)
                .map(|v| v.resident(region))
                .unwrap_or_default();
            for (address, record) in cells {
                visit(address, record);
            }
        }
        Ok(())
    }

    fn get_cell(&self, volume: &VolumeId, address: CellAddress) -> Result<CellRecord, HostError> {
        let volumes = self.volumes.read();
        let v = volumes
            .get(volume)
            .ok_or_else(|| HostError::VolumeUnavailable(volume.clone()))?;
        if v.unloaded.contains(&address.region()) {
            return Err(HostError::RegionUnloaded(address.region()));
        }
        Ok(v.cell(address).unwrap_or(CellRecord::EMPTY))
    }

    fn set_cell(
        &self,
        volume: &VolumeId,
        address: CellAddress,
        record: CellRecord,
    ) -> Result<(), HostError> {
        let mut volumes = self.volumes.write();
        let v = volumes
            .get_mut(volume)
            .ok_or_else(|| HostError::VolumeUnavailable(volume.clone()))?;
        if v.unloaded.contains(&address.region()) {
            return Err(HostError::RegionUnloaded(address.region()));
        }
        if v.failing_writes.contains(&address) {
            return Err(HostError::Rejected(format!("write to {address:?} refused")));
        }
        v.insert(address, record);
        self.restores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn loaded_regions(&self, volume: &VolumeId) -> Result<HashSet<RegionCoord>, HostError> {
        let volumes = self.volumes.read();
        let v = volumes
            .get(volume)
            .ok_or_else(|| HostError::VolumeUnavailable(volume.clone()))?;
        Ok(v.regions
            .keys()
            .filter(|r| !v.unloaded.contains(r))
            .copied()
            .collect())
    }
}

/// In-memory agent registry.
#[derive(Default)]
pub struct MemoryAgents {
    agents: RwLock<HashMap<VolumeId, HashMap<AgentId, CellAddress>>>,
    unavailable: AtomicBool,
}

impl MemoryAgents {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or moves an agent.
    pub fn place(&self, volume: &VolumeId, agent: Agent) {
        self.agents
            .write()
            .entry(volume.clone())
            .or_default()
            .insert(agent.id, agent.position);
    }

    /// Simulates a registry outage.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }
}

impl AgentRegistry for MemoryAgents {
    fn active_agents(&self, volume: &VolumeId) -> Result<Vec<Agent>, HostError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(HostError::Unavailable("agent registry".into()));
        }
        Ok(self
            .agents
            .read()
            .get(volume)
            .map(|agents| {
                agents
                    .iter()
                    .map(|(id, position)| Agent { id: *id, position: *position })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// In-memory claims authority.
#[derive(Default)]
pub struct MemoryClaims {
    claims: RwLock<Vec<Claim>>,
    unavailable: AtomicBool,
}

impl MemoryClaims {
    /// Creates an authority with no claims.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a claim.
    pub fn add(&self, claim: Claim) {
        self.claims.write().push(claim);
    }

    /// Simulates the authority being down.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }
}

impl ClaimsAuthority for MemoryClaims {
    fn claims_intersecting(&self, volume: &VolumeId) -> Result<Vec<Claim>, HostError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(HostError::Unavailable("claims authority".into()));
        }
        Ok(self
            .claims
            .read()
            .iter()
            .filter(|c| c.volume == *volume)
            .cloned()
            .collect())
    }
}

/// Notification sink that keeps every broadcast.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(VolumeId, String)>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages broadcast so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(VolumeId, String)> {
        self.messages.lock().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn broadcast(&self, volume: &VolumeId, message: &str) {
        tracing::info!("[{}] {}", volume, message);
        self.messages.lock().push((volume.clone(), message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unloaded_region_not_resident() {
        let world = MemoryWorld::new();
        let id = VolumeId::from("world");
        world.fill_box(&id, CellAddress::new(0, 0, 0), CellAddress::new(31, 0, 0), CellRecord::new(1));
        world.unload_region(&id, RegionCoord::new(1, 0));

        let mut seen = 0;
        world
            .for_each_resident_cell(&id, &mut |_a: CellAddress, _r: CellRecord| seen += 1)
            .unwrap();

        assert_eq!(seen, 16);
        assert_eq!(
            world.get_cell(&id, CellAddress::new(20, 0, 0)),
            Err(HostError::RegionUnloaded(RegionCoord::new(1, 0)))
        );
        assert_eq!(world.loaded_regions(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_direct_set_is_not_a_restore() {
        let world = MemoryWorld::new();
        let id = VolumeId::from("world");
        world.set(&id, CellAddress::new(1, 1, 1), CellRecord::new(3));
        world.set_cell(&id, CellAddress::new(1, 1, 1), CellRecord::new(4)).unwrap();

        assert_eq!(world.restore_count(), 1);
        assert_eq!(world.get(&id, CellAddress::new(1, 1, 1)), CellRecord::new(4));
    }

    #[test]
    fn test_scan_does_not_block_writers() {
        let world = MemoryWorld::new();
        let id = VolumeId::from("world");
        let copy = VolumeId::from("world_copy");
        world.fill_box(&id, CellAddress::new(0, 0, 0), CellAddress::new(31, 1, 31), CellRecord::new(1));

        // Each visit writes through the same lock the scan reads
        let mut seen = 0;
        world
            .for_each_resident_cell(&id, &mut |a: CellAddress, r: CellRecord| {
                seen += 1;
                world.set(&copy, a, r);
            })
            .unwrap();

        assert_eq!(seen, 32 * 2 * 32);
        assert_eq!(world.cell_count(&copy), 32 * 2 * 32);
        assert_eq!(world.get(&copy, CellAddress::new(20, 1, 20)), CellRecord::new(1));
    }
}
