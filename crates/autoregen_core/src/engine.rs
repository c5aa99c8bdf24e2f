//! # Regeneration Engine
//!
//! Restores drifted, unprotected cells toward the baseline.
//!
//! ## The Restore Pass
//!
//! ```text
//! for each (address, record) in snapshot:
//!   1. region(address) excluded?  -> skipped_protected, no live read
//!   2. read live cell             -> failure: failed
//!   3. live == record?            -> nothing to do
//!   4. set_cell(address, record)  -> restored | failed
//! ```
//!
//! Only the snapshot is iterated: cells the baseline never tracked are
//! never touched. Per-cell failures are counted and the pass continues.

use std::time::Instant;

use crate::address::VolumeId;
use crate::error::{RegenError, RegenResult};
use crate::host::VolumeAccess;
use crate::protection::ExclusionSet;
use crate::snapshot::Snapshot;

/// Default number of checked cells between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Individual cell failures logged at `warn` before dropping to `debug`.
const MAX_WARNED_FAILURES: u64 = 32;

/// Outcome counts of one restore pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    /// Tracked cells outside the exclusion set whose live state was examined.
    pub checked: u64,
    /// Cells written back to their recorded state.
    pub restored: u64,
    /// Tracked cells skipped because their region is protected.
    pub skipped_protected: u64,
    /// Cells whose read or restore failed.
    pub failed: u64,
}

impl RegenerationReport {
    /// Checked cells that already matched the baseline.
    #[must_use]
    pub const fn unchanged(&self) -> u64 {
        self.checked.saturating_sub(self.restored + self.failed)
    }
}

/// Diffs the live volume against a snapshot and restores drift.
#[derive(Clone, Copy, Debug)]
pub struct RegenerationEngine {
    progress_every: u64,
}

impl Default for RegenerationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

impl RegenerationEngine {
    /// Creates an engine logging progress every `progress_every` checked cells.
    #[must_use]
    pub fn new(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
        }
    }

    /// Runs one restore pass over `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::VolumeMismatch`] if the snapshot was captured
    /// from another volume. Cell-level failures never error the pass; they
    /// are counted in [`RegenerationReport::failed`].
    pub fn run(
        &self,
        host: &dyn VolumeAccess,
        volume: &VolumeId,
        snapshot: &Snapshot,
        exclusions: &ExclusionSet,
    ) -> RegenResult<RegenerationReport> {
        if snapshot.volume() != volume {
            return Err(RegenError::VolumeMismatch {
                expected: volume.clone(),
                found: snapshot.volume().clone(),
            });
        }

        let start = Instant::now();
        let total = snapshot.len();
        let mut report = RegenerationReport::default();

        tracing::info!(
            "Starting regeneration of {}: {} tracked cells, {} protected regions",
            volume,
            total,
            exclusions.len()
        );

        for (address, record) in snapshot.iter() {
            if exclusions.contains(address.region()) {
                report.skipped_protected += 1;
                continue;
            }

            report.checked += 1;
            let outcome = match host.get_cell(volume, address) {
                Ok(live) if live == record => Ok(false),
                Ok(_) => host.set_cell(volume, address, record).map(|()| true),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(true) => report.restored += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    if report.failed <= MAX_WARNED_FAILURES {
                        tracing::warn!("Failed to restore {:?} in {}: {}", address, volume, e);
                    } else {
                        tracing::debug!("Failed to restore {:?} in {}: {}", address, volume, e);
                    }
                }
            }

            if report.checked % self.progress_every == 0 {
                tracing::info!(
                    "Progress {}: {} checked, {} restored, {} failed",
                    volume,
                    report.checked,
                    report.restored,
                    report.failed
                );
            }
        }

        if report.failed > MAX_WARNED_FAILURES {
            tracing::warn!(
                "{} further restore failures in {} logged at debug level",
                report.failed - MAX_WARNED_FAILURES,
                volume
            );
        }

        tracing::info!(
            "Regeneration of {} complete in {:?}: {} restored, {} unchanged, {} protected, {} failed",
            volume,
            start.elapsed(),
            report.restored,
            report.unchanged(),
            report.skipped_protected,
            report.failed
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{CellAddress, RegionCoord};
    use crate::cell::CellRecord;
    use crate::memory::MemoryWorld;
    use std::collections::HashMap;

    fn world() -> VolumeId {
        VolumeId::from("world")
    }

    /// A 1000-cell baseline: x 0..40, z 0..25, y = 10, all stone.
    fn baseline() -> (MemoryWorld, Snapshot) {
        let host = MemoryWorld::new();
        host.fill_box(&world(), CellAddress::new(0, 10, 0), CellAddress::new(39, 10, 24), CellRecord::new(2));
        let mut cells = HashMap::new();
        host.for_each_resident_cell(&world(), &mut |a: CellAddress, r: CellRecord| {
            cells.insert(a, r);
        })
        .unwrap();
        (host, Snapshot::from_cells(world(), 0, cells))
    }

    fn mine_everything(host: &MemoryWorld, snapshot: &Snapshot) {
        for (address, _) in snapshot.iter() {
            host.set(&world(), address, CellRecord::EMPTY);
        }
    }

    #[test]
    fn test_converges_with_no_exclusions() {
        let (host, snapshot) = baseline();
        mine_everything(&host, &snapshot);
        host.set(&world(), CellAddress::new(5, 10, 5), CellRecord::with_aux(2, 4));

        let report = RegenerationEngine::default()
            .run(&host, &world(), &snapshot, &ExclusionSet::new())
            .unwrap();

        assert_eq!(report.checked, 1000);
        assert_eq!(report.restored, 1000);
        for (address, record) in snapshot.iter() {
            assert_eq!(host.get(&world(), address), record);
        }
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let (host, snapshot) = baseline();
        mine_everything(&host, &snapshot);
        let engine = RegenerationEngine::default();

        engine.run(&host, &world(), &snapshot, &ExclusionSet::new()).unwrap();
        let writes = host.restore_count();
        let second = engine.run(&host, &world(), &snapshot, &ExclusionSet::new()).unwrap();

        assert_eq!(second.restored, 0);
        assert_eq!(second.unchanged(), 1000);
        assert_eq!(host.restore_count(), writes);
    }

    #[test]
    fn test_excluded_regions_never_written() {
        let (host, snapshot) = baseline();
        mine_everything(&host, &snapshot);
        let exclusions = ExclusionSet::from_regions([RegionCoord::new(0, 0), RegionCoord::new(2, 1)]);

        let report = RegenerationEngine::default()
            .run(&host, &world(), &snapshot, &exclusions)
            .unwrap();

        // Region (0,0): 16x16 cells. Region (2,1): x 32..40, z 16..25 = 8x9.
        assert_eq!(report.skipped_protected, 256 + 72);
        assert_eq!(report.restored, 1000 - 256 - 72);
        for (address, _) in snapshot.iter() {
            if exclusions.contains(address.region()) {
                assert!(host.get(&world(), address).is_empty(), "protected {address:?} was written");
            }
        }
    }

    #[test]
    fn test_one_failing_write_in_1000() {
        let (host, snapshot) = baseline();
        mine_everything(&host, &snapshot);
        host.fail_writes_at(&world(), CellAddress::new(17, 10, 3));

        let report = RegenerationEngine::new(100)
            .run(&host, &world(), &snapshot, &ExclusionSet::new())
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.restored, 999);
        assert_eq!(report.checked, 1000);
    }

    #[test]
    fn test_unloaded_region_counts_failed_and_continues() {
        let (host, snapshot) = baseline();
        mine_everything(&host, &snapshot);
        host.unload_region(&world(), RegionCoord::new(1, 0));

        let report = RegenerationEngine::default()
            .run(&host, &world(), &snapshot, &ExclusionSet::new())
            .unwrap();

        assert_eq!(report.failed, 256);
        assert_eq!(report.restored, 744);
    }

    #[test]
    fn test_untracked_cells_left_alone() {
        let (host, snapshot) = baseline();
        let growth = CellAddress::new(3, 11, 3);
        host.set(&world(), growth, CellRecord::new(5));

        let report = RegenerationEngine::default()
            .run(&host, &world(), &snapshot, &ExclusionSet::new())
            .unwrap();

        assert_eq!(report.restored, 0);
        assert_eq!(host.get(&world(), growth), CellRecord::new(5));
    }

    #[test]
    fn test_foreign_snapshot_refused() {
        let (host, snapshot) = baseline();
        let result = RegenerationEngine::default().run(
            &host,
            &VolumeId::from("world_nether"),
            &snapshot,
            &ExclusionSet::new(),
        );
        assert!(matches!(result, Err(RegenError::VolumeMismatch { .. })));
        assert_eq!(host.restore_count(), 0);
    }
}
