//! # Snapshot Store
//!
//! Owns the baseline a volume is restored toward.
//!
//! ## Lifecycle
//!
//! 1. Loaded once at startup if a valid file exists
//! 2. Otherwise captured from the live volume and persisted immediately
//! 3. Replaced wholesale by a new capture on request, never edited in place
//!
//! Publication is a single `Arc` swap, so a pass that already holds the
//! previous snapshot keeps a complete, consistent view for its whole run.

pub mod format;

use std::collections::HashMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;

use crate::address::{CellAddress, RegionCoord, VolumeId};
use crate::cell::CellRecord;
use crate::error::{RegenResult, SnapshotError};
use crate::host::VolumeAccess;

/// File extension of persisted snapshots.
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Baseline state of every non-empty cell of a volume at capture time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    volume: VolumeId,
    captured_at_ms: u64,
    cells: HashMap<CellAddress, CellRecord>,
    region_bounds: Option<(RegionCoord, RegionCoord)>,
}

impl Snapshot {
    /// Builds a snapshot from captured cells.
    #[must_use]
    pub fn from_cells(
        volume: VolumeId,
        captured_at_ms: u64,
        cells: HashMap<CellAddress, CellRecord>,
    ) -> Self {
        let region_bounds = cells.keys().map(|a| a.region()).fold(None, |bounds, r| match bounds {
            None => Some((r, r)),
            Some((min, max)) => Some((
                RegionCoord::new(min.x.min(r.x), min.z.min(r.z)),
                RegionCoord::new(max.x.max(r.x), max.z.max(r.z)),
            )),
        });
        Self {
            volume,
            captured_at_ms,
            cells,
            region_bounds,
        }
    }

    /// Volume the snapshot was captured from.
    #[must_use]
    pub fn volume(&self) -> &VolumeId {
        &self.volume
    }

    /// Capture time (unix epoch ms).
    #[must_use]
    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }

    /// Number of tracked cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if no cell is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Inclusive rectangle of regions holding tracked cells, `None` if empty.
    ///
    /// Nothing outside it can be restored, so exclusions only matter inside.
    #[must_use]
    pub fn region_bounds(&self) -> Option<(RegionCoord, RegionCoord)> {
        self.region_bounds
    }

    /// Recorded state of a cell, `None` if the cell is not tracked.
    #[must_use]
    pub fn get(&self, address: CellAddress) -> Option<CellRecord> {
        self.cells.get(&address).copied()
    }

    /// Iterates every tracked cell in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (CellAddress, CellRecord)> + '_ {
        self.cells.iter().map(|(a, r)| (*a, *r))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Replaces characters that are unsafe in file names.
fn file_stem(volume: &VolumeId) -> String {
    volume
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Capture, persistence and publication of one volume's baseline.
pub struct SnapshotStore {
    /// Volume this store manages.
    volume: VolumeId,
    /// Snapshot file.
    path: PathBuf,
    /// Published baseline.
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Held by whoever writes the file; refresh holds it through publish.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Creates a store persisting to `<dir>/<volume>.snap`.
    #[must_use]
    pub fn new(volume: VolumeId, dir: &Path) -> Self {
        let path = dir.join(format!("{}.{SNAPSHOT_EXTENSION}", file_stem(&volume)));
        Self::with_path(volume, path)
    }

    /// Creates a store persisting to an explicit file.
    #[must_use]
    pub fn with_path(volume: VolumeId, path: PathBuf) -> Self {
        Self {
            volume,
            path,
            current: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Volume this store manages.
    #[must_use]
    pub fn volume(&self) -> &VolumeId {
        &self.volume
    }

    /// Snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the published baseline, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Publishes a new baseline, replacing the previous one.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Captures every non-empty resident cell of the live volume.
    ///
    /// The result is not published; see [`SnapshotStore::refresh`].
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate the volume.
    pub fn capture(&self, host: &dyn VolumeAccess) -> RegenResult<Snapshot> {
        let start = Instant::now();
        let mut cells = HashMap::new();
        let mut scanned = 0u64;

        host.for_each_resident_cell(&self.volume, &mut |address: CellAddress, record: CellRecord| {
            scanned += 1;
            if !record.is_empty() {
                cells.insert(address, record);
            }
        })?;

        tracing::info!(
            "Captured {}: {} cells kept of {} scanned in {:?}",
            self.volume,
            cells.len(),
            scanned,
            start.elapsed()
        );

        Ok(Snapshot::from_cells(self.volume.clone(), now_ms(), cells))
    }

    /// Writes the snapshot to disk, atomically replacing the previous file.
    ///
    /// Each write goes to its own temporary file next to `<path>`, is synced,
    /// then renamed over `<path>`. Writers on one store are serialized, and a
    /// failed write removes its temporary file, so the previous baseline stays
    /// intact whatever happens mid-write.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot belongs to another volume or a file
    /// operation fails.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let _writer = self.write_lock.lock();
        self.write_file(snapshot)
    }

    fn write_file(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if snapshot.volume() != &self.volume {
            return Err(SnapshotError::VolumeMismatch {
                expected: self.volume.clone(),
                found: snapshot.volume().clone(),
            });
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let writer = format::encode(snapshot, BufWriter::new(NamedTempFile::new_in(dir)?))?;
        let tmp = writer.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!("Persisted {} cells of {} to {}", snapshot.len(), self.volume, self.path.display());
        Ok(())
    }

    /// Reads and validates the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, corrupt, or belongs to another
    /// volume. A failed load must be treated as "no snapshot".
    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        let bytes = fs::read(&self.path)?;
        let snapshot = format::decode(&bytes)?;
        if snapshot.volume() != &self.volume {
            return Err(SnapshotError::VolumeMismatch {
                expected: self.volume.clone(),
                found: snapshot.volume().clone(),
            });
        }
        Ok(snapshot)
    }

    /// Captures, persists and publishes a fresh baseline.
    ///
    /// A persist failure is logged; the new baseline is still published
    /// for this process. Concurrent refreshes run one after the other, so
    /// the file and the published baseline always end on the same capture.
    ///
    /// # Errors
    ///
    /// Returns error if the capture itself fails.
    pub fn refresh(&self, host: &dyn VolumeAccess) -> RegenResult<Arc<Snapshot>> {
        let _writer = self.write_lock.lock();
        let snapshot = self.capture(host)?;
        if let Err(e) = self.write_file(&snapshot) {
            tracing::error!(
                "Failed to persist snapshot of {} to {}: {}",
                self.volume,
                self.path.display(),
                e
            );
        }
        Ok(self.publish(snapshot))
    }

    /// Startup path: loads the persisted baseline, or captures a new one if
    /// the file is missing or fails validation.
    ///
    /// # Errors
    ///
    /// Returns error if a capture was needed and failed.
    pub fn load_or_capture(&self, host: &dyn VolumeAccess) -> RegenResult<Arc<Snapshot>> {
        match self.load() {
            Ok(snapshot) => {
                tracing::info!(
                    "Loaded snapshot of {}: {} cells from {}",
                    self.volume,
                    snapshot.len(),
                    self.path.display()
                );
                Ok(self.publish(snapshot))
            }
            Err(e) if e.is_missing() => {
                tracing::info!("No snapshot for {} yet, capturing baseline", self.volume);
                self.refresh(host)
            }
            Err(e) => {
                tracing::warn!(
                    "Snapshot {} rejected ({}), capturing a new baseline",
                    self.path.display(),
                    e
                );
                self.refresh(host)
            }
        }
    }
}
