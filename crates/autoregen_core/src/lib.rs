//! # AUTOREGEN Core
//!
//! Periodic restoration of a managed volume to a known-good baseline,
//! without touching the regions where agents are active or claims exist.
//!
//! ## Design Principles
//!
//! 1. **Baseline-driven**: only cells recorded in the snapshot are ever restored
//! 2. **Never undercount protection**: exclusions are recomputed every cycle
//! 3. **Partial failure is normal**: one bad cell never aborts a pass
//! 4. **Explicit context**: every volume has its own context, no globals
//!
//! ## Core Components
//!
//! - `ProtectionOracle`: agent buffer zones + claim rectangles -> `ExclusionSet`
//! - `SnapshotStore`: capture, persist, load and publish the baseline
//! - `RegenerationEngine`: diff the live volume against the baseline and restore
//! - `CycleScheduler`: the tick-driven warning/execution state machine
//! - `VolumeTimeline`: binds the scheduler to a `VolumeContext`
//!
//! ## Example
//!
//! ```rust,ignore
//! use autoregen_core::{RegenConfig, SnapshotStore, VolumeContext, VolumeTimeline};
//!
//! let config = RegenConfig::load_or_default("autoregen.toml");
//! let store = SnapshotStore::new("world".into(), &config.snapshot_dir);
//! let context = Arc::new(VolumeContext::new(host, store));
//! context.initialize()?;
//!
//! let mut timeline = VolumeTimeline::new(context, Arc::new(config.settings()));
//! timeline.start();
//!
//! // Once per host tick
//! if let Some(outcome) = timeline.tick_inline() {
//!     println!("{outcome:?}");
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod address;
pub mod cell;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod memory;
pub mod protection;
pub mod scheduler;
pub mod snapshot;

pub use address::{CellAddress, RegionCoord, VolumeId, REGION_BITS, REGION_SIZE};
pub use cell::CellRecord;
pub use config::{RegenConfig, RegenSettings};
pub use context::{CyclePlan, HostServices, VolumeContext, VolumeStatus, VolumeTimeline};
pub use engine::{RegenerationEngine, RegenerationReport};
pub use error::{HostError, RegenError, RegenResult, SnapshotError};
pub use host::{Agent, AgentRegistry, Claim, ClaimsAuthority, NotificationSink, VolumeAccess};
pub use protection::{ExclusionSet, ProtectionOracle};
pub use scheduler::{CycleEvent, CycleScheduler, CycleState, CycleTiming, CycleTrigger};
pub use snapshot::{Snapshot, SnapshotStore};
