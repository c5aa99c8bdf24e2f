//! # Volume Context
//!
//! Everything one managed volume needs, passed explicitly.
//!
//! ## Design
//!
//! - `VolumeContext`: host services plus the snapshot store; runs a pass
//! - `VolumeTimeline`: the scheduler of one volume bound to its context
//!
//! The timeline only decides *when*; the caller decides *where* a pass
//! runs. [`VolumeTimeline::tick_inline`] runs it on the calling thread,
//! the service crate hands the [`CyclePlan`] to a blocking worker and
//! reports back through [`VolumeTimeline::complete`].

use std::fmt;
use std::sync::Arc;

use crate::address::VolumeId;
use crate::config::RegenSettings;
use crate::engine::{RegenerationEngine, RegenerationReport};
use crate::error::{RegenError, RegenResult};
use crate::host::{AgentRegistry, ClaimsAuthority, NotificationSink, VolumeAccess};
use crate::protection::ProtectionOracle;
use crate::scheduler::{CycleEvent, CycleScheduler, CycleState, CycleTrigger};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Host capabilities shared by every volume.
#[derive(Clone)]
pub struct HostServices {
    /// Cell access.
    pub volume: Arc<dyn VolumeAccess>,
    /// Active agents.
    pub agents: Arc<dyn AgentRegistry>,
    /// Claims, if the host has a claims authority.
    pub claims: Option<Arc<dyn ClaimsAuthority>>,
    /// Broadcasts.
    pub notifier: Arc<dyn NotificationSink>,
}

/// An execution handed out by the timeline.
#[derive(Clone, Debug)]
pub struct CyclePlan {
    /// Cycle number.
    pub cycle: u64,
    /// Why the pass runs.
    pub trigger: CycleTrigger,
    /// Settings the pass runs under.
    pub settings: Arc<RegenSettings>,
}

/// Host services and baseline of one volume.
pub struct VolumeContext {
    volume: VolumeId,
    host: HostServices,
    store: SnapshotStore,
}

impl VolumeContext {
    /// Creates a context for the volume the store manages.
    #[must_use]
    pub fn new(host: HostServices, store: SnapshotStore) -> Self {
        Self {
            volume: store.volume().clone(),
            host,
            store,
        }
    }

    /// Managed volume.
    #[must_use]
    pub fn volume(&self) -> &VolumeId {
        &self.volume
    }

    /// Snapshot store of the volume.
    #[must_use]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Host services.
    #[must_use]
    pub fn host(&self) -> &HostServices {
        &self.host
    }

    /// Loads the persisted baseline or captures one.
    ///
    /// # Errors
    ///
    /// Returns error if a capture was needed and the host refused it.
    pub fn initialize(&self) -> RegenResult<Arc<Snapshot>> {
        self.store.load_or_capture(self.host.volume.as_ref())
    }

    /// Replaces the baseline with the current state of the volume.
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate the volume.
    pub fn recapture(&self) -> RegenResult<Arc<Snapshot>> {
        tracing::info!("Recapturing baseline of {}", self.volume);
        self.store.refresh(self.host.volume.as_ref())
    }

    /// Broadcasts the warning of an upcoming pass.
    pub fn send_warning(&self, settings: &RegenSettings, lead_ticks: u64) {
        let message = settings.render_warning(&self.volume, lead_ticks);
        self.host.notifier.broadcast(&self.volume, &message);
    }

    /// Runs one pass: protection oracle, restore, completion broadcast.
    ///
    /// # Errors
    ///
    /// - [`RegenError::NoSnapshot`] if no baseline was published; a baseline
    ///   is captured so the next cycle has one
    /// - [`RegenError::AgentRegistry`] if agents could not be listed; nothing
    ///   is restored
    pub fn execute(&self, plan: &CyclePlan) -> RegenResult<RegenerationReport> {
        let Some(snapshot) = self.store.current() else {
            tracing::warn!(
                "Cycle {} of {} has no baseline, capturing one instead of restoring",
                plan.cycle,
                self.volume
            );
            if let Err(e) = self.store.refresh(self.host.volume.as_ref()) {
                tracing::error!("Baseline capture of {} failed: {}", self.volume, e);
            }
            return Err(RegenError::NoSnapshot(self.volume.clone()));
        };

        tracing::info!("Cycle {} of {} started ({:?})", plan.cycle, self.volume, plan.trigger);

        let (min, max) = snapshot.region_bounds().unwrap_or_default();
        let exclusions = ProtectionOracle::new(self.host.agents.as_ref(), plan.settings.buffer_radius)
            .with_claims(self.host.claims.as_deref())
            .within(min, max)
            .compute_exclusions(&self.volume)?;

        let report = RegenerationEngine::new(plan.settings.progress_every).run(
            self.host.volume.as_ref(),
            &self.volume,
            &snapshot,
            &exclusions,
        )?;

        let message = plan.settings.render_complete(&self.volume, &report);
        self.host.notifier.broadcast(&self.volume, &message);
        Ok(report)
    }
}

/// Administrative view of one volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeStatus {
    /// Volume.
    pub volume: VolumeId,
    /// Scheduler state.
    pub state: CycleState,
    /// Current (or last) cycle number.
    pub cycle: u64,
    /// Ticks until the next warning or execution.
    pub ticks_until_next: Option<u64>,
    /// Cells in the published baseline.
    pub snapshot_cells: Option<usize>,
    /// Regions the host reports loaded.
    pub loaded_regions: Option<usize>,
    /// Outcome of the last completed pass.
    pub last_report: Option<RegenerationReport>,
    /// Buffer radius of the active settings.
    pub buffer_radius: u32,
    /// Interval of the active timing.
    pub interval_ticks: u64,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Volume {}: {} (cycle {})", self.volume, self.state.name(), self.cycle)?;
        match self.ticks_until_next {
            Some(ticks) => writeln!(f, "  next event in {ticks} ticks")?,
            None => writeln!(f, "  nothing scheduled")?,
        }
        match self.snapshot_cells {
            Some(cells) => writeln!(f, "  baseline: {cells} cells")?,
            None => writeln!(f, "  baseline: none")?,
        }
        if let Some(regions) = self.loaded_regions {
            writeln!(f, "  loaded regions: {regions}")?;
        }
        writeln!(
            f,
            "  interval {} ticks, buffer radius {}",
            self.interval_ticks, self.buffer_radius
        )?;
        if let Some(r) = self.last_report {
            write!(
                f,
                "  last pass: {} checked, {} restored, {} protected, {} failed",
                r.checked, r.restored, r.skipped_protected, r.failed
            )?;
        }
        Ok(())
    }
}

/// Scheduler of one volume bound to its context.
pub struct VolumeTimeline {
    context: Arc<VolumeContext>,
    scheduler: CycleScheduler,
    /// Settings of the current cycle.
    active: Arc<RegenSettings>,
    /// Settings adopted when the scheduler next leaves Idle.
    pending: Option<Arc<RegenSettings>>,
    last_report: Option<RegenerationReport>,
}

impl VolumeTimeline {
    /// Creates an unarmed timeline.
    #[must_use]
    pub fn new(context: Arc<VolumeContext>, settings: Arc<RegenSettings>) -> Self {
        Self {
            context,
            scheduler: CycleScheduler::new(settings.timing),
            active: settings,
            pending: None,
            last_report: None,
        }
    }

    /// Context the timeline drives.
    #[must_use]
    pub fn context(&self) -> &Arc<VolumeContext> {
        &self.context
    }

    /// Arms the countdown.
    pub fn start(&mut self) {
        self.scheduler.start();
        tracing::info!(
            "Regeneration of {} scheduled every {} ticks",
            self.context.volume(),
            self.active.timing.interval_ticks()
        );
    }

    /// Disarms the timer. A running pass finishes but nothing follows it.
    pub fn cancel(&mut self) {
        self.scheduler.cancel();
        tracing::info!("Regeneration of {} cancelled", self.context.volume());
    }

    /// Stores settings for the next cycle.
    pub fn reconfigure(&mut self, settings: Arc<RegenSettings>) {
        self.scheduler.reconfigure(settings.timing);
        self.pending = Some(settings);
    }

    /// Advances one tick, broadcasting the warning when it is due.
    ///
    /// Returns a plan when a scheduled pass must run.
    pub fn tick(&mut self) -> Option<CyclePlan> {
        match self.scheduler.tick()? {
            CycleEvent::Warning { cycle, lead_ticks } => {
                self.adopt_pending();
                tracing::info!(
                    "Cycle {} of {}: warning sent, executing in {} ticks",
                    cycle,
                    self.context.volume(),
                    lead_ticks
                );
                self.context.send_warning(&self.active, lead_ticks);
                None
            }
            CycleEvent::Execute { cycle, trigger } => {
                if trigger == CycleTrigger::Scheduled && self.scheduler.timing().warning_lead_ticks() == 0 {
                    // Zero lead: warned on the execution tick itself
                    self.adopt_pending();
                    self.context.send_warning(&self.active, 0);
                }
                Some(self.plan(cycle, trigger))
            }
        }
    }

    /// Starts a pass immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::CycleInFlight`] while a pass is executing.
    pub fn force(&mut self) -> RegenResult<CyclePlan> {
        let leaving_idle = self.scheduler.state() == CycleState::Idle;
        match self.scheduler.force()? {
            CycleEvent::Execute { cycle, trigger } => {
                if leaving_idle {
                    self.adopt_pending();
                }
                tracing::info!("Forced cycle {} of {}", cycle, self.context.volume());
                Ok(self.plan(cycle, trigger))
            }
            CycleEvent::Warning { .. } => Err(RegenError::NoCycleInFlight),
        }
    }

    /// Reports the end of the executing pass and re-arms the countdown.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::NoCycleInFlight`] if nothing is executing.
    pub fn complete(&mut self, report: Option<RegenerationReport>) -> RegenResult<()> {
        self.scheduler.complete()?;
        if report.is_some() {
            self.last_report = report;
        }
        Ok(())
    }

    /// Ticks and runs any due pass on the calling thread.
    pub fn tick_inline(&mut self) -> Option<RegenResult<RegenerationReport>> {
        let plan = self.tick()?;
        let outcome = self.context.execute(&plan);
        if let Err(e) = self.complete(outcome.as_ref().ok().copied()) {
            tracing::warn!("Completing cycle {} of {} failed: {}", plan.cycle, self.context.volume(), e);
        }
        Some(outcome)
    }

    /// Scheduler state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        self.scheduler.state()
    }

    /// Settings of the current cycle.
    #[must_use]
    pub fn settings(&self) -> &Arc<RegenSettings> {
        &self.active
    }

    /// Administrative status.
    #[must_use]
    pub fn status(&self) -> VolumeStatus {
        let volume = self.context.volume().clone();
        let loaded_regions = self
            .context
            .host()
            .volume
            .loaded_regions(&volume)
            .ok()
            .map(|r| r.len());
        VolumeStatus {
            state: self.scheduler.state(),
            cycle: self.scheduler.cycle(),
            ticks_until_next: self.scheduler.ticks_until_next_event(),
            snapshot_cells: self.context.store().current().map(|s| s.len()),
            loaded_regions,
            last_report: self.last_report,
            buffer_radius: self.active.buffer_radius,
            interval_ticks: self.scheduler.timing().interval_ticks(),
            volume,
        }
    }

    fn plan(&self, cycle: u64, trigger: CycleTrigger) -> CyclePlan {
        CyclePlan {
            cycle,
            trigger,
            settings: Arc::clone(&self.active),
        }
    }

    fn adopt_pending(&mut self) {
        if let Some(settings) = self.pending.take() {
            self.active = settings;
        }
    }
}
