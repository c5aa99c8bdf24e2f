//! # Regeneration Service
//!
//! One tokio task per managed volume, controlled through a command channel.
//!
//! ## Commands
//!
//! - `force`: start a pass now (rejected while one is executing)
//! - `status`: scheduler state, baseline size, last report
//! - `reload`: new settings, adopted by the next cycle
//! - `recapture`: replace the baseline with the live volume
//! - `shutdown`: cancel every timer; a running pass is left to finish

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autoregen_core::{
    CyclePlan, HostServices, RegenConfig, RegenSettings, RegenerationReport, SnapshotStore,
    VolumeContext, VolumeId, VolumeStatus, VolumeTimeline,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ServiceError, ServiceResult};

/// Queued commands per volume.
const COMMAND_QUEUE: usize = 32;

/// Startup parameters of the service.
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    /// Volumes to manage.
    pub volumes: Vec<VolumeId>,
    /// Settings of the first cycle.
    pub settings: RegenSettings,
    /// Wall-clock length of one tick.
    pub tick: Duration,
    /// Directory of the snapshot files.
    pub snapshot_dir: PathBuf,
}

impl ServiceOptions {
    /// Derives options from a configuration file.
    #[must_use]
    pub fn from_config(config: &RegenConfig) -> Self {
        let ticks_per_second = u32::try_from(config.ticks_per_second.max(1)).unwrap_or(u32::MAX);
        Self {
            volumes: config.managed_volumes(),
            settings: config.settings(),
            tick: Duration::from_secs(1) / ticks_per_second,
            snapshot_dir: config.snapshot_dir.clone(),
        }
    }
}

enum Command {
    Force(oneshot::Sender<ServiceResult<u64>>),
    Status(oneshot::Sender<VolumeStatus>),
    Reload(Arc<RegenSettings>),
    Recapture(oneshot::Sender<ServiceResult<usize>>),
    Stop,
}

struct VolumeHandle {
    volume: VolumeId,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Running regeneration service.
pub struct RegenService {
    volumes: Vec<VolumeHandle>,
}

impl RegenService {
    /// Starts one task per volume. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NoVolumes`] if there is nothing to manage.
    pub fn start(options: ServiceOptions, host: HostServices) -> ServiceResult<Self> {
        if options.volumes.is_empty() {
            return Err(ServiceError::NoVolumes);
        }

        let settings = Arc::new(options.settings);
        tracing::info!(
            "AUTOREGEN starting: {} volume(s), interval {} ticks, warning {} ticks, buffer radius {}",
            options.volumes.len(),
            settings.timing.interval_ticks(),
            settings.timing.warning_lead_ticks(),
            settings.buffer_radius
        );

        let volumes = options
            .volumes
            .into_iter()
            .map(|volume| {
                let store = SnapshotStore::new(volume.clone(), &options.snapshot_dir);
                let context = Arc::new(VolumeContext::new(host.clone(), store));
                let timeline = VolumeTimeline::new(context, Arc::clone(&settings));
                let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
                let task = tokio::spawn(run_volume(timeline, options.tick, receiver));
                tracing::info!("Managing volume {}", volume);
                VolumeHandle { volume, commands, task }
            })
            .collect();

        Ok(Self { volumes })
    }

    /// Managed volumes, in configuration order.
    #[must_use]
    pub fn volumes(&self) -> Vec<VolumeId> {
        self.volumes.iter().map(|h| h.volume.clone()).collect()
    }

    /// Starts a pass on `volume` now and returns its cycle number.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Regen`] wrapping `CycleInFlight` while a pass
    /// is executing, or an error if the volume is unknown or stopped.
    pub async fn force(&self, volume: &VolumeId) -> ServiceResult<u64> {
        let (reply, response) = oneshot::channel();
        self.send(volume, Command::Force(reply)).await?;
        response.await.map_err(|_| ServiceError::Stopped(volume.clone()))?
    }

    /// Status of one volume.
    ///
    /// # Errors
    ///
    /// Returns error if the volume is unknown or stopped.
    pub async fn status(&self, volume: &VolumeId) -> ServiceResult<VolumeStatus> {
        let (reply, response) = oneshot::channel();
        self.send(volume, Command::Status(reply)).await?;
        response.await.map_err(|_| ServiceError::Stopped(volume.clone()))
    }

    /// Status of every running volume.
    pub async fn status_all(&self) -> Vec<VolumeStatus> {
        let mut statuses = Vec::with_capacity(self.volumes.len());
        for handle in &self.volumes {
            match self.status(&handle.volume).await {
                Ok(status) => statuses.push(status),
                Err(e) => tracing::warn!("No status for {}: {}", handle.volume, e),
            }
        }
        statuses
    }

    /// Applies a reloaded configuration to the next cycle of every volume.
    ///
    /// The set of managed volumes is fixed at startup; changes to it are
    /// logged and ignored until restart.
    ///
    /// # Errors
    ///
    /// Returns error if a volume task has stopped.
    pub async fn reload(&self, config: &RegenConfig) -> ServiceResult<()> {
        let config = config.clone().sanitized();
        if config.managed_volumes() != self.volumes() {
            tracing::warn!("Volume list changed in configuration, restart to apply");
        }

        let settings = Arc::new(config.settings());
        for handle in &self.volumes {
            self.send(&handle.volume, Command::Reload(Arc::clone(&settings))).await?;
        }
        tracing::info!("Configuration reloaded, applies from the next cycle");
        Ok(())
    }

    /// Replaces the baseline of `volume` and returns its cell count.
    ///
    /// # Errors
    ///
    /// Returns error if the capture fails or the volume is unknown or stopped.
    pub async fn recapture(&self, volume: &VolumeId) -> ServiceResult<usize> {
        let (reply, response) = oneshot::channel();
        self.send(volume, Command::Recapture(reply)).await?;
        response.await.map_err(|_| ServiceError::Stopped(volume.clone()))?
    }

    /// Cancels every timer and waits for the volume tasks to exit.
    ///
    /// A pass already running on a blocking thread is not interrupted.
    pub async fn shutdown(self) {
        for handle in self.volumes {
            if handle.commands.send(Command::Stop).await.is_err() {
                tracing::debug!("Task of {} already gone", handle.volume);
            }
            if let Err(e) = handle.task.await {
                tracing::error!("Task of {} failed: {}", handle.volume, e);
            }
        }
        tracing::info!("AUTOREGEN stopped");
    }

    async fn send(&self, volume: &VolumeId, command: Command) -> ServiceResult<()> {
        let handle = self
            .volumes
            .iter()
            .find(|h| &h.volume == volume)
            .ok_or_else(|| ServiceError::UnknownVolume(volume.clone()))?;
        handle
            .commands
            .send(command)
            .await
            .map_err(|_| ServiceError::Stopped(volume.clone()))
    }
}

/// Timer and command loop of one volume.
async fn run_volume(mut timeline: VolumeTimeline, tick: Duration, mut commands: mpsc::Receiver<Command>) {
    let context = Arc::clone(timeline.context());
    let volume = context.volume().clone();

    let init = {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || context.initialize()).await
    };
    match init {
        Ok(Ok(snapshot)) => tracing::info!("Baseline of {} ready: {} cells", volume, snapshot.len()),
        Ok(Err(e)) => tracing::error!("No baseline for {}: {}", volume, e),
        Err(e) => tracing::error!("Baseline worker for {} failed: {}", volume, e),
    }

    timeline.start();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(plan) = timeline.tick() {
                    spawn_pass(&context, plan, done_tx.clone());
                }
            }
            Some(report) = done_rx.recv() => {
                if let Err(e) = timeline.complete(report) {
                    tracing::warn!("Pass of {} completed out of order: {}", volume, e);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Force(reply)) => {
                    let result = timeline.force().map(|plan| {
                        let cycle = plan.cycle;
                        spawn_pass(&context, plan, done_tx.clone());
                        cycle
                    });
                    let _ = reply.send(result.map_err(ServiceError::from));
                }
                Some(Command::Status(reply)) => {
                    let _ = reply.send(timeline.status());
                }
                Some(Command::Reload(settings)) => timeline.reconfigure(settings),
                Some(Command::Recapture(reply)) => spawn_recapture(&context, reply),
                Some(Command::Stop) | None => {
                    timeline.cancel();
                    break;
                }
            },
        }
    }
}

/// Runs a pass on a blocking thread and reports its outcome on `done`.
fn spawn_pass(
    context: &Arc<VolumeContext>,
    plan: CyclePlan,
    done: mpsc::UnboundedSender<Option<RegenerationReport>>,
) {
    let context = Arc::clone(context);
    tokio::spawn(async move {
        let volume = context.volume().clone();
        let cycle = plan.cycle;
        let outcome = tokio::task::spawn_blocking(move || context.execute(&plan)).await;
        let report = match outcome {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::warn!("Cycle {} of {} abandoned: {}", cycle, volume, e);
                None
            }
            Err(e) => {
                tracing::error!("Cycle {} of {} worker failed: {}", cycle, volume, e);
                None
            }
        };
        if done.send(report).is_err() {
            tracing::debug!("Cycle {} of {} finished after shutdown", cycle, volume);
        }
    });
}

fn spawn_recapture(context: &Arc<VolumeContext>, reply: oneshot::Sender<ServiceResult<usize>>) {
    let context = Arc::clone(context);
    tokio::spawn(async move {
        let volume = context.volume().clone();
        let outcome = tokio::task::spawn_blocking(move || context.recapture()).await;
        let result = match outcome {
            Ok(Ok(snapshot)) => Ok(snapshot.len()),
            Ok(Err(e)) => Err(ServiceError::from(e)),
            Err(e) => Err(ServiceError::Worker {
                volume,
                reason: e.to_string(),
            }),
        };
        let _ = reply.send(result);
    });
}
