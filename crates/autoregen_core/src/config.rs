//! # Configuration
//!
//! Loaded from TOML once at startup and again on reload.
//!
//! ```toml
//! target-volumes = ["world", "world_nether"]
//! protected-volumes = ["world_nether"]
//! regen-interval-minutes = 120
//! warning-minutes = 10
//! buffer-radius = 10
//! warning-message = "&e⚠ World regeneration in {minutes} minutes!"
//! complete-message = "&a✅ World regeneration complete!"
//! ```
//!
//! Configuration errors are never fatal: a missing or unparsable file
//! yields the defaults, an invalid field falls back to its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::VolumeId;
use crate::engine::{RegenerationReport, DEFAULT_PROGRESS_INTERVAL};
use crate::error::{RegenError, RegenResult};
use crate::scheduler::CycleTiming;

/// Largest accepted buffer radius, in regions.
pub const MAX_BUFFER_RADIUS: u32 = 256;

const DEFAULT_INTERVAL_MINUTES: u64 = 120;
const DEFAULT_WARNING_MINUTES: u64 = 10;
const DEFAULT_BUFFER_RADIUS: u32 = 10;
const DEFAULT_TICKS_PER_SECOND: u64 = 20;
const DEFAULT_WARNING_MESSAGE: &str = "&e⚠ World regeneration in {minutes} minutes!";
const DEFAULT_COMPLETE_MESSAGE: &str = "&a✅ World regeneration complete!";

/// Regeneration configuration as written in the TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegenConfig {
    /// Volumes to regenerate.
    pub target_volumes: Vec<String>,
    /// Volumes never regenerated, even if targeted.
    pub protected_volumes: Vec<String>,
    /// Minutes between regenerations.
    pub regen_interval_minutes: u64,
    /// Minutes between the warning and the regeneration.
    pub warning_minutes: u64,
    /// Regions protected around every agent.
    pub buffer_radius: u32,
    /// Host ticks per second.
    pub ticks_per_second: u64,
    /// Checked cells between progress log lines.
    pub progress_every: u64,
    /// Directory holding one snapshot file per volume.
    pub snapshot_dir: PathBuf,
    /// Warning broadcast template.
    pub warning_message: String,
    /// Completion broadcast template.
    pub complete_message: String,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            target_volumes: vec!["world".to_string()],
            protected_volumes: Vec::new(),
            regen_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            warning_minutes: DEFAULT_WARNING_MINUTES,
            buffer_radius: DEFAULT_BUFFER_RADIUS,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            progress_every: DEFAULT_PROGRESS_INTERVAL,
            snapshot_dir: PathBuf::from("snapshots"),
            warning_message: DEFAULT_WARNING_MESSAGE.to_string(),
            complete_message: DEFAULT_COMPLETE_MESSAGE.to_string(),
        }
    }
}

impl RegenConfig {
    /// Parses a TOML document and sanitizes every field.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::InvalidConfig`] if the document is not valid TOML
    /// or a field has the wrong type.
    pub fn from_toml_str(source: &str) -> RegenResult<Self> {
        let parsed: Self =
            toml::from_str(source).map_err(|e| RegenError::InvalidConfig(e.to_string()))?;
        Ok(parsed.sanitized())
    }

    /// Loads the configuration file, falling back to defaults on any error.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_toml_str(&source).unwrap_or_else(|e| {
                tracing::warn!("Config {} unusable ({}), using defaults", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Config {} not readable ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Replaces invalid values with their defaults, logging each one.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if self.regen_interval_minutes == 0 || self.warning_minutes >= self.regen_interval_minutes {
            tracing::warn!(
                "Invalid interval/warning ({} / {} minutes), using {} / {}",
                self.regen_interval_minutes,
                self.warning_minutes,
                defaults.regen_interval_minutes,
                defaults.warning_minutes
            );
            self.regen_interval_minutes = defaults.regen_interval_minutes;
            self.warning_minutes = defaults.warning_minutes;
        }
        if self.buffer_radius > MAX_BUFFER_RADIUS {
            tracing::warn!(
                "buffer-radius {} exceeds {}, using {}",
                self.buffer_radius,
                MAX_BUFFER_RADIUS,
                defaults.buffer_radius
            );
            self.buffer_radius = defaults.buffer_radius;
        }
        if self.ticks_per_second == 0 {
            tracing::warn!("ticks-per-second must be positive, using {}", defaults.ticks_per_second);
            self.ticks_per_second = defaults.ticks_per_second;
        }
        if self.progress_every == 0 {
            tracing::warn!("progress-every must be positive, using {}", defaults.progress_every);
            self.progress_every = defaults.progress_every;
        }
        if self.target_volumes.is_empty() {
            tracing::warn!("No target volumes configured, using {:?}", defaults.target_volumes);
            self.target_volumes = defaults.target_volumes;
        }
        if self.warning_message.trim().is_empty() {
            self.warning_message = defaults.warning_message;
        }
        if self.complete_message.trim().is_empty() {
            self.complete_message = defaults.complete_message;
        }

        self
    }

    /// Returns true if the volume must never be regenerated.
    #[must_use]
    pub fn is_protected(&self, volume: &str) -> bool {
        self.protected_volumes.iter().any(|v| v == volume)
    }

    /// Target volumes minus protected volumes, without duplicates.
    #[must_use]
    pub fn managed_volumes(&self) -> Vec<VolumeId> {
        let mut managed: Vec<VolumeId> = Vec::new();
        for name in &self.target_volumes {
            if self.is_protected(name) {
                tracing::info!("Skipping protected volume: {}", name);
                continue;
            }
            let id = VolumeId::from(name.as_str());
            if !managed.contains(&id) {
                managed.push(id);
            }
        }
        managed
    }

    /// Cycle timing in ticks.
    #[must_use]
    pub fn cycle_timing(&self) -> CycleTiming {
        let ticks_per_minute = self.ticks_per_second.saturating_mul(60);
        let interval = self.regen_interval_minutes.saturating_mul(ticks_per_minute);
        let lead = self.warning_minutes.saturating_mul(ticks_per_minute);
        CycleTiming::new(interval, lead).unwrap_or_else(|e| {
            tracing::warn!("{}, using default timing", e);
            CycleTiming::default()
        })
    }

    /// Immutable per-cycle settings derived from this configuration.
    #[must_use]
    pub fn settings(&self) -> RegenSettings {
        RegenSettings {
            timing: self.cycle_timing(),
            buffer_radius: self.buffer_radius.min(MAX_BUFFER_RADIUS),
            progress_every: self.progress_every.max(1),
            ticks_per_second: self.ticks_per_second.max(1),
            warning_template: self.warning_message.clone(),
            complete_template: self.complete_message.clone(),
        }
    }
}

/// Parameters one cycle runs under, fixed when the cycle starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegenSettings {
    /// Interval and warning lead in ticks.
    pub timing: CycleTiming,
    /// Regions protected around every agent.
    pub buffer_radius: u32,
    /// Checked cells between progress log lines.
    pub progress_every: u64,
    /// Host ticks per second, for rendering durations.
    pub ticks_per_second: u64,
    /// Warning template (`{minutes}`, `{seconds}`, `{volume}`).
    pub warning_template: String,
    /// Completion template (`{volume}`, `{restored}`, `{checked}`, `{protected}`, `{failed}`).
    pub complete_template: String,
}

impl RegenSettings {
    /// Renders the warning broadcast for a pass `lead_ticks` away.
    #[must_use]
    pub fn render_warning(&self, volume: &VolumeId, lead_ticks: u64) -> String {
        let seconds = lead_ticks / self.ticks_per_second.max(1);
        self.warning_template
            .replace("{minutes}", &(seconds / 60).to_string())
            .replace("{seconds}", &seconds.to_string())
            .replace("{volume}", volume.as_str())
    }

    /// Renders the completion broadcast.
    #[must_use]
    pub fn render_complete(&self, volume: &VolumeId, report: &RegenerationReport) -> String {
        self.complete_template
            .replace("{volume}", volume.as_str())
            .replace("{restored}", &report.restored.to_string())
            .replace("{checked}", &report.checked.to_string())
            .replace("{protected}", &report.skipped_protected.to_string())
            .replace("{failed}", &report.failed.to_string())
    }
}

impl Default for RegenSettings {
    fn default() -> Self {
        RegenConfig::default().settings()
    }
}
