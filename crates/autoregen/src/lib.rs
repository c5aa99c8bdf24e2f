//! # AUTOREGEN Service
//!
//! Drives the cycle timeline of every managed volume on a tokio timer.
//!
//! ## Architecture
//!
//! ```text
//! RegenService ──mpsc──> volume task (one per volume)
//!                          ├─ interval tick -> VolumeTimeline::tick
//!                          ├─ CyclePlan     -> spawn_blocking(execute)
//!                          └─ pass done     -> VolumeTimeline::complete
//! ```
//!
//! Restore passes never run on the timer task, so warnings of other
//! volumes and administrative commands stay responsive during a pass.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use service::{RegenService, ServiceOptions};
