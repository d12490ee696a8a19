//! Scheduling: plate admission and dispatch, robot transfers, and the
//! supervisor that keeps both loops running.
//!
//! # Architecture
//!
//! The schedulers use a polling model:
//! 1. PlateScheduler consumes queued worklists and admits plates
//! 2. Each free plate's current task is placed on a device with a free location
//! 3. Plates that must move are queued on the RobotScheduler
//! 4. Devices mark jobs completed; the PlateScheduler advances or retires plates
//!
//! # Example
//!
//! ```ignore
//! use platesched::scheduler::{PlateScheduler, RobotScheduler, Supervisor};
//!
//! let robot = Arc::new(RobotScheduler::new(devices.clone(), RobotSchedulerConfig::default()));
//! let plates = Arc::new(PlateScheduler::new(devices, robot, errors.clone(), PlateSchedulerConfig::default()));
//! let supervisor = Arc::new(Supervisor::new(plates.clone(), errors));
//! let handle = supervisor.clone().spawn();
//! plates.enqueue_worklist(worklist).await?;
//! ```

mod plate_scheduler;
mod robot_scheduler;
mod supervisor;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plate::factory::{DEFAULT_DESTINATION_IN_FLIGHT, DEFAULT_SOURCE_IN_FLIGHT};

pub use plate_scheduler::{PlateScheduler, STACKERS_EMPTY};
pub use robot_scheduler::{MoveEvent, RobotScheduler};
pub use supervisor::Supervisor;

/// Configuration for the PlateScheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateSchedulerConfig {
    /// Delay between scheduling passes (in milliseconds).
    pub poll_interval_ms: u64,
    /// Source plates allowed in flight per worklist.
    pub source_in_flight: usize,
    /// Destination plates allowed in flight per worklist.
    pub destination_in_flight: usize,
}

impl Default for PlateSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            source_in_flight: DEFAULT_SOURCE_IN_FLIGHT,
            destination_in_flight: DEFAULT_DESTINATION_IN_FLIGHT,
        }
    }
}

impl PlateSchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_in_flight(mut self, source: usize, destination: usize) -> Self {
        self.source_in_flight = source;
        self.destination_in_flight = destination;
        self
    }
}

/// Configuration for the RobotScheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotSchedulerConfig {
    /// How long to idle between queue checks when not woken (in milliseconds).
    pub poll_interval_ms: u64,
    /// Extra world rebuilds before an unreachable job is dropped.
    pub unreachable_replans: u32,
}

impl Default for RobotSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            unreachable_replans: 0,
        }
    }
}

impl RobotSchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_unreachable_replans(mut self, replans: u32) -> Self {
        self.unreachable_replans = replans;
        self
    }
}
