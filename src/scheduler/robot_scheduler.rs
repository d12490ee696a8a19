//! Serialized execution of robot transfers.
//!
//! Jobs are active plates whose destination has been reserved. One job runs
//! at a time: the world is rebuilt, a path planned from the plate's current
//! location to its destination, and each hop that changes location is handed
//! to the hop's robot. A job that fails partway remembers the last location
//! it reached, so a retry plans from where the plate actually sits.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

use super::RobotSchedulerConfig;
use crate::device::{DeviceRegistry, TransferRequest};
use crate::error::{PlateschedError, Result};
use crate::plate::SharedPlate;
use crate::planner::{PathPlanner, PlannedPath};
use crate::topology::{PlaceKey, PlateLocation, SharedLocation};

/// Broadcast around every robot transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveEvent {
    Entering {
        plate: String,
        robot: String,
        from: PlaceKey,
        to: PlaceKey,
    },
    Exiting {
        plate: String,
        robot: String,
        from: PlaceKey,
        to: PlaceKey,
    },
}

#[derive(Clone)]
struct RobotJob {
    plate: SharedPlate,
    /// Intermediate location reached before an earlier attempt failed.
    reached: Option<SharedLocation>,
}

impl RobotJob {
    fn new(plate: SharedPlate) -> Self {
        Self { plate, reached: None }
    }
}

/// Queue of pending transfers and the loop that executes them.
pub struct RobotScheduler {
    devices: Arc<DeviceRegistry>,
    config: RobotSchedulerConfig,
    pending: Mutex<VecDeque<RobotJob>>,
    current: Mutex<Option<RobotJob>>,
    notify: Notify,
    events: broadcast::Sender<MoveEvent>,
}

impl RobotScheduler {
    pub fn new(devices: Arc<DeviceRegistry>, config: RobotSchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            devices,
            config,
            pending: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            notify: Notify::new(),
            events,
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<RobotJob>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> MutexGuard<'_, Option<RobotJob>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a transfer for a plate whose destination is already reserved.
    pub fn add_job(&self, plate: SharedPlate) {
        tracing::debug!(plate = %plate, "Queued robot job");
        self.pending().push_back(RobotJob::new(plate));
        self.notify.notify_one();
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Subscribe to Entering/Exiting move events.
    pub fn subscribe(&self) -> broadcast::Receiver<MoveEvent> {
        self.events.subscribe()
    }

    /// The job that was executing when the loop last stopped, if it did not finish.
    pub fn current_job(&self) -> Option<SharedPlate> {
        self.current().as_ref().map(|job| job.plate.clone())
    }

    /// Put the failed job back at the head of the queue. It resumes from the
    /// last location the plate reached.
    pub fn requeue_current(&self) -> bool {
        let Some(job) = self.current().take() else {
            return false;
        };
        match &job.reached {
            Some(at) => tracing::info!(plate = %job.plate, at = %at, "Requeued robot job"),
            None => tracing::info!(plate = %job.plate, "Requeued robot job"),
        }
        self.pending().push_front(job);
        self.notify.notify_one();
        true
    }

    /// Forget the failed job.
    pub fn discard_current(&self) -> Option<SharedPlate> {
        self.current().take().map(|job| job.plate)
    }

    /// Execute jobs until cancelled. A transfer failure ends the loop with the
    /// error; the job stays recorded as current.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Robot scheduler started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.next_job() => job,
            };
            self.execute(&job).await?;
        }
        tracing::info!("Robot scheduler stopped");
        Ok(())
    }

    async fn next_job(&self) -> RobotJob {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.pending().pop_front() {
                *self.current() = Some(job.clone());
                return job;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    fn plan(&self, src: &PlateLocation, dst: &PlateLocation) -> Option<PlannedPath> {
        let mut planner = PathPlanner::new(self.devices.clone());
        for attempt in 0..=self.config.unreachable_replans {
            planner.build_world();
            if let Some(path) = planner.plan_path(src, dst) {
                return Some(path);
            }
            tracing::debug!(from = %src, to = %dst, attempt, "No path found");
        }
        None
    }

    async fn execute(&self, job: &RobotJob) -> Result<()> {
        let plate = &job.plate;
        let (Some(origin), Some(dst)) = (plate.current_location(), plate.destination_location()) else {
            tracing::warn!(plate = %plate, "Robot job without both locations dropped");
            self.current().take();
            return Ok(());
        };
        let src = job.reached.clone().unwrap_or_else(|| origin.clone());
        tracing::debug!(plate = %plate, from = %src, to = %dst, "Need to move plate");

        let Some(path) = self.plan(&src, &dst) else {
            tracing::error!(plate = %plate, from = %src, to = %dst, "No path between locations, robot job dropped");
            self.current().take();
            return Ok(());
        };

        for hop in path.hops.iter().filter(|h| h.changes_location()) {
            self.lock_place(&hop.from_location, &hop.from);
            self.lock_place(&hop.to_location, &hop.to);

            let mut barcode = plate.barcode_for_transfer();
            let request = TransferRequest {
                plate: plate.to_string(),
                labware: plate.labware().to_string(),
                from: hop.from.clone(),
                to: hop.to.clone(),
            };
            let robot = hop.robot.name().to_string();
            self.emit(MoveEvent::Entering {
                plate: request.plate.clone(),
                robot: robot.clone(),
                from: hop.from.clone(),
                to: hop.to.clone(),
            });
            hop.robot
                .transfer_plate(&request, &mut barcode)
                .await
                .map_err(|source| PlateschedError::Transfer {
                    plate: request.plate.clone(),
                    robot: robot.clone(),
                    source,
                })?;
            plate.set_barcode(barcode);
            self.record_progress(&hop.to_location);
            self.emit(MoveEvent::Exiting {
                plate: request.plate,
                robot,
                from: hop.from.clone(),
                to: hop.to.clone(),
            });
        }

        origin.set_occupied(false);
        dst.set_occupied(true);
        self.current().take();
        tracing::info!(plate = %plate, to = %dst, cost = path.cost, "Moved plate");
        Ok(())
    }

    fn record_progress(&self, location: &SharedLocation) {
        if let Some(job) = self.current().as_mut() {
            job.reached = Some(location.clone());
        }
    }

    fn lock_place(&self, location: &PlateLocation, key: &PlaceKey) {
        let Some(handler) = self.devices.handler(location.device()) else {
            return;
        };
        if let Some(place) = location.places().iter().find(|p| p.name == key.place) {
            handler.lock_place(location, place);
        }
    }

    fn emit(&self, event: MoveEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// "RobotScheduler has no pending jobs", or one status block per pending plate.
    pub fn status(&self) -> String {
        let pending = self.pending();
        if pending.is_empty() {
            return "RobotScheduler has no pending jobs".to_string();
        }
        let mut out = String::new();
        for job in pending.iter() {
            let _ = writeln!(out, "{}", job.plate.status());
        }
        out
    }
}
