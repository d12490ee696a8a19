//! Plate admission and task dispatch.
//!
//! Worklists are processed one at a time. Every poll interval the scheduler:
//! 1. Removes finished plates from the registry
//! 2. Lets each factory admit one plate if under its in-flight limit
//! 3. Dispatches the current task of every free, unblocked plate
//! 4. Completes the worklist once nothing is left to create or run

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::PlateSchedulerConfig;
use super::robot_scheduler::RobotScheduler;
use crate::device::DeviceRegistry;
use crate::error::{PlateschedError, Result};
use crate::operator::{ErrorChannel, ErrorReport, RETRY};
use crate::plate::task::DEVICE_INSTANCE_PARAM;
use crate::plate::{
    ActivePlateFactory, Placement, PlateKind, PlateRegistry, PlateTask, SharedPlate, Worklist, WorklistOutcome,
};

/// Message shown when a supply device has nothing to feed.
pub const STACKERS_EMPTY: &str =
    "No destination plates available in stackers -- please ensure that they are loaded properly";

/// Admits plates from queued worklists and dispatches their tasks to devices.
pub struct PlateScheduler {
    devices: Arc<DeviceRegistry>,
    robot: Arc<RobotScheduler>,
    errors: Arc<dyn ErrorChannel>,
    config: PlateSchedulerConfig,
    queue_tx: mpsc::UnboundedSender<Worklist>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Worklist>>,
    registry: Mutex<PlateRegistry>,
    cancel: CancellationToken,
}

impl PlateScheduler {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        robot: Arc<RobotScheduler>,
        errors: Arc<dyn ErrorChannel>,
        config: PlateSchedulerConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            devices,
            robot,
            errors,
            config,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            registry: Mutex::new(PlateRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, PlateRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn robot_scheduler(&self) -> &Arc<RobotScheduler> {
        &self.robot
    }

    /// Queue a worklist and show it to every device that accepts worklists.
    pub async fn enqueue_worklist(&self, worklist: Worklist) -> Result<()> {
        for acceptor in self.devices.worklist_acceptors() {
            if let Err(e) = acceptor.enqueue_worklist(&worklist).await {
                tracing::warn!(device = acceptor.name(), worklist = %worklist.name, error = %e, "Device rejected worklist");
            }
        }
        tracing::info!(worklist = %worklist.name, plates = worklist.plate_count(), "Queued worklist");
        self.queue_tx
            .send(worklist)
            .map_err(|_| PlateschedError::Stopped("plate scheduler".to_string()))
    }

    /// Ask the loop to exit at its next iteration.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Process queued worklists until stopped.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Plate scheduler started");
        let mut queue = self.queue_rx.lock().await;
        loop {
            let worklist = tokio::select! {
                _ = self.cancel.cancelled() => break,
                worklist = queue.recv() => worklist,
            };
            let Some(mut worklist) = worklist else {
                break;
            };
            let outcome = self.do_worklist(&worklist).await;
            match &outcome {
                WorklistOutcome::Completed { plates } => {
                    tracing::info!(worklist = %worklist.name, plates, "Worklist completed");
                }
                WorklistOutcome::Failed { reason } => {
                    tracing::error!(worklist = %worklist.name, reason = %reason, "Worklist failed");
                }
            }
            worklist.complete(outcome);
        }
        tracing::info!("Plate scheduler stopped");
        Ok(())
    }

    /// Run one worklist to completion.
    pub async fn do_worklist(&self, worklist: &Worklist) -> WorklistOutcome {
        let mut factories = vec![
            ActivePlateFactory::new(worklist, PlateKind::Source, self.config.source_in_flight),
            ActivePlateFactory::new(worklist, PlateKind::Destination, self.config.destination_in_flight),
        ];
        let total = worklist.plate_count();

        loop {
            let remaining: usize = factories.iter().map(ActivePlateFactory::remaining).sum();
            if remaining == 0 && self.registry().in_flight_for_worklist(&worklist.name) == 0 {
                return WorklistOutcome::Completed { plates: total };
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.registry().drop_worklist(&worklist.name);
                    return WorklistOutcome::Failed { reason: "scheduler stopped".to_string() };
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }

            let plates = self.admit(&worklist.name, &mut factories);
            for plate in plates {
                if let Err(e) = self.advance(&plate).await {
                    let dropped = self.registry().drop_worklist(&worklist.name);
                    tracing::error!(worklist = %worklist.name, dropped = dropped.len(), error = %e, "Aborting worklist");
                    return WorklistOutcome::Failed { reason: e.to_string() };
                }
            }
        }
    }

    /// Under the registry lock: retire finished plates, admit new ones, and
    /// return this worklist's in-flight plates.
    fn admit(&self, worklist: &str, factories: &mut [ActivePlateFactory]) -> Vec<SharedPlate> {
        let mut registry = self.registry();
        registry.remove_finished();
        for factory in factories.iter_mut() {
            let in_flight = registry.in_flight_of(worklist, factory.kind());
            if factory.can_release(in_flight) {
                let serial = registry.allocate_serial();
                if let Some(plate) = factory.try_release(in_flight, serial) {
                    registry.insert(plate);
                }
            }
        }
        registry
            .plates()
            .iter()
            .filter(|p| p.worklist() == worklist)
            .cloned()
            .collect()
    }

    async fn advance(&self, plate: &SharedPlate) -> Result<()> {
        if self.registry().is_blocked(plate) || plate.is_busy() {
            return Ok(());
        }
        let Some(task) = plate.current_task().cloned() else {
            return Ok(());
        };
        match &task {
            PlateTask::Wait { duration_ms } => {
                self.start_wait(plate, Duration::from_millis(*duration_ms));
                Ok(())
            }
            PlateTask::Device { device_type, command, .. } => {
                let instance = task.parameter(DEVICE_INSTANCE_PARAM);
                if self.place(plate, device_type, command, instance)? {
                    return Ok(());
                }
                self.check_supplies(device_type).await;
                Ok(())
            }
        }
    }

    fn start_wait(&self, plate: &SharedPlate, duration: Duration) {
        tracing::debug!(plate = %plate, duration_ms = duration.as_millis() as u64, "Starting wait task");
        plate.begin_wait();
        let plate = plate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            plate.finish_wait();
        });
    }

    /// Reserve a location on some device of `device_type` and dispatch the
    /// job. A named instance restricts the choice to that device. Returns
    /// whether the plate was placed.
    fn place(&self, plate: &SharedPlate, device_type: &str, command: &str, instance: Option<&str>) -> Result<bool> {
        let devices = self.devices.handlers_of(device_type);
        if devices.is_empty() {
            return Err(PlateschedError::DeviceTypeUnavailable(device_type.to_string()));
        }
        for device in devices {
            if instance.is_some_and(|name| name != device.name()) {
                continue;
            }
            let Some(location) = device.available_location(plate) else {
                continue;
            };
            if !device.reserve_location(&location, plate) {
                continue;
            }
            tracing::debug!(plate = %plate, device = device.name(), location = %location, "Reserved location");

            match plate.begin_job(location) {
                Placement::Sourced => {
                    tracing::debug!(plate = %plate, device = device.name(), "Sourcing plate");
                }
                Placement::NeedsTransfer => {
                    tracing::debug!(plate = %plate, device = device.name(), "Queueing robot job");
                    self.robot.add_job(plate.clone());
                }
            }
            tracing::debug!(plate = %plate, device = device.name(), command, "Queueing device job");
            device.add_job(plate.clone());
            return Ok(true);
        }
        Ok(false)
    }

    /// Nothing could be placed: if the type is fed by stackers and none is
    /// loaded, block until the operator retries.
    async fn check_supplies(&self, device_type: &str) {
        let stackers = self.devices.stackers_of(device_type);
        if stackers.is_empty() || stackers.iter().any(|s| s.is_loaded()) {
            return;
        }
        let names: Vec<&str> = stackers.iter().map(|s| s.name()).collect();
        let report = ErrorReport::new(STACKERS_EMPTY, [RETRY]).with_details(names.join(", "));
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            choice = self.errors.add_error(report) => {
                if choice.is_none() {
                    tracing::warn!(device_type, "No operator available for empty stackers");
                }
            }
        }
    }

    pub fn in_flight(&self) -> Vec<SharedPlate> {
        self.registry().snapshot()
    }

    /// Worklist that admitted a destination plate.
    pub fn worklist_of_destination(&self, serial: u64) -> Option<String> {
        self.registry().worklist_of_destination(serial).map(str::to_string)
    }

    /// Robot scheduler status followed by every in-flight plate.
    pub fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.robot.status());
        let _ = writeln!(out, "\tActive plates:");
        for plate in self.registry().plates() {
            let _ = writeln!(out, "{}", plate.status());
        }
        out
    }
}
