//! A plate in flight: its to-do list, where it is, and where it is going.

use std::fmt;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::task::{Plate, PlateKind, PlateTask};
use crate::topology::SharedLocation;

/// Barcode given to a destination plate before its first pick so the robot's
/// reader knows to strobe it.
pub const STROBE: &str = "STROBE";

/// Active plates are shared by the scheduler registry, device jobs and robot jobs.
pub type SharedPlate = Arc<ActivePlate>;

/// What the scheduler must do after committing a plate to a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// First placement: the plate is sourced at the location, no move needed.
    Sourced,
    /// The plate sits elsewhere and needs a robot transfer.
    NeedsTransfer,
}

#[derive(Debug)]
struct PlateState {
    cursor: usize,
    current: Option<SharedLocation>,
    destination: Option<SharedLocation>,
    barcode: String,
    barcode_reassigned: bool,
}

/// A plate that has been admitted from a worklist and is working through its tasks.
#[derive(Debug)]
pub struct ActivePlate {
    serial: u64,
    kind: PlateKind,
    instance_index: usize,
    worklist: String,
    labware: String,
    tasks: Vec<PlateTask>,
    state: Mutex<PlateState>,
    free: watch::Sender<bool>,
}

impl ActivePlate {
    pub fn new(
        serial: u64,
        kind: PlateKind,
        instance_index: usize,
        worklist: impl Into<String>,
        plate: Plate,
        tasks: Vec<PlateTask>,
    ) -> Self {
        let (free, _) = watch::channel(true);
        Self {
            serial,
            kind,
            instance_index,
            worklist: worklist.into(),
            labware: plate.labware,
            tasks,
            state: Mutex::new(PlateState {
                cursor: 0,
                current: None,
                destination: None,
                barcode: plate.barcode,
                barcode_reassigned: false,
            }),
            free,
        }
    }

    fn state(&self) -> MutexGuard<'_, PlateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> PlateKind {
        self.kind
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    pub fn worklist(&self) -> &str {
        &self.worklist
    }

    pub fn labware(&self) -> &str {
        &self.labware
    }

    pub fn tasks(&self) -> &[PlateTask] {
        &self.tasks
    }

    pub fn barcode(&self) -> String {
        self.state().barcode.clone()
    }

    pub fn set_barcode(&self, barcode: impl Into<String>) {
        self.state().barcode = barcode.into();
    }

    pub fn barcode_reassigned(&self) -> bool {
        self.state().barcode_reassigned
    }

    /// Barcode to hand the robot for the next pick. A destination plate's
    /// barcode is replaced by [`STROBE`] the first time it is picked, and never
    /// again afterwards.
    pub fn barcode_for_transfer(&self) -> String {
        let mut state = self.state();
        if self.kind == PlateKind::Destination && !state.barcode_reassigned {
            state.barcode = STROBE.to_string();
            state.barcode_reassigned = true;
        }
        state.barcode.clone()
    }

    /// Index of the current task, `None` once every task is done.
    pub fn current_step(&self) -> Option<usize> {
        let cursor = self.state().cursor;
        (cursor < self.tasks.len()).then_some(cursor)
    }

    pub fn current_task(&self) -> Option<&PlateTask> {
        self.current_step().map(|i| &self.tasks[i])
    }

    pub fn has_remaining_tasks(&self) -> bool {
        self.current_step().is_some()
    }

    pub fn is_busy(&self) -> bool {
        !*self.free.borrow()
    }

    pub fn is_finished(&self) -> bool {
        !self.is_busy() && !self.has_remaining_tasks()
    }

    /// Wait until the plate is no longer committed to a job.
    pub async fn wait_until_free(&self) {
        let mut rx = self.free.subscribe();
        let _ = rx.wait_for(|free| *free).await;
    }

    pub fn current_location(&self) -> Option<SharedLocation> {
        self.state().current.clone()
    }

    pub fn destination_location(&self) -> Option<SharedLocation> {
        self.state().destination.clone()
    }

    /// Commit the plate to a job at a reserved location and mark it busy.
    pub fn begin_job(&self, location: SharedLocation) -> Placement {
        let mut state = self.state();
        self.free.send_replace(false);
        if state.current.is_none() {
            state.current = Some(location.clone());
            state.destination = Some(location);
            Placement::Sourced
        } else {
            state.destination = Some(location);
            Placement::NeedsTransfer
        }
    }

    /// Mark the plate busy for a wait task.
    pub fn begin_wait(&self) {
        self.free.send_replace(false);
    }

    /// Finish a wait task: advance past it and free the plate.
    pub fn finish_wait(&self) {
        self.state().cursor += 1;
        self.free.send_replace(true);
    }

    /// Wait until the plate has arrived at its destination.
    pub async fn wait_for_plate(&self) {
        if let Some(destination) = self.destination_location() {
            destination.wait_until_occupied().await;
        }
    }

    /// Finish the device job: advance the to-do list, drop the destination
    /// reservation, make the destination the current location and free the plate.
    pub fn mark_job_completed(&self) {
        {
            let mut state = self.state();
            tracing::debug!(
                plate = %self,
                current = ?state.current.as_ref().map(|l| l.key().to_string()),
                destination = ?state.destination.as_ref().map(|l| l.key().to_string()),
                "Marking job completed"
            );
            state.cursor += 1;
            if let Some(destination) = state.destination.clone() {
                destination.release(self.serial);
                state.current = Some(destination);
            }
        }
        self.free.send_replace(true);
    }

    /// Multi-line status block for operator display.
    pub fn status(&self) -> String {
        let state = self.state();
        let mut out = String::new();
        let _ = writeln!(out, "Info for {} plate S/N: {}", self.kind, self.serial);
        let _ = writeln!(out, "\tWorklist: {}", self.worklist);
        let _ = writeln!(out, "\tInstanceIndex: {}", self.instance_index);
        let _ = writeln!(out, "\tBarcode: {}", state.barcode);
        let _ = writeln!(out, "\tLabware: {}", self.labware);
        let _ = writeln!(out, "\tBusy: {}", self.is_busy());
        let _ = writeln!(out, "\tCurrent location: {}", describe(state.current.as_ref()));
        let _ = writeln!(out, "\tDestination location: {}", describe(state.destination.as_ref()));
        let _ = writeln!(out, "\tToDoList:");
        for (i, task) in self.tasks.iter().enumerate() {
            let _ = writeln!(out, "\t\tTask #{}", i + 1);
            let _ = writeln!(out, "\t\t{}", task);
            let _ = writeln!(out, "\t\tCompleted: {}", i < state.cursor);
        }
        out
    }
}

fn describe(location: Option<&SharedLocation>) -> String {
    match location {
        None => "none".to_string(),
        Some(l) => format!(
            "{}, {}, {}, {}",
            l.key(),
            if l.is_available() { "available" } else { "not available" },
            if l.is_occupied() { "occupied" } else { "not occupied" },
            if l.is_reserved() { "reserved" } else { "not reserved" },
        ),
    }
}

impl fmt::Display for ActivePlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.worklist, self.kind, self.instance_index)
    }
}
