//! Worklists: the unit of work handed to the plate scheduler.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::task::{DEVICE_INSTANCE_PARAM, Plate, PlateKind, PlateTask};

fn default_transfer_device() -> String {
    "Bumblebee".to_string()
}

/// Tasks run before and after the hitpick, per plate kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLists {
    pub source_pre: Vec<PlateTask>,
    pub source_post: Vec<PlateTask>,
    pub dest_pre: Vec<PlateTask>,
    pub dest_post: Vec<PlateTask>,
}

/// How a worklist ended, delivered on its completion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorklistOutcome {
    /// Every plate ran its full task list.
    Completed { plates: usize },
    /// The worklist was abandoned.
    Failed { reason: String },
}

/// A batch of source and destination plates with the tasks each must run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Worklist {
    pub name: String,
    #[serde(default)]
    pub source_plates: Vec<Plate>,
    #[serde(default)]
    pub destination_plates: Vec<Plate>,
    #[serde(default)]
    pub tasks: TaskLists,
    /// Device type performing the central hitpick task.
    #[serde(default = "default_transfer_device")]
    pub transfer_device: String,
    /// Device named in the destination Dock/Load task, if any.
    #[serde(default)]
    pub storage_device: Option<String>,
    #[serde(skip)]
    completion: Option<oneshot::Sender<WorklistOutcome>>,
}

// The completion channel stays with the original.
impl Clone for Worklist {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source_plates: self.source_plates.clone(),
            destination_plates: self.destination_plates.clone(),
            tasks: self.tasks.clone(),
            transfer_device: self.transfer_device.clone(),
            storage_device: self.storage_device.clone(),
            completion: None,
        }
    }
}

impl Worklist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_plates: Vec::new(),
            destination_plates: Vec::new(),
            tasks: TaskLists::default(),
            transfer_device: default_transfer_device(),
            storage_device: None,
            completion: None,
        }
    }

    pub fn with_source_plates(mut self, plates: Vec<Plate>) -> Self {
        self.source_plates = plates;
        self
    }

    pub fn with_destination_plates(mut self, plates: Vec<Plate>) -> Self {
        self.destination_plates = plates;
        self
    }

    pub fn with_tasks(mut self, tasks: TaskLists) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_transfer_device(mut self, device_type: impl Into<String>) -> Self {
        self.transfer_device = device_type.into();
        self
    }

    pub fn with_storage_device(mut self, device: impl Into<String>) -> Self {
        self.storage_device = Some(device.into());
        self
    }

    /// Attach a completion channel and return its receiving end.
    pub fn completion(&mut self) -> oneshot::Receiver<WorklistOutcome> {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        rx
    }

    /// Report the outcome once; later calls are no-ops.
    pub fn complete(&mut self, outcome: WorklistOutcome) {
        if let Some(tx) = self.completion.take() {
            // Nobody listening is fine.
            let _ = tx.send(outcome);
        }
    }

    pub fn plates(&self, kind: PlateKind) -> &[Plate] {
        match kind {
            PlateKind::Source => &self.source_plates,
            PlateKind::Destination => &self.destination_plates,
        }
    }

    pub fn plate_count(&self) -> usize {
        self.source_plates.len() + self.destination_plates.len()
    }

    /// Full to-do list for a plate of the given kind: pre tasks, the hitpick on
    /// the transfer device, then post tasks. Destination Dock/Load tasks are
    /// pointed at the storage device when one is configured.
    pub fn tasks_for(&self, kind: PlateKind) -> Vec<PlateTask> {
        let (pre, post) = match kind {
            PlateKind::Source => (&self.tasks.source_pre, &self.tasks.source_post),
            PlateKind::Destination => (&self.tasks.dest_pre, &self.tasks.dest_post),
        };
        let hitpick = PlateTask::device(&self.transfer_device, kind.hitpick_command());
        let mut tasks: Vec<PlateTask> = pre
            .iter()
            .cloned()
            .chain(std::iter::once(hitpick))
            .chain(post.iter().cloned())
            .collect();

        if kind == PlateKind::Destination
            && let Some(storage) = &self.storage_device
            && let Some(load) = tasks.iter_mut().find(|t| t.is_device_task("Dock", "Load"))
        {
            *load = load.clone().with_parameter(DEVICE_INSTANCE_PARAM, storage);
        }
        tasks
    }

    /// Every device type some plate of this worklist will need.
    pub fn required_device_types(&self) -> BTreeSet<String> {
        [PlateKind::Source, PlateKind::Destination]
            .into_iter()
            .filter(|kind| !self.plates(*kind).is_empty())
            .flat_map(|kind| self.tasks_for(kind))
            .filter_map(|task| task.device_type().map(str::to_string))
            .collect()
    }
}
