//! Device capabilities the schedulers depend on.
//!
//! A concrete device implements [`Device`] plus whichever capabilities it
//! offers, and is registered once per capability in the [`DeviceRegistry`].

pub mod poller;
pub mod registry;

use async_trait::async_trait;

pub use crate::error::DeviceError;
use crate::plate::{ActivePlate, SharedPlate, Worklist};
use crate::topology::{PlaceKey, PlateLocation, PlatePlace, SharedLocation};

pub use poller::{StatusPoller, StatusSource};
pub use registry::DeviceRegistry;

/// Identity shared by every device.
pub trait Device: Send + Sync {
    /// Unique instance name.
    fn name(&self) -> &str;

    /// Device type (product name) that tasks refer to.
    fn product(&self) -> &str;
}

/// A device that accepts plates and runs tasks on them.
pub trait PlateHandler: Device {
    /// A location able to accept this plate right now, if any.
    fn available_location(&self, plate: &ActivePlate) -> Option<SharedLocation>;

    /// Atomically claim `location` for `plate`.
    fn reserve_location(&self, location: &SharedLocation, plate: &ActivePlate) -> bool {
        location.device() == self.name() && location.try_reserve(plate.serial())
    }

    /// Start the plate's current task. The device runs the job on its own task
    /// and calls [`ActivePlate::mark_job_completed`] when done.
    fn add_job(&self, plate: SharedPlate);

    /// Prepare a place for a robot to pick from or place into.
    fn lock_place(&self, _location: &PlateLocation, _place: &PlatePlace) {}
}

/// A device that exposes plate locations to the world graph.
pub trait TopologyProvider: Device {
    fn locations(&self) -> Vec<SharedLocation>;
}

/// One hop handed to a robot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub plate: String,
    pub labware: String,
    pub from: PlaceKey,
    pub to: PlaceKey,
}

/// A transporter able to move plates between places.
#[async_trait]
pub trait Robot: Device {
    /// Cost of moving a plate between two places. Zero, negative or infinite
    /// means this robot cannot make the move.
    fn transfer_weight(&self, from: &PlaceKey, to: &PlaceKey) -> Result<f64, DeviceError>;

    /// Move the plate. The robot may overwrite `barcode` with what its reader saw.
    async fn transfer_plate(&self, request: &TransferRequest, barcode: &mut String) -> Result<(), DeviceError>;
}

/// A supply device that must be loaded before it can feed plates.
pub trait Stacker: Device {
    fn is_loaded(&self) -> bool;
}

/// A device that wants to see every worklist when it is queued.
#[async_trait]
pub trait WorklistAcceptor: Device {
    async fn enqueue_worklist(&self, worklist: &Worklist) -> Result<(), DeviceError>;
}
