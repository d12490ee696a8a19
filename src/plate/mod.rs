//! Plate model: tasks, worklists, active plates, admission and the in-flight registry.

pub mod active_plate;
pub mod factory;
pub mod registry;
pub mod task;
pub mod worklist;

pub use active_plate::{ActivePlate, Placement, STROBE, SharedPlate};
pub use factory::ActivePlateFactory;
pub use registry::PlateRegistry;
pub use task::{Plate, PlateKind, PlateTask};
pub use worklist::{TaskLists, Worklist, WorklistOutcome};
