//! The set of in-flight plates, guarded as a whole by the plate scheduler's lock.

use std::collections::HashMap;
use std::sync::Arc;

use super::active_plate::{ActivePlate, SharedPlate};
use super::task::PlateKind;

/// In-flight plates plus serial allocation and the destination → worklist map.
#[derive(Debug, Default)]
pub struct PlateRegistry {
    plates: Vec<SharedPlate>,
    next_serial: u64,
    destination_worklists: HashMap<u64, String>,
}

impl PlateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next plate serial number. Serials start at 1.
    pub fn allocate_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Add a freshly admitted plate.
    pub fn insert(&mut self, plate: ActivePlate) -> SharedPlate {
        let plate = Arc::new(plate);
        if plate.kind() == PlateKind::Destination {
            self.destination_worklists
                .insert(plate.serial(), plate.worklist().to_string());
        }
        tracing::info!(plate = %plate, serial = plate.serial(), "Admitted plate");
        self.plates.push(plate.clone());
        plate
    }

    /// Drop every finished plate and return them.
    pub fn remove_finished(&mut self) -> Vec<SharedPlate> {
        let (finished, active): (Vec<_>, Vec<_>) = self.plates.drain(..).partition(|p| p.is_finished());
        self.plates = active;
        for plate in &finished {
            tracing::info!(plate = %plate, "Removed finished plate");
        }
        finished
    }

    /// Drop every plate of a worklist, releasing the reservations they hold.
    pub fn drop_worklist(&mut self, worklist: &str) -> Vec<SharedPlate> {
        let (dropped, kept): (Vec<_>, Vec<_>) = self.plates.drain(..).partition(|p| p.worklist() == worklist);
        self.plates = kept;
        for plate in &dropped {
            if let Some(destination) = plate.destination_location() {
                destination.release(plate.serial());
            }
        }
        dropped
    }

    pub fn in_flight_of(&self, worklist: &str, kind: PlateKind) -> usize {
        self.plates
            .iter()
            .filter(|p| p.worklist() == worklist && p.kind() == kind)
            .count()
    }

    pub fn in_flight_for_worklist(&self, worklist: &str) -> usize {
        self.plates.iter().filter(|p| p.worklist() == worklist).count()
    }

    /// True when a sibling plate (same worklist and kind) with a lower instance
    /// index is still at the same step, so this plate must wait its turn.
    pub fn is_blocked(&self, plate: &ActivePlate) -> bool {
        let Some(step) = plate.current_step() else {
            return false;
        };
        self.plates.iter().any(|other| {
            other.serial() != plate.serial()
                && other.worklist() == plate.worklist()
                && other.kind() == plate.kind()
                && other.instance_index() < plate.instance_index()
                && other.current_step() == Some(step)
        })
    }

    /// Worklist that admitted a destination plate. Entries are kept after the plate retires.
    pub fn worklist_of_destination(&self, serial: u64) -> Option<&str> {
        self.destination_worklists.get(&serial).map(String::as_str)
    }

    pub fn plates(&self) -> &[SharedPlate] {
        &self.plates
    }

    pub fn snapshot(&self) -> Vec<SharedPlate> {
        self.plates.clone()
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }
}
