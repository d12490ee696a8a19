//! Admission of plates from a worklist, one kind per factory.

use super::active_plate::ActivePlate;
use super::task::{Plate, PlateKind, PlateTask};
use super::worklist::Worklist;

/// Default number of source plates allowed in flight at once.
pub const DEFAULT_SOURCE_IN_FLIGHT: usize = 3;
/// Default number of destination plates allowed in flight at once.
pub const DEFAULT_DESTINATION_IN_FLIGHT: usize = 2;

/// Creates active plates of one kind for one worklist, never more than
/// `max_in_flight` at a time.
#[derive(Debug, Clone)]
pub struct ActivePlateFactory {
    worklist: String,
    kind: PlateKind,
    plates: Vec<Plate>,
    tasks: Vec<PlateTask>,
    next_index: usize,
    max_in_flight: usize,
}

impl ActivePlateFactory {
    pub fn new(worklist: &Worklist, kind: PlateKind, max_in_flight: usize) -> Self {
        Self {
            worklist: worklist.name.clone(),
            kind,
            plates: worklist.plates(kind).to_vec(),
            tasks: worklist.tasks_for(kind),
            next_index: 0,
            max_in_flight,
        }
    }

    pub fn source(worklist: &Worklist) -> Self {
        Self::new(worklist, PlateKind::Source, DEFAULT_SOURCE_IN_FLIGHT)
    }

    pub fn destination(worklist: &Worklist) -> Self {
        Self::new(worklist, PlateKind::Destination, DEFAULT_DESTINATION_IN_FLIGHT)
    }

    pub fn kind(&self) -> PlateKind {
        self.kind
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Plates not yet created.
    pub fn remaining(&self) -> usize {
        self.plates.len() - self.next_index
    }

    /// Whether another plate may be admitted given how many of this kind are in flight.
    pub fn can_release(&self, in_flight: usize) -> bool {
        self.remaining() > 0 && in_flight < self.max_in_flight
    }

    /// Admit the next plate if the in-flight limit allows it.
    pub fn try_release(&mut self, in_flight: usize, serial: u64) -> Option<ActivePlate> {
        if !self.can_release(in_flight) {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(ActivePlate::new(
            serial,
            self.kind,
            index,
            &self.worklist,
            self.plates[index].clone(),
            self.tasks.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worklist(sources: usize) -> Worklist {
        Worklist::new("wl").with_source_plates(
            (0..sources)
                .map(|i| Plate::new(format!("S{}", i), "96 well"))
                .collect(),
        )
    }

    #[test]
    fn test_respects_in_flight_limit() {
        let wl = worklist(5);
        let mut factory = ActivePlateFactory::source(&wl);
        assert!(factory.try_release(3, 1).is_none());
        let plate = factory.try_release(2, 1).unwrap();
        assert_eq!(plate.instance_index(), 0);
        assert_eq!(factory.remaining(), 4);
    }

    #[test]
    fn test_instance_indices_increase() {
        let wl = worklist(3);
        let mut factory = ActivePlateFactory::source(&wl);
        let indices: Vec<usize> = (0..3)
            .map(|i| factory.try_release(0, i).unwrap().instance_index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_exhausted_factory_releases_nothing() {
        let wl = worklist(1);
        let mut factory = ActivePlateFactory::source(&wl);
        assert!(factory.try_release(0, 1).is_some());
        assert_eq!(factory.remaining(), 0);
        assert!(factory.try_release(0, 2).is_none());
        assert_eq!(factory.remaining(), 0);
    }

    #[test]
    fn test_default_limits() {
        let wl = worklist(1);
        assert_eq!(ActivePlateFactory::source(&wl).max_in_flight(), 3);
        assert_eq!(ActivePlateFactory::destination(&wl).max_in_flight(), 2);
    }

    #[test]
    fn test_plate_carries_barcode_and_tasks() {
        let wl = worklist(1);
        let mut factory = ActivePlateFactory::source(&wl);
        let plate = factory.try_release(0, 9).unwrap();
        assert_eq!(plate.serial(), 9);
        assert_eq!(plate.barcode(), "S0");
        assert_eq!(plate.tasks().len(), 1);
    }
}
