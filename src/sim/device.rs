//! In-memory plate handler.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::DeviceSpec;
use crate::device::{Device, DeviceError, PlateHandler, Stacker, TopologyProvider, WorklistAcceptor};
use crate::plate::{ActivePlate, SharedPlate, Worklist};
use crate::topology::{PlateLocation, PlatePlace, SharedLocation};

/// A device that holds plates for a fixed processing time.
///
/// A device configured with a supply acts as a stacker: plates sourced on it
/// are taken from the supply, and it refuses to source more once empty.
pub struct SimDevice {
    name: String,
    product: String,
    locations: Vec<SharedLocation>,
    process: Duration,
    supply: Option<AtomicU32>,
    jobs: AtomicUsize,
    locks: AtomicUsize,
    worklists: Mutex<Vec<String>>,
}

impl SimDevice {
    pub fn new(name: impl Into<String>, product: impl Into<String>, locations: &[&str]) -> Self {
        let name = name.into();
        let locations = locations.iter().map(|l| PlateLocation::single(name.clone(), *l)).collect();
        Self {
            name,
            product: product.into(),
            locations,
            process: Duration::ZERO,
            supply: None,
            jobs: AtomicUsize::new(0),
            locks: AtomicUsize::new(0),
            worklists: Mutex::new(Vec::new()),
        }
    }

    pub fn from_spec(spec: &DeviceSpec) -> Self {
        let locations = spec
            .locations
            .iter()
            .map(|l| Arc::new(PlateLocation::new(spec.name.clone(), l.name.clone(), l.places.clone())))
            .collect();
        Self {
            name: spec.name.clone(),
            product: spec.product.clone(),
            locations,
            process: Duration::from_millis(spec.process_ms),
            supply: spec.supply.map(AtomicU32::new),
            jobs: AtomicUsize::new(0),
            locks: AtomicUsize::new(0),
            worklists: Mutex::new(Vec::new()),
        }
    }

    pub fn with_process_time(mut self, process: Duration) -> Self {
        self.process = process;
        self
    }

    pub fn with_supply(mut self, plates: u32) -> Self {
        self.supply = Some(AtomicU32::new(plates));
        self
    }

    pub fn location(&self, name: &str) -> Option<SharedLocation> {
        self.locations.iter().find(|l| l.name() == name).cloned()
    }

    /// Refill the supply.
    pub fn load(&self, plates: u32) {
        if let Some(supply) = &self.supply {
            supply.fetch_add(plates, Ordering::SeqCst);
        }
    }

    pub fn remaining_supply(&self) -> Option<u32> {
        self.supply.as_ref().map(|s| s.load(Ordering::SeqCst))
    }

    pub fn jobs_run(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    pub fn places_locked(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    /// Worklists announced to this device.
    pub fn worklists_seen(&self) -> Vec<String> {
        self.worklists.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn take_from_supply(&self) -> bool {
        match &self.supply {
            None => true,
            Some(supply) => supply.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok(),
        }
    }
}

impl Device for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn product(&self) -> &str {
        &self.product
    }
}

impl PlateHandler for SimDevice {
    fn available_location(&self, plate: &ActivePlate) -> Option<SharedLocation> {
        if plate.current_location().is_none() && self.remaining_supply() == Some(0) {
            return None;
        }
        self.locations.iter().find(|l| l.is_available()).cloned()
    }

    fn add_job(&self, plate: SharedPlate) {
        self.jobs.fetch_add(1, Ordering::SeqCst);
        let Some(destination) = plate.destination_location() else {
            tracing::warn!(device = %self.name, plate = %plate, "Job without a destination ignored");
            return;
        };
        let sourced = plate
            .current_location()
            .is_some_and(|current| Arc::ptr_eq(&current, &destination) && !current.is_occupied());
        if sourced {
            if !self.take_from_supply() {
                tracing::warn!(device = %self.name, "Sourcing plate from an empty supply");
            }
            destination.set_occupied(true);
        }

        let process = self.process;
        let device = self.name.clone();
        tokio::spawn(async move {
            plate.wait_for_plate().await;
            let task = plate.current_task().map(ToString::to_string).unwrap_or_default();
            tracing::debug!(device = %device, plate = %plate, task = %task, "Processing plate");
            tokio::time::sleep(process).await;
            plate.mark_job_completed();
            if !plate.has_remaining_tasks() {
                // The plate leaves the system from here.
                destination.set_occupied(false);
                tracing::debug!(device = %device, plate = %plate, "Plate retired");
            }
        });
    }

    fn lock_place(&self, location: &PlateLocation, place: &PlatePlace) {
        self.locks.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(device = %self.name, location = %location, place = %place.name, "Locked place");
    }
}

impl TopologyProvider for SimDevice {
    fn locations(&self) -> Vec<SharedLocation> {
        self.locations.clone()
    }
}

impl Stacker for SimDevice {
    fn is_loaded(&self) -> bool {
        self.remaining_supply().is_none_or(|n| n > 0)
    }
}

#[async_trait]
impl WorklistAcceptor for SimDevice {
    async fn enqueue_worklist(&self, worklist: &Worklist) -> Result<(), DeviceError> {
        self.worklists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worklist.name.clone());
        Ok(())
    }
}
