//! Devices indexed by capability.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Device, PlateHandler, Robot, Stacker, TopologyProvider, WorklistAcceptor};
use crate::topology::{LocationKey, SharedLocation};

/// Registered devices, one list per capability, in registration order.
#[derive(Default)]
pub struct DeviceRegistry {
    handlers: RwLock<Vec<Arc<dyn PlateHandler>>>,
    providers: RwLock<Vec<Arc<dyn TopologyProvider>>>,
    robots: RwLock<Vec<Arc<dyn Robot>>>,
    stackers: RwLock<Vec<Arc<dyn Stacker>>>,
    acceptors: RwLock<Vec<Arc<dyn WorklistAcceptor>>>,
}

fn read<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<T>(lock: &RwLock<Vec<T>>, item: T) {
    lock.write().unwrap_or_else(PoisonError::into_inner).push(item);
}

fn remove_named<T: ?Sized + Device>(lock: &RwLock<Vec<Arc<T>>>, name: &str) -> bool {
    let mut items = lock.write().unwrap_or_else(PoisonError::into_inner);
    let before = items.len();
    items.retain(|d| d.name() != name);
    items.len() != before
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plate_handler(&self, device: Arc<dyn PlateHandler>) {
        tracing::debug!(device = device.name(), product = device.product(), "Registered plate handler");
        push(&self.handlers, device);
    }

    pub fn add_topology_provider(&self, device: Arc<dyn TopologyProvider>) {
        push(&self.providers, device);
    }

    pub fn add_robot(&self, robot: Arc<dyn Robot>) {
        tracing::debug!(robot = robot.name(), "Registered robot");
        push(&self.robots, robot);
    }

    pub fn add_stacker(&self, device: Arc<dyn Stacker>) {
        push(&self.stackers, device);
    }

    pub fn add_worklist_acceptor(&self, device: Arc<dyn WorklistAcceptor>) {
        push(&self.acceptors, device);
    }

    /// Remove a device from every capability list. Returns whether anything was removed.
    pub fn remove_device(&self, name: &str) -> bool {
        let mut removed = remove_named(&self.handlers, name);
        removed |= remove_named(&self.providers, name);
        removed |= remove_named(&self.robots, name);
        removed |= remove_named(&self.stackers, name);
        removed |= remove_named(&self.acceptors, name);
        removed
    }

    /// Plate handlers whose product is `product`.
    pub fn handlers_of(&self, product: &str) -> Vec<Arc<dyn PlateHandler>> {
        read(&self.handlers)
            .into_iter()
            .filter(|d| d.product() == product)
            .collect()
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn PlateHandler>> {
        read(&self.handlers).into_iter().find(|d| d.name() == name)
    }

    pub fn topology_providers(&self) -> Vec<Arc<dyn TopologyProvider>> {
        read(&self.providers)
    }

    pub fn robots(&self) -> Vec<Arc<dyn Robot>> {
        read(&self.robots)
    }

    /// Supply devices whose product is `product`.
    pub fn stackers_of(&self, product: &str) -> Vec<Arc<dyn Stacker>> {
        read(&self.stackers)
            .into_iter()
            .filter(|d| d.product() == product)
            .collect()
    }

    pub fn worklist_acceptors(&self) -> Vec<Arc<dyn WorklistAcceptor>> {
        read(&self.acceptors)
    }

    /// Every product name any plate handler offers.
    pub fn products(&self) -> BTreeSet<String> {
        read(&self.handlers)
            .iter()
            .map(|d| d.product().to_string())
            .collect()
    }

    /// Resolve a location by its device and name.
    pub fn find_location(&self, key: &LocationKey) -> Option<SharedLocation> {
        self.topology_providers()
            .into_iter()
            .filter(|p| p.name() == key.device)
            .flat_map(|p| p.locations())
            .find(|l| l.key() == key)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |items: Vec<String>| items.join(", ");
        f.debug_struct("DeviceRegistry")
            .field("handlers", &names(read(&self.handlers).iter().map(|d| d.name().to_string()).collect()))
            .field("robots", &names(read(&self.robots).iter().map(|d| d.name().to_string()).collect()))
            .finish()
    }
}
