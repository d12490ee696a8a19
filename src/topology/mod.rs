//! Physical topology shared by devices, schedulers and the path planner.
//!
//! A [`PlateLocation`] belongs to exactly one device and groups one or more
//! [`PlatePlace`]s. Its occupancy flag is a `watch` channel so device jobs can
//! await a plate's arrival, and its reservation slot holds the serial of at
//! most one active plate.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// A named physical slot a robot can pick from or place to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatePlace {
    pub name: String,
}

impl PlatePlace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Identity of a location across the whole lab: owning device plus location name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey {
    pub device: String,
    pub location: String,
}

impl LocationKey {
    pub fn new(device: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            location: location.into(),
        }
    }

    /// Parse the `device.location` form used on the command line.
    pub fn parse(text: &str) -> Option<Self> {
        let (device, location) = text.split_once('.')?;
        if device.is_empty() || location.is_empty() {
            return None;
        }
        Some(Self::new(device, location))
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.location)
    }
}

/// World-unique identity of a place: device, location and place name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceKey {
    pub device: String,
    pub location: String,
    pub place: String,
}

impl PlaceKey {
    pub fn new(location: &LocationKey, place: impl Into<String>) -> Self {
        Self {
            device: location.device.clone(),
            location: location.location.clone(),
            place: place.into(),
        }
    }

    pub fn location_key(&self) -> LocationKey {
        LocationKey::new(&self.device, &self.location)
    }
}

impl fmt::Display for PlaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.device, self.location, self.place)
    }
}

/// A named group of places owned by one device.
#[derive(Debug)]
pub struct PlateLocation {
    key: LocationKey,
    places: Vec<PlatePlace>,
    occupied: watch::Sender<bool>,
    reserved_by: Mutex<Option<u64>>,
}

/// Locations are shared between the owning device, plates and the planner.
pub type SharedLocation = Arc<PlateLocation>;

impl PlateLocation {
    /// Create a location with the given places. A location with no explicit
    /// places gets a single place named after the location.
    pub fn new<I, S>(device: impl Into<String>, name: impl Into<String>, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = LocationKey::new(device, name);
        let mut places: Vec<PlatePlace> = places.into_iter().map(PlatePlace::new).collect();
        if places.is_empty() {
            places.push(PlatePlace::new(key.location.clone()));
        }
        let (occupied, _) = watch::channel(false);
        Self {
            key,
            places,
            occupied,
            reserved_by: Mutex::new(None),
        }
    }

    /// Shorthand for a location with a single place of the same name.
    pub fn single(device: impl Into<String>, name: impl Into<String>) -> SharedLocation {
        Arc::new(Self::new(device, name, Vec::<String>::new()))
    }

    pub fn name(&self) -> &str {
        &self.key.location
    }

    pub fn device(&self) -> &str {
        &self.key.device
    }

    pub fn key(&self) -> &LocationKey {
        &self.key
    }

    pub fn places(&self) -> &[PlatePlace] {
        &self.places
    }

    pub fn place_keys(&self) -> impl Iterator<Item = PlaceKey> + '_ {
        self.places.iter().map(|p| PlaceKey::new(&self.key, &p.name))
    }

    pub fn has_place(&self, name: &str) -> bool {
        self.places.iter().any(|p| p.name == name)
    }

    pub fn is_occupied(&self) -> bool {
        *self.occupied.borrow()
    }

    /// Set the occupancy flag and wake every waiter.
    pub fn set_occupied(&self, occupied: bool) {
        self.occupied.send_replace(occupied);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.occupied.subscribe()
    }

    /// Wait until a plate has been delivered here.
    pub async fn wait_until_occupied(&self) {
        let mut rx = self.occupied.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|occupied| *occupied).await;
    }

    /// Wait until this location has been vacated.
    pub async fn wait_until_free(&self) {
        let mut rx = self.occupied.subscribe();
        let _ = rx.wait_for(|occupied| !*occupied).await;
    }

    /// Serial of the plate holding the reservation, if any.
    pub fn reserved_by(&self) -> Option<u64> {
        *self.reserved_by.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by().is_some()
    }

    /// Neither occupied nor reserved.
    pub fn is_available(&self) -> bool {
        !self.is_occupied() && !self.is_reserved()
    }

    /// Atomically claim the reservation slot. Returns `false` if another plate
    /// already holds it; re-reserving for the same plate succeeds.
    pub fn try_reserve(&self, serial: u64) -> bool {
        let mut slot = self.reserved_by.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some(holder) => holder == serial,
            None => {
                *slot = Some(serial);
                true
            }
        }
    }

    /// Release the reservation if it is held by `serial`.
    pub fn release(&self, serial: u64) -> bool {
        let mut slot = self.reserved_by.lock().unwrap_or_else(PoisonError::into_inner);
        if *slot == Some(serial) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for PlateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
