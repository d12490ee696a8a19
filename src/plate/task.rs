//! Plate tasks and plate descriptions.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameter name the destination Dock/Load task uses to name the storage device.
pub const DEVICE_INSTANCE_PARAM: &str = "device_instance";

/// One unit of work in a plate's to-do list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlateTask {
    /// Work performed by a device of the named type.
    Device {
        device_type: String,
        command: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    /// Hold the plate where it is for a fixed time; no device is involved.
    Wait { duration_ms: u64 },
}

impl PlateTask {
    pub fn device(device_type: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Device {
            device_type: device_type.into(),
            command: command.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn wait(duration: Duration) -> Self {
        Self::Wait {
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Add a parameter to a device task; wait tasks ignore it.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Device { parameters, .. } = &mut self {
            parameters.insert(name.into(), value.into());
        }
        self
    }

    pub fn device_type(&self) -> Option<&str> {
        match self {
            Self::Device { device_type, .. } => Some(device_type),
            Self::Wait { .. } => None,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Self::Device { command, .. } => command,
            Self::Wait { .. } => "wait",
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        match self {
            Self::Device { parameters, .. } => parameters.get(name).map(String::as_str),
            Self::Wait { .. } => None,
        }
    }

    pub fn is_device_task(&self, device_type: &str, command: &str) -> bool {
        matches!(self, Self::Device { device_type: t, command: c, .. } if t == device_type && c == command)
    }
}

impl fmt::Display for PlateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device {
                device_type, command, ..
            } => write!(f, "{}:{}", device_type, command),
            Self::Wait { duration_ms } => write!(f, "wait {}ms", duration_ms),
        }
    }
}

/// Whether a plate gives liquid (source) or receives it (destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateKind {
    Source,
    Destination,
}

impl PlateKind {
    /// Command of the central hitpick task for this kind of plate.
    pub fn hitpick_command(self) -> &'static str {
        match self {
            Self::Source => "source_hitpick",
            Self::Destination => "dest_hitpick",
        }
    }
}

impl fmt::Display for PlateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// A physical plate as listed in a worklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    #[serde(default)]
    pub barcode: String,
    pub labware: String,
}

impl Plate {
    pub fn new(barcode: impl Into<String>, labware: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            labware: labware.into(),
        }
    }
}
