//! Simulated lab: in-memory devices and robots built from configuration.

mod device;
mod lab;
mod robot;

use serde::{Deserialize, Serialize};

use crate::plate::{Plate, PlateTask, TaskLists, Worklist};

pub use device::SimDevice;
pub use lab::SimLab;
pub use robot::{RobotStatus, SimRobot, homing_operation};

/// A location and its places. No places means one place named after the location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSpec {
    pub name: String,
    #[serde(default)]
    pub places: Vec<String>,
}

impl LocationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            places: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    pub product: String,
    #[serde(default)]
    pub locations: Vec<LocationSpec>,
    /// Processing time per job (in milliseconds).
    #[serde(default)]
    pub process_ms: u64,
    /// Plates available to source from; makes the device a stacker.
    #[serde(default)]
    pub supply: Option<u32>,
    #[serde(default)]
    pub accepts_worklists: bool,
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>, product: impl Into<String>, locations: &[&str]) -> Self {
        Self {
            name: name.into(),
            product: product.into(),
            locations: locations.iter().map(|l| LocationSpec::new(*l)).collect(),
            process_ms: 0,
            supply: None,
            accepts_worklists: false,
        }
    }
}

/// Weight override for moves between two devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSpec {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

fn default_robot_product() -> String {
    "SimArm".to_string()
}

fn default_cost() -> f64 {
    1.0
}

fn default_barcode_prefix() -> String {
    "BC".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSpec {
    pub name: String,
    #[serde(default = "default_robot_product")]
    pub product: String,
    /// Devices whose places this robot can reach.
    #[serde(default)]
    pub reach: Vec<String>,
    #[serde(default = "default_cost")]
    pub cost: f64,
    #[serde(default)]
    pub costs: Vec<CostSpec>,
    #[serde(default)]
    pub transfer_ms: u64,
    #[serde(default = "default_barcode_prefix")]
    pub barcode_prefix: String,
    /// Number of initial transfers that fail.
    #[serde(default)]
    pub fail_transfers: u32,
}

impl RobotSpec {
    pub fn new<I, S>(name: impl Into<String>, reach: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            product: default_robot_product(),
            reach: reach.into_iter().map(Into::into).collect(),
            cost: default_cost(),
            costs: Vec::new(),
            transfer_ms: 0,
            barcode_prefix: default_barcode_prefix(),
            fail_transfers: 0,
        }
    }
}

/// Devices, robots and the worklists to run on them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub devices: Vec<DeviceSpec>,
    pub robots: Vec<RobotSpec>,
    pub worklists: Vec<Worklist>,
}

impl LabConfig {
    /// A small hitpicking cell: a destination stacker, a barcode reader, the
    /// hitpicker and a storage hotel docked as `hotel1`, all served by one arm.
    pub fn demo() -> Self {
        let stacker = DeviceSpec {
            supply: Some(4),
            process_ms: 20,
            ..DeviceSpec::new("stacker1", "Stacker", &["out"])
        };
        let reader = DeviceSpec {
            process_ms: 20,
            ..DeviceSpec::new("reader1", "Reader", &["nest"])
        };
        let bumblebee = DeviceSpec {
            process_ms: 50,
            accepts_worklists: true,
            ..DeviceSpec::new("bumblebee1", "Bumblebee", &["source", "dest"])
        };
        let hotel = DeviceSpec {
            process_ms: 10,
            ..DeviceSpec::new("hotel1", "Dock", &["h1", "h2", "h3"])
        };
        let arm = RobotSpec {
            transfer_ms: 20,
            costs: vec![CostSpec {
                from: "stacker1".to_string(),
                to: "hotel1".to_string(),
                weight: 4.0,
            }],
            ..RobotSpec::new("pf400", ["stacker1", "reader1", "bumblebee1", "hotel1"])
        };

        let worklist = Worklist::new("demo")
            .with_source_plates(vec![Plate::new("SRC-1", "96-well"), Plate::new("SRC-2", "96-well")])
            .with_destination_plates(vec![Plate::new("", "384-well"), Plate::new("", "384-well")])
            .with_tasks(TaskLists {
                dest_pre: vec![PlateTask::device("Stacker", "unstack"), PlateTask::device("Reader", "read")],
                dest_post: vec![PlateTask::device("Dock", "Load")],
                ..TaskLists::default()
            })
            .with_storage_device("hotel1");

        Self {
            devices: vec![stacker, reader, bumblebee, hotel],
            robots: vec![arm],
            worklists: vec![worklist],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_spec_yaml_defaults() {
        let yaml = r#"
name: reader1
product: Reader
locations:
  - name: nest
  - name: rack
    places: [r1, r2]
"#;
        let spec: DeviceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.locations[1].places, vec!["r1", "r2"]);
        assert_eq!(spec.supply, None);
        assert!(!spec.accepts_worklists);
    }

    #[test]
    fn test_robot_spec_yaml_defaults() {
        let spec: RobotSpec = serde_yaml::from_str("name: arm\nreach: [a, b]").unwrap();
        assert_eq!(spec.product, "SimArm");
        assert_eq!(spec.cost, 1.0);
        assert_eq!(spec.barcode_prefix, "BC");
    }

    #[test]
    fn test_demo_lab_covers_its_worklist() {
        let lab = LabConfig::demo();
        let products: Vec<&str> = lab.devices.iter().map(|d| d.product.as_str()).collect();
        for worklist in &lab.worklists {
            for device_type in worklist.required_device_types() {
                assert!(products.contains(&device_type.as_str()), "{} missing", device_type);
            }
        }
    }
}
