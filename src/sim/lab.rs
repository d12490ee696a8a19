//! Builds a device registry and schedulers from a [`LabConfig`].

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{LabConfig, SimDevice, SimRobot};
use crate::device::{Device, DeviceRegistry};
use crate::error::{PlateschedError, Result};
use crate::operator::ErrorChannel;
use crate::scheduler::{PlateScheduler, PlateSchedulerConfig, RobotScheduler, RobotSchedulerConfig, Supervisor};

/// Simulated devices and robots registered under their capabilities.
pub struct SimLab {
    registry: Arc<DeviceRegistry>,
    devices: Vec<Arc<SimDevice>>,
    robots: Vec<Arc<SimRobot>>,
}

impl SimLab {
    pub fn build(config: &LabConfig) -> Result<Self> {
        let mut names = BTreeSet::new();
        for name in config
            .devices
            .iter()
            .map(|d| &d.name)
            .chain(config.robots.iter().map(|r| &r.name))
        {
            if !names.insert(name.as_str()) {
                return Err(PlateschedError::Config(format!("duplicate device name '{}'", name)));
            }
        }
        for robot in &config.robots {
            if let Some(unknown) = robot.reach.iter().find(|d| !config.devices.iter().any(|s| &s.name == *d)) {
                return Err(PlateschedError::Config(format!(
                    "robot '{}' reaches unknown device '{}'",
                    robot.name, unknown
                )));
            }
        }

        let registry = Arc::new(DeviceRegistry::new());
        let mut devices = Vec::new();
        for spec in &config.devices {
            let device = Arc::new(SimDevice::from_spec(spec));
            registry.add_plate_handler(device.clone());
            registry.add_topology_provider(device.clone());
            if spec.supply.is_some() {
                registry.add_stacker(device.clone());
            }
            if spec.accepts_worklists {
                registry.add_worklist_acceptor(device.clone());
            }
            log::debug!("Registered device {} ({})", spec.name, spec.product);
            devices.push(device);
        }
        let mut robots = Vec::new();
        for spec in &config.robots {
            let robot = Arc::new(SimRobot::from_spec(spec));
            registry.add_robot(robot.clone());
            log::debug!("Registered robot {} reaching {:?}", spec.name, spec.reach);
            robots.push(robot);
        }

        Ok(Self {
            registry,
            devices,
            robots,
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn devices(&self) -> &[Arc<SimDevice>] {
        &self.devices
    }

    pub fn robots(&self) -> &[Arc<SimRobot>] {
        &self.robots
    }

    pub fn device(&self, name: &str) -> Option<&Arc<SimDevice>> {
        self.devices.iter().find(|d| d.name() == name)
    }

    pub fn robot(&self, name: &str) -> Option<&Arc<SimRobot>> {
        self.robots.iter().find(|r| r.name() == name)
    }

    /// Plate scheduler and supervisor wired to this lab.
    pub fn schedulers(
        &self,
        plates: PlateSchedulerConfig,
        robot: RobotSchedulerConfig,
        errors: Arc<dyn ErrorChannel>,
    ) -> (Arc<PlateScheduler>, Arc<Supervisor>) {
        let robot = Arc::new(RobotScheduler::new(self.registry.clone(), robot));
        let plates = Arc::new(PlateScheduler::new(self.registry.clone(), robot, errors.clone(), plates));
        let supervisor = Arc::new(Supervisor::new(plates.clone(), errors));
        (plates, supervisor)
    }
}
