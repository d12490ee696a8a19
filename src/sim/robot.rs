//! In-memory robot with configurable reach, costs and injected failures.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use super::{CostSpec, RobotSpec};
use crate::device::{Device, DeviceError, Robot, StatusSource, TransferRequest};
use crate::operation::{FnStep, RecoverableOperation, RecoveryConfig, RecoveryPolicy, StepError};
use crate::operator::ErrorChannel;
use crate::plate::STROBE;
use crate::topology::PlaceKey;

/// Snapshot published through the status poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotStatus {
    pub homed: bool,
    pub position: Option<PlaceKey>,
    pub transfers: u32,
}

pub struct SimRobot {
    name: String,
    product: String,
    reach: BTreeSet<String>,
    cost: f64,
    costs: Vec<CostSpec>,
    transfer: Duration,
    barcode_prefix: String,
    failures_left: AtomicU32,
    transfers: AtomicU32,
    barcodes_read: AtomicU32,
    moving: AtomicBool,
    homed: AtomicBool,
    position: Mutex<Option<PlaceKey>>,
}

impl SimRobot {
    pub fn new<I, S>(name: impl Into<String>, reach: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            product: "SimArm".to_string(),
            reach: reach.into_iter().map(Into::into).collect(),
            cost: 1.0,
            costs: Vec::new(),
            transfer: Duration::ZERO,
            barcode_prefix: "BC".to_string(),
            failures_left: AtomicU32::new(0),
            transfers: AtomicU32::new(0),
            barcodes_read: AtomicU32::new(0),
            moving: AtomicBool::new(false),
            homed: AtomicBool::new(false),
            position: Mutex::new(None),
        }
    }

    pub fn from_spec(spec: &RobotSpec) -> Self {
        Self {
            product: spec.product.clone(),
            cost: spec.cost,
            costs: spec.costs.clone(),
            transfer: Duration::from_millis(spec.transfer_ms),
            barcode_prefix: spec.barcode_prefix.clone(),
            failures_left: AtomicU32::new(spec.fail_transfers),
            ..Self::new(spec.name.clone(), spec.reach.iter().cloned())
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Weight for moves between two devices, in either direction.
    pub fn with_device_cost(mut self, a: impl Into<String>, b: impl Into<String>, weight: f64) -> Self {
        self.costs.push(CostSpec {
            from: a.into(),
            to: b.into(),
            weight,
        });
        self
    }

    pub fn with_transfer_time(mut self, transfer: Duration) -> Self {
        self.transfer = transfer;
        self
    }

    /// Fail the next `count` transfers.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn transfers(&self) -> u32 {
        self.transfers.load(Ordering::SeqCst)
    }

    pub fn barcodes_read(&self) -> u32 {
        self.barcodes_read.load(Ordering::SeqCst)
    }

    pub fn is_homed(&self) -> bool {
        self.homed.load(Ordering::SeqCst)
    }

    pub async fn home(&self) -> Result<(), DeviceError> {
        tracing::info!(robot = %self.name, "Homing");
        tokio::time::sleep(self.transfer).await;
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.homed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn position(&self) -> Option<PlaceKey> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Device for SimRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn product(&self) -> &str {
        &self.product
    }
}

#[async_trait]
impl Robot for SimRobot {
    fn transfer_weight(&self, from: &PlaceKey, to: &PlaceKey) -> Result<f64, DeviceError> {
        if !self.reach.contains(&from.device) || !self.reach.contains(&to.device) {
            return Ok(f64::INFINITY);
        }
        let weight = self
            .costs
            .iter()
            .find(|c| (c.from == from.device && c.to == to.device) || (c.from == to.device && c.to == from.device))
            .map_or(self.cost, |c| c.weight);
        Ok(weight)
    }

    async fn transfer_plate(&self, request: &TransferRequest, barcode: &mut String) -> Result<(), DeviceError> {
        self.moving.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.transfer).await;
        self.moving.store(false, Ordering::SeqCst);

        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(DeviceError::failed(
                &self.name,
                format!("gripper lost {} between {} and {}", request.plate, request.from, request.to),
            ));
        }

        if *barcode == STROBE {
            let n = self.barcodes_read.fetch_add(1, Ordering::SeqCst) + 1;
            *barcode = format!("{}{:04}", self.barcode_prefix, n);
            tracing::debug!(robot = %self.name, plate = %request.plate, barcode = %barcode, "Read barcode");
        }
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = Some(request.to.clone());
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Home a robot and wait until it reports itself homed.
pub fn homing_operation(
    robot: &SimRobot,
    errors: Arc<dyn ErrorChannel>,
    recovery: &RecoveryConfig,
) -> RecoverableOperation<SimRobot> {
    RecoverableOperation::new(format!("home {}", robot.name()), errors)
        .with_step(
            FnStep::new("home", |robot: &SimRobot| {
                async move { robot.home().await.map_err(StepError::from) }.boxed()
            }),
            RecoveryPolicy::default(),
        )
        .with_step(
            recovery.wait_until("homed", |robot: &SimRobot| robot.is_homed()),
            RecoveryPolicy::permissive(),
        )
}

#[async_trait]
impl StatusSource for SimRobot {
    type Status = RobotStatus;

    async fn read_status(&self) -> Result<RobotStatus, DeviceError> {
        if self.moving.load(Ordering::SeqCst) {
            return Err(DeviceError::failed(&self.name, "status unavailable while moving"));
        }
        Ok(RobotStatus {
            homed: self.is_homed(),
            position: self.position(),
            transfers: self.transfers(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LocationKey;

    fn key(device: &str) -> PlaceKey {
        PlaceKey::new(&LocationKey::new(device, "nest"), "nest")
    }

    fn request() -> TransferRequest {
        TransferRequest {
            plate: "wl/destination#0".to_string(),
            labware: "96".to_string(),
            from: key("a"),
            to: key("b"),
        }
    }

    #[test]
    fn test_weight_outside_reach_is_infinite() {
        let robot = SimRobot::new("arm", ["a", "b"]).with_cost(2.0).with_device_cost("b", "a", 7.0);
        assert_eq!(robot.transfer_weight(&key("a"), &key("b")).unwrap(), 7.0);
        assert_eq!(robot.transfer_weight(&key("a"), &key("a")).unwrap(), 2.0);
        assert!(robot.transfer_weight(&key("a"), &key("c")).unwrap().is_infinite());
    }

    #[tokio::test]
    async fn test_strobe_is_replaced_by_read_barcode() {
        let robot = SimRobot::new("arm", ["a", "b"]);
        let mut barcode = STROBE.to_string();
        robot.transfer_plate(&request(), &mut barcode).await.unwrap();
        assert_eq!(barcode, "BC0001");

        let mut known = "D-17".to_string();
        robot.transfer_plate(&request(), &mut known).await.unwrap();
        assert_eq!(known, "D-17");
        assert_eq!(robot.transfers(), 2);
        assert_eq!(robot.position(), Some(key("b")));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let robot = SimRobot::new("arm", ["a", "b"]);
        robot.fail_next(1);
        let mut barcode = String::new();
        assert!(robot.transfer_plate(&request(), &mut barcode).await.is_err());
        assert!(robot.transfer_plate(&request(), &mut barcode).await.is_ok());
        assert_eq!(robot.transfers(), 1);
    }

    #[tokio::test]
    async fn test_homing_operation_completes() {
        let robot = SimRobot::new("arm", ["a"]);
        let (queue, _inbox) = crate::operator::operator_channel();
        let mut op = homing_operation(&robot, Arc::new(queue), &RecoveryConfig::default());
        assert_eq!(op.name(), "home arm");
        let outcome = op.run(&robot).await.unwrap();
        assert_eq!(outcome, crate::operation::OperationOutcome::Completed);
        assert!(robot.is_homed());
    }

    #[tokio::test]
    async fn test_status_after_homing() {
        let robot = SimRobot::new("arm", ["a"]);
        assert!(!robot.read_status().await.unwrap().homed);
        robot.home().await.unwrap();
        let status = robot.read_status().await.unwrap();
        assert!(status.homed);
        assert_eq!(status.position, None);
    }
}
