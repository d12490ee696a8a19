//! Runs both scheduler loops and escalates robot failures to the operator.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::plate_scheduler::PlateScheduler;
use super::robot_scheduler::RobotScheduler;
use crate::error::Result;
use crate::operator::{ABORT, ErrorChannel, ErrorReport, RETRY};

/// Owns the scheduler loops for one lab.
pub struct Supervisor {
    plates: Arc<PlateScheduler>,
    robot: Arc<RobotScheduler>,
    errors: Arc<dyn ErrorChannel>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(plates: Arc<PlateScheduler>, errors: Arc<dyn ErrorChannel>) -> Self {
        let robot = plates.robot_scheduler().clone();
        Self {
            plates,
            robot,
            errors,
            cancel: CancellationToken::new(),
        }
    }

    /// Run on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Stop both loops.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.plates.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run until stopped or until the operator aborts after a robot failure.
    pub async fn run(&self) -> Result<()> {
        let plates = self.plates.clone();
        let plate_loop = tokio::spawn(async move { plates.run().await });

        let result = self.supervise_robot().await;

        self.stop();
        match plate_loop.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Plate scheduler failed"),
            Err(e) => tracing::error!(error = ?e, "Plate scheduler task panicked"),
            Ok(Ok(())) => {}
        }
        result
    }

    async fn supervise_robot(&self) -> Result<()> {
        loop {
            let Err(e) = self.robot.run(self.cancel.child_token()).await else {
                return Ok(());
            };
            tracing::error!(error = %e, "Robot scheduler failed");

            let report = ErrorReport::new(e.to_string(), [RETRY, ABORT]);
            let choice = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                choice = self.errors.add_error(report) => choice,
            };

            if choice.as_deref() == Some(RETRY) {
                self.robot.requeue_current();
                tracing::info!("Restarting robot scheduler");
                continue;
            }
            if let Some(plate) = self.robot.discard_current() {
                tracing::warn!(plate = %plate, "Abandoned robot job");
            }
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceError, DeviceRegistry, Robot, TopologyProvider, TransferRequest};
    use crate::operator::operator_channel;
    use crate::plate::{ActivePlate, Plate, PlateKind, PlateTask, SharedPlate};
    use crate::scheduler::{PlateSchedulerConfig, RobotSchedulerConfig};
    use crate::topology::{PlaceKey, PlateLocation, SharedLocation};
    use crate::PlateschedError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Shelf {
        locations: Vec<SharedLocation>,
    }

    impl Device for Shelf {
        fn name(&self) -> &str {
            "shelf"
        }

        fn product(&self) -> &str {
            "Shelf"
        }
    }

    impl TopologyProvider for Shelf {
        fn locations(&self) -> Vec<SharedLocation> {
            self.locations.clone()
        }
    }

    struct JammingArm {
        failures: u32,
        calls: AtomicU32,
    }

    impl Device for JammingArm {
        fn name(&self) -> &str {
            "arm"
        }

        fn product(&self) -> &str {
            "Arm"
        }
    }

    #[async_trait]
    impl Robot for JammingArm {
        fn transfer_weight(&self, _from: &PlaceKey, _to: &PlaceKey) -> std::result::Result<f64, DeviceError> {
            Ok(1.0)
        }

        async fn transfer_plate(&self, _request: &TransferRequest, _barcode: &mut String) -> std::result::Result<(), DeviceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(DeviceError::failed("arm", "jammed"))
            } else {
                Ok(())
            }
        }
    }

    fn build(failures: u32) -> (Arc<Supervisor>, Arc<RobotScheduler>, SharedLocation, SharedLocation, crate::operator::OperatorInbox) {
        let a = PlateLocation::single("shelf", "a");
        let b = PlateLocation::single("shelf", "b");
        let registry = Arc::new(DeviceRegistry::new());
        registry.add_topology_provider(Arc::new(Shelf {
            locations: vec![a.clone(), b.clone()],
        }));
        registry.add_robot(Arc::new(JammingArm {
            failures,
            calls: AtomicU32::new(0),
        }));
        let robot = Arc::new(RobotScheduler::new(
            registry.clone(),
            RobotSchedulerConfig::default().with_poll_interval(Duration::from_millis(5)),
        ));
        let (queue, inbox) = operator_channel();
        let errors: Arc<dyn ErrorChannel> = Arc::new(queue);
        let plates = Arc::new(PlateScheduler::new(registry, robot.clone(), errors.clone(), PlateSchedulerConfig::default()));
        (Arc::new(Supervisor::new(plates, errors)), robot, a, b, inbox)
    }

    fn job(from: &SharedLocation, to: &SharedLocation) -> SharedPlate {
        let plate = Arc::new(ActivePlate::new(
            1,
            PlateKind::Source,
            0,
            "wl",
            Plate::new("S1", "96"),
            vec![PlateTask::device("A", "x"), PlateTask::device("B", "y")],
        ));
        plate.begin_job(from.clone());
        plate.mark_job_completed();
        from.set_occupied(true);
        plate.begin_job(to.clone());
        plate
    }

    #[tokio::test]
    async fn test_retry_requeues_and_restarts() {
        let (supervisor, robot, a, b, mut inbox) = build(1);
        let handle = supervisor.clone().spawn();
        robot.add_job(job(&a, &b));

        let mut pending = tokio::time::timeout(Duration::from_secs(1), inbox.next())
            .await
            .expect("failure should reach the operator")
            .unwrap();
        assert_eq!(pending.report().options, vec![RETRY.to_string(), ABORT.to_string()]);
        pending.resolve(RETRY).unwrap();

        tokio::time::timeout(Duration::from_secs(1), b.wait_until_occupied())
            .await
            .expect("retried job should deliver");
        supervisor.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_abort_stops_everything() {
        let (supervisor, robot, a, b, mut inbox) = build(5);
        let handle = supervisor.clone().spawn();
        robot.add_job(job(&a, &b));

        let mut pending = tokio::time::timeout(Duration::from_secs(1), inbox.next())
            .await
            .expect("failure should reach the operator")
            .unwrap();
        pending.resolve(ABORT).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(PlateschedError::Transfer { .. })));
        assert!(supervisor.is_stopped());
        assert!(robot.current_job().is_none());
        assert!(!b.is_occupied());
    }
}
