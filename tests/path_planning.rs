//! Path planning over the world graph.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use platesched::device::{Device, DeviceError, DeviceRegistry, Robot, TopologyProvider, TransferRequest};
use platesched::planner::PathPlanner;
use platesched::sim::{LabConfig, SimLab};
use platesched::topology::{LocationKey, PlaceKey, PlateLocation, SharedLocation};
use platesched::PlateschedError;

struct Rack {
    name: String,
    locations: Vec<SharedLocation>,
}

impl Rack {
    /// Locations as (name, comma-separated places).
    fn new(name: &str, locations: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            locations: locations
                .iter()
                .map(|(location, places)| Arc::new(PlateLocation::new(name, *location, places.split(','))))
                .collect(),
        })
    }

    fn location(&self, name: &str) -> SharedLocation {
        self.locations.iter().find(|l| l.name() == name).cloned().unwrap()
    }
}

impl Device for Rack {
    fn name(&self) -> &str {
        &self.name
    }

    fn product(&self) -> &str {
        "Rack"
    }
}

impl TopologyProvider for Rack {
    fn locations(&self) -> Vec<SharedLocation> {
        self.locations.clone()
    }
}

/// Weights keyed by place name pairs; anything else is unreachable.
struct TableArm {
    name: String,
    weights: HashMap<(String, String), f64>,
}

impl TableArm {
    fn new(name: &str, weights: &[(&str, &str, f64)]) -> Arc<Self> {
        let mut table = HashMap::new();
        for (a, b, w) in weights {
            table.insert((a.to_string(), b.to_string()), *w);
            table.insert((b.to_string(), a.to_string()), *w);
        }
        Arc::new(Self {
            name: name.to_string(),
            weights: table,
        })
    }
}

impl Device for TableArm {
    fn name(&self) -> &str {
        &self.name
    }

    fn product(&self) -> &str {
        "TableArm"
    }
}

#[async_trait]
impl Robot for TableArm {
    fn transfer_weight(&self, from: &PlaceKey, to: &PlaceKey) -> Result<f64, DeviceError> {
        if from.place == "broken" || to.place == "broken" {
            return Err(DeviceError::NoTeachpoint("broken".to_string()));
        }
        Ok(self
            .weights
            .get(&(from.place.clone(), to.place.clone()))
            .copied()
            .unwrap_or(f64::INFINITY))
    }

    async fn transfer_plate(&self, _request: &TransferRequest, _barcode: &mut String) -> Result<(), DeviceError> {
        Ok(())
    }
}

fn planner(rack: &Arc<Rack>, arms: &[Arc<TableArm>]) -> PathPlanner {
    let registry = Arc::new(DeviceRegistry::new());
    registry.add_topology_provider(rack.clone());
    for arm in arms {
        registry.add_robot(arm.clone());
    }
    let mut planner = PathPlanner::new(registry);
    planner.build_world();
    planner
}

#[test]
fn test_cheapest_source_place_wins() {
    let rack = Rack::new("rack", &[("A", "A1,A2"), ("B", "B1")]);
    let arm = TableArm::new("arm", &[("A1", "B1", 5.0), ("A2", "B1", 3.0)]);
    let planner = planner(&rack, &[arm]);

    let path = planner.plan_path(&rack.location("A"), &rack.location("B")).unwrap();
    assert_eq!(path.cost, 3.0);
    assert_eq!(path.places.first().unwrap().place, "A2");
    assert_eq!(path.places.last().unwrap().place, "B1");
    assert_eq!(path.hops.len(), 1);
}

#[test]
fn test_path_endpoints_belong_to_requested_locations() {
    let rack = Rack::new("rack", &[("A", "A1"), ("M", "M1,M2"), ("B", "B1,B2")]);
    let arm = TableArm::new(
        "arm",
        &[("A1", "M1", 1.0), ("M1", "M2", 1.0), ("M2", "B2", 1.0), ("A1", "B1", 10.0)],
    );
    let planner = planner(&rack, &[arm]);

    let path = planner.plan_path(&rack.location("A"), &rack.location("B")).unwrap();
    assert_eq!(path.cost, 3.0);
    assert_eq!(path.places.first().unwrap().location, "A");
    assert_eq!(path.places.last().unwrap().location, "B");
    // The M1 -> M2 hop stays inside one location and needs no transfer.
    let transfers = path.hops.iter().filter(|h| h.changes_location()).count();
    assert_eq!(transfers, 2);
    for hop in &path.hops {
        assert_eq!(hop.from_device(), "rack");
        assert_eq!(hop.to_device(), "rack");
    }
}

#[test]
fn test_invalid_weights_never_become_edges() {
    let rack = Rack::new("rack", &[("A", "A1,broken"), ("B", "B1"), ("C", "C1"), ("D", "D1")]);
    let arm = TableArm::new(
        "arm",
        &[("A1", "B1", 0.0), ("A1", "C1", -2.0), ("A1", "D1", f64::NAN), ("B1", "C1", f64::INFINITY)],
    );
    let planner = planner(&rack, &[arm]);

    assert_eq!(planner.world().edge_count(), 0);
    assert!(planner.plan_path(&rack.location("A"), &rack.location("B")).is_none());
    assert!(planner.plan_path(&rack.location("A"), &rack.location("C")).is_none());
    assert!(planner.plan_path(&rack.location("A"), &rack.location("D")).is_none());
    assert_eq!(planner.disconnected_places().len(), 5);
}

#[test]
fn test_unreachable_location_is_none() {
    let rack = Rack::new("rack", &[("A", "A1"), ("B", "B1"), ("island", "I1")]);
    let arm = TableArm::new("arm", &[("A1", "B1", 1.0)]);
    let planner = planner(&rack, &[arm]);

    assert!(planner.plan_path(&rack.location("A"), &rack.location("B")).is_some());
    assert!(planner.plan_path(&rack.location("A"), &rack.location("island")).is_none());
    assert_eq!(planner.disconnected_places().len(), 1);
}

#[test]
fn test_first_registered_robot_wins_equal_edges() {
    let rack = Rack::new("rack", &[("A", "A1"), ("B", "B1")]);
    let first = TableArm::new("first", &[("A1", "B1", 2.0)]);
    let second = TableArm::new("second", &[("A1", "B1", 2.0)]);
    let planner = planner(&rack, &[first, second]);

    let path = planner.plan_path(&rack.location("A"), &rack.location("B")).unwrap();
    assert_eq!(path.hops[0].robot.name(), "first");
}

#[test]
fn test_plan_between_demo_locations() {
    let lab = SimLab::build(&LabConfig::demo()).unwrap();
    let mut planner = PathPlanner::new(lab.registry().clone());
    planner.build_world();

    let from = LocationKey::parse("stacker1.out").unwrap();
    let to = LocationKey::parse("hotel1.h2").unwrap();
    let path = planner.plan_between(&from, &to).unwrap();
    // The direct move is weighted 4; going through the reader costs 2.
    assert_eq!(path.cost, 2.0);
    assert_eq!(path.hops.len(), 2);
    assert_eq!(path.hops[0].robot.name(), "pf400");

    let unknown = LocationKey::parse("ghost.nest").unwrap();
    assert!(matches!(
        planner.plan_between(&from, &unknown),
        Err(PlateschedError::UnknownLocation(_))
    ));
}
