//! World graph and path planning.
//!
//! Every place of every topology provider is a node. For each unordered pair
//! of places and each robot, the robot's transfer weight becomes an
//! undirected edge when it is finite and positive. Paths are shortest paths
//! over that graph, searched from every source place to every destination
//! place of the two locations involved.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::device::{DeviceRegistry, Robot};
use crate::topology::{LocationKey, PlaceKey, PlateLocation, SharedLocation};

/// Edge payload: which robot can make the move and at what cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub robot: usize,
    pub weight: f64,
}

/// Snapshot of the lab topology at one moment.
#[derive(Default)]
pub struct World {
    graph: UnGraph<PlaceKey, Link>,
    nodes: HashMap<PlaceKey, NodeIndex>,
    locations: HashMap<LocationKey, SharedLocation>,
    robots: Vec<Arc<dyn Robot>>,
}

impl World {
    /// Build the graph from the registry's current devices.
    pub fn build(devices: &DeviceRegistry) -> Self {
        let mut world = Self {
            robots: devices.robots(),
            ..Self::default()
        };

        let mut places = Vec::new();
        for provider in devices.topology_providers() {
            for location in provider.locations() {
                for key in location.place_keys() {
                    if world.nodes.contains_key(&key) {
                        tracing::warn!(place = %key, "Duplicate place ignored");
                        continue;
                    }
                    let node = world.graph.add_node(key.clone());
                    world.nodes.insert(key.clone(), node);
                    places.push((key, node));
                }
                world.locations.insert(location.key().clone(), location);
            }
        }

        for (i, (src, src_node)) in places.iter().enumerate() {
            for (dst, dst_node) in &places[i + 1..] {
                for (index, robot) in world.robots.iter().enumerate() {
                    match robot.transfer_weight(src, dst) {
                        Ok(weight) if weight > 0.0 && weight.is_finite() => {
                            world.graph.add_edge(*src_node, *dst_node, Link { robot: index, weight });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(robot = robot.name(), from = %src, to = %dst, error = %e, "Robot cannot evaluate transfer");
                        }
                    }
                }
            }
        }

        let disconnected = world.disconnected_places();
        if !disconnected.is_empty() {
            let names: Vec<String> = disconnected.iter().map(ToString::to_string).collect();
            tracing::warn!(
                places = %names.join(", "),
                "Places are disconnected from the world, check their teachpoints"
            );
        }
        world
    }

    /// Places no robot can reach.
    pub fn disconnected_places(&self) -> Vec<PlaceKey> {
        self.graph
            .node_indices()
            .filter(|n| self.graph.edges(*n).next().is_none())
            .map(|n| self.graph[n].clone())
            .collect()
    }

    pub fn place_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn location(&self, key: &LocationKey) -> Option<&SharedLocation> {
        self.locations.get(key)
    }

    /// Cheapest edge between two adjacent nodes; the lowest edge index (the
    /// robot registered first) wins ties.
    fn best_link(&self, a: NodeIndex, b: NodeIndex) -> Option<(EdgeIndex, Link)> {
        self.graph
            .edges(a)
            .filter(|e| (e.source() == a && e.target() == b) || (e.source() == b && e.target() == a))
            .map(|e| (e.id(), *e.weight()))
            .min_by(|(ia, la), (ib, lb)| la.weight.total_cmp(&lb.weight).then(ia.index().cmp(&ib.index())))
    }

    fn shortest(&self, from: NodeIndex, to: NodeIndex) -> Option<(f64, Vec<NodeIndex>)> {
        astar(&self.graph, from, |n| n == to, |e| e.weight().weight, |_| 0.0)
    }

    /// Cheapest route between two locations, or `None` when unreachable.
    pub fn plan(&self, src: &PlateLocation, dst: &PlateLocation) -> Option<PlannedPath> {
        let mut best: Option<(f64, Vec<NodeIndex>)> = None;
        for src_place in src.place_keys() {
            let Some(&from) = self.nodes.get(&src_place) else {
                continue;
            };
            for dst_place in dst.place_keys() {
                let Some(&to) = self.nodes.get(&dst_place) else {
                    continue;
                };
                let Some((cost, nodes)) = self.shortest(from, to) else {
                    continue;
                };
                if best.as_ref().is_none_or(|(shortest, _)| cost < *shortest) {
                    best = Some((cost, nodes));
                }
            }
        }
        let (cost, nodes) = best?;
        self.to_path(cost, &nodes)
    }

    fn to_path(&self, cost: f64, nodes: &[NodeIndex]) -> Option<PlannedPath> {
        let mut hops = Vec::with_capacity(nodes.len().saturating_sub(1));
        for pair in nodes.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (_, link) = self.best_link(a, b)?;
            let from = self.graph[a].clone();
            let to = self.graph[b].clone();
            hops.push(Hop {
                robot: self.robots[link.robot].clone(),
                from_location: self.locations.get(&from.location_key())?.clone(),
                to_location: self.locations.get(&to.location_key())?.clone(),
                from,
                to,
                weight: link.weight,
            });
        }
        Some(PlannedPath {
            places: nodes.iter().map(|n| self.graph[*n].clone()).collect(),
            hops,
            cost,
        })
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("places", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("robots", &self.robots.len())
            .finish()
    }
}

/// One robot move between adjacent places.
#[derive(Clone)]
pub struct Hop {
    pub robot: Arc<dyn Robot>,
    pub from: PlaceKey,
    pub to: PlaceKey,
    pub from_location: SharedLocation,
    pub to_location: SharedLocation,
    pub weight: f64,
}

impl Hop {
    /// Hops inside one location need no transfer.
    pub fn changes_location(&self) -> bool {
        self.from_location.key() != self.to_location.key()
    }

    pub fn from_device(&self) -> &str {
        &self.from.device
    }

    pub fn to_device(&self) -> &str {
        &self.to.device
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("robot", &self.robot.name())
            .field("from", &self.from)
            .field("to", &self.to)
            .field("weight", &self.weight)
            .finish()
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} via {} ({})", self.from, self.to, self.robot.name(), self.weight)
    }
}

/// A route: visited places, the hops between them, and total cost.
#[derive(Debug, Clone)]
pub struct PlannedPath {
    pub places: Vec<PlaceKey>,
    pub hops: Vec<Hop>,
    pub cost: f64,
}

/// Plans routes against a world rebuilt from the live device registry.
pub struct PathPlanner {
    devices: Arc<DeviceRegistry>,
    world: World,
}

impl PathPlanner {
    pub fn new(devices: Arc<DeviceRegistry>) -> Self {
        Self {
            devices,
            world: World::default(),
        }
    }

    /// Rebuild the world from current topology and robot capabilities.
    pub fn build_world(&mut self) -> &World {
        self.world = World::build(&self.devices);
        tracing::debug!(
            places = self.world.place_count(),
            edges = self.world.edge_count(),
            "Built world graph"
        );
        &self.world
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn plan_path(&self, src: &PlateLocation, dst: &PlateLocation) -> Option<PlannedPath> {
        self.world.plan(src, dst)
    }

    /// Resolve both location keys against the world, then plan. Unlike
    /// [`plan_path`](Self::plan_path), an unreachable pair is an error.
    pub fn plan_between(&self, src: &LocationKey, dst: &LocationKey) -> crate::Result<PlannedPath> {
        let lookup = |key: &LocationKey| {
            self.world
                .location(key)
                .cloned()
                .ok_or_else(|| crate::PlateschedError::UnknownLocation(key.to_string()))
        };
        let (from, to) = (lookup(src)?, lookup(dst)?);
        self.plan_path(&from, &to).ok_or_else(|| crate::PlateschedError::Unreachable {
            from: src.to_string(),
            to: dst.to_string(),
        })
    }

    pub fn disconnected_places(&self) -> Vec<PlaceKey> {
        self.world.disconnected_places()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceError, TopologyProvider, TransferRequest};
    use async_trait::async_trait;

    struct Station {
        name: String,
        locations: Vec<SharedLocation>,
    }

    impl Station {
        /// Each entry is `location` or `location=place,place`.
        fn new(name: &str, locations: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                locations: locations
                    .iter()
                    .map(|entry| {
                        let (loc, places) = entry.split_once('=').unwrap_or((*entry, ""));
                        let places = places.split(',').filter(|p| !p.is_empty());
                        Arc::new(PlateLocation::new(name, loc, places))
                    })
                    .collect(),
            })
        }
    }

    impl Device for Station {
        fn name(&self) -> &str {
            &self.name
        }

        fn product(&self) -> &str {
            "Station"
        }
    }

    impl TopologyProvider for Station {
        fn locations(&self) -> Vec<SharedLocation> {
            self.locations.clone()
        }
    }

    /// Robot with a fixed cost table keyed by place names.
    struct Arm {
        name: String,
        costs: Vec<(String, String, f64)>,
    }

    impl Arm {
        fn new(name: &str, costs: &[(&str, &str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                costs: costs
                    .iter()
                    .map(|(a, b, w)| (a.to_string(), b.to_string(), *w))
                    .collect(),
            })
        }
    }

    impl Device for Arm {
        fn name(&self) -> &str {
            &self.name
        }

        fn product(&self) -> &str {
            "Arm"
        }
    }

    #[async_trait]
    impl Robot for Arm {
        fn transfer_weight(&self, from: &PlaceKey, to: &PlaceKey) -> Result<f64, DeviceError> {
            self.costs
                .iter()
                .find(|(a, b, _)| (*a == from.place && *b == to.place) || (*a == to.place && *b == from.place))
                .map(|(_, _, w)| *w)
                .ok_or_else(|| DeviceError::NoTeachpoint(to.place.clone()))
        }

        async fn transfer_plate(&self, _request: &TransferRequest, _barcode: &mut String) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn location(station: &Station, index: usize) -> SharedLocation {
        station.locations[index].clone()
    }

    #[test]
    fn test_edges_only_for_positive_finite_weights() {
        let registry = DeviceRegistry::new();
        registry.add_topology_provider(Station::new("s", &["a", "b", "c", "d"]));
        registry.add_robot(Arm::new(
            "arm",
            &[("a", "b", 1.0), ("a", "c", 0.0), ("a", "d", f64::INFINITY), ("b", "c", -2.0), ("c", "d", f64::NAN)],
        ));
        let world = World::build(&registry);
        assert_eq!(world.place_count(), 4);
        assert_eq!(world.edge_count(), 1);
        let disconnected: Vec<String> = world.disconnected_places().iter().map(|p| p.place.clone()).collect();
        assert_eq!(disconnected, vec!["c", "d"]);
    }

    #[test]
    fn test_prefers_cheaper_multi_hop_route() {
        let registry = DeviceRegistry::new();
        let station = Station::new("s", &["a", "b", "c"]);
        registry.add_topology_provider(station.clone());
        registry.add_robot(Arm::new("arm", &[("a", "c", 10.0), ("a", "b", 2.0), ("b", "c", 3.0)]));

        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        let path = planner.plan_path(&location(&station, 0), &location(&station, 2)).unwrap();
        assert_eq!(path.cost, 5.0);
        let places: Vec<&str> = path.places.iter().map(|p| p.place.as_str()).collect();
        assert_eq!(places, vec!["a", "b", "c"]);
        assert_eq!(path.hops.len(), 2);
        assert!(path.hops.iter().all(Hop::changes_location));
    }

    #[test]
    fn test_unreachable_is_none() {
        let registry = DeviceRegistry::new();
        let station = Station::new("s", &["a", "b"]);
        registry.add_topology_provider(station.clone());
        registry.add_robot(Arm::new("arm", &[]));
        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        assert!(planner.plan_path(&location(&station, 0), &location(&station, 1)).is_none());
    }

    #[test]
    fn test_picks_cheapest_place_pair() {
        let registry = DeviceRegistry::new();
        let station = Station::new("s", &["rack=r1,r2", "stage=t1,t2"]);
        registry.add_topology_provider(station.clone());
        registry.add_robot(Arm::new("arm", &[("r1", "t1", 4.0), ("r1", "t2", 3.0), ("r2", "t1", 2.0), ("r2", "t2", 2.0)]));
        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        let path = planner.plan_path(&location(&station, 0), &location(&station, 1)).unwrap();
        // r2->t1 and r2->t2 tie; the first combination found wins.
        assert_eq!(path.cost, 2.0);
        assert_eq!(path.places[0].place, "r2");
        assert_eq!(path.places[1].place, "t1");
    }

    #[test]
    fn test_parallel_edges_pick_cheapest_then_first_robot() {
        let registry = DeviceRegistry::new();
        let station = Station::new("s", &["a", "b"]);
        registry.add_topology_provider(station.clone());
        registry.add_robot(Arm::new("slow", &[("a", "b", 5.0)]));
        registry.add_robot(Arm::new("first", &[("a", "b", 1.0)]));
        registry.add_robot(Arm::new("second", &[("a", "b", 1.0)]));
        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        let path = planner.plan_path(&location(&station, 0), &location(&station, 1)).unwrap();
        assert_eq!(path.hops.len(), 1);
        assert_eq!(path.hops[0].robot.name(), "first");
        assert_eq!(path.cost, 1.0);
    }

    #[test]
    fn test_world_follows_registry_changes() {
        let registry = Arc::new(DeviceRegistry::new());
        let station = Station::new("s", &["a", "b"]);
        registry.add_topology_provider(station.clone());
        registry.add_robot(Arm::new("arm", &[("a", "b", 1.0)]));
        let mut planner = PathPlanner::new(registry.clone());
        planner.build_world();
        assert!(planner.plan_path(&location(&station, 0), &location(&station, 1)).is_some());

        registry.remove_device("arm");
        planner.build_world();
        assert!(planner.plan_path(&location(&station, 0), &location(&station, 1)).is_none());
    }

    #[test]
    fn test_plan_between_unknown_location() {
        let registry = DeviceRegistry::new();
        registry.add_topology_provider(Station::new("s", &["a"]));
        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        let err = planner
            .plan_between(&LocationKey::new("s", "a"), &LocationKey::new("s", "zz"))
            .unwrap_err();
        assert!(matches!(err, crate::PlateschedError::UnknownLocation(_)));
    }

    #[test]
    fn test_plan_between_unreachable_is_error() {
        let registry = DeviceRegistry::new();
        registry.add_topology_provider(Station::new("s", &["a", "b"]));
        let mut planner = PathPlanner::new(Arc::new(registry));
        planner.build_world();
        let err = planner
            .plan_between(&LocationKey::new("s", "a"), &LocationKey::new("s", "b"))
            .unwrap_err();
        assert_eq!(err.to_string(), "No path from s.a to s.b");
    }
}
