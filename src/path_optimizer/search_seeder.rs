//! Grid A* search used to seed a reference path
//!
//! Runs on the cells of the occupancy map; a cell is traversable when the
//! clearance at its center admits the center covering circle. The cell path is
//! thinned to waypoints that can be fed back into the reference processor.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use log::debug;
use ordered_float::OrderedFloat;

use super::config::Config;
use crate::common::{OccupancyMap, OptimizerError, OptimizerResult, Point2D, State};

/// Search seeder configuration
#[derive(Debug, Clone)]
pub struct SearchSeederConfig {
    /// Heuristic weight (1.0 = optimal, >1.0 = faster but suboptimal)
    pub heuristic_weight: f64,
    /// Minimum spacing of the emitted waypoints [m]
    pub waypoint_spacing: f64,
}

impl Default for SearchSeederConfig {
    fn default() -> Self {
        Self { heuristic_weight: 1.0, waypoint_spacing: 1.0 }
    }
}

#[derive(Debug, Clone)]
struct Node {
    x: i64,
    y: i64,
    cost: f64,
    parent_index: Option<usize>,
}

/// Open set entry, ordered as a min-heap on priority
#[derive(Debug, PartialEq, Eq)]
struct PriorityNode {
    priority: OrderedFloat<f64>,
    index: usize,
}

impl Ord for PriorityNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for PriorityNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of a successful search
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Thinned waypoints from start to end, headings along the path
    pub path: Vec<State>,
    /// Centers of every visited path cell, for display
    pub cells: Vec<Point2D>,
}

/// A* planner over the cells of an occupancy map
pub struct SearchSeeder<'m, M: OccupancyMap> {
    map: &'m M,
    radius: f64,
    config: SearchSeederConfig,
    motion: Vec<(i64, i64, f64)>,
}

impl<'m, M: OccupancyMap> SearchSeeder<'m, M> {
    pub fn new(map: &'m M, config: &Config) -> Self {
        Self::with_config(map, config, SearchSeederConfig::default())
    }

    pub fn with_config(map: &'m M, config: &Config, seeder_config: SearchSeederConfig) -> Self {
        Self {
            map,
            radius: config.circle_radius() + config.car_length() / 8.0 + config.expected_safety_margin,
            config: seeder_config,
            motion: Self::get_motion_model(),
        }
    }

    /// Search from `start` to `end`
    pub fn plan(&self, start: &State, end: &State) -> OptimizerResult<SearchResult> {
        let (sx, sy) = self.cell_of(start.position())?;
        let (gx, gy) = self.cell_of(end.position())?;
        if !self.is_traversable(sx, sy) || !self.is_traversable(gx, gy) {
            return Err(OptimizerError::Infeasible(
                "search start or goal cell is too close to an obstacle".to_string(),
            ));
        }

        let mut nodes = vec![Node { x: sx, y: sy, cost: 0.0, parent_index: None }];
        let mut open_set = BinaryHeap::new();
        let mut closed_set: HashMap<(i64, i64), usize> = HashMap::new();
        let mut best_cost: HashMap<(i64, i64), f64> = HashMap::new();
        open_set.push(PriorityNode { priority: OrderedFloat(self.calc_heuristic(sx, sy, gx, gy)), index: 0 });
        best_cost.insert((sx, sy), 0.0);

        while let Some(PriorityNode { index, .. }) = open_set.pop() {
            let current = nodes[index].clone();
            if closed_set.contains_key(&(current.x, current.y)) {
                continue;
            }
            if current.x == gx && current.y == gy {
                debug!("search reached the goal after {} expansions", closed_set.len());
                return Ok(self.calc_final_path(index, &nodes, start, end));
            }
            closed_set.insert((current.x, current.y), index);

            for &(dx, dy, step) in &self.motion {
                let (nx, ny) = (current.x + dx, current.y + dy);
                if closed_set.contains_key(&(nx, ny)) || !self.is_traversable(nx, ny) {
                    continue;
                }
                let cost = current.cost + step;
                if best_cost.get(&(nx, ny)).map_or(false, |&c| c <= cost) {
                    continue;
                }
                best_cost.insert((nx, ny), cost);
                nodes.push(Node { x: nx, y: ny, cost, parent_index: Some(index) });
                let priority = cost + self.calc_heuristic(nx, ny, gx, gy);
                open_set.push(PriorityNode { priority: OrderedFloat(priority), index: nodes.len() - 1 });
            }
        }

        Err(OptimizerError::Infeasible(format!(
            "search exhausted {} cells without reaching the goal",
            closed_set.len()
        )))
    }

    fn cell_of(&self, p: Point2D) -> OptimizerResult<(i64, i64)> {
        let extent = self.map.extent();
        if !extent.contains(p) {
            return Err(OptimizerError::OutOfMapBounds { x: p.x, y: p.y });
        }
        let res = self.map.resolution();
        Ok((((p.x - extent.min_x) / res).floor() as i64, ((p.y - extent.min_y) / res).floor() as i64))
    }

    fn cell_center(&self, x: i64, y: i64) -> Point2D {
        let extent = self.map.extent();
        let res = self.map.resolution();
        Point2D::new(extent.min_x + (x as f64 + 0.5) * res, extent.min_y + (y as f64 + 0.5) * res)
    }

    fn is_traversable(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 {
            return false;
        }
        self.map
            .clearance(self.cell_center(x, y))
            .map_or(false, |c| c >= self.radius)
    }

    fn calc_final_path(&self, goal_index: usize, nodes: &[Node], start: &State, end: &State) -> SearchResult {
        let mut cells = Vec::new();
        let mut current = Some(goal_index);
        while let Some(index) = current {
            let node = &nodes[index];
            cells.push(self.cell_center(node.x, node.y));
            current = node.parent_index;
        }
        cells.reverse();

        let mut waypoints = vec![start.position()];
        for &c in &cells[..cells.len().saturating_sub(1)] {
            let last = waypoints[waypoints.len() - 1];
            if c.distance(&last) >= self.config.waypoint_spacing && c.distance(&end.position()) >= self.config.waypoint_spacing {
                waypoints.push(c);
            }
        }
        waypoints.push(end.position());

        let n = waypoints.len();
        let path = (0..n)
            .map(|i| {
                let heading = if i == 0 {
                    start.heading
                } else if i == n - 1 {
                    end.heading
                } else {
                    let (a, b) = (waypoints[i - 1], waypoints[i + 1]);
                    (b.y - a.y).atan2(b.x - a.x)
                };
                State::new(waypoints[i].x, waypoints[i].y, heading)
            })
            .collect();
        SearchResult { path, cells }
    }

    fn calc_heuristic(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> f64 {
        let d = (((x1 - x2).pow(2) + (y1 - y2).pow(2)) as f64).sqrt();
        self.config.heuristic_weight * d * self.map.resolution()
    }

    fn get_motion_model() -> Vec<(i64, i64, f64)> {
        let d = 2_f64.sqrt();
        vec![
            (1, 0, 1.0),
            (0, 1, 1.0),
            (-1, 0, 1.0),
            (0, -1, 1.0),
            (-1, -1, d),
            (-1, 1, d),
            (1, -1, d),
            (1, 1, d),
        ]
    }
}
