//! Corridor extraction with the covering-circle collision model
//!
//! For every station the free lateral interval is searched along the station
//! normal at three longitudinal positions of the vehicle body (rear, center,
//! front). The rear and front circles use the plain covering radius; the center
//! query covers the two middle circles with a radius enlarged by `L/8`.

use super::config::Config;
use crate::common::{OccupancyMap, Point2D, State};

/// Free lateral interval of one query position, meters along the left normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorridorBound {
    Free { left: f64, right: f64 },
    /// Base point inside the map but no free offset within the search range
    Blocked,
    /// Base point outside the map coverage
    OutOfMap,
}

impl CorridorBound {
    pub fn is_free(&self) -> bool {
        matches!(self, CorridorBound::Free { .. })
    }

    /// `(right, left)` when free
    pub fn interval(&self) -> Option<(f64, f64)> {
        match *self {
            CorridorBound::Free { left, right } => Some((right, left)),
            _ => None,
        }
    }

    /// Overlap of two free intervals, `Blocked` if they do not overlap
    pub fn intersect(&self, other: &CorridorBound) -> CorridorBound {
        match (self.interval(), other.interval()) {
            (Some((r1, l1)), Some((r2, l2))) => {
                let (right, left) = (r1.max(r2), l1.min(l2));
                if right <= left {
                    CorridorBound::Free { left, right }
                } else {
                    CorridorBound::Blocked
                }
            }
            _ => CorridorBound::Blocked,
        }
    }
}

/// Longitudinal query position on the vehicle body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CirclePosition {
    /// Offset from the rear axle along the heading [m]
    pub offset: f64,
    /// Required clearance including the safety margin [m]
    pub radius: f64,
}

/// Corridor of one station and one query position, for display and analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorridorSample {
    /// Query base pose: the station pose moved to the circle position
    pub base: State,
    pub bound: CorridorBound,
}

impl CorridorSample {
    pub fn left_point(&self) -> Option<Point2D> {
        self.bound.interval().map(|(_, left)| self.base.offset(0.0, left))
    }

    pub fn right_point(&self) -> Option<Point2D> {
        self.bound.interval().map(|(right, _)| self.base.offset(0.0, right))
    }
}

/// Rear, center and front corridors of a single station
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationCorridor {
    pub rear: CorridorBound,
    pub center: CorridorBound,
    pub front: CorridorBound,
}

impl StationCorridor {
    pub fn as_array(&self) -> [CorridorBound; 3] {
        [self.rear, self.center, self.front]
    }
}

/// Lateral free-space queries against an occupancy map
pub struct CollisionChecker<'m, M: OccupancyMap> {
    map: &'m M,
    positions: [CirclePosition; 3],
    max_lateral_search: f64,
}

impl<'m, M: OccupancyMap> CollisionChecker<'m, M> {
    pub fn new(map: &'m M, config: &Config) -> Self {
        let radius = config.circle_radius() + config.expected_safety_margin;
        let d = config.circle_offsets();
        let rear_axle = config.rear_axle_to_center();
        Self {
            map,
            positions: [
                CirclePosition { offset: rear_axle + d[0], radius },
                CirclePosition { offset: rear_axle, radius: radius + config.car_length() / 8.0 },
                CirclePosition { offset: rear_axle + d[3], radius },
            ],
            max_lateral_search: config.max_lateral_search,
        }
    }

    /// Rear, center and front query positions
    pub fn positions(&self) -> &[CirclePosition; 3] {
        &self.positions
    }

    /// Whether a circle of `radius` centered at `p` is collision-free. `None` outside the map.
    pub fn is_free(&self, p: Point2D, radius: f64) -> Option<bool> {
        self.map.clearance(p).map(|c| c >= radius)
    }

    /// Corridor of one query position at `station`
    pub fn corridor_bound(&self, station: &State, position: &CirclePosition) -> CorridorBound {
        let base = station.offset(position.offset, 0.0);
        let step = self.map.resolution();
        let heading = station.heading;
        let free = |j: i64| {
            let lateral = j as f64 * step;
            let p = Point2D::new(base.x - heading.sin() * lateral, base.y + heading.cos() * lateral);
            self.is_free(p, position.radius).unwrap_or(false)
        };

        if self.map.clearance(base).is_none() {
            return CorridorBound::OutOfMap;
        }
        let limit = (self.max_lateral_search / step).floor() as i64;

        let seed = if free(0) {
            Some(0)
        } else {
            (1..=limit).find_map(|j| {
                if free(j) {
                    Some(j)
                } else if free(-j) {
                    Some(-j)
                } else {
                    None
                }
            })
        };
        let seed = match seed {
            Some(seed) => seed,
            None => return CorridorBound::Blocked,
        };

        let mut left = seed;
        while left < limit && free(left + 1) {
            left += 1;
        }
        let mut right = seed;
        while right > -limit && free(right - 1) {
            right -= 1;
        }
        CorridorBound::Free { left: left as f64 * step, right: right as f64 * step }
    }

    /// Rear, center and front corridors at `station`
    pub fn station_corridor(&self, station: &State) -> StationCorridor {
        StationCorridor {
            rear: self.corridor_bound(station, &self.positions[0]),
            center: self.corridor_bound(station, &self.positions[1]),
            front: self.corridor_bound(station, &self.positions[2]),
        }
    }

    /// Display sample of one query position at `station`
    pub fn sample(&self, station: &State, index: usize, bound: CorridorBound) -> CorridorSample {
        let p = station.offset(self.positions[index].offset, 0.0);
        CorridorSample { base: State::new(p.x, p.y, station.heading), bound }
    }
}
