//! Common traits defining the collaborator interfaces of the optimizer

use crate::common::types::Point2D;

/// Axis-aligned spatial coverage of a map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MapExtent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn contains(&self, p: Point2D) -> bool {
        p.x >= self.min_x && p.x < self.max_x && p.y >= self.min_y && p.y < self.max_y
    }
}

/// Read-only occupancy map queried by the corridor extractor and the search seeder.
///
/// Implementations must be deterministic: identical queries return identical answers.
pub trait OccupancyMap {
    /// Distance in meters from `p` to the nearest occupied space.
    ///
    /// `None` if `p` lies outside the map coverage. Occupied cells report `0.0`,
    /// a map without obstacles reports `f64::INFINITY`.
    fn clearance(&self, p: Point2D) -> Option<f64>;

    /// Cell occupancy at `p`, `None` outside the coverage
    fn is_occupied(&self, p: Point2D) -> Option<bool> {
        self.clearance(p).map(|c| c <= 0.0)
    }

    /// Spatial bounds of the coverage
    fn extent(&self) -> MapExtent;

    /// Cell size in meters
    fn resolution(&self) -> f64;
}

impl<M: OccupancyMap + ?Sized> OccupancyMap for &M {
    fn clearance(&self, p: Point2D) -> Option<f64> {
        (**self).clearance(p)
    }

    fn is_occupied(&self, p: Point2D) -> Option<bool> {
        (**self).is_occupied(p)
    }

    fn extent(&self) -> MapExtent {
        (**self).extent()
    }

    fn resolution(&self) -> f64 {
        (**self).resolution()
    }
}
