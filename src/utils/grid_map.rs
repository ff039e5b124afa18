// Occupancy grid map with a clearance (distance) field
// Based on the PythonRobotics grid map, extended with a brushfire distance transform.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::f64::consts::SQRT_2;

use log::debug;
use nalgebra as na;
use ordered_float::OrderedFloat;

use crate::common::{MapExtent, OccupancyMap, OptimizerError, OptimizerResult, Point2D};

/// Occupancy grid with a precomputed clearance field.
///
/// Cell `(ix, iy)` covers `[min_x + ix * res, min_x + (ix + 1) * res)` and the
/// same along y. The clearance field stores, per cell, a lower bound in meters
/// on the distance from any point of the cell to the nearest occupied cell and
/// is rebuilt after every mutation.
#[derive(Debug, Clone)]
pub struct GridMap {
    resolution: f64,
    min_x: f64,
    min_y: f64,
    occupancy: na::DMatrix<bool>,
    clearance: na::DMatrix<f64>,
}

impl GridMap {
    /// Create an obstacle-free map of `x_width` by `y_width` cells
    pub fn new(x_width: usize, y_width: usize, resolution: f64, origin: Point2D) -> OptimizerResult<Self> {
        if x_width == 0 || y_width == 0 {
            return Err(OptimizerError::InvalidConfig("grid map must have at least one cell".to_string()));
        }
        if !(resolution > 0.0) || !origin.is_finite() {
            return Err(OptimizerError::InvalidConfig(format!(
                "grid map resolution must be positive, got {}",
                resolution
            )));
        }
        Ok(Self {
            resolution,
            min_x: origin.x,
            min_y: origin.y,
            occupancy: na::DMatrix::from_element(x_width, y_width, false),
            clearance: na::DMatrix::from_element(x_width, y_width, f64::INFINITY),
        })
    }

    /// Create a map covering `extent` with obstacle points `(ox, oy)` inflated by `robot_radius`
    pub fn from_obstacles(
        ox: &[f64],
        oy: &[f64],
        extent: MapExtent,
        resolution: f64,
        robot_radius: f64,
    ) -> OptimizerResult<Self> {
        if ox.len() != oy.len() {
            return Err(OptimizerError::InvalidConfig("obstacle x/y must have same length".to_string()));
        }
        let x_width = ((extent.max_x - extent.min_x) / resolution).round().max(0.0) as usize;
        let y_width = ((extent.max_y - extent.min_y) / resolution).round().max(0.0) as usize;
        let mut map = Self::new(x_width, y_width, resolution, Point2D::new(extent.min_x, extent.min_y))?;

        for ix in 0..x_width {
            let x = map.calc_x_position(ix);
            for iy in 0..y_width {
                let y = map.calc_y_position(iy);
                let hit = ox
                    .iter()
                    .zip(oy.iter())
                    .any(|(&iox, &ioy)| ((iox - x).powi(2) + (ioy - y).powi(2)).sqrt() <= robot_radius);
                if hit {
                    map.occupancy[(ix, iy)] = true;
                }
            }
        }
        map.rebuild_clearance();
        Ok(map)
    }

    /// Create a map from an integer matrix (non-zero = occupied), each entry expanded to `scale` x `scale` cells
    pub fn from_matrix(
        original_matrix: &na::DMatrix<i32>,
        scale: usize,
        resolution: f64,
        origin: Point2D,
    ) -> OptimizerResult<Self> {
        if scale < 1 {
            return Err(OptimizerError::InvalidConfig("scale must be >= 1".to_string()));
        }
        let grid = original_matrix.kronecker(&na::DMatrix::<i32>::repeat(scale, scale, 1));
        let mut map = Self::new(grid.nrows(), grid.ncols(), resolution, origin)?;
        map.occupancy = grid.map(|v| v != 0);
        map.rebuild_clearance();
        Ok(map)
    }

    /// Mark every cell whose center lies inside the rectangle as occupied
    pub fn fill_rect(&mut self, min: Point2D, max: Point2D) {
        for ix in 0..self.x_width() {
            let x = self.calc_x_position(ix);
            if x < min.x || x > max.x {
                continue;
            }
            for iy in 0..self.y_width() {
                let y = self.calc_y_position(iy);
                if y >= min.y && y <= max.y {
                    self.occupancy[(ix, iy)] = true;
                }
            }
        }
        self.rebuild_clearance();
    }

    /// Mark the cell containing `p` as occupied. Returns false outside the map.
    pub fn set_occupied(&mut self, p: Point2D) -> bool {
        match self.cell_of(p) {
            Some(cell) => {
                self.occupancy[cell] = true;
                self.rebuild_clearance();
                true
            }
            None => false,
        }
    }

    pub fn x_width(&self) -> usize {
        self.occupancy.nrows()
    }

    pub fn y_width(&self) -> usize {
        self.occupancy.ncols()
    }

    pub fn calc_x_index(&self, x: f64) -> i64 {
        ((x - self.min_x) / self.resolution).floor() as i64
    }

    pub fn calc_y_index(&self, y: f64) -> i64 {
        ((y - self.min_y) / self.resolution).floor() as i64
    }

    /// World x of the center of column `ix`
    pub fn calc_x_position(&self, ix: usize) -> f64 {
        (ix as f64 + 0.5) * self.resolution + self.min_x
    }

    /// World y of the center of row `iy`
    pub fn calc_y_position(&self, iy: usize) -> f64 {
        (iy as f64 + 0.5) * self.resolution + self.min_y
    }

    /// Cell containing `p`, if inside the map
    pub fn cell_of(&self, p: Point2D) -> Option<(usize, usize)> {
        if !p.is_finite() {
            return None;
        }
        let ix = self.calc_x_index(p.x);
        let iy = self.calc_y_index(p.y);
        self.verify_index(ix, iy)
    }

    pub fn verify_index(&self, ix: i64, iy: i64) -> Option<(usize, usize)> {
        if ix < 0 || iy < 0 || ix >= self.x_width() as i64 || iy >= self.y_width() as i64 {
            return None;
        }
        Some((ix as usize, iy as usize))
    }

    pub fn is_cell_occupied(&self, ix: usize, iy: usize) -> bool {
        self.occupancy[(ix, iy)]
    }

    /// Brushfire distance transform seeded from every occupied cell.
    ///
    /// Each cell remembers its nearest seed, so distances are Euclidean
    /// between cell centers (up to the usual propagation approximation).
    fn rebuild_clearance(&mut self) {
        let (nx, ny) = (self.x_width(), self.y_width());
        let mut dist = na::DMatrix::from_element(nx, ny, f64::INFINITY);
        let mut nearest: na::DMatrix<Option<(usize, usize)>> = na::DMatrix::from_element(nx, ny, None);
        let mut open = BinaryHeap::new();

        for ix in 0..nx {
            for iy in 0..ny {
                if self.occupancy[(ix, iy)] {
                    dist[(ix, iy)] = 0.0;
                    nearest[(ix, iy)] = Some((ix, iy));
                    open.push(Reverse((OrderedFloat(0.0), ix, iy)));
                }
            }
        }

        let motion: [(i64, i64); 8] = [(1, 0), (0, 1), (-1, 0), (0, -1), (-1, -1), (-1, 1), (1, -1), (1, 1)];
        while let Some(Reverse((OrderedFloat(d), ix, iy))) = open.pop() {
            if d > dist[(ix, iy)] {
                continue;
            }
            let seed = match nearest[(ix, iy)] {
                Some(seed) => seed,
                None => continue,
            };
            for (dx, dy) in motion.iter() {
                let cell = match self.verify_index(ix as i64 + dx, iy as i64 + dy) {
                    Some(cell) => cell,
                    None => continue,
                };
                let ex = cell.0 as f64 - seed.0 as f64;
                let ey = cell.1 as f64 - seed.1 as f64;
                let candidate = (ex * ex + ey * ey).sqrt();
                if candidate < dist[cell] {
                    dist[cell] = candidate;
                    nearest[cell] = Some(seed);
                    open.push(Reverse((OrderedFloat(candidate), cell.0, cell.1)));
                }
            }
        }

        // Lower bound over every point of the cell to every point of the seed cell
        let res = self.resolution;
        self.clearance = dist.map(|d| if d <= 0.0 { 0.0 } else { ((d - SQRT_2) * res).max(0.0) });
        debug!(
            "grid map clearance rebuilt: {}x{} cells, {} occupied",
            nx,
            ny,
            self.occupancy.iter().filter(|&&o| o).count()
        );
    }
}

impl OccupancyMap for GridMap {
    fn clearance(&self, p: Point2D) -> Option<f64> {
        self.cell_of(p).map(|cell| self.clearance[cell])
    }

    fn is_occupied(&self, p: Point2D) -> Option<bool> {
        self.cell_of(p).map(|cell| self.occupancy[cell])
    }

    fn extent(&self) -> MapExtent {
        MapExtent::new(
            self.min_x,
            self.min_y,
            self.min_x + self.x_width() as f64 * self.resolution,
            self.min_y + self.y_width() as f64 * self.resolution,
        )
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_map_clearance() {
        let map = GridMap::new(20, 10, 0.5, Point2D::new(-5.0, -2.5)).unwrap();
        let extent = map.extent();
        assert_relative_eq!(extent.max_x, 5.0);
        assert_relative_eq!(extent.max_y, 2.5);
        assert_eq!(map.clearance(Point2D::new(0.0, 0.0)), Some(f64::INFINITY));
        assert_eq!(map.clearance(Point2D::new(5.1, 0.0)), None);
        assert_eq!(map.is_occupied(Point2D::new(4.9, 2.4)), Some(false));
    }

    #[test]
    fn test_invalid_map() {
        assert!(GridMap::new(0, 10, 0.5, Point2D::origin()).is_err());
        assert!(GridMap::new(10, 10, 0.0, Point2D::origin()).is_err());
    }

    #[test]
    fn test_clearance_grows_away_from_obstacle() {
        let mut map = GridMap::new(40, 40, 0.25, Point2D::origin()).unwrap();
        assert!(map.set_occupied(Point2D::new(5.0, 5.0)));
        assert_eq!(map.clearance(Point2D::new(5.0, 5.0)), Some(0.0));

        let near = map.clearance(Point2D::new(6.0, 5.0)).unwrap();
        let far = map.clearance(Point2D::new(8.0, 5.0)).unwrap();
        assert!(near < far);
        // four cells between centers, less the two half cell diagonals
        assert_relative_eq!(near, (4.0 - SQRT_2) * 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_fill_rect() {
        let mut map = GridMap::new(20, 20, 1.0, Point2D::origin()).unwrap();
        map.fill_rect(Point2D::new(4.0, 0.0), Point2D::new(6.0, 20.0));
        assert_eq!(map.is_occupied(Point2D::new(5.2, 10.0)), Some(true));
        assert_eq!(map.is_occupied(Point2D::new(2.0, 10.0)), Some(false));
        assert_relative_eq!(map.clearance(Point2D::new(1.5, 3.5)).unwrap(), 3.0 - SQRT_2, epsilon = 1e-9);
    }

    #[test]
    fn test_clearance_never_exceeds_true_distance() {
        let mut map = GridMap::new(16, 16, 1.0, Point2D::origin()).unwrap();
        let obstacles = [(0, 0), (9, 4), (4, 12), (13, 13)];
        for &(ix, iy) in &obstacles {
            assert!(map.set_occupied(Point2D::new(ix as f64 + 0.5, iy as f64 + 0.5)));
        }
        let true_distance = |p: Point2D| {
            obstacles
                .iter()
                .map(|&(ix, iy)| {
                    let dx = (ix as f64 - p.x).max(p.x - (ix as f64 + 1.0)).max(0.0);
                    let dy = (iy as f64 - p.y).max(p.y - (iy as f64 + 1.0)).max(0.0);
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::INFINITY, f64::min)
        };

        // tight at the cell corner facing a diagonal obstacle
        let p = Point2D::new(3.0, 3.0);
        assert_relative_eq!(map.clearance(p).unwrap(), true_distance(p), epsilon = 1e-9);

        for ix in 0..16 {
            for iy in 0..16 {
                for &(fx, fy) in &[(0.0, 0.0), (0.999, 0.0), (0.0, 0.999), (0.999, 0.999), (0.5, 0.5)] {
                    let p = Point2D::new(ix as f64 + fx, iy as f64 + fy);
                    let reported = map.clearance(p).unwrap();
                    assert!(
                        reported <= true_distance(p) + 1e-9,
                        "clearance {} at ({}, {}) above true distance {}",
                        reported,
                        p.x,
                        p.y,
                        true_distance(p)
                    );
                }
            }
        }
    }

    #[test]
    fn test_from_obstacles() {
        let ox = vec![5.0, 5.0, 5.0];
        let oy = vec![4.0, 5.0, 6.0];
        let extent = MapExtent::new(0.0, 0.0, 10.0, 10.0);
        let map = GridMap::from_obstacles(&ox, &oy, extent, 0.5, 0.5).unwrap();
        assert_eq!(map.x_width(), 20);
        assert_eq!(map.is_occupied(Point2D::new(5.1, 5.1)), Some(true));
        assert_eq!(map.is_occupied(Point2D::new(1.0, 1.0)), Some(false));
    }

    #[test]
    fn test_from_matrix_scaled() {
        let mut m = na::DMatrix::<i32>::zeros(3, 3);
        m[(1, 1)] = 1;
        let map = GridMap::from_matrix(&m, 2, 0.5, Point2D::origin()).unwrap();
        assert_eq!(map.x_width(), 6);
        assert!(map.is_cell_occupied(2, 3));
        assert!(!map.is_cell_occupied(0, 0));
    }
}
