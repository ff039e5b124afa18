//! Visualization utilities for path_optimizer
//!
//! Plots maps, reference and optimized paths and corridor bounds with gnuplot.

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};

use crate::common::{Point2D, State};
use crate::path_optimizer::CorridorSample;
use crate::utils::GridMap;

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const GREEN: &str = "#00FF00";
    pub const BLUE: &str = "#0000FF";
    pub const ORANGE: &str = "#FFA500";
    pub const PURPLE: &str = "#800080";
    pub const GRAY: &str = "#808080";

    // Semantic colors
    pub const OBSTACLE: &str = BLACK;
    pub const START: &str = GREEN;
    pub const GOAL: &str = BLUE;
    pub const PATH: &str = RED;
    pub const REFERENCE: &str = GRAY;
    pub const SMOOTHED: &str = ORANGE;
    pub const CORRIDOR: &str = PURPLE;
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self { color: color.to_string(), line_width: 2.0, caption: caption.to_string() }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        Self::new(colors::PATH, "Path")
    }
}

/// Style for point rendering
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: String,
}

impl PointStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self { color: color.to_string(), size: 1.0, symbol: 'O', caption: caption.to_string() }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }
}

/// Main visualizer struct
pub struct Visualizer {
    figure: Figure,
    title: String,
    x_range: Option<(f64, f64)>,
    y_range: Option<(f64, f64)>,
    aspect_ratio: Option<f64>,
}

impl Visualizer {
    pub fn new() -> Self {
        Self { figure: Figure::new(), title: String::new(), x_range: None, y_range: None, aspect_ratio: Some(1.0) }
    }

    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    pub fn set_x_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.x_range = Some((min, max));
        self
    }

    pub fn set_y_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.y_range = Some((min, max));
        self
    }

    /// Plot a state sequence as a polyline
    pub fn plot_states(&mut self, states: &[State], style: &PathStyle) -> &mut Self {
        let x: Vec<f64> = states.iter().map(|s| s.x).collect();
        let y: Vec<f64> = states.iter().map(|s| s.y).collect();
        self.figure
            .axes2d()
            .lines(&x, &y, &[Caption(&style.caption), Color(&style.color), LineWidth(style.line_width)]);
        self
    }

    /// Plot multiple points
    pub fn plot_points(&mut self, points: &[Point2D], style: &PointStyle) -> &mut Self {
        let x: Vec<f64> = points.iter().map(|p| p.x).collect();
        let y: Vec<f64> = points.iter().map(|p| p.y).collect();
        self.figure.axes2d().points(
            &x,
            &y,
            &[Caption(&style.caption), Color(&style.color), PointSymbol(style.symbol), PointSize(style.size)],
        );
        self
    }

    /// Plot the occupied cells of a grid map
    pub fn plot_grid_map(&mut self, map: &GridMap) -> &mut Self {
        let mut cells = Vec::new();
        for ix in 0..map.x_width() {
            for iy in 0..map.y_width() {
                if map.is_cell_occupied(ix, iy) {
                    cells.push(Point2D::new(map.calc_x_position(ix), map.calc_y_position(iy)));
                }
            }
        }
        self.plot_points(&cells, &PointStyle::new(colors::OBSTACLE, "Obstacles").with_symbol('S').with_size(0.5))
    }

    /// Plot the left and right ends of corridor samples
    pub fn plot_corridor(&mut self, samples: &[CorridorSample], caption: &str) -> &mut Self {
        let (left, right) = corridor_points(samples);
        let style = PointStyle::new(colors::CORRIDOR, caption).with_symbol('.').with_size(0.6);
        self.plot_points(&left, &style);
        self.plot_points(&right, &PointStyle { caption: String::new(), ..style })
    }

    /// Plot a pose with a heading tick
    pub fn plot_pose(&mut self, state: &State, style: &PointStyle) -> &mut Self {
        self.plot_points(&[state.position()], style);
        let tip = state.offset(1.0, 0.0);
        self.figure
            .axes2d()
            .lines(&[state.x, tip.x], &[state.y, tip.y], &[Color(&style.color), LineWidth(2.0)]);
        self
    }

    pub fn plot_start(&mut self, state: &State) -> &mut Self {
        self.plot_pose(state, &PointStyle::new(colors::START, "Start").with_size(1.5))
    }

    pub fn plot_goal(&mut self, state: &State) -> &mut Self {
        self.plot_pose(state, &PointStyle::new(colors::GOAL, "Goal").with_size(1.5))
    }

    /// Finalize and show the plot
    pub fn show(&mut self) -> Result<(), String> {
        self.apply_settings();
        self.figure.show().map_err(|e| e.to_string()).map(|_| ())
    }

    /// Save plot to PNG file
    pub fn save_png(&mut self, path: &str, width: u32, height: u32) -> Result<(), String> {
        self.apply_settings();
        self.figure.save_to_png(path, width, height).map_err(|e| e.to_string())
    }

    fn apply_settings(&mut self) {
        let axes = self.figure.axes2d();
        if !self.title.is_empty() {
            axes.set_title(&self.title, &[]);
        }
        axes.set_x_label("X [m]", &[]);
        axes.set_y_label("Y [m]", &[]);
        if let Some((min, max)) = self.x_range {
            axes.set_x_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some((min, max)) = self.y_range {
            axes.set_y_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some(ratio) = self.aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

/// World positions of the left and right ends of every free corridor sample
pub fn corridor_points(samples: &[CorridorSample]) -> (Vec<Point2D>, Vec<Point2D>) {
    let left = samples.iter().filter_map(|s| s.left_point()).collect();
    let right = samples.iter().filter_map(|s| s.right_point()).collect();
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_optimizer::CorridorBound;

    #[test]
    fn test_path_style() {
        let style = PathStyle::new(colors::SMOOTHED, "Smoothed").with_line_width(3.0);
        assert_eq!(style.line_width, 3.0);
        assert_eq!(style.color, colors::SMOOTHED);
    }

    #[test]
    fn test_corridor_points_skip_blocked() {
        let base = State::new(0.0, 0.0, 0.0);
        let samples = vec![
            CorridorSample { base, bound: CorridorBound::Free { left: 1.0, right: -1.0 } },
            CorridorSample { base, bound: CorridorBound::Blocked },
        ];
        let (left, right) = corridor_points(&samples);
        assert_eq!(left, vec![Point2D::new(0.0, 1.0)]);
        assert_eq!(right.len(), 1);
    }
}
