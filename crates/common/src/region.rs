use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::types::CellCoord;

/// Inclusive axis-aligned box of integer cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
    pub z_min: i32,
    pub z_max: i32,
}

fn span(min: i32, max: i32) -> u64 {
    if max < min {
        0
    } else {
        (max as i64 - min as i64 + 1) as u64
    }
}

impl Region {
    pub fn new(x: (i32, i32), y: (i32, i32), z: (i32, i32)) -> Self {
        Self {
            x_min: x.0,
            x_max: x.1,
            y_min: y.0,
            y_max: y.1,
            z_min: z.0,
            z_max: z.1,
        }
    }

    pub fn x_span(&self) -> u64 {
        span(self.x_min, self.x_max)
    }

    pub fn y_span(&self) -> u64 {
        span(self.y_min, self.y_max)
    }

    pub fn z_span(&self) -> u64 {
        span(self.z_min, self.z_max)
    }

    /// Number of cells the region covers.
    pub fn total_cells(&self) -> u64 {
        self.x_span()
            .saturating_mul(self.y_span())
            .saturating_mul(self.z_span())
    }

    pub fn is_empty(&self) -> bool {
        self.total_cells() == 0
    }

    pub fn contains(&self, c: CellCoord) -> bool {
        (self.x_min..=self.x_max).contains(&c.x)
            && (self.y_min..=self.y_max).contains(&c.y)
            && (self.z_min..=self.z_max).contains(&c.z)
    }

    /// World-space center of the region.
    pub fn world_center(&self, cell_size: f32) -> Vec3 {
        let mid = |min: i32, max: i32| (min as f32 + max as f32 + 1.0) * 0.5 * cell_size;
        Vec3::new(
            mid(self.x_min, self.x_max),
            mid(self.z_min, self.z_max),
            mid(self.y_min, self.y_max),
        )
    }

    /// Half of the shorter horizontal extent, in meters.
    pub fn horizontal_radius(&self, cell_size: f32) -> f32 {
        self.x_span().min(self.y_span()) as f32 * cell_size * 0.5
    }

    /// Intersection with `bounds`, or `None` if they do not overlap.
    pub fn clamp_to(&self, bounds: &Region) -> Option<Region> {
        let r = Region {
            x_min: self.x_min.max(bounds.x_min),
            x_max: self.x_max.min(bounds.x_max),
            y_min: self.y_min.max(bounds.y_min),
            y_max: self.y_max.min(bounds.y_max),
            z_min: self.z_min.max(bounds.z_min),
            z_max: self.z_max.min(bounds.z_max),
        };
        (!r.is_empty()).then_some(r)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x[{}..={}] y[{}..={}] z[{}..={}]",
            self.x_min, self.x_max, self.y_min, self.y_max, self.z_min, self.z_max
        )
    }
}
