use cellfield_common::{CellCoord, Region};
use serde::{Deserialize, Serialize};

/// Physical description of the world to load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionDescriptor {
    /// Horizontal extent along world X, in meters.
    pub width_m: f32,
    /// Horizontal extent along world Z (cell `y`), in meters.
    pub depth_m: f32,
    /// Edge length of one cell, in meters.
    pub cell_size: f32,
    /// Lowest cell layer the world can contain.
    pub min_depth: i32,
    /// Highest cell layer the world can contain.
    pub max_height: i32,
}

impl Default for DimensionDescriptor {
    fn default() -> Self {
        Self {
            width_m: 40.0,
            depth_m: 40.0,
            cell_size: 0.25,
            min_depth: -8,
            max_height: 35,
        }
    }
}

/// Ceiling and shape limits for computed regions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLimits {
    /// Hard ceiling imposed by the data source on one request.
    pub max_cells: u64,
    /// Largest horizontal span along cell `x`.
    pub max_cells_x: u32,
    /// Largest horizontal span along cell `y`.
    pub max_cells_y: u32,
    /// Vertical layers reserved above the surface for tall features.
    pub feature_height: i32,
    /// Factor applied to a streaming radius while the region is over the ceiling.
    pub radius_reduction: f32,
}

impl Default for RegionLimits {
    fn default() -> Self {
        Self {
            max_cells: 1_000_000,
            max_cells_x: 1000,
            max_cells_y: 1000,
            feature_height: 35,
            radius_reduction: 0.75,
        }
    }
}

/// Turns world descriptions and viewer positions into cell regions that
/// never exceed the data source ceiling.
#[derive(Debug, Clone, Default)]
pub struct RegionCalculator {
    limits: RegionLimits,
}

impl RegionCalculator {
    pub fn new(limits: RegionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RegionLimits {
        &self.limits
    }

    /// `total_cells(region) <= ceiling`.
    pub fn validate(&self, region: &Region) -> bool {
        region.total_cells() <= self.limits.max_cells
    }

    /// Initial region for a world: the full horizontal footprint (capped),
    /// a quarter of the vertical budget below the surface and the rest above.
    pub fn calculate(&self, dim: &DimensionDescriptor) -> Region {
        let ceiling = self.limits.max_cells.max(1);
        let cell_size = if dim.cell_size > 0.0 { dim.cell_size } else { 1.0 };

        let mut cells_x = cells_along(dim.width_m, cell_size).min(self.limits.max_cells_x.max(1) as u64);
        let mut cells_y = cells_along(dim.depth_m, cell_size).min(self.limits.max_cells_y.max(1) as u64);

        if cells_x * cells_y > ceiling {
            let scale = (ceiling as f64 / (cells_x * cells_y) as f64).sqrt();
            cells_x = ((cells_x as f64 * scale).floor() as u64).max(1);
            cells_y = ((cells_y as f64 * scale).floor() as u64).max(1);
        }

        let plane = cells_x * cells_y;
        let layers = (ceiling / plane).max(1) as i64;
        let below = layers / 4;
        let above = layers - below;

        let z_min = (dim.min_depth as i64).max(-below);
        let top = dim.max_height.max(self.limits.feature_height) as i64;
        let z_max = top.min(above - 1).max(z_min);

        let region = Region::new(
            (0, cells_x as i32 - 1),
            (0, cells_y as i32 - 1),
            (z_min as i32, z_max as i32),
        );
        let fitted = self.fit_to_ceiling(region);
        tracing::debug!(%fitted, cells = fitted.total_cells(), "computed initial region");
        fitted
    }

    /// Region centered on `center` with a horizontal radius in cells, vertical
    /// span `vertical`, clamped to `bounds` on each horizontal axis. The radius
    /// is reduced until the region fits the ceiling.
    pub fn region_around(
        &self,
        center: CellCoord,
        radius: i32,
        vertical: (i32, i32),
        bounds: Option<&Region>,
    ) -> Region {
        let factor = self.limits.radius_reduction.clamp(0.05, 0.95);
        let mut radius = radius.max(0);
        loop {
            let region = self.square_region(center, radius, vertical, bounds);
            if self.validate(&region) || radius == 0 {
                return self.fit_to_ceiling(region);
            }
            let reduced = (radius as f32 * factor).floor() as i32;
            tracing::debug!(radius, reduced, cells = region.total_cells(), "streaming region over ceiling");
            radius = reduced.min(radius - 1);
        }
    }

    fn square_region(
        &self,
        center: CellCoord,
        radius: i32,
        vertical: (i32, i32),
        bounds: Option<&Region>,
    ) -> Region {
        let (z_lo, z_hi) = (vertical.0.min(vertical.1), vertical.0.max(vertical.1));
        let mut region = Region::new(
            (center.x.saturating_sub(radius), center.x.saturating_add(radius)),
            (center.y.saturating_sub(radius), center.y.saturating_add(radius)),
            (z_lo, z_hi),
        );
        if let Some(b) = bounds {
            let cx = center.x.clamp(b.x_min, b.x_max.max(b.x_min));
            let cy = center.y.clamp(b.y_min, b.y_max.max(b.y_min));
            region.x_min = region.x_min.clamp(b.x_min, cx);
            region.x_max = region.x_max.clamp(cx, b.x_max.max(cx));
            region.y_min = region.y_min.clamp(b.y_min, cy);
            region.y_max = region.y_max.clamp(cy, b.y_max.max(cy));
        }
        region
    }

    /// Largest valid box derived from `region`: unchanged when it fits, else
    /// the downward extent shrinks first (the top layer is kept), then the
    /// horizontal footprint.
    pub fn fit_to_ceiling(&self, region: Region) -> Region {
        let ceiling = self.limits.max_cells.max(1);
        if region.total_cells() <= ceiling {
            return region;
        }

        let mut fitted = region;
        let plane = region.x_span().max(1) * region.y_span().max(1);
        if plane <= ceiling {
            let layers = (ceiling / plane) as i64;
            fitted.z_min = (region.z_max as i64 - layers + 1) as i32;
            tracing::debug!(z_min = fitted.z_min, z_max = fitted.z_max, "shrunk vertical span");
            return fitted;
        }

        fitted.z_min = region.z_max;
        let scale = (ceiling as f64 / plane as f64).sqrt();
        let mut xs = ((region.x_span() as f64 * scale).floor() as u64).max(1);
        let mut ys = ((region.y_span() as f64 * scale).floor() as u64).max(1);
        while xs * ys > ceiling {
            if xs >= ys {
                xs -= 1;
            } else {
                ys -= 1;
            }
        }
        fitted.x_max = (fitted.x_min as i64 + xs as i64 - 1) as i32;
        fitted.y_max = (fitted.y_min as i64 + ys as i64 - 1) as i32;
        tracing::debug!(xs, ys, "shrunk horizontal footprint to a single layer");
        fitted
    }
}

fn cells_along(meters: f32, cell_size: f32) -> u64 {
    if !meters.is_finite() || meters <= 0.0 {
        return 1;
    }
    ((meters / cell_size).floor() as u64).max(1)
}
