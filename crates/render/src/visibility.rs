use std::sync::Arc;

use cellfield_common::{Aabb, Cell, CellId, Frustum};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Cull cells outside the view volume. Off: every resident cell is visible.
    pub enabled: bool,
}

/// Sorted ids of the cells inside the view volume.
pub type VisibleSet = Arc<[CellId]>;

/// Frustum visibility, recomputed only when the view-projection matrix changes
/// bit for bit or the cache is invalidated.
#[derive(Debug, Default)]
pub struct VisibilityCache {
    enabled: bool,
    last_matrix: Option<[u32; 16]>,
    visible: Option<VisibleSet>,
    recomputations: usize,
    hits: usize,
}

impl VisibilityCache {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.invalidate();
        }
    }

    /// Forget the cached result; the next query recomputes.
    pub fn invalidate(&mut self) {
        self.last_matrix = None;
        self.visible = None;
    }

    pub fn recomputations(&self) -> usize {
        self.recomputations
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Would a query with `view_proj` be served from the cache?
    pub fn is_cached(&self, view_proj: &Mat4) -> bool {
        self.visible.is_some() && self.last_matrix == Some(matrix_bits(view_proj))
    }

    /// Cells whose bounding box intersects the view volume. `None` means no
    /// culling applies (disabled, or a non-finite matrix). A cache hit returns
    /// the same `Arc` as the previous call.
    pub fn query<'a>(
        &mut self,
        view_proj: &Mat4,
        cells: impl IntoIterator<Item = &'a Cell>,
        cell_size: f32,
    ) -> Option<VisibleSet> {
        if !self.enabled {
            return None;
        }
        if !view_proj.is_finite() {
            tracing::debug!("non-finite view-projection, skipping culling");
            return None;
        }
        let bits = matrix_bits(view_proj);
        if self.last_matrix == Some(bits)
            && let Some(visible) = &self.visible
        {
            self.hits += 1;
            return Some(Arc::clone(visible));
        }

        let _span = tracing::info_span!("visibility").entered();
        let frustum = Frustum::from_matrix(*view_proj);
        let half = Vec3::splat(cell_size * 0.5);
        let mut ids: Vec<CellId> = cells
            .into_iter()
            .filter(|c| {
                let center = c.coord.world_center(cell_size);
                frustum.intersects_aabb(&Aabb::from_center_half_extent(center, half))
            })
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();

        let visible: VisibleSet = ids.into();
        self.recomputations += 1;
        self.last_matrix = Some(bits);
        self.visible = Some(Arc::clone(&visible));
        tracing::trace!(visible = visible.len(), "visibility recomputed");
        Some(visible)
    }
}

fn matrix_bits(m: &Mat4) -> [u32; 16] {
    m.to_cols_array().map(f32::to_bits)
}

/// Membership test on a sorted visible set.
pub fn is_visible(set: &[CellId], id: &CellId) -> bool {
    set.binary_search(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfield_common::CellCoord;

    fn camera(eye: Vec3) -> Mat4 {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(eye, eye + Vec3::NEG_Z, Vec3::Y);
        proj * view
    }

    fn cells() -> Vec<Cell> {
        // World z = cell y; the camera looks down -Z from z = 20.
        vec![
            Cell::new(CellCoord::new(0, 10, 0), "roca"),
            Cell::new(CellCoord::new(0, 30, 0), "roca"),
        ]
    }

    #[test]
    fn disabled_cache_culls_nothing() {
        let mut cache = VisibilityCache::new(VisibilityConfig { enabled: false });
        assert!(cache.query(&camera(Vec3::new(0.5, 0.5, 20.0)), &cells(), 1.0).is_none());
    }

    #[test]
    fn culls_cells_behind_camera() {
        let mut cache = VisibilityCache::new(VisibilityConfig { enabled: true });
        let cells = cells();
        let visible = cache.query(&camera(Vec3::new(0.5, 0.5, 20.0)), &cells, 1.0).unwrap();
        assert!(is_visible(&visible, &cells[0].id));
        assert!(!is_visible(&visible, &cells[1].id));
    }

    #[test]
    fn identical_matrix_returns_same_arc() {
        let mut cache = VisibilityCache::new(VisibilityConfig { enabled: true });
        let cells = cells();
        let m = camera(Vec3::new(0.5, 0.5, 20.0));
        let a = cache.query(&m, &cells, 1.0).unwrap();
        assert!(cache.is_cached(&m));
        let b = cache.query(&m, &cells, 1.0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.recomputations(), 1);
        assert_eq!(cache.hits(), 1);

        let moved = camera(Vec3::new(0.5, 0.5, 40.0));
        let c = cache.query(&moved, &cells, 1.0).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.len(), 2);
        assert_eq!(cache.recomputations(), 2);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let mut cache = VisibilityCache::new(VisibilityConfig { enabled: true });
        let cells = cells();
        let m = camera(Vec3::new(0.5, 0.5, 20.0));
        let a = cache.query(&m, &cells, 1.0).unwrap();
        cache.invalidate();
        let b = cache.query(&m, &cells, 1.0).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }
}
