use std::collections::HashMap;

use cellfield_common::{GeometryKind, GeometrySpec, MaterialSpec};

use crate::backend::{GeometryHandle, MaterialHandle, RenderBackend};
use crate::lod::LodTier;

/// Segment count a sphere uses when its spec does not say.
pub const SPHERE_SEGMENTS: f32 = 16.0;
/// Segment count cylinders, cones and tori use when their spec does not say.
pub const ROUND_SEGMENTS: f32 = 8.0;

/// `(floor at Medium, floor at Far)` for the segment parameters of a kind.
fn segment_floors(kind: GeometryKind) -> Option<(f32, f32)> {
    match kind {
        GeometryKind::Sphere => Some((8.0, 4.0)),
        GeometryKind::Cylinder | GeometryKind::Cone | GeometryKind::Torus => Some((4.0, 3.0)),
        GeometryKind::Box => None,
    }
}

fn segment_params(kind: GeometryKind) -> &'static [(&'static str, f32)] {
    match kind {
        GeometryKind::Sphere => &[("segments", SPHERE_SEGMENTS)],
        GeometryKind::Cylinder | GeometryKind::Cone => &[("segments", ROUND_SEGMENTS)],
        GeometryKind::Torus => &[
            ("radial_segments", ROUND_SEGMENTS),
            ("tubular_segments", ROUND_SEGMENTS),
        ],
        GeometryKind::Box => &[],
    }
}

/// Geometry spec with tessellation reduced for `tier`. Segment counts halve
/// at `Medium` and quarter at `Far`, never drop below a per-kind floor and
/// never exceed the original.
pub fn reduce_for_tier(spec: &GeometrySpec, tier: LodTier) -> GeometrySpec {
    let Some((medium_floor, far_floor)) = segment_floors(spec.kind) else {
        return spec.clone();
    };
    let (divisor, floor) = match tier {
        LodTier::Near => return spec.clone(),
        LodTier::Medium => (2.0, medium_floor),
        LodTier::Far => (4.0, far_floor),
    };
    let mut reduced = spec.clone();
    for &(name, default) in segment_params(spec.kind) {
        let original = spec.params.get(name).unwrap_or(default);
        let value = (original / divisor).floor().max(floor).min(original);
        reduced.params.set(name, value);
    }
    reduced
}

/// Hit/miss counters of the geometry cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

/// `(geometry spec, tier) -> backend handle`. Handles are reused across cells
/// and frames until `clear`.
#[derive(Debug, Default)]
pub struct GeometryCache {
    entries: HashMap<GeometrySpec, [Option<GeometryHandle>; 3]>,
    stats: GeometryCacheStats,
}

fn tier_slot(tier: LodTier) -> usize {
    match tier {
        LodTier::Near => 0,
        LodTier::Medium => 1,
        LodTier::Far => 2,
    }
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<B: RenderBackend + ?Sized>(
        &mut self,
        spec: &GeometrySpec,
        tier: LodTier,
        backend: &mut B,
    ) -> GeometryHandle {
        let slot = tier_slot(tier);
        if let Some(handle) = self.entries.get(spec).and_then(|tiers| tiers[slot]) {
            self.stats.hits += 1;
            return handle;
        }
        let handle = backend.create_geometry(&reduce_for_tier(spec, tier));
        self.entries.entry(spec.clone()).or_default()[slot] = Some(handle);
        self.stats.misses += 1;
        self.stats.entries += 1;
        tracing::trace!(kind = ?spec.kind, tier = tier.as_str(), ?handle, "prepared geometry");
        handle
    }

    pub fn len(&self) -> usize {
        self.stats.entries
    }

    pub fn is_empty(&self) -> bool {
        self.stats.entries == 0
    }

    pub fn stats(&self) -> GeometryCacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = GeometryCacheStats::default();
    }
}

/// Identical material specs share one backend material.
#[derive(Debug, Default)]
pub struct MaterialPool {
    entries: HashMap<MaterialSpec, MaterialHandle>,
}

impl MaterialPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<B: RenderBackend + ?Sized>(
        &mut self,
        material: &MaterialSpec,
        backend: &mut B,
    ) -> MaterialHandle {
        if let Some(handle) = self.entries.get(material) {
            return *handle;
        }
        let handle = backend.create_material(material);
        self.entries.insert(material.clone(), handle);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn sphere_reduction_table() {
        let sphere = GeometrySpec::new(GeometryKind::Sphere);
        assert_eq!(reduce_for_tier(&sphere, LodTier::Near), sphere);
        assert_eq!(reduce_for_tier(&sphere, LodTier::Medium).params.get("segments"), Some(8.0));
        assert_eq!(reduce_for_tier(&sphere, LodTier::Far).params.get("segments"), Some(4.0));
    }

    #[test]
    fn reduction_never_exceeds_original() {
        let coarse = GeometrySpec::new(GeometryKind::Cylinder).with_param("segments", 3.0);
        assert_eq!(reduce_for_tier(&coarse, LodTier::Medium).params.get("segments"), Some(3.0));
        assert_eq!(reduce_for_tier(&coarse, LodTier::Far).params.get("segments"), Some(3.0));

        let fine = GeometrySpec::new(GeometryKind::Cone).with_param("segments", 32.0);
        assert_eq!(reduce_for_tier(&fine, LodTier::Medium).params.get("segments"), Some(16.0));
        assert_eq!(reduce_for_tier(&fine, LodTier::Far).params.get("segments"), Some(8.0));
    }

    #[test]
    fn torus_reduces_both_segment_counts() {
        let torus = GeometrySpec::new(GeometryKind::Torus).with_param("radius", 0.5);
        let far = reduce_for_tier(&torus, LodTier::Far);
        assert_eq!(far.params.get("radial_segments"), Some(3.0));
        assert_eq!(far.params.get("tubular_segments"), Some(3.0));
        assert_eq!(far.params.get("radius"), Some(0.5));
    }

    #[test]
    fn box_is_unchanged() {
        let b = GeometrySpec::new(GeometryKind::Box).with_param("size", 1.0);
        assert_eq!(reduce_for_tier(&b, LodTier::Far), b);
    }

    #[test]
    fn cache_reuses_handles_per_tier() {
        let mut backend = RecordingBackend::new();
        let mut cache = GeometryCache::new();
        let sphere = GeometrySpec::new(GeometryKind::Sphere);
        let a = cache.get_or_create(&sphere, LodTier::Near, &mut backend);
        let b = cache.get_or_create(&sphere.clone(), LodTier::Near, &mut backend);
        let c = cache.get_or_create(&sphere, LodTier::Far, &mut backend);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.geometry_count(), 2);
        assert_eq!(cache.stats(), GeometryCacheStats { hits: 1, misses: 2, entries: 2 });
        assert_eq!(backend.geometry(c).and_then(|g| g.params.get("segments")), Some(4.0));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn material_pool_shares_identical_specs() {
        let mut backend = RecordingBackend::new();
        let mut pool = MaterialPool::new();
        let a = pool.get_or_create(&MaterialSpec::default(), &mut backend);
        let b = pool.get_or_create(&MaterialSpec::default(), &mut backend);
        let water = MaterialSpec {
            opacity: 0.6,
            ..MaterialSpec::default()
        };
        let c = pool.get_or_create(&water, &mut backend);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }
}
