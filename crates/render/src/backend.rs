use std::collections::BTreeMap;
use std::fmt::Write as _;

use cellfield_common::{GeometrySpec, InstanceRaw, MaterialSpec};

use crate::batch::{Batch, BatchKey};

/// Opaque geometry resource owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(pub u32);

/// Opaque material resource owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(pub u32);

/// Renderer-agnostic drawing interface. The cell field only hands over
/// handles and instance transforms; graphics objects stay behind this trait.
pub trait RenderBackend {
    fn create_geometry(&mut self, geometry: &GeometrySpec) -> GeometryHandle;
    fn create_material(&mut self, material: &MaterialSpec) -> MaterialHandle;
    /// Create or replace the draw unit for `batch.key`.
    fn upload_batch(&mut self, batch: &Batch);
    /// Overwrite individual instance slots of a live batch.
    fn update_instances(&mut self, key: BatchKey, slots: &[(u32, InstanceRaw)]);
    fn remove_batch(&mut self, key: BatchKey);
    /// Release every resource created so far.
    fn dispose(&mut self);
}

/// Backend that records what it was asked to draw. Used by the CLI and tests.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    geometries: Vec<GeometrySpec>,
    materials: Vec<MaterialSpec>,
    batches: BTreeMap<BatchKey, Vec<InstanceRaw>>,
    /// Number of `upload_batch` calls.
    pub uploads: usize,
    /// Number of `update_instances` calls.
    pub instance_updates: usize,
    /// Number of `remove_batch` calls.
    pub removals: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&GeometrySpec> {
        self.geometries.get(handle.0 as usize)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&MaterialSpec> {
        self.materials.get(handle.0 as usize)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn instances(&self, key: BatchKey) -> Option<&[InstanceRaw]> {
        self.batches.get(&key).map(Vec::as_slice)
    }

    /// Visible instances over all live batches.
    pub fn visible_instances(&self) -> usize {
        self.batches
            .values()
            .flatten()
            .filter(|i| !i.is_hidden())
            .count()
    }

    /// Human-readable summary of the recorded state.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== Backend (geometries={}, materials={}, batches={}) ===",
            self.geometries.len(),
            self.materials.len(),
            self.batches.len()
        );
        for (key, instances) in &self.batches {
            let hidden = instances.iter().filter(|i| i.is_hidden()).count();
            let _ = writeln!(
                out,
                "  [{key}] instances={} hidden={hidden}",
                instances.len()
            );
        }
        out
    }
}

impl RenderBackend for RecordingBackend {
    fn create_geometry(&mut self, geometry: &GeometrySpec) -> GeometryHandle {
        self.geometries.push(geometry.clone());
        GeometryHandle(self.geometries.len() as u32 - 1)
    }

    fn create_material(&mut self, material: &MaterialSpec) -> MaterialHandle {
        self.materials.push(material.clone());
        MaterialHandle(self.materials.len() as u32 - 1)
    }

    fn upload_batch(&mut self, batch: &Batch) {
        self.uploads += 1;
        self.batches.insert(batch.key, batch.instances.clone());
    }

    fn update_instances(&mut self, key: BatchKey, slots: &[(u32, InstanceRaw)]) {
        self.instance_updates += 1;
        if let Some(instances) = self.batches.get_mut(&key) {
            for (slot, raw) in slots {
                if let Some(dst) = instances.get_mut(*slot as usize) {
                    *dst = *raw;
                }
            }
        }
    }

    fn remove_batch(&mut self, key: BatchKey) {
        self.removals += 1;
        self.batches.remove(&key);
    }

    fn dispose(&mut self) {
        self.geometries.clear();
        self.materials.clear();
        self.batches.clear();
    }
}
