use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use cellfield_common::{Cell, CellCoord, CellId, InstanceRaw, Transform};
use serde::{Deserialize, Serialize};

use crate::backend::{GeometryHandle, MaterialHandle, RenderBackend};
use crate::geometry::{GeometryCache, GeometryCacheStats, MaterialPool};
use crate::lod::{Candidate, LodTier};
use crate::style::StyleTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Capacity of one draw batch.
    pub max_instances_per_batch: usize,
    /// Order instances and groups by depth so translucent cells blend correctly.
    pub depth_sort: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_instances_per_batch: 100_000,
            depth_sort: true,
        }
    }
}

/// Visual identity of a render group. Geometry handles are per (spec, tier),
/// so equal keys mean equal geometry, tier and material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderGroupKey {
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
}

/// One draw unit: a render group id plus the chunk index inside the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchKey {
    pub group: u32,
    pub chunk: u32,
}

impl BatchKey {
    pub fn new(group: u32, chunk: u32) -> Self {
        Self { group, chunk }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}c{}", self.group, self.chunk)
    }
}

/// Dense per-instance data for one draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub key: BatchKey,
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
    pub tier: LodTier,
    pub translucent: bool,
    pub instances: Vec<InstanceRaw>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instance data as uploaded to a GPU buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }

    pub fn hidden_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_hidden()).count()
    }
}

/// Where a cell's instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSlot {
    pub batch: BatchKey,
    pub slot: u32,
}

/// Counters of the last full pass.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub groups: usize,
    pub batches: usize,
    pub instances: usize,
    /// Candidates dropped because their style is fully transparent.
    pub skipped_invisible: usize,
    pub removed_batches: usize,
    pub geometry: GeometryCacheStats,
    pub materials: usize,
    pub last_pass: Duration,
}

struct GroupBuild {
    id: u32,
    key: RenderGroupKey,
    tier: LodTier,
    translucent: bool,
    members: Vec<(CellId, CellCoord)>,
}

impl GroupBuild {
    fn average_depth(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.members.iter().map(|(_, c)| c.z as f64).sum();
        sum / self.members.len() as f64
    }
}

/// Groups the final candidate set into capacity-limited batches and keeps the
/// cell id -> (batch, slot) index used for in-place patches.
///
/// A full pass always supersedes state written by incremental updates.
pub struct BatchIndexer {
    config: BatchConfig,
    cell_size: f32,
    geometry: GeometryCache,
    materials: MaterialPool,
    group_ids: HashMap<RenderGroupKey, u32>,
    batches: BTreeMap<BatchKey, Batch>,
    draw_order: Vec<BatchKey>,
    index: HashMap<CellId, InstanceSlot>,
    stats: BatchStats,
}

impl BatchIndexer {
    pub fn new(config: BatchConfig, cell_size: f32) -> Self {
        Self {
            config: BatchConfig {
                max_instances_per_batch: config.max_instances_per_batch.max(1),
                ..config
            },
            cell_size,
            geometry: GeometryCache::new(),
            materials: MaterialPool::new(),
            group_ids: HashMap::new(),
            batches: BTreeMap::new(),
            draw_order: Vec::new(),
            index: HashMap::new(),
            stats: BatchStats::default(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn set_cell_size(&mut self, cell_size: f32) {
        self.cell_size = cell_size;
    }

    pub fn batches(&self) -> &BTreeMap<BatchKey, Batch> {
        &self.batches
    }

    /// Batch keys in draw order: opaque groups first, then translucent ones.
    pub fn draw_order(&self) -> &[BatchKey] {
        &self.draw_order
    }

    pub fn slot(&self, id: &CellId) -> Option<InstanceSlot> {
        self.index.get(id).copied()
    }

    pub fn instance(&self, id: &CellId) -> Option<&InstanceRaw> {
        let slot = self.index.get(id)?;
        self.batches
            .get(&slot.batch)?
            .instances
            .get(slot.slot as usize)
    }

    pub fn indexed_cells(&self) -> usize {
        self.index.len()
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Full pass: regroup `candidates`, rebuild batches and the index, upload
    /// every batch and remove the ones that no longer exist.
    pub fn rebuild<B: RenderBackend + ?Sized>(
        &mut self,
        candidates: &[Candidate<'_>],
        styles: &StyleTable,
        backend: &mut B,
    ) -> &BatchStats {
        let _span = tracing::info_span!("batch_rebuild").entered();
        let start = Instant::now();

        let mut skipped = 0;
        let mut builds: Vec<GroupBuild> = Vec::new();
        let mut slot_of: HashMap<RenderGroupKey, usize> = HashMap::new();
        for c in candidates {
            let style = styles.resolve(c.cell);
            if style.is_invisible() {
                skipped += 1;
                continue;
            }
            let key = RenderGroupKey {
                geometry: self.geometry.get_or_create(style.geometry, c.tier, backend),
                material: self.materials.get_or_create(style.material, backend),
            };
            let idx = *slot_of.entry(key).or_insert_with(|| {
                let next = self.group_ids.len() as u32;
                let id = *self.group_ids.entry(key).or_insert(next);
                builds.push(GroupBuild {
                    id,
                    key,
                    tier: c.tier,
                    translucent: style.material.is_translucent(),
                    members: Vec::new(),
                });
                builds.len() - 1
            });
            builds[idx].members.push((c.cell.id, c.cell.coord));
        }

        if self.config.depth_sort {
            sort_for_depth(&mut builds);
        } else {
            builds.sort_by_key(|g| (g.translucent, g.id));
        }

        let cap = self.config.max_instances_per_batch;
        let mut batches = BTreeMap::new();
        let mut draw_order = Vec::new();
        let mut index = HashMap::with_capacity(candidates.len());
        for group in &builds {
            for (chunk, members) in group.members.chunks(cap).enumerate() {
                let key = BatchKey::new(group.id, chunk as u32);
                let instances = members
                    .iter()
                    .enumerate()
                    .map(|(slot, (id, coord))| {
                        index.insert(
                            *id,
                            InstanceSlot {
                                batch: key,
                                slot: slot as u32,
                            },
                        );
                        InstanceRaw::from(&Transform::at_cell(*coord, self.cell_size))
                    })
                    .collect();
                draw_order.push(key);
                batches.insert(
                    key,
                    Batch {
                        key,
                        geometry: group.key.geometry,
                        material: group.key.material,
                        tier: group.tier,
                        translucent: group.translucent,
                        instances,
                    },
                );
            }
        }

        let stale: Vec<BatchKey> = self
            .batches
            .keys()
            .filter(|k| !batches.contains_key(k))
            .copied()
            .collect();
        for key in &stale {
            backend.remove_batch(*key);
        }
        for key in &draw_order {
            if let Some(batch) = batches.get(key) {
                backend.upload_batch(batch);
            }
        }

        self.stats = BatchStats {
            groups: builds.len(),
            batches: batches.len(),
            instances: index.len(),
            skipped_invisible: skipped,
            removed_batches: stale.len(),
            geometry: self.geometry.stats(),
            materials: self.materials.len(),
            last_pass: start.elapsed(),
        };
        self.batches = batches;
        self.draw_order = draw_order;
        self.index = index;

        tracing::debug!(
            groups = self.stats.groups,
            batches = self.stats.batches,
            instances = self.stats.instances,
            skipped = skipped,
            removed = self.stats.removed_batches,
            "batch pass complete"
        );
        &self.stats
    }

    fn transform_for(&self, data: Option<&Cell>) -> InstanceRaw {
        let t = match data {
            Some(cell) => Transform::at_cell(cell.coord, self.cell_size),
            None => Transform::hidden(),
        };
        InstanceRaw::from(&t)
    }

    /// Patch one instance in place. `None` hides the slot. Returns `false`
    /// when the cell is not in the index; a full pass is then needed.
    pub fn update_cell<B: RenderBackend + ?Sized>(
        &mut self,
        id: &CellId,
        data: Option<&Cell>,
        backend: &mut B,
    ) -> bool {
        let Some(slot) = self.index.get(id).copied() else {
            tracing::trace!(%id, "update_cell: not indexed");
            return false;
        };
        let raw = self.transform_for(data);
        let Some(dst) = self
            .batches
            .get_mut(&slot.batch)
            .and_then(|b| b.instances.get_mut(slot.slot as usize))
        else {
            return false;
        };
        *dst = raw;
        backend.update_instances(slot.batch, &[(slot.slot, raw)]);
        true
    }

    /// Batched `update_cell`, one backend call per touched batch. Returns
    /// `false` on a length mismatch (nothing is patched) or when any id is not
    /// indexed (the others are still patched).
    pub fn update_cells<B: RenderBackend + ?Sized>(
        &mut self,
        ids: &[CellId],
        data: &[Option<Cell>],
        backend: &mut B,
    ) -> bool {
        if ids.len() != data.len() {
            tracing::warn!(ids = ids.len(), data = data.len(), "update_cells: length mismatch");
            return false;
        }
        let mut all_found = true;
        let mut per_batch: BTreeMap<BatchKey, Vec<(u32, InstanceRaw)>> = BTreeMap::new();
        for (id, cell) in ids.iter().zip(data) {
            match self.index.get(id) {
                Some(slot) => per_batch
                    .entry(slot.batch)
                    .or_default()
                    .push((slot.slot, self.transform_for(cell.as_ref()))),
                None => all_found = false,
            }
        }
        for (key, slots) in &per_batch {
            let Some(batch) = self.batches.get_mut(key) else {
                all_found = false;
                continue;
            };
            for (slot, raw) in slots {
                if let Some(dst) = batch.instances.get_mut(*slot as usize) {
                    *dst = *raw;
                }
            }
            backend.update_instances(*key, slots);
        }
        all_found
    }

    /// Remove every batch from the backend and forget all cached handles.
    pub fn clear<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        for key in self.batches.keys() {
            backend.remove_batch(*key);
        }
        self.batches.clear();
        self.draw_order.clear();
        self.index.clear();
        self.group_ids.clear();
        self.geometry.clear();
        self.materials.clear();
        self.stats = BatchStats::default();
    }
}

/// Opaque groups by descending average depth, then translucent groups,
/// which are depth-ordered only when there is more than one of them.
/// Members of each group are ordered by descending depth.
fn sort_for_depth(builds: &mut [GroupBuild]) {
    let translucent_groups = builds.iter().filter(|g| g.translucent).count();
    for g in builds.iter_mut() {
        if !g.translucent || translucent_groups > 1 {
            g.members.sort_by(|a, b| b.1.z.cmp(&a.1.z));
        }
    }
    builds.sort_by(|a, b| {
        a.translucent.cmp(&b.translucent).then_with(|| {
            if a.translucent && translucent_groups <= 1 {
                a.id.cmp(&b.id)
            } else {
                b.average_depth()
                    .total_cmp(&a.average_depth())
                    .then(a.id.cmp(&b.id))
            }
        })
    });
}
