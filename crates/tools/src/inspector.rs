use std::fmt;

use cellfield_common::{CellCoord, CellId};
use cellfield_kernel::CellField;
use cellfield_render::{BatchKey, LodTier, RenderBackend};
use cellfield_stream::WorldDataSource;
use glam::Vec3;

/// Read-only diagnostic queries against a cell field.
pub struct FieldInspector;

impl FieldInspector {
    pub fn summary<S: WorldDataSource, B: RenderBackend>(field: &CellField<S, B>) -> FieldSummary {
        let stats = field.stats();
        let render = stats.last_render.unwrap_or_default();
        FieldSummary {
            ticks: stats.ticks,
            resident: stats.resident,
            types: field.working_set().type_count(),
            region: field.coordinator().world_bounds().map(|r| r.to_string()),
            fetches_started: stats.stream.fetches_started,
            fetches_completed: stats.stream.fetches_completed,
            fetch_failures: stats.stream.fetch_failures,
            inserted: stats.stream.cells_inserted,
            updated: stats.stream.cells_updated,
            duplicates: stats.stream.cells_unchanged,
            evicted: stats.stream.cells_evicted,
            render_passes: stats.render_passes,
            incremental_updates: stats.incremental_updates,
            budget: stats.budget,
            fps: stats.fps,
            candidates: render.candidates,
            drawn: render.batch.instances,
            skipped: render.batch.skipped_invisible,
            groups: render.batch.groups,
            batches: render.batch.batches,
            lod: [render.lod.near, render.lod.medium, render.lod.far],
            sampled_out: render.density.input.saturating_sub(render.density.output),
            expensive_capped: render.density.expensive_capped,
            geometry_hits: render.batch.geometry.hits,
            geometry_entries: render.batch.geometry.entries,
            materials: render.batch.materials,
            visibility_recomputations: stats.visibility_recomputations,
            visibility_hits: stats.visibility_hits,
        }
    }

    pub fn inspect_cell<S: WorldDataSource, B: RenderBackend>(
        field: &CellField<S, B>,
        id: &CellId,
    ) -> Option<CellInfo> {
        let cell = field.working_set().get(id)?;
        let slot = field.instance_slot(id);
        let batch = slot.and_then(|s| field.batches().get(&s.batch));
        let instance = slot.zip(batch).and_then(|(s, b)| b.instances.get(s.slot as usize));
        Some(CellInfo {
            id: *id,
            coord: cell.coord,
            kind: cell.kind.clone(),
            center: cell.coord.world_center(field.coordinator().cell_size()),
            batch: slot.map(|s| (s.batch, s.slot)),
            tier: batch.map(|b| b.tier),
            hidden: instance.is_some_and(|i| i.is_hidden()),
        })
    }

    /// One line per batch, in draw order.
    pub fn batches<S: WorldDataSource, B: RenderBackend>(field: &CellField<S, B>) -> Vec<BatchInfo> {
        field
            .draw_order()
            .iter()
            .filter_map(|key| field.batches().get(key))
            .map(|b| BatchInfo {
                key: b.key,
                tier: b.tier,
                translucent: b.translucent,
                instances: b.len(),
                hidden: b.hidden_count(),
                bytes: b.as_bytes().len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FieldSummary {
    pub ticks: u64,
    pub resident: usize,
    pub types: usize,
    pub region: Option<String>,
    pub fetches_started: usize,
    pub fetches_completed: usize,
    pub fetch_failures: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Refetched cells identical to the resident copy.
    pub duplicates: usize,
    pub evicted: usize,
    pub render_passes: u64,
    pub incremental_updates: u64,
    pub budget: usize,
    pub fps: f32,
    pub candidates: usize,
    pub drawn: usize,
    pub skipped: usize,
    pub groups: usize,
    pub batches: usize,
    /// Drawn cells per tier: near, medium, far.
    pub lod: [usize; 3],
    pub sampled_out: usize,
    pub expensive_capped: bool,
    pub geometry_hits: usize,
    pub geometry_entries: usize,
    pub materials: usize,
    pub visibility_recomputations: usize,
    pub visibility_hits: usize,
}

impl fmt::Display for FieldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Field: ticks={} resident={} types={} region={}",
            self.ticks,
            self.resident,
            self.types,
            self.region.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "  stream: fetches={}/{} failures={} inserted={} updated={} duplicates={} evicted={}",
            self.fetches_completed,
            self.fetches_started,
            self.fetch_failures,
            self.inserted,
            self.updated,
            self.duplicates,
            self.evicted
        )?;
        writeln!(
            f,
            "  render: passes={} incremental={} budget={} fps={:.1} candidates={} drawn={} skipped={}",
            self.render_passes,
            self.incremental_updates,
            self.budget,
            self.fps,
            self.candidates,
            self.drawn,
            self.skipped
        )?;
        writeln!(
            f,
            "  lod: near={} medium={} far={} sampled_out={} expensive_capped={}",
            self.lod[0], self.lod[1], self.lod[2], self.sampled_out, self.expensive_capped
        )?;
        write!(
            f,
            "  batches: groups={} batches={} geometries={} (hits={}) materials={} visibility={}/{}",
            self.groups,
            self.batches,
            self.geometry_entries,
            self.geometry_hits,
            self.materials,
            self.visibility_recomputations,
            self.visibility_hits
        )
    }
}

#[derive(Debug, Clone)]
pub struct CellInfo {
    pub id: CellId,
    pub coord: CellCoord,
    pub kind: String,
    pub center: Vec3,
    pub batch: Option<(BatchKey, u32)>,
    pub tier: Option<LodTier>,
    pub hidden: bool,
}

impl fmt::Display for CellInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cell [{}] {} kind={} center=({:.2}, {:.2}, {:.2})",
            self.id, self.coord, self.kind, self.center.x, self.center.y, self.center.z
        )?;
        match (self.batch, self.tier) {
            (Some((key, slot)), Some(tier)) => write!(
                f,
                " batch={key} slot={slot} tier={}{}",
                tier.as_str(),
                if self.hidden { " hidden" } else { "" }
            ),
            _ => write!(f, " not drawn"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub key: BatchKey,
    pub tier: LodTier,
    pub translucent: bool,
    pub instances: usize,
    pub hidden: usize,
    pub bytes: usize,
}

impl fmt::Display for BatchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] tier={} translucent={} instances={} hidden={} bytes={}",
            self.key,
            self.tier.as_str(),
            self.translucent,
            self.instances,
            self.hidden,
            self.bytes
        )
    }
}
