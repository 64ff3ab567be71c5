use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellfield_common::{Cell, CellId, GeometrySpec, Region};
use cellfield_render::{
    AdaptiveBudget, Batch, BatchIndexer, BatchKey, BatchStats, DensitySampler, DensityStats,
    FrameTimer, InstanceSlot, LodStats, RenderBackend, StyleTable, VisibilityCache, VisibleSet,
    classify, is_visible,
};
use cellfield_stream::{
    DimensionDescriptor, MergeStats, RegionCalculator, StreamCoordinator, StreamStats,
    StreamUpdate, WorkingSet, WorldDataSource,
};
use glam::{Mat4, Vec3};

use crate::config::FieldConfig;
use crate::error::FieldError;

/// Callback returning the preferred tracking position (e.g. the player), polled once per tick.
pub type ReferenceProvider = Box<dyn FnMut() -> Option<Vec3> + Send>;

/// What the host knows about the camera this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewState {
    /// Fallback reference when the provider has no position.
    pub camera_position: Option<Vec3>,
    /// Enables frustum culling when visibility is on.
    pub view_projection: Option<Mat4>,
}

impl ViewState {
    pub fn at(camera_position: Vec3) -> Self {
        Self {
            camera_position: Some(camera_position),
            view_projection: None,
        }
    }

    pub fn with_view_projection(mut self, view_projection: Mat4) -> Self {
        self.view_projection = Some(view_projection);
        self
    }
}

/// Result of a world load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub region: Region,
    pub cells: usize,
    pub merged: MergeStats,
    pub batches: usize,
}

/// Summary of one full render pass.
#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    pub candidates: usize,
    /// Size of the visible set, when culling applied.
    pub visible: Option<usize>,
    pub budget: usize,
    pub lod: LodStats,
    pub density: DensityStats,
    pub batch: BatchStats,
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub reference: Option<Vec3>,
    pub stream: StreamUpdate,
    pub visible: Option<VisibleSet>,
    /// Present when the tick ran a full render pass.
    pub render: Option<RenderReport>,
}

/// Cumulative counters across the field's subsystems.
#[derive(Debug, Clone, Default)]
pub struct FieldStats {
    pub ticks: u64,
    pub render_passes: u64,
    pub incremental_updates: u64,
    pub resident: usize,
    pub budget: usize,
    pub fps: f32,
    pub visibility_recomputations: usize,
    pub visibility_hits: usize,
    pub stream: StreamStats,
    pub last_render: Option<RenderReport>,
}

/// State captured at the last full pass; compared each tick to decide on the next.
#[derive(Debug, Clone)]
struct RenderMark {
    at: Instant,
    reference: Option<Vec3>,
    revision: u64,
    visible: Option<VisibleSet>,
}

/// A streaming, cell-addressed particle field.
///
/// Owns the working set, the stream coordinator and every render stage. The
/// host drives it with `tick` once per frame; the data source and renderer
/// backend are supplied at construction.
pub struct CellField<S, B> {
    config: FieldConfig,
    source: S,
    backend: B,
    working_set: WorkingSet,
    coordinator: StreamCoordinator,
    styles: StyleTable,
    styles_revision: Option<u64>,
    visibility: VisibilityCache,
    visibility_revision: Option<u64>,
    adaptive: AdaptiveBudget,
    sampler: DensitySampler,
    indexer: BatchIndexer,
    frame_timer: FrameTimer,
    reference_provider: Option<ReferenceProvider>,
    last_render: Option<RenderMark>,
    last_report: Option<RenderReport>,
    ticks: u64,
    render_passes: u64,
    incremental_updates: u64,
}

impl<S: WorldDataSource, B: RenderBackend> CellField<S, B> {
    pub fn new(config: FieldConfig, source: S, backend: B) -> Result<Self, FieldError> {
        config.validate()?;
        let coordinator = StreamCoordinator::new(
            config.stream.clone(),
            RegionCalculator::new(config.region),
        );
        let cell_size = coordinator.cell_size();
        Ok(Self {
            working_set: WorkingSet::new(),
            styles: StyleTable::new(),
            styles_revision: None,
            visibility: VisibilityCache::new(config.visibility),
            visibility_revision: None,
            adaptive: AdaptiveBudget::new(config.adaptive),
            sampler: DensitySampler::new(config.density.clone()),
            indexer: BatchIndexer::new(config.batch, cell_size),
            frame_timer: FrameTimer::default(),
            reference_provider: None,
            last_render: None,
            last_report: None,
            ticks: 0,
            render_passes: 0,
            incremental_updates: 0,
            coordinator,
            config,
            source,
            backend,
        })
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn coordinator(&self) -> &StreamCoordinator {
        &self.coordinator
    }

    pub fn set_reference_provider(&mut self, provider: ReferenceProvider) {
        self.reference_provider = Some(provider);
    }

    /// Toggle frustum culling at runtime.
    pub fn set_culling(&mut self, enabled: bool) {
        self.visibility.set_enabled(enabled);
    }

    /// Geometry for `part` of every composite in `group`.
    pub fn register_composite(
        &mut self,
        group: impl Into<String>,
        part: impl Into<String>,
        geometry: GeometrySpec,
    ) {
        self.styles.register_composite(group, part, geometry);
        self.last_render = None;
    }

    /// Feed one frame duration to the adaptive budget.
    pub fn record_frame(&mut self, dt: Duration) {
        self.frame_timer.record(dt);
    }

    /// Replace whatever is loaded with the region computed for `dim`, fetch it
    /// synchronously and run a full render pass.
    pub fn load_region(&mut self, dim: &DimensionDescriptor) -> Result<LoadReport, FieldError> {
        self.load_region_at(dim, Instant::now())
    }

    pub fn load_region_at(
        &mut self,
        dim: &DimensionDescriptor,
        now: Instant,
    ) -> Result<LoadReport, FieldError> {
        let _span = tracing::info_span!("load_region").entered();
        self.working_set.clear();
        self.coordinator.reset();
        self.visibility.invalidate();

        let (region, merged) =
            self.coordinator
                .load_initial(dim, &mut self.working_set, &self.source)?;
        self.indexer.set_cell_size(self.coordinator.cell_size());

        let reference = self.poll_reference(None);
        let report = self.render(reference, None, now);
        tracing::info!(
            %region,
            cells = self.working_set.len(),
            batches = report.batch.batches,
            "world loaded"
        );
        Ok(LoadReport {
            region,
            cells: self.working_set.len(),
            merged,
            batches: report.batch.batches,
        })
    }

    pub fn tick(&mut self, view: ViewState) -> TickReport {
        self.tick_at(view, Instant::now())
    }

    /// Per-frame step: stream around the reference, refresh visibility and
    /// run a full render pass when the scene changed enough.
    pub fn tick_at(&mut self, view: ViewState, now: Instant) -> TickReport {
        let _span = tracing::info_span!("tick").entered();
        self.ticks += 1;

        let reference = self.poll_reference(view.camera_position);
        let stream = self
            .coordinator
            .update(reference, &mut self.working_set, &self.source, now);

        let revision = self.working_set.revision();
        if self.visibility_revision != Some(revision) {
            self.visibility.invalidate();
            self.visibility_revision = Some(revision);
        }
        let cell_size = self.coordinator.cell_size();
        let visible = view
            .view_projection
            .and_then(|m| self.visibility.query(&m, self.working_set.iter(), cell_size));

        let render = self
            .should_render(reference, visible.as_ref(), now)
            .then(|| self.render(reference, visible.clone(), now));

        TickReport {
            reference,
            stream,
            visible,
            render,
        }
    }

    /// Provider position, then camera position, each only if finite.
    fn poll_reference(&mut self, camera: Option<Vec3>) -> Option<Vec3> {
        self.reference_provider
            .as_mut()
            .and_then(|provider| provider())
            .filter(|p| p.is_finite())
            .or_else(|| camera.filter(|c| c.is_finite()))
    }

    fn should_render(
        &self,
        reference: Option<Vec3>,
        visible: Option<&VisibleSet>,
        now: Instant,
    ) -> bool {
        let Some(mark) = &self.last_render else {
            return true;
        };
        if now.saturating_duration_since(mark.at) < self.config.rerender.min_interval() {
            return false;
        }
        if mark.revision != self.working_set.revision() {
            return true;
        }
        let moved = match (mark.reference, reference) {
            (Some(a), Some(b)) => a.distance_squared(b) >= self.config.rerender.threshold_m.powi(2),
            (None, None) => false,
            _ => true,
        };
        let view_changed = match (&mark.visible, visible) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        moved || view_changed
    }

    fn render(
        &mut self,
        reference: Option<Vec3>,
        visible: Option<VisibleSet>,
        now: Instant,
    ) -> RenderReport {
        let _span = tracing::info_span!("render_pass").entered();
        let revision = self.working_set.revision();
        if self.styles_revision != Some(revision) {
            self.styles.clear_types();
            for style in self.working_set.types() {
                self.styles.insert(style);
            }
            self.styles_revision = Some(revision);
        }

        let cell_size = self.coordinator.cell_size();
        let cells = self
            .working_set
            .iter()
            .filter(|c| visible.as_deref().is_none_or(|v| is_visible(v, &c.id)));
        let candidates = classify(cells, reference, cell_size, &self.config.lod);
        let candidate_count = candidates.len();

        // No frames yet reads as 0 fps, the worst case.
        let budget = self.adaptive.evaluate(self.frame_timer.fps(), now);
        let (sampled, density) = self.sampler.sample(candidates, budget);
        let lod = LodStats::from_candidates(&sampled);
        let batch = self
            .indexer
            .rebuild(&sampled, &self.styles, &mut self.backend)
            .clone();

        let report = RenderReport {
            candidates: candidate_count,
            visible: visible.as_ref().map(|v| v.len()),
            budget,
            lod,
            density,
            batch,
        };
        self.render_passes += 1;
        self.last_render = Some(RenderMark {
            at: now,
            reference,
            revision,
            visible,
        });
        self.last_report = Some(report.clone());
        tracing::debug!(
            candidates = candidate_count,
            drawn = report.batch.instances,
            batches = report.batch.batches,
            budget,
            "render pass complete"
        );
        report
    }

    /// Marks the working set as in sync with the batches after a successful
    /// incremental patch, so the patch does not force a full pass.
    fn keep_in_sync(&mut self, was_in_sync: bool) {
        if was_in_sync && let Some(mark) = self.last_render.as_mut() {
            mark.revision = self.working_set.revision();
        }
    }

    fn in_sync(&self) -> bool {
        self.last_render
            .as_ref()
            .is_some_and(|m| m.revision == self.working_set.revision())
    }

    /// Patch one cell in place: `None` hides it, `Some` moves its instance.
    /// Returns `false` when the cell is not drawn; the working set is still
    /// updated and the next full pass picks the change up.
    pub fn update_cell(&mut self, id: CellId, data: Option<Cell>) -> bool {
        let data = data.map(|c| c.with_id(id));
        let was_in_sync = self.in_sync();
        let patched = self
            .indexer
            .update_cell(&id, data.as_ref(), &mut self.backend);
        match data {
            Some(cell) => {
                self.working_set.upsert(cell);
            }
            None => {
                self.working_set.remove(&id);
            }
        }
        if patched {
            self.incremental_updates += 1;
        }
        self.keep_in_sync(was_in_sync && patched);
        patched
    }

    /// Batched `update_cell`. `false` on a length mismatch (nothing changes)
    /// or when any id is not drawn (the rest are still patched).
    pub fn update_cells(&mut self, ids: &[CellId], data: &[Option<Cell>]) -> bool {
        if ids.len() != data.len() {
            tracing::warn!(ids = ids.len(), data = data.len(), "update_cells: length mismatch");
            return false;
        }
        let data: Vec<Option<Cell>> = ids
            .iter()
            .zip(data)
            .map(|(id, cell)| cell.clone().map(|c| c.with_id(*id)))
            .collect();
        let was_in_sync = self.in_sync();
        let all_patched = self.indexer.update_cells(ids, &data, &mut self.backend);
        for (id, cell) in ids.iter().zip(data) {
            match cell {
                Some(cell) => {
                    self.working_set.upsert(cell);
                }
                None => {
                    self.working_set.remove(id);
                }
            }
        }
        self.incremental_updates += 1;
        self.keep_in_sync(was_in_sync && all_patched);
        all_patched
    }

    pub fn batches(&self) -> &BTreeMap<BatchKey, Batch> {
        self.indexer.batches()
    }

    /// Batch keys in draw order.
    pub fn draw_order(&self) -> &[BatchKey] {
        self.indexer.draw_order()
    }

    /// Where a drawn cell's instance lives.
    pub fn instance_slot(&self, id: &CellId) -> Option<InstanceSlot> {
        self.indexer.slot(id)
    }

    pub fn stats(&self) -> FieldStats {
        FieldStats {
            ticks: self.ticks,
            render_passes: self.render_passes,
            incremental_updates: self.incremental_updates,
            resident: self.working_set.len(),
            budget: self.adaptive.current(),
            fps: self.frame_timer.fps(),
            visibility_recomputations: self.visibility.recomputations(),
            visibility_hits: self.visibility.hits(),
            stream: self.coordinator.stats().clone(),
            last_render: self.last_report.clone(),
        }
    }

    /// Drop every resident cell, batch and backend resource.
    pub fn clear(&mut self) {
        let _span = tracing::info_span!("clear").entered();
        self.indexer.clear(&mut self.backend);
        self.backend.dispose();
        self.working_set.clear();
        self.coordinator.reset();
        self.styles.clear_types();
        self.styles_revision = None;
        self.visibility.invalidate();
        self.visibility_revision = None;
        self.adaptive = AdaptiveBudget::new(self.config.adaptive);
        self.frame_timer.reset();
        self.last_render = None;
        self.last_report = None;
        tracing::debug!("cell field cleared");
    }
}
