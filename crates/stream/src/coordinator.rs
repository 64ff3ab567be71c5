use std::time::{Duration, Instant};

use cellfield_common::{CellCoord, Region};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::region::{DimensionDescriptor, RegionCalculator};
use crate::source::{CellBatch, FetchError, Pending, WorldDataSource};
use crate::working_set::{MergeStats, WorkingSet};

/// Streaming configuration: proactive load trigger, working set bounds and cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Horizontal radius (in cells) of a streaming region around the viewer.
    pub load_radius_cells: i32,
    /// A fetch starts once the viewer is within this many meters of the loaded edge.
    pub proactive_margin_m: f32,
    /// Minimum time between two fetch starts, in milliseconds.
    pub cooldown_ms: u64,
    /// Hard cap on resident cells.
    pub max_resident: usize,
    /// Cap on newly inserted cells per fetch.
    pub max_new_per_load: usize,
    /// Cells farther than this (cell units) from the viewer are evicted first.
    pub cleanup_distance_cells: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            load_radius_cells: 50,
            proactive_margin_m: 10.0,
            cooldown_ms: 2000,
            max_resident: 300_000,
            max_new_per_load: 50_000,
            cleanup_distance_cells: 200,
        }
    }
}

impl StreamConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Coordinator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Loading,
    Cooldown,
}

/// Cumulative streaming statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub fetches_started: usize,
    pub fetches_completed: usize,
    pub fetch_failures: usize,
    pub cells_inserted: usize,
    pub cells_updated: usize,
    pub cells_unchanged: usize,
    pub cells_skipped: usize,
    pub cells_evicted: usize,
    pub resident: usize,
    pub last_update: Duration,
}

/// What one `update` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamUpdate {
    /// Region of the fetch started this update.
    pub started: Option<Region>,
    /// Cells merged from fetches that completed this update.
    pub merged: Option<MergeStats>,
    pub failed: Option<FetchError>,
    pub evicted: usize,
}

impl StreamUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Decides when to fetch more of the world around a moving viewer and keeps
/// the working set bounded.
///
/// At most one fetch is in flight. A trigger while one is pending is ignored
/// and re-evaluated on the next update.
pub struct StreamCoordinator {
    config: StreamConfig,
    calculator: RegionCalculator,
    cell_size: f32,
    world_bounds: Option<Region>,
    /// Last region merged in full; fetching it again would change nothing.
    loaded_region: Option<Region>,
    pending: Option<Pending<CellBatch>>,
    last_fetch_started: Option<Instant>,
    stats: StreamStats,
}

impl StreamCoordinator {
    pub fn new(config: StreamConfig, calculator: RegionCalculator) -> Self {
        Self {
            config,
            calculator,
            cell_size: DimensionDescriptor::default().cell_size,
            world_bounds: None,
            loaded_region: None,
            pending: None,
            last_fetch_started: None,
            stats: StreamStats::default(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn calculator(&self) -> &RegionCalculator {
        &self.calculator
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Region computed by the last world load.
    pub fn world_bounds(&self) -> Option<&Region> {
        self.world_bounds.as_ref()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn phase(&self, now: Instant) -> StreamPhase {
        if self.pending.is_some() {
            StreamPhase::Loading
        } else if self.cooling_down(now) {
            StreamPhase::Cooldown
        } else {
            StreamPhase::Idle
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.last_fetch_started
            .is_some_and(|t| now.saturating_duration_since(t) < self.config.cooldown())
    }

    /// World load: compute the initial region, fetch it synchronously and
    /// seed the working set and loaded area from it.
    pub fn load_initial<S: WorldDataSource + ?Sized>(
        &mut self,
        dim: &DimensionDescriptor,
        ws: &mut WorkingSet,
        source: &S,
    ) -> Result<(Region, MergeStats), FetchError> {
        let _span = tracing::info_span!("load_initial").entered();
        if dim.cell_size > 0.0 && dim.cell_size.is_finite() {
            self.cell_size = dim.cell_size;
        }
        let region = self.calculator.calculate(dim);
        if !self.calculator.validate(&region) {
            return Err(FetchError::Rejected {
                cells: region.total_cells(),
                ceiling: self.calculator.limits().max_cells,
            });
        }

        self.pending = None;
        self.world_bounds = Some(region);
        self.stats.fetches_started += 1;

        let types = source.fetch_types(&region).wait();
        let batch = source.fetch_cells(&region).wait();
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                self.stats.fetch_failures += 1;
                tracing::warn!(%err, %region, "initial fetch failed");
                return Err(err);
            }
        };
        match types {
            Ok(types) => ws.merge_types(types),
            Err(err) => tracing::warn!(%err, "type metadata fetch failed, using batch styles only"),
        }

        let merged = self.apply(region, batch, ws);
        self.enforce_cap(None, ws);
        tracing::debug!(
            %region,
            inserted = merged.inserted,
            skipped = merged.skipped,
            "initial region loaded"
        );
        Ok((region, merged))
    }

    /// Per-tick step: collect a finished fetch, start a new one if the viewer
    /// nears the loaded edge, then enforce the resident cap.
    ///
    /// Never blocks. A non-finite viewer position counts as no viewer.
    pub fn update<S: WorldDataSource + ?Sized>(
        &mut self,
        viewer: Option<Vec3>,
        ws: &mut WorkingSet,
        source: &S,
        now: Instant,
    ) -> StreamUpdate {
        let _span = tracing::info_span!("stream_update").entered();
        let frame_start = Instant::now();
        let viewer = viewer.filter(|v| v.is_finite());
        let mut update = StreamUpdate::default();

        self.collect(ws, &mut update);

        if let Some(v) = viewer
            && self.should_fetch(v, ws, now)
        {
            let region = self.streaming_region(v);
            tracing::debug!(%region, cells = region.total_cells(), "starting proactive fetch");
            self.pending = Some(source.fetch_cells(&region));
            self.last_fetch_started = Some(now);
            self.stats.fetches_started += 1;
            update.started = Some(region);
            // Synchronous sources answer immediately.
            self.collect(ws, &mut update);
        }

        update.evicted = self.enforce_cap(viewer, ws);

        self.stats.resident = ws.len();
        self.stats.last_update = frame_start.elapsed();
        tracing::trace!(
            started = update.started.is_some(),
            merged = update.merged.map_or(0, |m| m.inserted),
            evicted = update.evicted,
            resident = ws.len(),
            "stream update complete"
        );
        update
    }

    /// Whether the viewer is close enough to the loaded edge to fetch, and
    /// the region around it is not the one already loaded. Near the world
    /// bounds the clamped region stops changing, so a parked viewer settles.
    pub fn should_fetch(&self, viewer: Vec3, ws: &WorkingSet, now: Instant) -> bool {
        if self.pending.is_some() || self.cooling_down(now) {
            return false;
        }
        let Some(area) = ws.loaded_area() else {
            return true;
        };
        let trigger = area.radius - self.config.proactive_margin_m;
        let dx = viewer.x - area.center.x;
        let dz = viewer.z - area.center.z;
        let near_edge = trigger <= 0.0 || dx * dx + dz * dz >= trigger * trigger;
        near_edge && self.loaded_region != Some(self.streaming_region(viewer))
    }

    fn streaming_region(&self, viewer: Vec3) -> Region {
        let center = CellCoord::from_world(viewer, self.cell_size);
        let vertical = self.world_bounds.map_or(
            (0, self.calculator.limits().feature_height),
            |b| (b.z_min, b.z_max),
        );
        self.calculator.region_around(
            center,
            self.config.load_radius_cells,
            vertical,
            self.world_bounds.as_ref(),
        )
    }

    fn collect(&mut self, ws: &mut WorkingSet, update: &mut StreamUpdate) {
        let Some(result) = self.pending.as_ref().and_then(Pending::poll) else {
            return;
        };
        let region = self.pending.take().map(|p| *p.region());
        match (result, region) {
            (Ok(batch), Some(region)) => {
                let stats = self.apply(region, batch, ws);
                let merged = update.merged.get_or_insert_with(MergeStats::default);
                merged.inserted += stats.inserted;
                merged.updated += stats.updated;
                merged.unchanged += stats.unchanged;
                merged.skipped += stats.skipped;
                tracing::debug!(
                    %region,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    skipped = stats.skipped,
                    "merged streamed cells"
                );
            }
            (Err(err), _) => {
                self.stats.fetch_failures += 1;
                tracing::warn!(%err, "cell fetch failed, keeping current working set");
                update.failed = Some(err);
            }
            (Ok(_), None) => {}
        }
    }

    fn apply(&mut self, region: Region, batch: CellBatch, ws: &mut WorkingSet) -> MergeStats {
        ws.merge_types(batch.types);
        let stats = ws.merge(batch.cells, self.config.max_new_per_load);
        ws.set_loaded_area(
            region.world_center(self.cell_size),
            region.horizontal_radius(self.cell_size),
        );
        // A capped merge left cells behind, so the same region stays fetchable.
        self.loaded_region = (stats.skipped == 0).then_some(region);
        self.stats.fetches_completed += 1;
        self.stats.cells_inserted += stats.inserted;
        self.stats.cells_updated += stats.updated;
        self.stats.cells_unchanged += stats.unchanged;
        self.stats.cells_skipped += stats.skipped;
        stats
    }

    fn enforce_cap(&mut self, viewer: Option<Vec3>, ws: &mut WorkingSet) -> usize {
        if ws.len() <= self.config.max_resident {
            return 0;
        }
        let reference = viewer
            .or_else(|| ws.loaded_area().map(|a| a.center))
            .unwrap_or(Vec3::ZERO);
        let evicted = ws.evict(
            CellCoord::from_world(reference, self.cell_size),
            self.config.cleanup_distance_cells,
            self.config.max_resident,
        );
        self.stats.cells_evicted += evicted;
        evicted
    }

    /// Drop any in-flight fetch and forget the loaded world.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_fetch_started = None;
        self.world_bounds = None;
        self.loaded_region = None;
        self.stats = StreamStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionLimits;
    use crate::source::{InMemorySource, Responder};
    use cellfield_common::{Cell, TypeStyle};
    use std::sync::Mutex;

    fn world() -> InMemorySource {
        let mut cells = Vec::new();
        for x in (0..400).step_by(4) {
            for y in (0..400).step_by(4) {
                cells.push(Cell::new(CellCoord::new(x, y, 0), "hierba"));
            }
        }
        InMemorySource::new(cells, vec![TypeStyle::new("hierba").with_color("#00AA00")])
    }

    fn dim() -> DimensionDescriptor {
        DimensionDescriptor {
            width_m: 100.0,
            depth_m: 100.0,
            ..DimensionDescriptor::default()
        }
    }

    fn loaded() -> (StreamCoordinator, WorkingSet, InMemorySource) {
        let src = world();
        let mut ws = WorkingSet::new();
        let mut coord = StreamCoordinator::new(
            StreamConfig::default(),
            RegionCalculator::new(RegionLimits {
                max_cells_x: 160,
                max_cells_y: 160,
                ..RegionLimits::default()
            }),
        );
        coord.load_initial(&dim(), &mut ws, &src).unwrap();
        (coord, ws, src)
    }

    #[test]
    fn initial_load_seeds_loaded_area() {
        let (coord, ws, src) = loaded();
        let area = ws.loaded_area().unwrap();
        assert_eq!(area.radius, 20.0);
        assert_eq!(area.center.x, 20.0);
        assert_eq!(area.center.z, 20.0);
        assert_eq!(ws.len(), 40 * 40);
        assert_eq!(ws.type_count(), 1);
        assert_eq!(src.fetch_count(), 1);
        assert_eq!(coord.world_bounds().map(|b| b.x_span()), Some(160));
    }

    #[test]
    fn proactive_trigger_uses_edge_margin() {
        let (mut coord, mut ws, src) = loaded();
        let now = Instant::now();
        let center = ws.loaded_area().unwrap().center;
        let margin = coord.config().proactive_margin_m;
        let radius = 20.0;

        // Trigger distance is radius - margin = 10 m from the loaded center.
        let inside = center + Vec3::new(radius - 1.5 * margin, 0.0, 0.0);
        assert!(coord.update(Some(inside), &mut ws, &src, now).started.is_none());
        assert_eq!(src.fetch_count(), 1);

        let near_edge = center + Vec3::new(radius - 0.5 * margin, 0.0, 0.0);
        let update = coord.update(Some(near_edge), &mut ws, &src, now);
        assert!(update.started.is_some());
        assert!(update.merged.is_some());
        assert_eq!(src.fetch_count(), 2);
    }

    #[test]
    fn repeated_ticks_at_rest_do_not_fetch() {
        let (mut coord, mut ws, src) = loaded();
        let now = Instant::now();
        let center = ws.loaded_area().unwrap().center;
        for i in 0..10 {
            let t = now + Duration::from_secs(5 * i);
            assert!(coord.update(Some(center), &mut ws, &src, t).is_empty());
        }
        assert_eq!(src.fetch_count(), 1);
    }

    #[test]
    fn cooldown_gates_fetches() {
        let (mut coord, mut ws, src) = loaded();
        let t0 = Instant::now();
        let far = Vec3::new(36.0, 0.0, 36.0);
        assert!(coord.update(Some(far), &mut ws, &src, t0).started.is_some());
        assert_eq!(coord.phase(t0), StreamPhase::Cooldown);

        // Back toward the origin, well past the edge of the corner region.
        let back = Vec3::new(4.0, 0.0, 4.0);
        let t1 = t0 + Duration::from_millis(1000);
        assert!(coord.update(Some(back), &mut ws, &src, t1).started.is_none());
        let t2 = t0 + Duration::from_millis(2000);
        assert!(coord.update(Some(back), &mut ws, &src, t2).started.is_some());
        assert_eq!(coord.stats().fetches_started, 3);
    }

    #[test]
    fn parked_viewer_at_world_edge_settles() {
        let (mut coord, mut ws, src) = loaded();
        let t0 = Instant::now();
        let corner = Vec3::new(39.5, 0.0, 39.5);
        let first = coord.update(Some(corner), &mut ws, &src, t0);
        assert!(first.started.is_some());
        assert_eq!(first.merged.map(|m| m.updated + m.inserted), Some(0));

        // The clamped region no longer changes, so later cooldowns stay quiet
        // even though the viewer sits past the shrunken loaded edge.
        let rev = ws.revision();
        for i in 1..=5 {
            let t = t0 + Duration::from_secs(3 * i);
            assert!(coord.update(Some(corner), &mut ws, &src, t).is_empty());
        }
        assert_eq!(src.fetch_count(), 2);
        assert_eq!(ws.revision(), rev);
    }

    #[test]
    fn world_smaller_than_margin_never_refetches() {
        let src = world();
        let mut ws = WorkingSet::new();
        let mut coord = StreamCoordinator::new(StreamConfig::default(), RegionCalculator::default());
        let dim = DimensionDescriptor {
            width_m: 12.0,
            depth_m: 12.0,
            ..DimensionDescriptor::default()
        };
        coord.load_initial(&dim, &mut ws, &src).unwrap();
        let t0 = Instant::now();
        for i in 0..5 {
            let t = t0 + Duration::from_secs(3 * i);
            assert!(coord.update(Some(Vec3::new(6.0, 0.0, 6.0)), &mut ws, &src, t).is_empty());
        }
        assert_eq!(src.fetch_count(), 1);
    }

    #[test]
    fn failure_leaves_working_set_and_recovers() {
        let (mut coord, mut ws, src) = loaded();
        let before = ws.len();
        let t0 = Instant::now();
        let far = Vec3::new(38.0, 0.0, 38.0);

        src.fail_next();
        let update = coord.update(Some(far), &mut ws, &src, t0);
        assert!(update.failed.is_some());
        assert_eq!(ws.len(), before);
        assert_eq!(coord.phase(t0), StreamPhase::Cooldown);

        let t1 = t0 + Duration::from_millis(2500);
        assert_eq!(coord.phase(t1), StreamPhase::Idle);
        let update = coord.update(Some(far), &mut ws, &src, t1);
        assert!(update.merged.is_some_and(|m| m.unchanged > 0));
        assert_eq!(coord.stats().fetch_failures, 1);
    }

    #[derive(Default)]
    struct ManualSource {
        responders: Mutex<Vec<Responder<CellBatch>>>,
    }

    impl WorldDataSource for ManualSource {
        fn fetch_cells(&self, region: &Region) -> Pending<CellBatch> {
            let (responder, pending) = Pending::channel(*region);
            self.responders.lock().unwrap().push(responder);
            pending
        }

        fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>> {
            Pending::ready(*region, Ok(Vec::new()))
        }
    }

    #[test]
    fn in_flight_fetch_blocks_new_triggers() {
        let src = ManualSource::default();
        let mut ws = WorkingSet::new();
        let mut coord = StreamCoordinator::new(
            StreamConfig {
                cooldown_ms: 0,
                ..StreamConfig::default()
            },
            RegionCalculator::default(),
        );
        let now = Instant::now();
        let viewer = Vec3::new(1.0, 0.0, 1.0);
        assert!(coord.update(Some(viewer), &mut ws, &src, now).started.is_some());
        assert_eq!(coord.phase(now), StreamPhase::Loading);
        assert!(coord.update(Some(viewer), &mut ws, &src, now).started.is_none());
        assert_eq!(src.responders.lock().unwrap().len(), 1);

        let responder = src.responders.lock().unwrap().pop().unwrap();
        responder.resolve(Ok(CellBatch {
            cells: vec![Cell::new(CellCoord::new(4, 4, 0), "hierba")],
            types: Vec::new(),
        }));
        let update = coord.update(Some(viewer), &mut ws, &src, now);
        assert_eq!(update.merged.map(|m| m.inserted), Some(1));
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn resident_cap_enforced_after_merge() {
        let src = world();
        let mut ws = WorkingSet::new();
        let mut coord = StreamCoordinator::new(
            StreamConfig {
                max_resident: 500,
                cleanup_distance_cells: 1000,
                ..StreamConfig::default()
            },
            RegionCalculator::new(RegionLimits {
                max_cells_x: 160,
                max_cells_y: 160,
                ..RegionLimits::default()
            }),
        );
        coord.load_initial(&dim(), &mut ws, &src).unwrap();
        assert_eq!(ws.len(), 500);
        assert_eq!(coord.stats().cells_evicted, 1100);

        let update = coord.update(Some(Vec3::new(2.0, 0.0, 2.0)), &mut ws, &src, Instant::now());
        assert!(update.evicted > 0);
        assert!(ws.len() <= 500);
    }

    #[test]
    fn non_finite_viewer_is_ignored() {
        let (mut coord, mut ws, src) = loaded();
        let update = coord.update(Some(Vec3::splat(f32::NAN)), &mut ws, &src, Instant::now());
        assert!(update.is_empty());
        assert_eq!(src.fetch_count(), 1);
    }
}
