use std::collections::BTreeMap;

use cellfield_common::{Cell, CellCoord, CellId, TypeStyle};
use glam::Vec3;

/// Center and radius (world meters) of the area last fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedArea {
    pub center: Vec3,
    pub radius: f32,
}

/// Outcome of merging one fetch response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Ids that were not resident before.
    pub inserted: usize,
    /// Resident ids overwritten with a different fetched value.
    pub updated: usize,
    /// Resident ids fetched again with an identical value.
    pub unchanged: usize,
    /// New ids dropped because the per-fetch cap was reached.
    pub skipped: usize,
}

/// Bounded collection of resident cells plus the type styles delivered with them.
///
/// Iteration order is by `CellId`, so every downstream stage is deterministic.
#[derive(Debug, Default)]
pub struct WorkingSet {
    cells: BTreeMap<CellId, Cell>,
    types: BTreeMap<String, TypeStyle>,
    loaded: Option<LoadedArea>,
    revision: u64,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Bumped on every mutation; consumers compare it to detect changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn loaded_area(&self) -> Option<LoadedArea> {
        self.loaded
    }

    pub fn set_loaded_area(&mut self, center: Vec3, radius: f32) {
        self.loaded = Some(LoadedArea { center, radius });
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeStyle> {
        self.types.values()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Later styles replace earlier ones with the same name.
    pub fn merge_types(&mut self, styles: impl IntoIterator<Item = TypeStyle>) {
        let mut changed = false;
        for style in styles {
            if self.types.get(&style.name) != Some(&style) {
                self.types.insert(style.name.clone(), style);
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
    }

    /// Merge fetched cells: resident ids are overwritten in place, new ids
    /// are inserted until `max_new` have been added. The revision only moves
    /// when a cell was inserted or actually changed.
    pub fn merge(&mut self, cells: impl IntoIterator<Item = Cell>, max_new: usize) -> MergeStats {
        let mut stats = MergeStats::default();
        for cell in cells {
            if let Some(slot) = self.cells.get_mut(&cell.id) {
                if *slot == cell {
                    stats.unchanged += 1;
                } else {
                    *slot = cell;
                    stats.updated += 1;
                }
            } else if stats.inserted < max_new {
                self.cells.insert(cell.id, cell);
                stats.inserted += 1;
            } else {
                stats.skipped += 1;
            }
        }
        if stats.inserted + stats.updated > 0 {
            self.revision += 1;
        }
        stats
    }

    /// Insert or replace one cell. Returns `true` if the id was new.
    pub fn upsert(&mut self, cell: Cell) -> bool {
        self.revision += 1;
        self.cells.insert(cell.id, cell).is_none()
    }

    pub fn remove(&mut self, id: &CellId) -> Option<Cell> {
        let removed = self.cells.remove(id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Enforce `len() <= cap`. Cells farther than `cleanup_distance` (cell
    /// units) from `viewer` go first, farthest first; if that is not enough,
    /// farthest-first eviction continues regardless of distance.
    pub fn evict(&mut self, viewer: CellCoord, cleanup_distance: u32, cap: usize) -> usize {
        if self.cells.len() <= cap {
            return 0;
        }
        let cleanup_sq = cleanup_distance as i64 * cleanup_distance as i64;

        let mut by_distance: Vec<(i64, CellId)> = self
            .cells
            .values()
            .map(|c| (c.coord.distance_sq(viewer), c.id))
            .collect();
        by_distance.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut evicted = 0;
        for (dist_sq, id) in by_distance {
            if dist_sq <= cleanup_sq && self.cells.len() <= cap {
                break;
            }
            self.cells.remove(&id);
            evicted += 1;
        }
        if evicted > 0 {
            self.revision += 1;
        }
        tracing::debug!(evicted, remaining = self.cells.len(), cap, "evicted cells");
        evicted
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.types.clear();
        self.loaded = None;
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: i32, y: i32, z: i32) -> Cell {
        Cell::new(CellCoord::new(x, y, z), "hierba")
    }

    #[test]
    fn merge_caps_new_inserts() {
        let mut ws = WorkingSet::new();
        let stats = ws.merge((0..10).map(|i| cell(i, 0, 0)), 4);
        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.skipped, 6);
        assert_eq!(ws.len(), 4);
    }

    #[test]
    fn merge_overwrites_resident_without_counting_against_cap() {
        let mut ws = WorkingSet::new();
        ws.merge([cell(0, 0, 0)], 10);
        let replaced = cell(0, 0, 0).with_attribute("estado", "roto");
        let stats = ws.merge([replaced.clone(), cell(1, 0, 0)], 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(ws.get(&replaced.id), Some(&replaced));
    }

    #[test]
    fn identical_refetch_keeps_revision() {
        let mut ws = WorkingSet::new();
        ws.merge((0..5).map(|i| cell(i, 0, 0)), usize::MAX);
        let rev = ws.revision();

        let stats = ws.merge((0..5).map(|i| cell(i, 0, 0)), usize::MAX);
        assert_eq!(stats.unchanged, 5);
        assert_eq!(stats.updated, 0);
        assert_eq!(ws.revision(), rev);

        let stats = ws.merge([cell(0, 0, 0).with_attribute("estado", "roto")], usize::MAX);
        assert_eq!(stats.updated, 1);
        assert!(ws.revision() > rev);
    }

    #[test]
    fn evict_removes_far_cells_first() {
        let mut ws = WorkingSet::new();
        ws.merge((0..10).map(|i| cell(i * 10, 0, 0)), usize::MAX);
        let evicted = ws.evict(CellCoord::new(0, 0, 0), 25, 5);
        // Cells at 30..90 lie beyond the cleanup distance.
        assert_eq!(evicted, 7);
        assert_eq!(ws.len(), 3);
        assert!(ws.contains(&CellId::Coord(CellCoord::new(0, 0, 0))));
    }

    #[test]
    fn evict_keeps_going_until_under_cap() {
        let mut ws = WorkingSet::new();
        ws.merge((0..10).map(|i| cell(i, 0, 0)), usize::MAX);
        let evicted = ws.evict(CellCoord::new(0, 0, 0), 100, 4);
        assert_eq!(evicted, 6);
        assert_eq!(ws.len(), 4);
        assert!(ws.contains(&CellId::Coord(CellCoord::new(3, 0, 0))));
        assert!(!ws.contains(&CellId::Coord(CellCoord::new(4, 0, 0))));
    }

    #[test]
    fn evict_is_noop_under_cap() {
        let mut ws = WorkingSet::new();
        ws.merge((0..3).map(|i| cell(i * 500, 0, 0)), usize::MAX);
        let rev = ws.revision();
        assert_eq!(ws.evict(CellCoord::new(0, 0, 0), 1, 10), 0);
        assert_eq!(ws.revision(), rev);
    }

    #[test]
    fn revision_tracks_mutations() {
        let mut ws = WorkingSet::new();
        let r0 = ws.revision();
        ws.upsert(cell(0, 0, 0));
        assert!(ws.revision() > r0);
        let r1 = ws.revision();
        assert!(ws.remove(&CellId::Coord(CellCoord::new(9, 9, 9))).is_none());
        assert_eq!(ws.revision(), r1);
    }

    #[test]
    fn merge_types_replaces_by_name() {
        let mut ws = WorkingSet::new();
        ws.merge_types([TypeStyle::new("agua").with_color("#0000FF")]);
        ws.merge_types([TypeStyle::new("agua").with_color("#00FFFF")]);
        assert_eq!(ws.type_count(), 1);
        assert_eq!(ws.types().next().and_then(|t| t.color.as_deref()), Some("#00FFFF"));
    }
}
