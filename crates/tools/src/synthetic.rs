use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use cellfield_common::{Cell, CellCoord, GeometryKind, GeometrySpec, Region, TypeStyle};
use cellfield_stream::{CellBatch, Pending, WorldDataSource};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

/// Composite group every generated tree belongs to.
pub const TREE_GROUP: &str = "arbol";

/// Terrain parameters, all in cell units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub seed: u32,
    /// Mean ground height.
    pub base_height: i32,
    /// Peak deviation from the base height.
    pub amplitude: f32,
    pub frequency: f64,
    /// Columns below this are flooded up to it.
    pub sea_level: i32,
    /// Solid layers generated under the surface.
    pub soil_depth: i32,
    /// Chance that a dry column grows a tree.
    pub tree_density: f32,
    pub trunk_height: i32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            base_height: 4,
            amplitude: 6.0,
            frequency: 0.02,
            sea_level: 2,
            soil_depth: 3,
            tree_density: 0.01,
            trunk_height: 4,
        }
    }
}

/// Deterministic height-field world: soil under a noise surface, water below
/// sea level and trees built from composite trunk and crown cells.
pub struct SyntheticWorld {
    config: SyntheticConfig,
    height: Fbm<Perlin>,
    fetches: AtomicUsize,
}

impl SyntheticWorld {
    pub fn new(config: SyntheticConfig) -> Self {
        let height = Fbm::<Perlin>::new(config.seed)
            .set_octaves(4)
            .set_frequency(config.frequency);
        Self {
            config,
            height,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Number of `fetch_cells` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Surface height of column `(x, y)`.
    pub fn height(&self, x: i32, y: i32) -> i32 {
        let n = self.height.get([x as f64, y as f64]) as f32;
        self.config.base_height + (n * self.config.amplitude).round() as i32
    }

    fn has_tree(&self, x: i32, y: i32) -> bool {
        if self.height(x, y) < self.config.sea_level {
            return false;
        }
        let column = ((x as u32 as u64) << 32) | y as u32 as u64;
        let key = column ^ (self.config.seed as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        unit(splitmix64(key)) < self.config.tree_density
    }

    /// Styles for every type this world produces.
    pub fn styles() -> Vec<TypeStyle> {
        vec![
            TypeStyle::new("roca").with_color("#7A7A7A").with_surface(0.0, 0.95),
            TypeStyle::new("tierra").with_color("#8B5A2B"),
            TypeStyle::new("cesped").with_color("#4C9A2A"),
            TypeStyle::new("arena").with_color("#D8C690"),
            TypeStyle::new("agua").with_color("#1E90FF").with_opacity(0.6).with_surface(0.3, 0.1),
            TypeStyle::new("tronco").with_color("#6B4423"),
            TypeStyle::new("hoja").with_color("#2E7D32"),
        ]
    }

    /// `(group, part, geometry)` definitions for tree cells.
    pub fn composites() -> Vec<(&'static str, &'static str, GeometrySpec)> {
        vec![
            (
                TREE_GROUP,
                "tronco",
                GeometrySpec::new(GeometryKind::Cylinder)
                    .with_param("radius", 0.35)
                    .with_param("segments", 8.0),
            ),
            (
                TREE_GROUP,
                "copa",
                GeometrySpec::new(GeometryKind::Sphere)
                    .with_param("radius", 0.6)
                    .with_param("segments", 12.0),
            ),
        ]
    }

    /// Every cell of the world inside `region`.
    pub fn generate(&self, region: &Region) -> Vec<Cell> {
        let cfg = &self.config;
        let mut cells: BTreeMap<CellCoord, Cell> = BTreeMap::new();
        let put = |cells: &mut BTreeMap<CellCoord, Cell>, coord: CellCoord, cell: Cell, replace: bool| {
            if !region.contains(coord) {
                return;
            }
            if replace {
                cells.insert(coord, cell);
            } else {
                cells.entry(coord).or_insert(cell);
            }
        };

        for x in region.x_min..=region.x_max {
            for y in region.y_min..=region.y_max {
                let h = self.height(x, y);
                for z in (h - cfg.soil_depth + 1)..=h {
                    let kind = if z == h {
                        if h <= cfg.sea_level { "arena" } else { "cesped" }
                    } else if z == h - 1 {
                        "tierra"
                    } else {
                        "roca"
                    };
                    let coord = CellCoord::new(x, y, z);
                    put(&mut cells, coord, Cell::new(coord, kind), true);
                }
                for z in (h + 1)..=cfg.sea_level {
                    let coord = CellCoord::new(x, y, z);
                    put(&mut cells, coord, Cell::new(coord, "agua"), true);
                }
                if self.has_tree(x, y) {
                    for z in (h + 1)..=(h + cfg.trunk_height) {
                        let coord = CellCoord::new(x, y, z);
                        let trunk = Cell::new(coord, "tronco").with_composite(TREE_GROUP, "tronco");
                        put(&mut cells, coord, trunk, true);
                    }
                }
            }
        }

        // Crowns can spill into neighbouring columns, so trees one cell
        // outside the region still contribute.
        for tx in (region.x_min - 1)..=(region.x_max + 1) {
            for ty in (region.y_min - 1)..=(region.y_max + 1) {
                if !self.has_tree(tx, ty) {
                    continue;
                }
                let top = self.height(tx, ty) + cfg.trunk_height;
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        for z in top..=(top + 1) {
                            if dx == 0 && dy == 0 && z == top {
                                continue;
                            }
                            let coord = CellCoord::new(tx + dx, ty + dy, z);
                            let leaf = Cell::new(coord, "hoja").with_composite(TREE_GROUP, "copa");
                            put(&mut cells, coord, leaf, false);
                        }
                    }
                }
            }
        }

        cells.into_values().collect()
    }
}

impl Default for SyntheticWorld {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl WorldDataSource for SyntheticWorld {
    fn fetch_cells(&self, region: &Region) -> Pending<CellBatch> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let _span = tracing::debug_span!("synthetic_fetch", %region).entered();
        let cells = self.generate(region);
        tracing::trace!(cells = cells.len(), "generated synthetic cells");
        Pending::ready(
            *region,
            Ok(CellBatch {
                cells,
                types: Self::styles(),
            }),
        )
    }

    fn fetch_types(&self, region: &Region) -> Pending<Vec<TypeStyle>> {
        Pending::ready(*region, Ok(Self::styles()))
    }
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Uniform value in `[0, 1)` from the top 24 bits.
fn unit(h: u64) -> f32 {
    (h >> 40) as f32 / (1u64 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new((0, 15), (0, 15), (-10, 30))
    }

    #[test]
    fn generation_is_deterministic() {
        let a = SyntheticWorld::default().generate(&region());
        let b = SyntheticWorld::default().generate(&region());
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn cells_stay_inside_region() {
        let narrow = Region::new((0, 7), (0, 7), (0, 3));
        let cells = SyntheticWorld::default().generate(&narrow);
        assert!(cells.iter().all(|c| narrow.contains(c.coord)));
    }

    #[test]
    fn water_fills_up_to_sea_level() {
        let world = SyntheticWorld::new(SyntheticConfig {
            base_height: -5,
            amplitude: 0.0,
            tree_density: 0.0,
            ..SyntheticConfig::default()
        });
        let cells = world.generate(&region());
        let column: Vec<&Cell> = cells
            .iter()
            .filter(|c| c.coord.x == 3 && c.coord.y == 4)
            .collect();
        // 3 soil layers (-7..=-5) plus water -4..=2.
        assert_eq!(column.len(), 3 + 7);
        assert!(column.iter().filter(|c| c.kind == "agua").all(|c| c.coord.z > -5 && c.coord.z <= 2));
        assert!(column.iter().any(|c| c.kind == "arena"));
    }

    #[test]
    fn trees_are_composites() {
        let world = SyntheticWorld::new(SyntheticConfig {
            amplitude: 0.0,
            sea_level: -100,
            tree_density: 1.0,
            ..SyntheticConfig::default()
        });
        let cells = world.generate(&Region::new((0, 2), (0, 2), (0, 20)));
        let trunks = cells.iter().filter(|c| c.kind == "tronco").count();
        // Every column grows a 4-cell trunk.
        assert_eq!(trunks, 9 * 4);
        assert!(
            cells
                .iter()
                .filter(|c| c.kind == "hoja")
                .all(|c| c.composite.as_ref().is_some_and(|r| r.part == "copa"))
        );
    }

    #[test]
    fn serves_fetches_through_the_source_trait() {
        let world = SyntheticWorld::default();
        let batch = world.fetch_cells(&region()).wait().unwrap();
        assert_eq!(batch.cells.len(), world.generate(&region()).len());
        assert_eq!(batch.types.len(), SyntheticWorld::styles().len());
        assert_eq!(world.fetch_count(), 1);
    }
}
