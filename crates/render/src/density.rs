use serde::{Deserialize, Serialize};

use crate::lod::Candidate;

/// Fraction of the medium and far bands kept when sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandRatios {
    pub medium: f32,
    pub far: f32,
}

/// Stricter banding for cell types that are costly to draw (liquids, translucent cells).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpensiveConfig {
    /// Type names in the category, matched case-insensitively.
    pub types: Vec<String>,
    pub near_m: f32,
    pub far_m: f32,
    pub ratios: BandRatios,
    /// Hard cap on sampled cells of the category.
    pub max_cells: usize,
    /// Share of the capacity left after the near band that goes to the medium band.
    pub medium_share: f32,
}

impl Default for ExpensiveConfig {
    fn default() -> Self {
        Self {
            types: ["agua", "agua_sucia", "lava", "pantano"]
                .into_iter()
                .map(String::from)
                .collect(),
            near_m: 12.0,
            far_m: 50.0,
            ratios: BandRatios {
                medium: 0.15,
                far: 0.03,
            },
            max_cells: 15_000,
            medium_share: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Cells closer than this are always kept.
    pub near_m: f32,
    /// Boundary between the medium and far bands.
    pub far_m: f32,
    pub ratios: BandRatios,
    pub expensive: ExpensiveConfig,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            near_m: 50.0,
            far_m: 100.0,
            ratios: BandRatios {
                medium: 0.5,
                far: 0.25,
            },
            expensive: ExpensiveConfig::default(),
        }
    }
}

/// Band sizes before and after one sampling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DensityStats {
    pub input: usize,
    pub output: usize,
    pub budget: usize,
    pub near: usize,
    pub medium: usize,
    pub far: usize,
    pub medium_kept: usize,
    pub far_kept: usize,
    pub expensive_input: usize,
    pub expensive_kept: usize,
    /// The expensive category hit its own cap.
    pub expensive_capped: bool,
    /// The combined bands still exceeded the budget and were cut by distance.
    pub truncated: bool,
}

/// Every Nth element with `N = max(1, round(1/ratio))`; keeps the spatial
/// spread of the band instead of its head.
pub fn sample_every_nth<T>(items: Vec<T>, ratio: f32) -> Vec<T> {
    if ratio >= 1.0 {
        return items;
    }
    if ratio.is_nan() || ratio <= 0.0 {
        return Vec::new();
    }
    let step = ((1.0 / ratio).round() as usize).max(1);
    items.into_iter().step_by(step).collect()
}

#[derive(Default)]
struct Bands<'a> {
    near: Vec<Candidate<'a>>,
    medium: Vec<Candidate<'a>>,
    far: Vec<Candidate<'a>>,
}

impl<'a> Bands<'a> {
    fn push(&mut self, c: Candidate<'a>, distance_sq: f32, near_m: f32, far_m: f32) {
        if distance_sq < near_m * near_m {
            self.near.push(c);
        } else if distance_sq < far_m * far_m {
            self.medium.push(c);
        } else {
            self.far.push(c);
        }
    }

    fn len(&self) -> usize {
        self.near.len() + self.medium.len() + self.far.len()
    }
}

/// Distance-banded subsampling of the render candidates. Purely a filter:
/// the working set is never touched.
#[derive(Debug, Clone, Default)]
pub struct DensitySampler {
    config: DensityConfig,
}

impl DensitySampler {
    pub fn new(config: DensityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    pub fn is_expensive(&self, kind: &str) -> bool {
        let kind = kind.trim();
        self.config
            .expensive
            .types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(kind))
    }

    /// Reduce `candidates` toward `budget`. Inputs already within budget, or
    /// without distances, pass through unchanged.
    pub fn sample<'a>(
        &self,
        candidates: Vec<Candidate<'a>>,
        budget: usize,
    ) -> (Vec<Candidate<'a>>, DensityStats) {
        let mut stats = DensityStats {
            input: candidates.len(),
            output: candidates.len(),
            budget,
            ..DensityStats::default()
        };
        if candidates.len() <= budget || candidates.iter().any(|c| c.distance_sq.is_none()) {
            return (candidates, stats);
        }
        let _span = tracing::info_span!("density_sample").entered();

        let cfg = &self.config;
        let mut normal = Bands::default();
        let mut expensive = Bands::default();
        for c in candidates {
            let d = c.distance_sq.unwrap_or(0.0);
            if self.is_expensive(&c.cell.kind) {
                expensive.push(c, d, cfg.expensive.near_m, cfg.expensive.far_m);
            } else {
                normal.push(c, d, cfg.near_m, cfg.far_m);
            }
        }

        stats.near = normal.near.len();
        stats.medium = normal.medium.len();
        stats.far = normal.far.len();
        stats.expensive_input = expensive.len();

        let medium = sample_every_nth(normal.medium, cfg.ratios.medium);
        let far = sample_every_nth(normal.far, cfg.ratios.far);
        stats.medium_kept = medium.len();
        stats.far_kept = far.len();

        let expensive = self.sample_expensive(expensive, &mut stats);

        let mut out = normal.near;
        out.extend(medium);
        out.extend(far);
        out.extend(expensive);

        if out.len() > budget {
            out.sort_by(|a, b| {
                a.distance_sq
                    .unwrap_or(0.0)
                    .total_cmp(&b.distance_sq.unwrap_or(0.0))
            });
            out.truncate(budget);
            stats.truncated = true;
        }
        stats.output = out.len();

        tracing::debug!(
            input = stats.input,
            output = stats.output,
            budget,
            near = stats.near,
            medium = stats.medium,
            far = stats.far,
            expensive = stats.expensive_kept,
            truncated = stats.truncated,
            "density sampling applied"
        );
        (out, stats)
    }

    fn sample_expensive<'a>(
        &self,
        bands: Bands<'a>,
        stats: &mut DensityStats,
    ) -> Vec<Candidate<'a>> {
        let cfg = &self.config.expensive;
        let near = bands.near;
        let mut medium = sample_every_nth(bands.medium, cfg.ratios.medium);
        let mut far = sample_every_nth(bands.far, cfg.ratios.far);

        let mut out = near;
        if out.len() + medium.len() + far.len() > cfg.max_cells {
            stats.expensive_capped = true;
            out.truncate(cfg.max_cells);
            let remaining = cfg.max_cells - out.len();
            let medium_slots =
                ((remaining as f32 * cfg.medium_share.clamp(0.0, 1.0)).floor() as usize).min(remaining);
            medium.truncate(medium_slots);
            far.truncate(remaining - medium_slots);
        }
        out.extend(medium);
        out.extend(far);
        stats.expensive_kept = out.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lod::LodTier;
    use cellfield_common::{Cell, CellCoord};
    use glam::Vec3;

    fn candidates<'a>(cells: &'a [Cell], distances: &[f32]) -> Vec<Candidate<'a>> {
        cells
            .iter()
            .zip(distances)
            .map(|(cell, d)| Candidate {
                cell,
                center: Vec3::ZERO,
                distance_sq: Some(d * d),
                tier: LodTier::Near,
            })
            .collect()
    }

    fn cells(n: usize, kind: &str) -> Vec<Cell> {
        (0..n as i32)
            .map(|i| Cell::new(CellCoord::new(i, 0, 0), kind))
            .collect()
    }

    #[test]
    fn every_nth_rounds_step() {
        let v: Vec<u32> = (0..10).collect();
        assert_eq!(sample_every_nth(v.clone(), 0.5), vec![0, 2, 4, 6, 8]);
        // 1 / 0.3 rounds to 3.
        assert_eq!(sample_every_nth(v.clone(), 0.3), vec![0, 3, 6, 9]);
        assert_eq!(sample_every_nth(v.clone(), 1.0).len(), 10);
        assert!(sample_every_nth(v, 0.0).is_empty());
    }

    #[test]
    fn within_budget_passes_through() {
        let cells = cells(10, "roca");
        let input = candidates(&cells, &[500.0; 10]);
        let (out, stats) = DensitySampler::default().sample(input, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(stats.output, 10);
    }

    #[test]
    fn banded_scenario() {
        let cells = cells(505, "roca");
        let mut distances = vec![10.0; 5];
        distances.extend([75.0; 100]);
        distances.extend([150.0; 400]);
        let input = candidates(&cells, &distances);

        let (out, stats) = DensitySampler::default().sample(input, 200);
        assert_eq!(stats.medium_kept, 50);
        assert_eq!(stats.far_kept, 100);
        assert_eq!(out.len(), 155);
        assert!(!stats.truncated);
    }

    #[test]
    fn truncates_by_distance_when_still_over_budget() {
        let cells = cells(300, "roca");
        let distances: Vec<f32> = (0..300).map(|i| i as f32 * 0.1).collect();
        let input = candidates(&cells, &distances);
        let (out, stats) = DensitySampler::default().sample(input, 100);
        assert!(stats.truncated);
        assert_eq!(out.len(), 100);
        let max = out.iter().filter_map(|c| c.distance_sq).fold(0.0f32, f32::max);
        assert!(max < 10.0 * 10.0);
    }

    #[test]
    fn expensive_category_has_stricter_bands_and_cap() {
        let sampler = DensitySampler::new(DensityConfig {
            expensive: ExpensiveConfig {
                max_cells: 20,
                ..ExpensiveConfig::default()
            },
            ..DensityConfig::default()
        });
        assert!(sampler.is_expensive(" Agua "));

        let cells = cells(215, "agua");
        let mut distances = vec![5.0; 15];
        distances.extend([30.0; 100]);
        distances.extend([80.0; 100]);
        let input = candidates(&cells, &distances);
        let (out, stats) = sampler.sample(input, 100);

        // Sampled: 15 near + 15 medium (step 7) + 4 far (step 33) = 34 > cap 20.
        assert!(stats.expensive_capped);
        assert_eq!(stats.expensive_kept, 20);
        assert_eq!(out.len(), 20);
        let near = out
            .iter()
            .filter(|c| c.distance_sq.is_some_and(|d| d < 144.0))
            .count();
        assert_eq!(near, 15);
    }

    #[test]
    fn missing_distance_skips_sampling() {
        let cells = cells(10, "roca");
        let input: Vec<Candidate<'_>> = cells
            .iter()
            .map(|cell| Candidate {
                cell,
                center: Vec3::ZERO,
                distance_sq: None,
                tier: LodTier::Near,
            })
            .collect();
        let (out, _) = DensitySampler::default().sample(input, 3);
        assert_eq!(out.len(), 10);
    }
}
