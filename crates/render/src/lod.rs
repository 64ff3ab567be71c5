use cellfield_common::Cell;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Discrete detail level chosen by distance to the reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodTier {
    Near,
    Medium,
    Far,
}

impl LodTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Medium => "medium",
            Self::Far => "far",
        }
    }
}

/// Distance thresholds (meters) between LOD tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Cells closer than this are `Near`.
    pub near_m: f32,
    /// Cells closer than this (and not near) are `Medium`; the rest are `Far`.
    pub far_m: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            near_m: 6.0,
            far_m: 20.0,
        }
    }
}

impl LodConfig {
    /// Tier for a squared distance; thresholds are squared once per call.
    pub fn tier(&self, distance_sq: f32) -> LodTier {
        if distance_sq < self.near_m * self.near_m {
            LodTier::Near
        } else if distance_sq < self.far_m * self.far_m {
            LodTier::Medium
        } else {
            LodTier::Far
        }
    }
}

/// A resident cell annotated for this render cycle.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub cell: &'a Cell,
    /// World-space center of the cell.
    pub center: Vec3,
    /// Squared distance to the reference point; `None` without a reference.
    pub distance_sq: Option<f32>,
    pub tier: LodTier,
}

impl Candidate<'_> {
    pub fn distance(&self) -> Option<f32> {
        self.distance_sq.map(f32::sqrt)
    }
}

/// Annotate cells with center, squared distance and tier. Without a
/// reference point every cell stays `Near`.
pub fn classify<'a>(
    cells: impl IntoIterator<Item = &'a Cell>,
    reference: Option<Vec3>,
    cell_size: f32,
    config: &LodConfig,
) -> Vec<Candidate<'a>> {
    let reference = reference.filter(|r| r.is_finite());
    cells
        .into_iter()
        .map(|cell| {
            let center = cell.coord.world_center(cell_size);
            let distance_sq = reference.map(|r| center.distance_squared(r));
            Candidate {
                cell,
                center,
                distance_sq,
                tier: distance_sq.map_or(LodTier::Near, |d| config.tier(d)),
            }
        })
        .collect()
}

/// Per-tier counts of one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LodStats {
    pub near: usize,
    pub medium: usize,
    pub far: usize,
}

impl LodStats {
    pub fn from_candidates(candidates: &[Candidate<'_>]) -> Self {
        let mut stats = Self::default();
        for c in candidates {
            match c.tier {
                LodTier::Near => stats.near += 1,
                LodTier::Medium => stats.medium += 1,
                LodTier::Far => stats.far += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfield_common::CellCoord;

    #[test]
    fn tiers_use_strict_thresholds() {
        let cfg = LodConfig::default();
        assert_eq!(cfg.tier(0.0), LodTier::Near);
        assert_eq!(cfg.tier(35.99), LodTier::Near);
        assert_eq!(cfg.tier(36.0), LodTier::Medium);
        assert_eq!(cfg.tier(399.0), LodTier::Medium);
        assert_eq!(cfg.tier(400.0), LodTier::Far);
    }

    #[test]
    fn classify_annotates_distance() {
        let cells = [
            Cell::new(CellCoord::new(0, 0, 0), "roca"),
            Cell::new(CellCoord::new(40, 0, 0), "roca"),
            Cell::new(CellCoord::new(100, 0, 0), "roca"),
        ];
        let out = classify(&cells, Some(Vec3::new(0.5, 0.5, 0.5)), 1.0, &LodConfig::default());
        assert_eq!(out[0].distance_sq, Some(0.0));
        assert_eq!(out[0].tier, LodTier::Near);
        assert_eq!(out[1].tier, LodTier::Far);
        assert_eq!(out[1].distance(), Some(40.0));
        assert_eq!(LodStats::from_candidates(&out), LodStats { near: 1, medium: 0, far: 2 });
    }

    #[test]
    fn missing_or_invalid_reference_keeps_full_detail() {
        let cells = [Cell::new(CellCoord::new(100, 0, 0), "roca")];
        for reference in [None, Some(Vec3::splat(f32::NAN))] {
            let out = classify(&cells, reference, 1.0, &LodConfig::default());
            assert_eq!(out[0].tier, LodTier::Near);
            assert!(out[0].distance_sq.is_none());
        }
    }
}
