//! Render planning: turns the resident cells into instanced draw batches.
//!
//! # Invariants
//! - Planning only reads the working set; nothing here mutates cell data.
//! - Sampled output never exceeds the instance budget when distances are known.
//! - Every drawn cell has exactly one `(batch, slot)` entry in the index.
//! - Incremental updates write in place; batches are only resized by a full pass.
//! - Graphics resources stay behind the `RenderBackend` trait.

mod adaptive;
mod backend;
mod batch;
mod density;
mod frame_timer;
mod geometry;
mod lod;
mod style;
mod visibility;

pub use adaptive::{AdaptiveBudget, AdaptiveConfig, BudgetLadder, FpsThresholds};
pub use backend::{GeometryHandle, MaterialHandle, RecordingBackend, RenderBackend};
pub use batch::{
    Batch, BatchConfig, BatchIndexer, BatchKey, BatchStats, InstanceSlot, RenderGroupKey,
};
pub use density::{
    BandRatios, DensityConfig, DensitySampler, DensityStats, ExpensiveConfig, sample_every_nth,
};
pub use frame_timer::FrameTimer;
pub use geometry::{
    GeometryCache, GeometryCacheStats, MaterialPool, ROUND_SEGMENTS, SPHERE_SEGMENTS,
    reduce_for_tier,
};
pub use lod::{Candidate, LodConfig, LodStats, LodTier, classify};
pub use style::{ResolvedStyle, StyleRef, StyleTable};
pub use visibility::{VisibilityCache, VisibilityConfig, VisibleSet, is_visible};

pub fn crate_info() -> &'static str {
    "cellfield-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
