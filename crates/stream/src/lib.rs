//! Streaming: region planning, the bounded working set and proactive fetches.
//!
//! # Invariants
//! - Every region handed to a data source satisfies `total_cells <= max_cells`.
//! - `WorkingSet::len() <= max_resident` after every coordinator call.
//! - At most one fetch is in flight; the per-tick path never blocks on it.
//! - A failed fetch leaves the working set untouched.

mod coordinator;
mod region;
mod source;
mod working_set;

pub use coordinator::{StreamConfig, StreamCoordinator, StreamPhase, StreamStats, StreamUpdate};
pub use region::{DimensionDescriptor, RegionCalculator, RegionLimits};
pub use source::{
    BackgroundSource, CellBatch, FetchError, InMemorySource, Pending, Responder, WorldDataSource,
};
pub use working_set::{LoadedArea, MergeStats, WorkingSet};

pub fn crate_info() -> &'static str {
    "cellfield-stream v0.1.0"
}
