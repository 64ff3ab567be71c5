//! Shared value types for the cellfield workspace.
//!
//! # Invariants
//! - Cell grids are Z-up; world space is Y-up. `CellCoord::world_center`
//!   is the only place the axes are swapped.
//! - Geometry and material specs compare and hash by float bit pattern, so
//!   they are safe to use as grouping keys.
//! - A batch slot at `Transform::hidden()` holds no live cell.

pub mod geom;
pub mod region;
pub mod types;

pub use geom::{Aabb, Frustum};
pub use region::Region;
pub use types::{
    Cell, CellCoord, CellId, CompositeRef, GeometryKind, GeometryParams, GeometrySpec,
    InstanceRaw, MaterialSpec, Transform, TypeStyle,
};

pub fn crate_info() -> &'static str {
    "cellfield-common v0.1.0"
}
