//! Cell field kernel: the public facade over streaming and render planning.
//!
//! # Invariants
//! - The working set, instance index and caches are mutated only through
//!   `load_region`, `tick`, `update_cell`, `update_cells` and `clear`.
//! - Only world loads and configuration return errors; a tick always completes.
//! - A full render pass supersedes every incremental patch before it.
//! - An invalid reference position counts as no reference.

mod config;
mod error;
mod field;

pub use config::{FieldConfig, RerenderConfig};
pub use error::{ConfigError, FieldError};
pub use field::{
    CellField, FieldStats, LoadReport, ReferenceProvider, RenderReport, TickReport, ViewState,
};

pub fn crate_info() -> &'static str {
    "cellfield-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
