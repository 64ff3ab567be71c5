//! Developer tooling: a read-only field inspector and a deterministic
//! synthetic world source for demos, benchmarks and tests.
//!
//! # Invariants
//! - The inspector never mutates the field it inspects.
//! - A synthetic world yields identical cells for identical seeds and regions.

mod inspector;
mod synthetic;

pub use inspector::{BatchInfo, CellInfo, FieldInspector, FieldSummary};
pub use synthetic::{SyntheticConfig, SyntheticWorld, TREE_GROUP};

pub fn crate_info() -> &'static str {
    "cellfield-tools v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
