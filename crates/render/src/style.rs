use std::collections::HashMap;

use cellfield_common::{Cell, GeometrySpec, MaterialSpec, TypeStyle};

/// Geometry and material a cell is drawn with, before LOD reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResolvedStyle {
    pub geometry: GeometrySpec,
    pub material: MaterialSpec,
}

/// Borrowed view of the style a particular cell resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleRef<'a> {
    pub geometry: &'a GeometrySpec,
    pub material: &'a MaterialSpec,
}

impl StyleRef<'_> {
    /// Fully transparent cells are never drawn.
    pub fn is_invisible(&self) -> bool {
        self.material.opacity <= 0.0
    }
}

/// Type name -> visual style, plus geometry overrides for composite parts.
///
/// Lookup tries the exact (trimmed) name, then a case-insensitive match, then
/// falls back to a plain white box.
#[derive(Debug, Default)]
pub struct StyleTable {
    resolved: HashMap<String, ResolvedStyle>,
    folded: HashMap<String, String>,
    composites: HashMap<String, HashMap<String, GeometrySpec>>,
    fallback: ResolvedStyle,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_styles<'a>(styles: impl IntoIterator<Item = &'a TypeStyle>) -> Self {
        let mut table = Self::new();
        for style in styles {
            table.insert(style);
        }
        table
    }

    pub fn insert(&mut self, style: &TypeStyle) {
        let name = style.name.trim().to_string();
        let defaults = MaterialSpec::default();
        let resolved = ResolvedStyle {
            geometry: style.geometry.clone().unwrap_or_default(),
            material: MaterialSpec {
                color: style.color.clone().unwrap_or(defaults.color),
                metalness: style.metalness.unwrap_or(defaults.metalness),
                roughness: style.roughness.unwrap_or(defaults.roughness),
                opacity: style.opacity.unwrap_or(defaults.opacity).clamp(0.0, 1.0),
                is_error: style.is_error,
            },
        };
        self.folded.insert(name.to_lowercase(), name.clone());
        self.resolved.insert(name, resolved);
    }

    /// Geometry used by `part` of every composite in `group`, replacing the
    /// type geometry.
    pub fn register_composite(
        &mut self,
        group: impl Into<String>,
        part: impl Into<String>,
        geometry: GeometrySpec,
    ) {
        self.composites
            .entry(group.into())
            .or_default()
            .insert(part.into(), geometry);
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Style for a type name; `None` means the fallback would be used.
    pub fn lookup(&self, kind: &str) -> Option<&ResolvedStyle> {
        let name = kind.trim();
        self.resolved.get(name).or_else(|| {
            self.folded
                .get(&name.to_lowercase())
                .and_then(|exact| self.resolved.get(exact))
        })
    }

    /// Style a cell is drawn with, composite overrides included.
    pub fn resolve(&self, cell: &Cell) -> StyleRef<'_> {
        let style = self.lookup(&cell.kind).unwrap_or(&self.fallback);
        let composite = cell.composite.as_ref().and_then(|c| {
            self.composites
                .get(&c.group)
                .and_then(|parts| parts.get(&c.part))
        });
        StyleRef {
            geometry: composite.unwrap_or(&style.geometry),
            material: &style.material,
        }
    }

    /// Drop type styles but keep composite definitions.
    pub fn clear_types(&mut self) {
        self.resolved.clear();
        self.folded.clear();
    }
}
