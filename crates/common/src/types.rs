use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integer cell coordinate. `z` is the vertical axis of the cell grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// World-space center of the cell. World space is Y-up, so cell `z`
    /// maps onto world `y` and cell `y` onto world `z`.
    pub fn world_center(self, cell_size: f32) -> Vec3 {
        let half = cell_size * 0.5;
        Vec3::new(
            self.x as f32 * cell_size + half,
            self.z as f32 * cell_size + half,
            self.y as f32 * cell_size + half,
        )
    }

    /// The cell containing a world-space position.
    pub fn from_world(pos: Vec3, cell_size: f32) -> Self {
        Self {
            x: (pos.x / cell_size).floor() as i32,
            y: (pos.z / cell_size).floor() as i32,
            z: (pos.y / cell_size).floor() as i32,
        }
    }

    /// Squared Euclidean distance in cell units.
    pub fn distance_sq(self, other: CellCoord) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.x, self.y, self.z)
    }
}

/// Identity of a cell: a stable id issued by the data source, or the
/// coordinate tuple when the source has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellId {
    Stable(Uuid),
    Coord(CellCoord),
}

impl CellId {
    pub fn new_stable() -> Self {
        Self::Stable(Uuid::new_v4())
    }
}

impl From<CellCoord> for CellId {
    fn from(coord: CellCoord) -> Self {
        Self::Coord(coord)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable(id) => write!(f, "{id}"),
            Self::Coord(c) => write!(f, "{c}"),
        }
    }
}

/// Membership of a cell in a named composite entity (a tree, a statue...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeRef {
    pub group: String,
    pub part: String,
}

/// The atomic unit of world data. Immutable value record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub coord: CellCoord,
    /// Type name, used to resolve the visual style.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeRef>,
    /// Free-form type-specific attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Cell {
    /// A cell identified by its coordinates.
    pub fn new(coord: CellCoord, kind: impl Into<String>) -> Self {
        Self {
            id: CellId::Coord(coord),
            coord,
            kind: kind.into(),
            composite: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: CellId) -> Self {
        self.id = id;
        self
    }

    pub fn with_composite(mut self, group: impl Into<String>, part: impl Into<String>) -> Self {
        self.composite = Some(CompositeRef {
            group: group.into(),
            part: part.into(),
        });
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Zero and NaN have several bit patterns; fold them so equal-looking
/// parameters hash the same.
fn canonical_bits(v: f32) -> u32 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f32::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Shape family of a cell's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    #[default]
    Box,
    Sphere,
    Cylinder,
    Cone,
    Torus,
}

/// Named numeric geometry parameters (sizes relative to the cell, segment counts).
///
/// Compared and hashed by bit pattern so two cells with identical visual
/// identity always land in the same render group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeometryParams(BTreeMap<String, f32>);

impl GeometryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for GeometryParams {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && canonical_bits(*va) == canonical_bits(*vb))
    }
}

impl Eq for GeometryParams {}

impl Hash for GeometryParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for (k, v) in &self.0 {
            k.hash(state);
            canonical_bits(*v).hash(state);
        }
    }
}

/// Geometry kind plus parameters, before any level-of-detail reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometrySpec {
    pub kind: GeometryKind,
    #[serde(default)]
    pub params: GeometryParams,
}

impl GeometrySpec {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            params: GeometryParams::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.params.set(name, value);
        self
    }
}

/// Resolved material attributes of a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialSpec {
    pub color: String,
    pub metalness: f32,
    pub roughness: f32,
    pub opacity: f32,
    /// Fallback style used when the type could not be resolved.
    pub is_error: bool,
}

impl Default for MaterialSpec {
    fn default() -> Self {
        Self {
            color: "#FFFFFF".into(),
            metalness: 0.1,
            roughness: 0.8,
            opacity: 1.0,
            is_error: false,
        }
    }
}

impl MaterialSpec {
    /// Translucent materials are drawn after opaque ones and never write depth.
    pub fn is_translucent(&self) -> bool {
        self.is_error || self.opacity < 1.0
    }
}

impl PartialEq for MaterialSpec {
    fn eq(&self, other: &Self) -> bool {
        self.color == other.color
            && canonical_bits(self.metalness) == canonical_bits(other.metalness)
            && canonical_bits(self.roughness) == canonical_bits(other.roughness)
            && canonical_bits(self.opacity) == canonical_bits(other.opacity)
            && self.is_error == other.is_error
    }
}

impl Eq for MaterialSpec {}

impl Hash for MaterialSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.color.hash(state);
        canonical_bits(self.metalness).hash(state);
        canonical_bits(self.roughness).hash(state);
        canonical_bits(self.opacity).hash(state);
        self.is_error.hash(state);
    }
}

/// Per-type visual attributes as delivered by the world data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStyle {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub geometry: Option<GeometrySpec>,
    #[serde(default)]
    pub opacity: Option<f32>,
    #[serde(default)]
    pub metalness: Option<f32>,
    #[serde(default)]
    pub roughness: Option<f32>,
    /// Marks a placeholder style for a type the source could not describe.
    #[serde(default)]
    pub is_error: bool,
}

impl TypeStyle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            geometry: None,
            opacity: None,
            metalness: None,
            roughness: None,
            is_error: false,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_geometry(mut self, geometry: GeometrySpec) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = Some(opacity);
        self
    }

    pub fn with_surface(mut self, metalness: f32, roughness: f32) -> Self {
        self.metalness = Some(metalness);
        self.roughness = Some(roughness);
        self
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Coordinate used on every axis by the hidden sentinel, far outside any
    /// playable volume.
    pub const HIDDEN_COORD: f32 = -10_000.0;

    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Identity transform centered on a cell.
    pub fn at_cell(coord: CellCoord, cell_size: f32) -> Self {
        Self::at(coord.world_center(cell_size))
    }

    /// Sentinel written into a batch slot whose cell was removed.
    pub fn hidden() -> Self {
        Self::at(Vec3::splat(Self::HIDDEN_COORD))
    }

    pub fn is_hidden(&self) -> bool {
        self.position == Vec3::splat(Self::HIDDEN_COORD)
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Per-instance data as uploaded by a renderer backend: a column-major model matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl From<&Transform> for InstanceRaw {
    fn from(t: &Transform) -> Self {
        Self {
            model: t.to_matrix().to_cols_array_2d(),
        }
    }
}

impl InstanceRaw {
    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.model[3][0], self.model[3][1], self.model[3][2])
    }

    pub fn is_hidden(&self) -> bool {
        self.translation() == Vec3::splat(Transform::HIDDEN_COORD)
    }
}
