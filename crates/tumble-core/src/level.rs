//! Level configuration document.
//!
//! A level is loaded wholesale from JSON, patched in place while the user
//! builds (poses, material edits, inventory counts, object add/remove) and
//! handed back to persistence after every edit. Objective and end-condition
//! definitions are kept as raw JSON values so that one malformed entry can be
//! rejected on its own by the goal builder instead of failing the whole
//! document.

use serde::{Deserialize, Serialize};

use crate::error::LevelError;

/// Shape of a simulated body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShapeDef {
    Box { width: f32, height: f32 },
    Circle { radius: f32 },
}

impl ShapeDef {
    /// Distance from the body origin to its highest point at the given angle.
    pub fn vertical_extent(&self, angle: f32) -> f32 {
        match *self {
            Self::Box { width, height } => {
                let (sin, cos) = angle.sin_cos();
                (width / 2.0 * sin).abs() + (height / 2.0 * cos).abs()
            }
            Self::Circle { radius } => radius,
        }
    }

    /// Returns true if a point in body-local coordinates lies inside the shape.
    pub fn contains_local(&self, local: [f32; 2]) -> bool {
        match *self {
            Self::Box { width, height } => {
                local[0].abs() <= width / 2.0 && local[1].abs() <= height / 2.0
            }
            Self::Circle { radius } => local[0] * local[0] + local[1] * local[1] <= radius * radius,
        }
    }
}

/// Position and orientation of a body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Pose {
    pub position: [f32; 2],
    /// Rotation in radians.
    pub angle: f32,
}

impl Pose {
    pub fn new(position: [f32; 2], angle: f32) -> Self {
        Self { position, angle }
    }

    /// Transforms a world point into this pose's local frame.
    pub fn to_local(&self, point: [f32; 2]) -> [f32; 2] {
        let dx = point[0] - self.position[0];
        let dy = point[1] - self.position[1];
        let (sin, cos) = self.angle.sin_cos();
        [dx * cos + dy * sin, -dx * sin + dy * cos]
    }

    /// Transforms a local point into world coordinates.
    pub fn to_world(&self, local: [f32; 2]) -> [f32; 2] {
        let (sin, cos) = self.angle.sin_cos();
        [
            self.position[0] + local[0] * cos - local[1] * sin,
            self.position[1] + local[0] * sin + local[1] * cos,
        ]
    }
}

/// Axis-aligned rectangle given by its minimum and maximum corners.
///
/// Corners are reordered on load, so an authored rectangle with swapped
/// corners still describes the same area.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawBounds")]
pub struct Bounds {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

#[derive(Deserialize)]
struct RawBounds {
    min: [f32; 2],
    max: [f32; 2],
}

impl From<RawBounds> for Bounds {
    fn from(raw: RawBounds) -> Self {
        let bounds = Self::new(raw.min, raw.max);
        if bounds.min != raw.min {
            tracing::warn!(
                "[level] bounds corners {:?} / {:?} were swapped, reordering",
                raw.min,
                raw.max
            );
        }
        bounds
    }
}

impl Bounds {
    /// Builds a rectangle from two opposite corners in any order.
    pub fn new(a: [f32; 2], b: [f32; 2]) -> Self {
        Self {
            min: [a[0].min(b[0]), a[1].min(b[1])],
            max: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    pub fn contains(&self, point: [f32; 2]) -> bool {
        point[0] >= self.min[0]
            && point[0] <= self.max[0]
            && point[1] >= self.min[1]
            && point[1] <= self.max[1]
    }

    /// Clamps a point into the rectangle.
    ///
    /// Never panics: corners are taken in either order and a NaN corner
    /// collapses that axis onto the other corner.
    pub fn clamp(&self, point: [f32; 2]) -> [f32; 2] {
        let Self { min, max } = Self::new(self.min, self.max);
        [
            point[0].max(min[0]).min(max[0]),
            point[1].max(min[1]).min(max[1]),
        ]
    }

    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    pub fn center(&self) -> [f32; 2] {
        [
            f32::midpoint(self.min[0], self.max[0]),
            f32::midpoint(self.min[1], self.max[1]),
        ]
    }
}

/// World-level parameters of a level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorldParams {
    #[serde(default = "default_gravity")]
    pub gravity: [f32; 2],
    /// Region the user may build in.
    #[serde(default = "default_working_bounds")]
    pub working_bounds: Bounds,
    /// Region enclosed by walls while the simulation runs.
    #[serde(default = "default_simulation_bounds")]
    pub simulation_bounds: Bounds,
    #[serde(default = "default_wall_thickness")]
    pub wall_thickness: f32,
}

fn default_gravity() -> [f32; 2] {
    [0.0, -9.81]
}

fn default_working_bounds() -> Bounds {
    Bounds {
        min: [-10.0, 0.0],
        max: [10.0, 10.0],
    }
}

fn default_simulation_bounds() -> Bounds {
    Bounds {
        min: [-20.0, -2.0],
        max: [20.0, 30.0],
    }
}

fn default_wall_thickness() -> f32 {
    0.5
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            gravity: default_gravity(),
            working_bounds: default_working_bounds(),
            simulation_bounds: default_simulation_bounds(),
            wall_thickness: default_wall_thickness(),
        }
    }
}

/// Level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelMeta {
    /// Level identity, used as the persistence key.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Level unlocked when every objective of this one is complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_level: Option<String>,
}

impl Default for LevelMeta {
    fn default() -> Self {
        Self {
            id: "untitled".to_string(),
            name: String::new(),
            next_level: None,
        }
    }
}

fn default_mass() -> f32 {
    1.0
}

fn default_friction() -> f32 {
    0.5
}

fn default_restitution() -> f32 {
    0.1
}

/// A body placed in the level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelObject {
    pub id: String,
    pub shape: ShapeDef,
    pub position: [f32; 2],
    #[serde(default)]
    pub angle: f32,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_restitution")]
    pub restitution: f32,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_sensor: bool,
    /// Inventory item this object was placed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LevelObject {
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.angle)
    }
}

/// Partial edit of an object's properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friction: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restitution: Option<f32>,
}

impl ObjectPatch {
    /// Pose-only patch.
    pub fn pose(pose: Pose) -> Self {
        Self {
            position: Some(pose.position),
            angle: Some(pose.angle),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, object: &mut LevelObject) {
        if let Some(position) = self.position {
            object.position = position;
        }
        if let Some(angle) = self.angle {
            object.angle = angle;
        }
        if let Some(mass) = self.mass {
            object.mass = mass;
        }
        if let Some(friction) = self.friction {
            object.friction = friction;
        }
        if let Some(restitution) = self.restitution {
            object.restitution = restitution;
        }
    }
}

fn default_stiffness() -> f32 {
    40.0
}

fn default_damping() -> f32 {
    2.0
}

/// A compliant spring between two bodies, or between a body and a world point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintDef {
    pub id: String,
    pub body_a: String,
    /// Second body; when absent `anchor_b` is a world point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_b: Option<String>,
    #[serde(default)]
    pub anchor_a: [f32; 2],
    #[serde(default)]
    pub anchor_b: [f32; 2],
    /// Rest length; defaults to the anchor distance at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_length: Option<f32>,
    #[serde(default = "default_stiffness")]
    pub stiffness: f32,
    #[serde(default = "default_damping")]
    pub damping: f32,
}

/// A stack of identical pieces the user can place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub shape: ShapeDef,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_restitution")]
    pub restitution: f32,
    pub count: u32,
}

impl InventoryItem {
    /// Builds a new level object from this item.
    pub fn instantiate(&self, id: String, position: [f32; 2]) -> LevelObject {
        LevelObject {
            id,
            shape: self.shape,
            position,
            angle: 0.0,
            mass: self.mass,
            friction: self.friction,
            restitution: self.restitution,
            is_static: false,
            is_sensor: false,
            source: Some(self.id.clone()),
        }
    }
}

/// Complete level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LevelConfig {
    #[serde(default)]
    pub meta: LevelMeta,
    #[serde(default)]
    pub world: WorldParams,
    #[serde(default)]
    pub objects: Vec<LevelObject>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub objectives: Vec<serde_json::Value>,
    #[serde(default)]
    pub end_conditions: Vec<serde_json::Value>,
}

impl LevelConfig {
    /// Loads a level from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, LevelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the level to a JSON string.
    pub fn to_json(&self) -> Result<String, LevelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The bundled tower-building level.
    /// Loaded from levels/default.json at compile time.
    pub fn default_level() -> Self {
        const DEFAULT_LEVEL_JSON: &str = include_str!("../levels/default.json");
        Self::from_json(DEFAULT_LEVEL_JSON).expect("Failed to parse default level JSON")
    }

    pub fn object(&self, id: &str) -> Option<&LevelObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn object_mut(&mut self, id: &str) -> Option<&mut LevelObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    pub fn inventory_item(&self, id: &str) -> Option<&InventoryItem> {
        self.inventory.iter().find(|i| i.id == id)
    }

    /// Adds an object, rejecting duplicate ids.
    pub fn add_object(&mut self, object: LevelObject) -> Result<(), LevelError> {
        if self.object(&object.id).is_some() {
            return Err(LevelError::DuplicateObject(object.id));
        }
        self.objects.push(object);
        Ok(())
    }

    /// Removes an object and returns its piece to the inventory it came from.
    pub fn remove_object(&mut self, id: &str) -> Result<LevelObject, LevelError> {
        let pos = self
            .objects
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| LevelError::UnknownObject(id.to_string()))?;
        let object = self.objects.remove(pos);

        if let Some(source) = &object.source {
            if let Some(item) = self.inventory.iter_mut().find(|i| &i.id == source) {
                item.count += 1;
            }
        }
        // Springs attached to a removed body have nothing to hold on to.
        self.constraints
            .retain(|c| c.body_a != id && c.body_b.as_deref() != Some(id));

        Ok(object)
    }

    /// Takes one piece from an inventory item.
    pub fn take_from_inventory(&mut self, item_id: &str) -> Result<(), LevelError> {
        let item = self
            .inventory
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| LevelError::UnknownInventoryItem(item_id.to_string()))?;
        if item.count == 0 {
            return Err(LevelError::InventoryExhausted(item_id.to_string()));
        }
        item.count -= 1;
        Ok(())
    }

    /// Returns the first unused object id of the form `<item>-<n>`.
    pub fn next_object_id(&self, item_id: &str) -> String {
        (1..)
            .map(|n| format!("{item_id}-{n}"))
            .find(|candidate| self.object(candidate).is_none())
            .unwrap_or_else(|| format!("{item_id}-x"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        let level = LevelConfig::default_level();
        assert_eq!(level.meta.id, "tower-1");
        assert!(level.objects.iter().any(|o| o.is_static));
        assert!(!level.inventory.is_empty());
        assert!(!level.objectives.is_empty());
        assert!(!level.end_conditions.is_empty());
    }

    #[test]
    fn test_json_roundtrip_keeps_document() {
        let level = LevelConfig::default_level();
        let json = level.to_json().expect("Failed to serialize");
        let loaded = LevelConfig::from_json(&json).expect("Failed to deserialize");
        assert_eq!(loaded, level);
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let level = LevelConfig::from_json(r#"{ "meta": { "id": "tiny" } }"#).unwrap();
        assert_eq!(level.world.gravity, [0.0, -9.81]);
        assert!(level.objects.is_empty());
        assert!(level.end_conditions.is_empty());
    }

    #[test]
    fn test_camel_case_keys() {
        let json = r#"{
            "meta": { "id": "cc", "nextLevel": "cc-2" },
            "world": { "wallThickness": 1.0 },
            "objects": [
                { "id": "floor", "shape": { "type": "box", "width": 10, "height": 1 },
                  "position": [0, 0], "isStatic": true }
            ],
            "endConditions": [ { "type": "timeLimit", "id": "t", "duration": 3 } ]
        }"#;
        let level = LevelConfig::from_json(json).unwrap();
        assert_eq!(level.meta.next_level.as_deref(), Some("cc-2"));
        assert_eq!(level.world.wall_thickness, 1.0);
        assert!(level.objects[0].is_static);
        assert_eq!(level.end_conditions.len(), 1);
    }

    #[test]
    fn test_remove_object_returns_piece_and_drops_springs() {
        let mut level = LevelConfig::default_level();
        let item_id = level.inventory[0].id.clone();
        let before = level.inventory[0].count;

        level.take_from_inventory(&item_id).unwrap();
        let id = level.next_object_id(&item_id);
        let object = level.inventory[0].instantiate(id.clone(), [0.0, 2.0]);
        level.add_object(object).unwrap();
        level.constraints.push(ConstraintDef {
            id: "pin".to_string(),
            body_a: id.clone(),
            body_b: None,
            anchor_a: [0.0, 0.0],
            anchor_b: [0.0, 5.0],
            rest_length: None,
            stiffness: 10.0,
            damping: 1.0,
        });
        assert_eq!(level.inventory[0].count, before - 1);

        level.remove_object(&id).unwrap();
        assert_eq!(level.inventory[0].count, before);
        assert!(level.constraints.iter().all(|c| c.id != "pin"));
    }

    #[test]
    fn test_take_from_empty_inventory_fails() {
        let mut level = LevelConfig::default();
        level.inventory.push(InventoryItem {
            id: "plank".to_string(),
            name: String::new(),
            shape: ShapeDef::Box {
                width: 2.0,
                height: 0.2,
            },
            mass: 1.0,
            friction: 0.5,
            restitution: 0.1,
            count: 0,
        });
        assert!(matches!(
            level.take_from_inventory("plank"),
            Err(LevelError::InventoryExhausted(_))
        ));
        assert!(matches!(
            level.take_from_inventory("missing"),
            Err(LevelError::UnknownInventoryItem(_))
        ));
    }

    #[test]
    fn test_next_object_id_skips_taken() {
        let mut level = LevelConfig::default();
        let item = InventoryItem {
            id: "block".to_string(),
            name: String::new(),
            shape: ShapeDef::Circle { radius: 0.5 },
            mass: 1.0,
            friction: 0.5,
            restitution: 0.1,
            count: 3,
        };
        level.add_object(item.instantiate("block-1".to_string(), [0.0, 0.0])).unwrap();
        assert_eq!(level.next_object_id("block"), "block-2");
        assert!(matches!(
            level.add_object(item.instantiate("block-1".to_string(), [1.0, 0.0])),
            Err(LevelError::DuplicateObject(_))
        ));
    }

    #[test]
    fn test_vertical_extent_of_rotated_box() {
        let shape = ShapeDef::Box {
            width: 2.0,
            height: 1.0,
        };
        assert!((shape.vertical_extent(0.0) - 0.5).abs() < 1e-6);
        assert!((shape.vertical_extent(std::f32::consts::FRAC_PI_2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pose_local_world_inverse() {
        let pose = Pose::new([3.0, -1.0], 0.7);
        let local = pose.to_local([4.0, 2.0]);
        let world = pose.to_world(local);
        assert!((world[0] - 4.0).abs() < 1e-5);
        assert!((world[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_swapped_bounds_are_reordered_on_load() {
        let json = r#"{
            "meta": { "id": "swapped" },
            "world": { "workingBounds": { "min": [5, 6], "max": [-5, 0.5] } }
        }"#;
        let level = LevelConfig::from_json(json).unwrap();
        assert_eq!(level.world.working_bounds.min, [-5.0, 0.5]);
        assert_eq!(level.world.working_bounds.max, [5.0, 6.0]);
    }

    #[test]
    fn test_clamp_tolerates_bad_corners() {
        let swapped = Bounds {
            min: [5.0, 6.0],
            max: [-5.0, 0.5],
        };
        assert_eq!(swapped.clamp([9.0, 0.0]), [5.0, 0.5]);

        let nan = Bounds {
            min: [f32::NAN, 0.0],
            max: [1.0, 1.0],
        };
        assert_eq!(nan.clamp([-3.0, 2.0]), [1.0, 1.0]);
    }
}
