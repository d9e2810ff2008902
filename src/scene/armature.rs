use nalgebra::{Matrix4, Vector3};
use serde::Serialize;

use super::action::Action;
use crate::transform::orthonormalize;

/// Index of a bone inside its armature's bone arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoneId(pub usize);

/// Rest-pose bone. Parent links are arena indices, never owning references.
#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    /// Armature-space rest matrix with scale removed.
    pub rest: Matrix4<f32>,
    pub parent: Option<BoneId>,
}

impl Bone {
    fn new(name: String) -> Self {
        Self {
            name,
            head: Vector3::zeros(),
            tail: Vector3::new(0.0, 1.0, 0.0),
            rest: Matrix4::identity(),
            parent: None,
        }
    }

    pub fn length(&self) -> f32 {
        (self.tail - self.head).norm()
    }

    /// Places the bone from an armature-space matrix.
    ///
    /// The head lands on the matrix translation and the tail follows the
    /// matrix's Y axis at the bone's current length.
    pub fn set_from_matrix(&mut self, matrix: &Matrix4<f64>) {
        let length = match self.length() {
            length if length > f32::EPSILON => length,
            _ => 1.0,
        };
        let rest = orthonormalize(matrix);
        let head = Vector3::new(rest[(0, 3)], rest[(1, 3)], rest[(2, 3)]);
        let y_axis = Vector3::new(rest[(0, 1)], rest[(1, 1)], rest[(2, 1)]);

        self.head = head;
        self.tail = head + y_axis * length;
        self.rest = rest;
    }

    /// Rescales the bone along its current direction.
    pub fn set_length(&mut self, length: f32) {
        let direction = self.tail - self.head;
        let Some(direction) = direction.try_normalize(f32::EPSILON) else {
            return;
        };
        self.tail = self.head + direction * length;
    }
}

/// Bone arena of one armature.
#[derive(Debug, Clone, Default)]
pub struct Armature {
    bones: Vec<Bone>,
}

impl Armature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bone, making its name unique within the armature.
    ///
    /// Returns `None` when `name` is blank.
    pub fn add_bone(&mut self, name: &str) -> Option<BoneId> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let unique = self.unique_name(name);
        self.bones.push(Bone::new(unique));
        Some(BoneId(self.bones.len() - 1))
    }

    fn unique_name(&self, name: &str) -> String {
        if self.find_bone(name).is_none() {
            return name.to_string();
        }
        (1..)
            .map(|suffix| format!("{name}.{suffix:03}"))
            .find(|candidate| self.find_bone(candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, id: BoneId) -> &Bone {
        &self.bones[id.0]
    }

    pub fn bone_mut(&mut self, id: BoneId) -> &mut Bone {
        &mut self.bones[id.0]
    }

    pub fn find_bone(&self, name: &str) -> Option<BoneId> {
        self.bones
            .iter()
            .position(|bone| bone.name == name)
            .map(BoneId)
    }

    /// Links `child` under `parent`. Refuses links that would close a cycle.
    pub fn set_parent(&mut self, child: BoneId, parent: BoneId) -> bool {
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return false;
            }
            cursor = self.bones[current.0].parent;
        }
        self.bones[child.0].parent = Some(parent);
        true
    }

    /// Slash-separated path from the root bone down to `id`.
    pub fn bone_path(&self, id: BoneId) -> String {
        let mut names = vec![self.bones[id.0].name.as_str()];
        let mut cursor = self.bones[id.0].parent;
        while let Some(parent) = cursor {
            names.push(self.bones[parent.0].name.as_str());
            cursor = self.bones[parent.0].parent;
        }
        names.reverse();
        names.join("/")
    }
}

/// Armature object: bones plus the action animating them.
#[derive(Debug, Clone)]
pub struct ArmatureObject {
    pub name: String,
    pub armature: Armature,
    pub action: Option<Action>,
    pub world: Matrix4<f64>,
}

impl ArmatureObject {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            armature: Armature::new(),
            action: None,
            world: Matrix4::identity(),
        }
    }

    /// Returns the object's action, creating an empty one on first use.
    pub fn ensure_action(&mut self) -> &mut Action {
        let name = format!("{}Action", self.name);
        self.action.get_or_insert_with(|| Action::new(&name))
    }
}
