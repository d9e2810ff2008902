//! In-memory host object model: armatures, actions and meshes.

mod action;
mod armature;
mod mesh;

pub use action::{Action, CurveId, FCurve, Interpolation, Keyframe};
pub use armature::{Armature, ArmatureObject, Bone, BoneId};
pub use mesh::{
    DeformWeight, KeyBlock, KeyKind, Mesh, MeshObject, Modifier, ShapeKey, VertexGroup, WeightMode,
};

/// Objects created or consumed by one import/export call.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub armatures: Vec<ArmatureObject>,
    pub meshes: Vec<MeshObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armature(&self, name: &str) -> Option<&ArmatureObject> {
        self.armatures.iter().find(|object| object.name == name)
    }

    pub fn mesh(&self, name: &str) -> Option<&MeshObject> {
        self.meshes.iter().find(|object| object.name == name)
    }
}
