use nalgebra::{Matrix4, Vector3};
use serde::Serialize;

use super::action::Action;

/// Named vertex group used as a deform target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VertexGroup {
    pub name: String,
}

/// One `(group, weight)` influence on a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeformWeight {
    pub group: usize,
    pub weight: f32,
}

/// How `Mesh::add_vertex_weight` treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMode {
    Replace,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyKind {
    Relative,
    Absolute,
}

/// One morph target: a full copy of the vertex positions.
#[derive(Debug, Clone, Serialize)]
pub struct KeyBlock {
    pub name: String,
    #[serde(skip)]
    pub positions: Vec<Vector3<f32>>,
    pub value: f32,
}

/// Shape key container. The first block is the reference ("Basis").
#[derive(Debug, Clone, Serialize)]
pub struct ShapeKey {
    pub kind: KeyKind,
    blocks: Vec<KeyBlock>,
    pub action: Option<Action>,
}

impl ShapeKey {
    fn new(kind: KeyKind) -> Self {
        Self {
            kind,
            blocks: Vec::new(),
            action: None,
        }
    }

    /// Appends a block initialised from `positions`, with a unique name.
    pub fn add_block(&mut self, name: &str, positions: &[Vector3<f32>]) -> usize {
        let mut unique = name.to_string();
        let mut suffix = 1;
        while self.find_block(&unique).is_some() {
            unique = format!("{name}.{suffix:03}");
            suffix += 1;
        }
        self.blocks.push(KeyBlock {
            name: unique,
            positions: positions.to_vec(),
            value: 0.0,
        });
        self.blocks.len() - 1
    }

    pub fn blocks(&self) -> &[KeyBlock] {
        &self.blocks
    }

    pub fn block_mut(&mut self, index: usize) -> &mut KeyBlock {
        &mut self.blocks[index]
    }

    pub fn find_block(&self, name: &str) -> Option<usize> {
        self.blocks.iter().position(|block| block.name == name)
    }

    pub fn reference(&self) -> Option<&KeyBlock> {
        self.blocks.first()
    }

    pub fn ensure_action(&mut self, name: &str) -> &mut Action {
        self.action.get_or_insert_with(|| Action::new(name))
    }
}

/// Mesh data: positions, deform weights and shape keys.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    positions: Vec<Vector3<f32>>,
    vertex_groups: Vec<VertexGroup>,
    deform_verts: Vec<Vec<DeformWeight>>,
    shape_keys: Vec<ShapeKey>,
}

impl Mesh {
    pub fn new(positions: Vec<Vector3<f32>>) -> Self {
        let vertex_count = positions.len();
        Self {
            positions,
            vertex_groups: Vec::new(),
            deform_verts: vec![Vec::new(); vertex_count],
            shape_keys: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.positions
    }

    /// Replaces the vertex positions, resizing the deform weights to match.
    /// Weights of dropped vertices are discarded.
    pub fn set_positions(&mut self, positions: Vec<Vector3<f32>>) {
        self.deform_verts.resize(positions.len(), Vec::new());
        self.positions = positions;
    }

    pub fn vertex_groups(&self) -> &[VertexGroup] {
        &self.vertex_groups
    }

    pub fn find_vertex_group(&self, name: &str) -> Option<usize> {
        self.vertex_groups.iter().position(|group| group.name == name)
    }

    pub fn add_vertex_group(&mut self, name: &str) -> usize {
        self.vertex_groups.push(VertexGroup {
            name: name.to_string(),
        });
        self.vertex_groups.len() - 1
    }

    /// Assigns `weight` for `group` on `vertex`. Returns `false` and leaves
    /// the mesh untouched for an out-of-range vertex or group.
    pub fn add_vertex_weight(
        &mut self,
        vertex: usize,
        group: usize,
        weight: f32,
        mode: WeightMode,
    ) -> bool {
        if group >= self.vertex_groups.len() {
            return false;
        }
        let Some(entries) = self.deform_verts.get_mut(vertex) else {
            return false;
        };

        match entries.iter_mut().find(|entry| entry.group == group) {
            Some(entry) => match mode {
                WeightMode::Replace => entry.weight = weight,
                WeightMode::Add => entry.weight = (entry.weight + weight).min(1.0),
            },
            None => entries.push(DeformWeight { group, weight }),
        }
        true
    }

    pub fn deform_verts(&self) -> &[Vec<DeformWeight>] {
        &self.deform_verts
    }

    pub fn vertex_weight(&self, vertex: usize, group: usize) -> Option<f32> {
        self.deform_verts
            .get(vertex)?
            .iter()
            .find(|entry| entry.group == group)
            .map(|entry| entry.weight)
    }

    /// Creates a new shape key and makes it the active one.
    ///
    /// Earlier keys stay alive; nothing is merged.
    pub fn add_shape_key(&mut self, kind: KeyKind) -> &mut ShapeKey {
        self.shape_keys.push(ShapeKey::new(kind));
        let last = self.shape_keys.len() - 1;
        &mut self.shape_keys[last]
    }

    pub fn shape_key(&self) -> Option<&ShapeKey> {
        self.shape_keys.last()
    }

    pub fn shape_key_mut(&mut self) -> Option<&mut ShapeKey> {
        self.shape_keys.last_mut()
    }

    pub fn shape_keys(&self) -> &[ShapeKey] {
        &self.shape_keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// Skin deformation driven by the named armature object.
    Armature { object: Option<String> },
}

#[derive(Debug, Clone)]
pub struct MeshObject {
    pub name: String,
    pub mesh: Mesh,
    pub modifiers: Vec<Modifier>,
    pub world: Matrix4<f64>,
}

impl MeshObject {
    pub fn new(name: &str, mesh: Mesh) -> Self {
        Self {
            name: name.to_string(),
            mesh,
            modifiers: Vec::new(),
            world: Matrix4::identity(),
        }
    }

    /// Adds an armature modifier unless one exists. Returns whether one was added.
    pub fn ensure_armature_modifier(&mut self) -> bool {
        if self
            .modifiers
            .iter()
            .any(|modifier| matches!(modifier, Modifier::Armature { .. }))
        {
            return false;
        }
        self.modifiers.push(Modifier::Armature { object: None });
        true
    }

    pub fn armature_modifier_target(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::Armature { object } => object.as_deref(),
        })
    }

    pub fn set_armature_modifier_target(&mut self, armature_name: &str) {
        self.ensure_armature_modifier();
        for modifier in &mut self.modifiers {
            let Modifier::Armature { object } = modifier;
            *object = Some(armature_name.to_string());
        }
    }
}
