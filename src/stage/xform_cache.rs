use std::collections::HashMap;

use nalgebra::Matrix4;

use super::{Stage, parent_path};

/// Memoized local-to-world transforms for one export session.
///
/// Meshes bound to the same skeleton share ancestors, so each ancestor's
/// world transform is computed once and reused.
#[derive(Debug, Default)]
pub struct XformCache {
    worlds: HashMap<String, Matrix4<f64>>,
}

impl XformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_to_world(&mut self, stage: &Stage, path: &str) -> Matrix4<f64> {
        if let Some(world) = self.worlds.get(path) {
            return *world;
        }

        let local = stage
            .prim(path)
            .map(|prim| prim.local_transform)
            .unwrap_or_else(Matrix4::identity);
        let world = match parent_path(path) {
            Some(parent) => self.local_to_world(stage, parent) * local,
            None => local,
        };

        self.worlds.insert(path.to_string(), world);
        world
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }
}
