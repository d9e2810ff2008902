//! In-memory interchange scene: prims addressed by hierarchical path.

mod query;
mod samples;
mod topology;
mod xform_cache;

use std::collections::{BTreeMap, btree_map::Entry};

use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use crate::error::ConvertError;

pub use query::SkeletonQuery;
pub use samples::{Interpolation, Lerp, Primvar, TimeSamples};
pub use topology::Topology;
pub use xform_cache::XformCache;

/// Name of the scratch primvar carrying per-mesh blend shape weights during export.
pub const TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR: &str = "skel:tempBlendShapeWeights";

// ─── Path helpers ─────────────────────────────────────────────────────────────

/// Parent of a `/`-separated path, or `None` at the top.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        return (trimmed.starts_with('/') && trimmed.len() > 1).then_some("/");
    }
    Some(parent)
}

/// Last component of a joint token or prim path.
pub fn leaf_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Turns an arbitrary name into a valid prim name.
///
/// Characters outside `[A-Za-z0-9_]` become `_` and a leading digit gains a
/// `_` prefix.
pub fn make_safe_name(name: &str) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() || safe.starts_with(|c: char| c.is_ascii_digit()) {
        safe.insert(0, '_');
    }
    safe
}

// ─── Prim schemas ─────────────────────────────────────────────────────────────

/// Skinning and blend shape binding properties a prim may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkelBinding {
    pub skeleton: Option<String>,
    pub animation_source: Option<String>,
    pub joints: Option<Vec<String>>,
    pub joint_indices: Option<Primvar<i32>>,
    pub joint_weights: Option<Primvar<f32>>,
    pub blend_shapes: Option<Vec<String>>,
    pub blend_shape_targets: Option<Vec<String>>,
    pub geom_bind_transform: Option<Matrix4<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub joints: Vec<String>,
    pub bind_transforms: Vec<Matrix4<f64>>,
    pub rest_transforms: Vec<Matrix4<f64>>,
    /// Explicit parent indices; derived from joint paths when absent.
    pub parents: Option<Vec<i32>>,
}

impl Skeleton {
    pub fn topology(&self) -> Topology {
        match &self.parents {
            Some(parents) => Topology::new(parents.clone()),
            None => Topology::from_joint_paths(&self.joints),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkelAnimation {
    pub joints: Vec<String>,
    pub translations: TimeSamples<Vec<Vector3<f32>>>,
    pub rotations: TimeSamples<Vec<UnitQuaternion<f32>>>,
    pub scales: TimeSamples<Vec<Vector3<f32>>>,
    pub blend_shapes: Option<Vec<String>>,
    pub blend_shape_weights: TimeSamples<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlendShape {
    pub offsets: Option<Vec<Vector3<f32>>>,
    pub point_indices: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPrim {
    pub points: Vec<Vector3<f32>>,
    pub animated_primvars: BTreeMap<String, TimeSamples<Vec<f32>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimKind {
    Xform,
    Skeleton(Skeleton),
    Animation(SkelAnimation),
    BlendShape(BlendShape),
    Mesh(MeshPrim),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prim {
    pub path: String,
    pub local_transform: Matrix4<f64>,
    pub binding: SkelBinding,
    pub kind: PrimKind,
}

// ─── Stage ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Stage {
    prims: BTreeMap<String, Prim>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) the prim at `path`.
    pub fn define(&mut self, path: &str, kind: PrimKind) -> &mut Prim {
        let prim = Prim {
            path: path.to_string(),
            local_transform: Matrix4::identity(),
            binding: SkelBinding::default(),
            kind,
        };
        match self.prims.entry(path.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(prim);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(prim),
        }
    }

    pub fn prim(&self, path: &str) -> Option<&Prim> {
        self.prims.get(path)
    }

    pub fn prim_mut(&mut self, path: &str) -> Option<&mut Prim> {
        self.prims.get_mut(path)
    }

    pub fn prims(&self) -> impl Iterator<Item = &Prim> {
        self.prims.values()
    }

    pub fn skeleton(&self, path: &str) -> Option<&Skeleton> {
        match &self.prims.get(path)?.kind {
            PrimKind::Skeleton(skeleton) => Some(skeleton),
            _ => None,
        }
    }

    pub fn animation(&self, path: &str) -> Option<&SkelAnimation> {
        match &self.prims.get(path)?.kind {
            PrimKind::Animation(animation) => Some(animation),
            _ => None,
        }
    }

    pub fn animation_mut(&mut self, path: &str) -> Option<&mut SkelAnimation> {
        match &mut self.prims.get_mut(path)?.kind {
            PrimKind::Animation(animation) => Some(animation),
            _ => None,
        }
    }

    pub fn blend_shape(&self, path: &str) -> Option<&BlendShape> {
        match &self.prims.get(path)?.kind {
            PrimKind::BlendShape(blend_shape) => Some(blend_shape),
            _ => None,
        }
    }

    pub fn mesh(&self, path: &str) -> Option<&MeshPrim> {
        match &self.prims.get(path)?.kind {
            PrimKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self, path: &str) -> Option<&mut MeshPrim> {
        match &mut self.prims.get_mut(path)?.kind {
            PrimKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn skeleton_paths(&self) -> Vec<String> {
        self.paths_where(|kind| matches!(kind, PrimKind::Skeleton(_)))
    }

    pub fn mesh_paths(&self) -> Vec<String> {
        self.paths_where(|kind| matches!(kind, PrimKind::Mesh(_)))
    }

    fn paths_where(&self, predicate: impl Fn(&PrimKind) -> bool) -> Vec<String> {
        self.prims
            .values()
            .filter(|prim| predicate(&prim.kind))
            .map(|prim| prim.path.clone())
            .collect()
    }

    /// Yields `path` and then each ancestor path, innermost first.
    fn ancestry<'p>(path: &'p str) -> impl Iterator<Item = &'p str> {
        std::iter::successors(Some(path), |current| parent_path(*current))
    }

    /// Skeleton bound to `path` or to its nearest bound ancestor.
    pub fn inherited_skeleton(&self, path: &str) -> Option<String> {
        Self::ancestry(path)
            .filter_map(|current| self.prims.get(current))
            .find_map(|prim| prim.binding.skeleton.clone())
            .filter(|skeleton| self.skeleton(skeleton).is_some())
    }

    /// Animation source bound to `path` or to its nearest bound ancestor.
    pub fn inherited_animation_source(&self, path: &str) -> Option<String> {
        Self::ancestry(path)
            .filter_map(|current| self.prims.get(current))
            .find_map(|prim| prim.binding.animation_source.clone())
            .filter(|animation| self.animation(animation).is_some())
    }

    /// Path of a new child of `parent` named `name`, suffixed when taken.
    pub fn unique_child_path(&self, parent: &str, name: &str) -> String {
        let candidate = child_path(parent, name);
        if !self.prims.contains_key(&candidate) {
            return candidate;
        }
        (1..)
            .map(|suffix| child_path(parent, &format!("{name}_{suffix}")))
            .find(|path| !self.prims.contains_key(path))
            .unwrap_or(candidate)
    }

    pub fn skeleton_query(&self, path: &str) -> Result<SkeletonQuery<'_>, ConvertError> {
        SkeletonQuery::new(self, path)
    }

    /// Removes a scratch primvar. Returns whether it existed.
    pub fn remove_primvar(&mut self, mesh_path: &str, name: &str) -> bool {
        self.mesh_mut(mesh_path)
            .is_some_and(|mesh| mesh.animated_primvars.remove(name).is_some())
    }
}
