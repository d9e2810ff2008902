use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;
use crate::logging::Report;
use crate::scene::{BoneId, CurveId};

// ─── Constants ────────────────────────────────────────────────────────────────

/// Influences below this weight are dropped on import.
pub const DEFAULT_WEIGHT_EPSILON: f32 = 1e-5;

/// Bone length changes smaller than this fraction of the head's largest
/// component are ignored by the length heuristic.
pub const DEFAULT_BONE_LENGTH_EPSILON: f32 = 1e-5;

pub(super) const LOCATION_CHANNELS: usize = 3;
pub(super) const ROTATION_CHANNELS: usize = 4;
pub(super) const SCALE_CHANNELS: usize = 3;

/// Name given to the reference block of an imported shape key.
pub(super) const BASIS_BLOCK_NAME: &str = "Basis";

/// Report codes emitted by the import and export passes.
pub mod codes {
    pub const SKELETON_QUERY_FAILED: &str = "SKELETON_QUERY_FAILED";
    pub const JOINT_COUNT_MISMATCH: &str = "JOINT_COUNT_MISMATCH";
    pub const BONE_CREATION_FAILED: &str = "BONE_CREATION_FAILED";
    pub const BIND_TRANSFORMS_MISSING: &str = "BIND_TRANSFORMS_MISSING";
    pub const BIND_TRANSFORM_COUNT_MISMATCH: &str = "BIND_TRANSFORM_COUNT_MISMATCH";
    pub const NEGATIVE_DETERMINANT: &str = "NEGATIVE_DETERMINANT";
    pub const PARENT_OUT_OF_RANGE: &str = "PARENT_OUT_OF_RANGE";
    pub const SKIN_PRIMVARS_MISSING: &str = "SKIN_PRIMVARS_MISSING";
    pub const SKIN_ELEMENT_SIZE_MISMATCH: &str = "SKIN_ELEMENT_SIZE_MISMATCH";
    pub const SKIN_PRIMVAR_INVALID: &str = "SKIN_PRIMVAR_INVALID";
    pub const SKIN_INTERPOLATION_UNSUPPORTED: &str = "SKIN_INTERPOLATION_UNSUPPORTED";
    pub const SKIN_COUNT_MISMATCH: &str = "SKIN_COUNT_MISMATCH";
    pub const BLEND_SHAPE_COUNT_MISMATCH: &str = "BLEND_SHAPE_COUNT_MISMATCH";
    pub const BLEND_SHAPE_OFFSETS_MISSING: &str = "BLEND_SHAPE_OFFSETS_MISSING";
    pub const BLEND_SHAPE_EXTRA_OFFSETS: &str = "BLEND_SHAPE_EXTRA_OFFSETS";
    pub const SKINNED_MESH_UNBOUND: &str = "SKINNED_MESH_UNBOUND";
}

// ─── Options ──────────────────────────────────────────────────────────────────

/// Options controlling what an import pass creates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportOptions {
    /// Synthesize pose curves from skeleton animation.
    pub import_anim: bool,
    /// Transfer joint weights into deform groups.
    pub import_skins: bool,
    /// Create shape keys from bound blend shapes.
    pub import_blendshapes: bool,
    /// Key shape-key values from blend shape weight animation.
    pub import_blendshape_anim: bool,
    pub weight_epsilon: f32,
    /// Relative to the largest component of the bone head.
    pub bone_length_epsilon: f32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            import_anim: true,
            import_skins: true,
            import_blendshapes: true,
            import_blendshape_anim: true,
            weight_epsilon: DEFAULT_WEIGHT_EPSILON,
            bone_length_epsilon: DEFAULT_BONE_LENGTH_EPSILON,
        }
    }
}

/// Options controlling what an export pass writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportOptions {
    pub export_skins: bool,
    pub export_blendshapes: bool,
    /// Rescale each vertex's exported weights to sum to one.
    pub normalize_weights: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            export_skins: true,
            export_blendshapes: true,
            normalize_weights: true,
        }
    }
}

/// Import and export options persisted together as one JSON document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversionOptions {
    pub import: ImportOptions,
    pub export: ExportOptions,
}

/// Load options from a JSON file. Missing fields take their defaults.
pub fn load_options(path: &Path) -> Result<ConversionOptions, ConvertError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_options(path: &Path, options: &ConversionOptions) -> Result<(), ConvertError> {
    let content = serde_json::to_string_pretty(options)?;
    fs::write(path, content)?;
    Ok(())
}

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// Pose curves of one skeleton, one slot per joint and channel.
///
/// Joints without a bone keep `None` slots so that `3 * joint + axis` and
/// `4 * joint + component` stay valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelCurves {
    pub locations: Vec<Option<CurveId>>,
    pub rotations: Vec<Option<CurveId>>,
    pub scales: Vec<Option<CurveId>>,
}

impl ChannelCurves {
    pub(super) fn with_joint_count(joint_count: usize) -> Self {
        Self {
            locations: Vec::with_capacity(joint_count * LOCATION_CHANNELS),
            rotations: Vec::with_capacity(joint_count * ROTATION_CHANNELS),
            scales: Vec::with_capacity(joint_count * SCALE_CHANNELS),
        }
    }

    pub fn location(&self, joint: usize, axis: usize) -> Option<CurveId> {
        self.locations
            .get(joint * LOCATION_CHANNELS + axis)
            .copied()
            .flatten()
    }

    /// `component` follows `(w, x, y, z)` order.
    pub fn rotation(&self, joint: usize, component: usize) -> Option<CurveId> {
        self.rotations
            .get(joint * ROTATION_CHANNELS + component)
            .copied()
            .flatten()
    }

    pub fn scale(&self, joint: usize, axis: usize) -> Option<CurveId> {
        self.scales
            .get(joint * SCALE_CHANNELS + axis)
            .copied()
            .flatten()
    }

    /// Number of slots, holes included.
    pub fn slot_count(&self) -> usize {
        self.locations.len() + self.rotations.len() + self.scales.len()
    }

    /// Number of slots holding a curve.
    pub fn curve_count(&self) -> usize {
        self.locations
            .iter()
            .chain(&self.rotations)
            .chain(&self.scales)
            .filter(|slot| slot.is_some())
            .count()
    }

    pub(super) fn all(&self) -> impl Iterator<Item = CurveId> + '_ {
        self.locations
            .iter()
            .chain(&self.rotations)
            .chain(&self.scales)
            .filter_map(|slot| *slot)
    }
}

/// Result of importing one skeleton prim into an armature object.
#[derive(Debug, Clone, Default)]
pub struct SkeletonImport {
    /// Bone created for each joint, in joint order.
    pub bones: Vec<Option<BoneId>>,
    /// Joint token → bone name. Joints whose bone failed are absent.
    pub joint_to_bone: JointToBoneMap,
    /// `false` when a bind matrix mirrors its joint.
    pub valid_for_animation: bool,
    pub curves: Option<ChannelCurves>,
}

pub type JointToBoneMap = HashMap<String, String>;

/// Result of transferring one mesh's joint weights into deform groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkinImport {
    pub groups_created: usize,
    pub weights_assigned: usize,
}

/// Result of importing one mesh's blend shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlendShapeImport {
    /// Shape key blocks created, the reference block excluded.
    pub targets_created: usize,
    /// Weight curve per animation blend shape token; `None` for tokens
    /// without a created block.
    pub curves: Vec<Option<CurveId>>,
}

/// Dense per-vertex influences ready to be written as primvars.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinWeights {
    pub joint_indices: Vec<i32>,
    pub joint_weights: Vec<f32>,
    pub element_size: usize,
}

// ─── Summary ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ArmatureSummary {
    pub name: String,
    pub skeleton_path: String,
    pub bone_count: usize,
    pub curve_count: usize,
    pub valid_for_animation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshSummary {
    pub name: String,
    pub mesh_path: String,
    pub vertex_count: usize,
    pub deform_group_count: usize,
    pub armature: Option<String>,
    pub shape_key_count: usize,
    pub shape_key_block_count: usize,
    pub shape_key_curve_count: usize,
}

/// Machine-readable outcome of a whole-stage import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub armatures: Vec<ArmatureSummary>,
    pub meshes: Vec<MeshSummary>,
    pub reports: Vec<Report>,
}
