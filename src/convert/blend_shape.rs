use std::collections::HashMap;

use nalgebra::{Matrix4, Vector3};

use crate::logging::ReportList;
use crate::scene::{CurveId, FCurve, Interpolation, KeyKind, MeshObject, ShapeKey};
use crate::stage::{
    BlendShape, PrimKind, SkelAnimation, Skeleton, Stage, TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR,
    TimeSamples, child_path, make_safe_name, parent_path,
};
use crate::{log_debug, log_info, log_warn};

use super::types::{BASIS_BLOCK_NAME, BlendShapeImport, codes};

/// Joint given to skeletons created only to carry blend shape animation.
const PLACEHOLDER_JOINT: &str = "joint1";

/// Offsets shorter than this do not count as a moved point on export.
const OFFSET_EPSILON: f32 = 1e-7;

/// Data path of a shape key block's value.
pub fn shape_key_data_path(block_name: &str) -> String {
    format!("key_blocks[\"{block_name}\"].value")
}

// ─── Import ───────────────────────────────────────────────────────────────────

/// Creates a relative shape key on `mesh_object` from the blend shapes bound
/// to the mesh prim at `prim_path`.
///
/// A reference block named "Basis" holds the undeformed positions; every
/// target with authored offsets becomes one more block. When `import_anim`
/// is set, block values are keyed from the blend shape weights of the
/// animation bound to the mesh's skeleton.
///
/// Each call adds a new shape key, so importing twice yields two keys.
pub fn import_blendshapes(
    mesh_object: &mut MeshObject,
    stage: &Stage,
    prim_path: &str,
    import_anim: bool,
    reports: &mut ReportList,
) -> Option<BlendShapeImport> {
    let prim = stage.prim(prim_path)?;
    let targets = prim.binding.blend_shape_targets.as_ref()?;
    let tokens = prim.binding.blend_shapes.as_ref()?;
    if targets.is_empty() || tokens.is_empty() {
        return None;
    }

    if targets.len() != tokens.len() {
        reports.warning(
            codes::BLEND_SHAPE_COUNT_MISMATCH,
            format!(
                "Blend shape targets and blend shapes size mismatch for mesh {prim_path} ({} vs {})",
                targets.len(),
                tokens.len()
            ),
        );
        return None;
    }

    let base = mesh_object.mesh.positions().to_vec();
    let key = mesh_object.mesh.add_shape_key(KeyKind::Relative);
    key.add_block(BASIS_BLOCK_NAME, &base);

    let mut block_names: HashMap<&str, String> = HashMap::new();
    for (target, token) in targets.iter().zip(tokens) {
        let Some(blend_shape) = stage.blend_shape(target) else {
            log_warn!("blend shape target {target} of mesh {prim_path} is not a blend shape prim");
            continue;
        };
        let Some(offsets) = &blend_shape.offsets else {
            reports.warning(
                codes::BLEND_SHAPE_OFFSETS_MISSING,
                format!("No offsets authored for blend shape {target}"),
            );
            continue;
        };
        if offsets.is_empty() {
            reports.warning(
                codes::BLEND_SHAPE_OFFSETS_MISSING,
                format!("No offsets for blend shape {target}"),
            );
            continue;
        }

        let block_index = key.add_block(token, &base);
        let block = key.block_mut(block_index);
        block_names.insert(token.as_str(), block.name.clone());

        match blend_shape.point_indices.as_deref() {
            Some(point_indices) if !point_indices.is_empty() => {
                if point_indices.len() != offsets.len() {
                    log_warn!(
                        "blend shape {target} has {} point indices for {} offsets",
                        point_indices.len(),
                        offsets.len()
                    );
                }
                for (&point, offset) in point_indices.iter().zip(offsets) {
                    match usize::try_from(point) {
                        Ok(point) if point < block.positions.len() => {
                            block.positions[point] += offset;
                        }
                        _ => log_warn!("out of bounds point index {point} in blend shape {target}"),
                    }
                }
            }
            _ => {
                if offsets.len() > block.positions.len() {
                    reports.warning(
                        codes::BLEND_SHAPE_EXTRA_OFFSETS,
                        format!(
                            "Blend shape {target} has {} offsets for {} points, extra offsets are ignored",
                            offsets.len(),
                            block.positions.len()
                        ),
                    );
                }
                for (position, offset) in block.positions.iter_mut().zip(offsets) {
                    *position += offset;
                }
            }
        }
    }

    let mut imported = BlendShapeImport {
        targets_created: block_names.len(),
        curves: Vec::new(),
    };

    if import_anim
        && let Some(curves) = import_blendshape_curves(key, stage, prim_path, &block_names)
    {
        imported.curves = curves;
    }

    Some(imported)
}

/// Keys block values from the blend shape weights bound to the mesh.
fn import_blendshape_curves(
    key: &mut ShapeKey,
    stage: &Stage,
    prim_path: &str,
    block_names: &HashMap<&str, String>,
) -> Option<Vec<Option<CurveId>>> {
    let skel_path = stage.inherited_skeleton(prim_path)?;
    let anim_path = stage.inherited_animation_source(&skel_path)?;
    let animation = stage.animation(&anim_path)?;

    let tokens = animation.blend_shapes.as_ref()?;
    let weights = &animation.blend_shape_weights;
    if tokens.is_empty() || !weights.is_authored() {
        return None;
    }
    let frames = weights.times();
    if frames.is_empty() {
        log_debug!("blend shape weights of {anim_path} are not animated");
        return None;
    }

    let action = key.ensure_action("KeyAction");
    let curves: Vec<Option<CurveId>> = tokens
        .iter()
        .map(|token| {
            let block_name = block_names.get(token.as_str())?;
            let curve = FCurve::with_capacity(&shape_key_data_path(block_name), 0, frames.len());
            Some(action.add_curve(curve))
        })
        .collect();

    for &frame in &frames {
        let Some(values) = weights.value_at(frame) else {
            log_warn!("couldn't read blend shape weights of {anim_path} at frame {frame}");
            continue;
        };
        if values.len() != curves.len() {
            log_warn!(
                "blend shape weights of {anim_path} at frame {frame} have {} values, expected {}",
                values.len(),
                curves.len()
            );
            continue;
        }
        for (curve, value) in curves.iter().zip(values) {
            if let Some(curve) = curve {
                action
                    .curve_mut(*curve)
                    .insert_keyframe(frame, value, Interpolation::Linear);
            }
        }
    }

    for curve in curves.iter().flatten() {
        action.curve_mut(*curve).recalc_handles();
    }

    Some(curves)
}

// ─── Export ───────────────────────────────────────────────────────────────────

/// Writes the active shape key of `mesh_object` under the mesh prim at
/// `mesh_path`.
///
/// Each non-reference block becomes a blend shape prim holding its offsets
/// from the reference block. Blocks that move fewer than half of the points
/// are written sparsely. Block values go to the scratch weights primvar,
/// sampled at every keyed frame of the key's action, for the shape key
/// export chaser to move onto a skeleton animation.
///
/// Returns the number of blend shapes written.
pub fn export_shape_keys(mesh_object: &MeshObject, stage: &mut Stage, mesh_path: &str) -> usize {
    let Some(key) = mesh_object.mesh.shape_key() else {
        return 0;
    };
    let Some(reference) = key.reference() else {
        return 0;
    };
    if stage.mesh(mesh_path).is_none() {
        log_warn!("can't export shape keys of {}, no mesh prim at {mesh_path}", mesh_object.name);
        return 0;
    }

    let mut tokens: Vec<String> = Vec::new();
    let mut targets = Vec::new();
    for block in key.blocks().iter().skip(1) {
        let safe_name = make_safe_name(&block.name);
        let token = if tokens.contains(&safe_name) {
            (1..)
                .map(|suffix| format!("{safe_name}_{suffix}"))
                .find(|candidate| !tokens.contains(candidate))
                .unwrap_or_else(|| safe_name.clone())
        } else {
            safe_name
        };

        let offsets: Vec<Vector3<f32>> = block
            .positions
            .iter()
            .zip(&reference.positions)
            .map(|(position, basis)| position - basis)
            .collect();
        let moved: Vec<usize> = offsets
            .iter()
            .enumerate()
            .filter(|(_, offset)| offset.norm() > OFFSET_EPSILON)
            .map(|(point, _)| point)
            .collect();

        let blend_shape = if !moved.is_empty() && moved.len() * 2 < offsets.len() {
            BlendShape {
                offsets: Some(moved.iter().map(|&point| offsets[point]).collect()),
                point_indices: Some(moved.iter().map(|&point| point as i32).collect()),
            }
        } else {
            BlendShape {
                offsets: Some(offsets),
                point_indices: None,
            }
        };

        let target = child_path(mesh_path, &token);
        stage.define(&target, PrimKind::BlendShape(blend_shape));
        tokens.push(token);
        targets.push(target);
    }

    let weights = block_weight_samples(key);
    let count = targets.len();
    if let Some(prim) = stage.prim_mut(mesh_path) {
        prim.binding.blend_shapes = Some(tokens);
        prim.binding.blend_shape_targets = Some(targets);
    }
    if let Some(mesh) = stage.mesh_mut(mesh_path) {
        mesh.animated_primvars
            .insert(TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR.to_string(), weights);
    }
    count
}

/// Non-reference block values at every keyed frame, or their static values
/// when the key is not animated.
fn block_weight_samples(key: &ShapeKey) -> TimeSamples<Vec<f32>> {
    let blocks = &key.blocks()[1..];
    let static_values: Vec<f32> = blocks.iter().map(|block| block.value).collect();
    let mut samples = TimeSamples::with_default(static_values);

    let Some(action) = &key.action else {
        return samples;
    };
    let curves: Vec<_> = blocks
        .iter()
        .map(|block| action.find_curve(&shape_key_data_path(&block.name), 0))
        .collect();

    for frame in action.keyed_frames() {
        let values = blocks
            .iter()
            .zip(&curves)
            .map(|(block, curve)| {
                curve
                    .and_then(|curve| curve.evaluate(frame))
                    .unwrap_or(block.value)
            })
            .collect();
        samples.insert(frame, values);
    }
    samples
}

/// Gives a mesh without a skeleton binding a skeleton of its own that
/// carries its blend shape animation.
///
/// The skeleton is a sibling of the mesh with one identity joint, bound to a
/// child animation whose weights copy the mesh's scratch primvar.
///
/// Returns the new skeleton's path, or `None` when the mesh has no blend
/// shape weights to carry.
pub fn ensure_blend_shape_skeleton(stage: &mut Stage, mesh_path: &str) -> Option<String> {
    let prim = stage.prim(mesh_path)?;
    let tokens = prim.binding.blend_shapes.clone()?;
    let weights = stage
        .mesh(mesh_path)?
        .animated_primvars
        .get(TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR)?
        .clone();

    let parent = parent_path(mesh_path).unwrap_or("/");
    let skel_path = stage.unique_child_path(parent, "Skel");
    let anim_path = child_path(&skel_path, "Anim");

    let skel = stage.define(
        &skel_path,
        PrimKind::Skeleton(Skeleton {
            joints: vec![PLACEHOLDER_JOINT.to_string()],
            bind_transforms: vec![Matrix4::identity()],
            rest_transforms: vec![Matrix4::identity()],
            parents: None,
        }),
    );
    skel.binding.animation_source = Some(anim_path.clone());

    stage.define(
        &anim_path,
        PrimKind::Animation(SkelAnimation {
            blend_shapes: Some(tokens),
            blend_shape_weights: weights,
            ..SkelAnimation::default()
        }),
    );

    if let Some(prim) = stage.prim_mut(mesh_path) {
        prim.binding.skeleton = Some(skel_path.clone());
    }
    log_info!("created skeleton {skel_path} for blend shapes of {mesh_path}");
    Some(skel_path)
}

/// Merges the scratch blend shape weights of `mesh_paths` into the animation
/// bound to the skeleton at `skel_path`.
///
/// The animation's blend shape tokens become the union of the meshes' tokens
/// in first-seen order, and each merged sample places every mesh's weights
/// at the positions of its tokens. Joint animation is left intact. An
/// animation is created under the skeleton when none is bound.
///
/// Returns `false` when `skel_path` is not a skeleton.
pub fn remap_blend_shape_anim(stage: &mut Stage, skel_path: &str, mesh_paths: &[String]) -> bool {
    if stage.skeleton(skel_path).is_none() {
        log_warn!("can't remap blend shape animation, {skel_path} is not a skeleton");
        return false;
    }

    let mut all_tokens: Vec<String> = Vec::new();
    let mut sources: Vec<(Vec<String>, TimeSamples<Vec<f32>>)> = Vec::new();
    for mesh_path in mesh_paths {
        let Some(tokens) = stage
            .prim(mesh_path)
            .and_then(|prim| prim.binding.blend_shapes.clone())
        else {
            continue;
        };
        let Some(weights) = stage
            .mesh(mesh_path)
            .and_then(|mesh| mesh.animated_primvars.get(TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR))
        else {
            continue;
        };
        for token in &tokens {
            if !all_tokens.contains(token) {
                all_tokens.push(token.clone());
            }
        }
        sources.push((tokens, weights.clone()));
    }

    if all_tokens.is_empty() {
        log_debug!("no blend shape weights to remap onto {skel_path}");
        return true;
    }

    let mut times: Vec<f64> = sources
        .iter()
        .flat_map(|(_, weights)| weights.times())
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup();

    let merge = |time: f64| -> Vec<f32> {
        let mut merged = vec![0.0; all_tokens.len()];
        for (tokens, weights) in &sources {
            let Some(values) = weights.value_at(time) else {
                continue;
            };
            for (token, value) in tokens.iter().zip(values) {
                if let Some(slot) = all_tokens.iter().position(|candidate| candidate == token) {
                    merged[slot] = value;
                }
            }
        }
        merged
    };

    let mut merged = TimeSamples::new();
    if times.is_empty() {
        merged.set_default(merge(0.0));
    }
    for &time in &times {
        merged.insert(time, merge(time));
    }

    let anim_path = match stage.inherited_animation_source(skel_path) {
        Some(anim_path) => anim_path,
        None => {
            let anim_path = stage.unique_child_path(skel_path, "Anim");
            stage.define(&anim_path, PrimKind::Animation(SkelAnimation::default()));
            if let Some(skel) = stage.prim_mut(skel_path) {
                skel.binding.animation_source = Some(anim_path.clone());
            }
            anim_path
        }
    };

    let Some(animation) = stage.animation_mut(&anim_path) else {
        return false;
    };
    animation.blend_shapes = Some(all_tokens);
    animation.blend_shape_weights = merged;
    true
}
