use std::collections::BTreeMap;

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};

use crate::logging::ReportList;
use crate::scene::{Action, Armature, ArmatureObject, BoneId, Scene};
use crate::stage::{
    PrimKind, SkelAnimation, Skeleton, Stage, TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR, TimeSamples,
    XformCache, child_path, make_safe_name,
};
use crate::transform::{decompose_transform, parent_relative, trs_matrix};
use crate::{log_debug, log_warn};

use super::blend_shape::{ensure_blend_shape_skeleton, remap_blend_shape_anim};
use super::curves::pose_bone_data_path;
use super::types::codes;

/// Exported object name → prim path.
pub type ExportMap = BTreeMap<String, String>;

// ─── Skeleton ─────────────────────────────────────────────────────────────────

/// Joint token of every bone, in bone order.
pub fn joint_tokens(armature: &Armature) -> Vec<String> {
    (0..armature.len())
        .map(|index| {
            armature
                .bone_path(BoneId(index))
                .split('/')
                .map(make_safe_name)
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect()
}

/// Rest matrix of every bone relative to its parent bone.
fn local_rest_transforms(armature: &Armature) -> Vec<Matrix4<f64>> {
    armature
        .bones()
        .iter()
        .map(|bone| {
            let rest = bone.rest.cast::<f64>();
            match bone.parent {
                Some(parent) => {
                    let parent_rest = armature.bone(parent).rest.cast::<f64>();
                    parent_relative(&parent_rest, &rest).unwrap_or(rest)
                }
                None => rest,
            }
        })
        .collect()
}

/// Writes the rest pose of `armature_object` as a skeleton prim.
///
/// Bind transforms are the armature-space bone rest matrices and rest
/// transforms are relative to the parent bone. The prim takes the object's
/// world transform.
///
/// Returns the joint tokens, in bone order.
pub fn export_skeleton(
    armature_object: &ArmatureObject,
    stage: &mut Stage,
    skel_path: &str,
) -> Vec<String> {
    let armature = &armature_object.armature;
    let joints = joint_tokens(armature);

    let prim = stage.define(
        skel_path,
        PrimKind::Skeleton(Skeleton {
            joints: joints.clone(),
            bind_transforms: armature
                .bones()
                .iter()
                .map(|bone| bone.rest.cast::<f64>())
                .collect(),
            rest_transforms: local_rest_transforms(armature),
            parents: None,
        }),
    );
    prim.local_transform = armature_object.world;
    joints
}

/// Samples the pose curves of `armature_object` into a skeleton animation
/// under `skel_path`, keyed at every frame of the action.
///
/// Each joint's local transform is its local rest matrix composed with the
/// pose. Channels without a curve take the rest value.
///
/// Returns the animation path, or `None` when the object is not animated.
pub fn export_skeleton_animation(
    armature_object: &ArmatureObject,
    stage: &mut Stage,
    skel_path: &str,
) -> Option<String> {
    let action = armature_object.action.as_ref()?;
    let frames = action.keyed_frames();
    if frames.is_empty() {
        return None;
    }

    let armature = &armature_object.armature;
    let local_rest = local_rest_transforms(armature);

    let mut translations = TimeSamples::new();
    let mut rotations = TimeSamples::new();
    let mut scales = TimeSamples::new();
    for &frame in &frames {
        let mut frame_translations = Vec::with_capacity(armature.len());
        let mut frame_rotations = Vec::with_capacity(armature.len());
        let mut frame_scales = Vec::with_capacity(armature.len());

        for (bone, rest) in armature.bones().iter().zip(&local_rest) {
            let pose = sample_pose(action, &bone.name, frame);
            let local = rest * pose;
            let Some(trs) = decompose_transform(&local) else {
                log_warn!("couldn't decompose pose of bone '{}' at frame {frame}", bone.name);
                frame_translations.push(Vector3::zeros());
                frame_rotations.push(UnitQuaternion::identity());
                frame_scales.push(Vector3::new(1.0, 1.0, 1.0));
                continue;
            };
            frame_translations.push(trs.translation);
            frame_rotations.push(trs.rotation);
            frame_scales.push(trs.scale);
        }

        translations.insert(frame, frame_translations);
        rotations.insert(frame, frame_rotations);
        scales.insert(frame, frame_scales);
    }

    let anim_path = child_path(skel_path, "Anim");
    stage.define(
        &anim_path,
        PrimKind::Animation(SkelAnimation {
            joints: joint_tokens(armature),
            translations,
            rotations,
            scales,
            ..SkelAnimation::default()
        }),
    );
    if let Some(skel) = stage.prim_mut(skel_path) {
        skel.binding.animation_source = Some(anim_path.clone());
    }
    Some(anim_path)
}

/// Pose matrix of one bone at `frame`.
fn sample_pose(action: &Action, bone_name: &str, frame: f64) -> Matrix4<f64> {
    let channel = |property: &str, index: usize, rest: f32| {
        action
            .find_curve(&pose_bone_data_path(bone_name, property), index)
            .and_then(|curve| curve.evaluate(frame))
            .unwrap_or(rest)
    };

    let translation = Vector3::new(
        channel("location", 0, 0.0),
        channel("location", 1, 0.0),
        channel("location", 2, 0.0),
    );
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        channel("rotation_quaternion", 0, 1.0),
        channel("rotation_quaternion", 1, 0.0),
        channel("rotation_quaternion", 2, 0.0),
        channel("rotation_quaternion", 3, 0.0),
    ));
    let scale = Vector3::new(
        channel("scale", 0, 1.0),
        channel("scale", 1, 1.0),
        channel("scale", 2, 1.0),
    );
    trs_matrix(&translation, &rotation, &scale)
}

// ─── Chasers ──────────────────────────────────────────────────────────────────

/// Binds the mesh prim to the skeleton prim, with the mesh's transform
/// relative to the skeleton as its geometry bind transform.
pub fn add_skinned_mesh_bindings(
    stage: &mut Stage,
    skel_path: &str,
    mesh_path: &str,
    xf_cache: &mut XformCache,
) {
    let mesh_world = xf_cache.local_to_world(stage, mesh_path);
    let skel_world = xf_cache.local_to_world(stage, skel_path);
    let geom_bind = match skel_world.try_inverse() {
        Some(skel_inverse) => skel_inverse * mesh_world,
        None => {
            log_warn!("skeleton {skel_path} has a singular world transform, binding {mesh_path} in world space");
            mesh_world
        }
    };

    if let Some(prim) = stage.prim_mut(mesh_path) {
        prim.binding.skeleton = Some(skel_path.to_string());
        prim.binding.geom_bind_transform = Some(geom_bind);
    }
}

/// Binds every exported skinned mesh to the skeleton of the armature its
/// armature modifier targets.
pub fn skinned_mesh_export_chaser(
    stage: &mut Stage,
    armature_export_map: &ExportMap,
    skinned_mesh_export_map: &ExportMap,
    xf_cache: &mut XformCache,
    scene: &Scene,
    reports: &mut ReportList,
) {
    for (mesh_name, mesh_path) in skinned_mesh_export_map {
        let Some(mesh_object) = scene.mesh(mesh_name) else {
            log_warn!("exported skinned mesh '{mesh_name}' is not in the scene");
            continue;
        };
        let Some(armature_name) = mesh_object.armature_modifier_target() else {
            reports.warning(
                codes::SKINNED_MESH_UNBOUND,
                format!("Mesh '{mesh_name}' has no armature to bind its skin to"),
            );
            continue;
        };
        let Some(skel_path) = armature_export_map.get(armature_name) else {
            reports.warning(
                codes::SKINNED_MESH_UNBOUND,
                format!("Armature '{armature_name}' of mesh '{mesh_name}' was not exported"),
            );
            continue;
        };
        if stage.skeleton(skel_path).is_none() {
            log_warn!("{skel_path} is not a skeleton, can't bind {mesh_path}");
            continue;
        }
        if stage.prim(mesh_path).is_none() {
            log_warn!("no prim at {mesh_path} for skinned mesh '{mesh_name}'");
            continue;
        }

        add_skinned_mesh_bindings(stage, skel_path, mesh_path, xf_cache);
    }
}

/// Moves per-mesh blend shape weights onto skeleton animations.
///
/// Meshes bound to a skeleton have their weights merged into that
/// skeleton's animation; meshes without one get a skeleton of their own.
/// The scratch weights primvar is removed from every processed mesh.
pub fn shape_key_export_chaser(stage: &mut Stage, shape_key_mesh_export_map: &ExportMap) {
    let mut skel_to_meshes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut processed: Vec<&str> = Vec::new();

    for (mesh_name, mesh_path) in shape_key_mesh_export_map {
        let Some(prim) = stage.prim(mesh_path) else {
            log_warn!("no prim at {mesh_path} for shape key mesh '{mesh_name}'");
            continue;
        };
        processed.push(mesh_path);

        match prim.binding.skeleton.clone() {
            Some(skel_path) if stage.skeleton(&skel_path).is_some() => {
                skel_to_meshes
                    .entry(skel_path)
                    .or_default()
                    .push(mesh_path.clone());
            }
            _ => {
                if ensure_blend_shape_skeleton(stage, mesh_path).is_none() {
                    log_debug!("mesh {mesh_path} has no blend shape weights to carry");
                }
            }
        }
    }

    for (skel_path, mesh_paths) in &skel_to_meshes {
        remap_blend_shape_anim(stage, skel_path, mesh_paths);
    }

    for mesh_path in processed {
        stage.remove_primvar(mesh_path, TEMP_BLEND_SHAPE_WEIGHTS_PRIMVAR);
    }
}

/// Runs the skinned mesh and shape key chasers with one transform cache.
pub fn skel_export_chaser(
    stage: &mut Stage,
    armature_export_map: &ExportMap,
    skinned_mesh_export_map: &ExportMap,
    shape_key_mesh_export_map: &ExportMap,
    scene: &Scene,
    reports: &mut ReportList,
) {
    let mut xf_cache = XformCache::new();
    skinned_mesh_export_chaser(
        stage,
        armature_export_map,
        skinned_mesh_export_map,
        &mut xf_cache,
        scene,
        reports,
    );
    shape_key_export_chaser(stage, shape_key_mesh_export_map);
}
