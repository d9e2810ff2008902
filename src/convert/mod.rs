//! Skeleton, skin weight and blend shape conversion between a [`Stage`] and a
//! [`Scene`].

mod blend_shape;
mod curves;
mod export;
mod skeleton;
mod skinning;
mod types;

use std::collections::HashMap;

use crate::log_info;
use crate::logging::ReportList;
use crate::scene::{ArmatureObject, Mesh, MeshObject, Scene};
use crate::stage::{MeshPrim, PrimKind, Stage, XformCache, leaf_name, make_safe_name};

// Re-export the conversion entry points and their outcome types.
pub use blend_shape::{
    ensure_blend_shape_skeleton, export_shape_keys, import_blendshapes, remap_blend_shape_anim,
    shape_key_data_path,
};
pub use curves::{import_skeleton_curves, pose_bone_data_path};
pub use export::{
    ExportMap, add_skinned_mesh_bindings, export_skeleton, export_skeleton_animation,
    joint_tokens, shape_key_export_chaser, skel_export_chaser, skinned_mesh_export_chaser,
};
pub use skeleton::{import_skeleton, resolve_local_bind_transforms};
pub use skinning::{
    export_deform_verts, import_mesh_skel_bindings, normalize_weights, write_deform_verts,
};
pub use types::{
    ArmatureSummary, BlendShapeImport, ChannelCurves, ConversionOptions,
    DEFAULT_BONE_LENGTH_EPSILON, DEFAULT_WEIGHT_EPSILON, ExportOptions, ImportOptions,
    ImportSummary, JointToBoneMap, MeshSummary, SkeletonImport, SkinImport, SkinWeights, codes,
    load_options, save_options,
};

// ─── Public API ───────────────────────────────────────────────────────────────

/// Imports every skeleton and mesh prim of `stage` into a new scene.
///
/// Skeletons become armature objects, built before any mesh so that skinned
/// meshes can target them. A skeleton whose import fails is left out of the
/// scene. Meshes receive deform groups and shape keys per `options`.
pub fn import_stage(
    stage: &Stage,
    options: &ImportOptions,
    reports: &mut ReportList,
) -> (Scene, ImportSummary) {
    let mut scene = Scene::new();
    let mut xf_cache = XformCache::new();
    let mut armature_for_skeleton: HashMap<String, String> = HashMap::new();
    let mut armature_summaries = Vec::new();
    let mut mesh_summaries = Vec::new();

    for skel_path in stage.skeleton_paths() {
        let name = unique_object_name(&skel_path, |candidate| {
            scene.armature(candidate).is_some()
        });
        let mut object = ArmatureObject::new(&name);
        object.world = xf_cache.local_to_world(stage, &skel_path);

        let Some(imported) = import_skeleton(&mut object, stage, &skel_path, options, reports)
        else {
            continue;
        };

        armature_summaries.push(ArmatureSummary {
            name: name.clone(),
            skeleton_path: skel_path.clone(),
            bone_count: object.armature.len(),
            curve_count: imported
                .curves
                .as_ref()
                .map(ChannelCurves::curve_count)
                .unwrap_or(0),
            valid_for_animation: imported.valid_for_animation,
        });
        armature_for_skeleton.insert(skel_path, name);
        scene.armatures.push(object);
    }

    for mesh_path in stage.mesh_paths() {
        let Some(mesh_prim) = stage.mesh(&mesh_path) else {
            continue;
        };
        let name = unique_object_name(&mesh_path, |candidate| scene.mesh(candidate).is_some());
        let mut object = MeshObject::new(&name, Mesh::new(mesh_prim.points.clone()));
        object.world = xf_cache.local_to_world(stage, &mesh_path);

        if options.import_skins
            && import_mesh_skel_bindings(&mut object, stage, &mesh_path, options, reports)
                .is_some()
            && let Some(armature) = stage
                .inherited_skeleton(&mesh_path)
                .and_then(|skel_path| armature_for_skeleton.get(&skel_path))
        {
            object.set_armature_modifier_target(armature);
        }

        if options.import_blendshapes {
            import_blendshapes(
                &mut object,
                stage,
                &mesh_path,
                options.import_blendshape_anim,
                reports,
            );
        }

        mesh_summaries.push(summarize_mesh(&object, &mesh_path));
        scene.meshes.push(object);
    }

    log_info!(
        "imported {} armatures and {} meshes",
        scene.armatures.len(),
        scene.meshes.len()
    );

    let summary = ImportSummary {
        armatures: armature_summaries,
        meshes: mesh_summaries,
        reports: reports.entries().to_vec(),
    };
    (scene, summary)
}

/// Writes `scene` into a new stage.
///
/// Armatures become skeleton prims (with an animation when their action is
/// keyed) and meshes become mesh prims carrying joint influences and blend
/// shapes per `options`. The skeleton export chaser then binds skinned
/// meshes and moves blend shape weights onto skeleton animations.
pub fn export_scene(scene: &Scene, options: &ExportOptions, reports: &mut ReportList) -> Stage {
    let mut stage = Stage::new();
    let mut armature_export_map = ExportMap::new();
    let mut skinned_mesh_export_map = ExportMap::new();
    let mut shape_key_mesh_export_map = ExportMap::new();

    for object in &scene.armatures {
        let skel_path = stage.unique_child_path("/", &make_safe_name(&object.name));
        export_skeleton(object, &mut stage, &skel_path);
        export_skeleton_animation(object, &mut stage, &skel_path);
        armature_export_map.insert(object.name.clone(), skel_path);
    }

    for object in &scene.meshes {
        let mesh_path = stage.unique_child_path("/", &make_safe_name(&object.name));
        let prim = stage.define(
            &mesh_path,
            PrimKind::Mesh(MeshPrim {
                points: object.mesh.positions().to_vec(),
                ..MeshPrim::default()
            }),
        );
        prim.local_transform = object.world;

        if options.export_skins
            && let Some(armature) = object
                .armature_modifier_target()
                .and_then(|name| scene.armature(name))
        {
            let bone_names: Vec<String> = armature
                .armature
                .bones()
                .iter()
                .map(|bone| bone.name.clone())
                .collect();
            if let Some(weights) =
                export_deform_verts(&object.mesh, &bone_names, options.normalize_weights)
                && write_deform_verts(&mut stage, &mesh_path, weights)
            {
                skinned_mesh_export_map.insert(object.name.clone(), mesh_path.clone());
            }
        }

        if options.export_blendshapes && export_shape_keys(object, &mut stage, &mesh_path) > 0 {
            shape_key_mesh_export_map.insert(object.name.clone(), mesh_path.clone());
        }
    }

    skel_export_chaser(
        &mut stage,
        &armature_export_map,
        &skinned_mesh_export_map,
        &shape_key_mesh_export_map,
        scene,
        reports,
    );
    stage
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Object name from a prim path, suffixed while `taken` reports a clash.
fn unique_object_name(prim_path: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = match leaf_name(prim_path) {
        "" => "Object",
        leaf => leaf,
    };
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|suffix| format!("{base}.{suffix:03}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn summarize_mesh(object: &MeshObject, mesh_path: &str) -> MeshSummary {
    let shape_key = object.mesh.shape_key();
    MeshSummary {
        name: object.name.clone(),
        mesh_path: mesh_path.to_string(),
        vertex_count: object.mesh.vertex_count(),
        deform_group_count: object.mesh.vertex_groups().len(),
        armature: object.armature_modifier_target().map(str::to_string),
        shape_key_count: object.mesh.shape_keys().len(),
        shape_key_block_count: shape_key.map(|key| key.blocks().len()).unwrap_or(0),
        shape_key_curve_count: shape_key
            .and_then(|key| key.action.as_ref())
            .map(|action| action.curves().len())
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{Matrix4, Translation3, UnitQuaternion, Vector3};

    use super::*;
    use crate::scene::KeyKind;
    use crate::stage::{Interpolation, Primvar, SkelAnimation, Skeleton, TimeSamples};

    fn rig_stage() -> Stage {
        let mut stage = Stage::new();
        stage.define("/Rig", PrimKind::Xform).binding.skeleton = Some("/Rig/Skel".to_string());
        let skel = stage.define(
            "/Rig/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: vec!["Hips".into(), "Hips/Spine".into()],
                bind_transforms: vec![
                    Matrix4::identity(),
                    Translation3::new(0.0, 1.0, 0.0).to_homogeneous(),
                ],
                rest_transforms: vec![
                    Matrix4::identity(),
                    Translation3::new(0.0, 1.0, 0.0).to_homogeneous(),
                ],
                parents: None,
            }),
        );
        skel.binding.animation_source = Some("/Rig/Skel/Anim".to_string());

        let mut rotations = TimeSamples::new();
        rotations.insert(0.0, vec![UnitQuaternion::identity()]);
        rotations.insert(
            10.0,
            vec![UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4)],
        );
        stage.define(
            "/Rig/Skel/Anim",
            PrimKind::Animation(SkelAnimation {
                joints: vec!["Hips/Spine".into()],
                translations: TimeSamples::with_default(vec![Vector3::new(0.0, 1.0, 0.0)]),
                rotations,
                ..SkelAnimation::default()
            }),
        );

        let body = stage.define(
            "/Rig/Body",
            PrimKind::Mesh(MeshPrim {
                points: vec![Vector3::zeros(), Vector3::new(0.0, 2.0, 0.0)],
                ..MeshPrim::default()
            }),
        );
        body.binding.joint_indices =
            Some(Primvar::new(vec![0, 1], 1, Interpolation::Vertex));
        body.binding.joint_weights =
            Some(Primvar::new(vec![1.0, 1.0], 1, Interpolation::Vertex));
        stage
    }

    #[test]
    fn given_rigged_stage_when_importing_then_scene_and_summary_match() {
        let stage = rig_stage();
        let mut reports = ReportList::new();

        let (scene, summary) = import_stage(&stage, &ImportOptions::default(), &mut reports);

        assert_eq!(scene.armatures.len(), 1);
        assert_eq!(summary.armatures[0].name, "Skel");
        assert_eq!(summary.armatures[0].bone_count, 2);
        assert_eq!(summary.armatures[0].curve_count, 20);
        let body = scene.mesh("Body").expect("body mesh");
        assert_eq!(body.armature_modifier_target(), Some("Skel"));
        assert_eq!(summary.meshes[0].deform_group_count, 2);
        assert!(summary.reports.is_empty());
    }

    #[test]
    fn given_imported_scene_when_exporting_then_skin_and_animation_round_trip() {
        let stage = rig_stage();
        let mut reports = ReportList::new();
        let (scene, _) = import_stage(&stage, &ImportOptions::default(), &mut reports);

        let exported = export_scene(&scene, &ExportOptions::default(), &mut reports);

        let body = exported.prim("/Body").expect("exported body");
        assert_eq!(body.binding.skeleton.as_deref(), Some("/Skel"));
        let weights = body.binding.joint_weights.as_ref().expect("weights");
        assert_eq!(weights.values, vec![1.0, 1.0]);

        let original = stage.skeleton_query("/Rig/Skel").expect("original query");
        let round_trip = exported.skeleton_query("/Skel").expect("exported query");
        for frame in [0.0, 5.0, 10.0] {
            let expected = original.compute_joint_local_transforms(frame).expect("locals");
            let actual = round_trip.compute_joint_local_transforms(frame).expect("locals");
            for (a, b) in expected.iter().zip(&actual) {
                assert!((a - b).norm() < 1e-4, "frame {frame}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn given_unskinned_shape_key_mesh_when_round_tripping_then_reimport_is_quiet() {
        let points = vec![
            Vector3::zeros(),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let mut object = MeshObject::new("Blob", Mesh::new(points.clone()));
        let key = object.mesh.add_shape_key(KeyKind::Relative);
        key.add_block("Basis", &points);
        let squash = key.add_block("Squash", &points);
        key.block_mut(squash).positions[2].y = 0.5;
        key.block_mut(squash).value = 1.0;
        let mut scene = Scene::new();
        scene.meshes.push(object);
        let mut reports = ReportList::new();

        let exported = export_scene(&scene, &ExportOptions::default(), &mut reports);
        let mut reimport_reports = ReportList::new();
        let (reimported, summary) =
            import_stage(&exported, &ImportOptions::default(), &mut reimport_reports);

        assert!(reports.is_empty());
        assert_eq!(
            exported.prim("/Blob").and_then(|prim| prim.binding.skeleton.as_deref()),
            Some("/Skel")
        );
        assert!(reimport_reports.is_empty(), "{:?}", reimport_reports.entries());
        assert!(summary.reports.is_empty());
        let blob = reimported.mesh("Blob").expect("reimported mesh");
        assert!(blob.mesh.vertex_groups().is_empty());
        let key = blob.mesh.shape_key().expect("shape key");
        assert!(key.find_block("Squash").is_some());
    }
}
