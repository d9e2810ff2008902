use crate::logging::ReportList;
use crate::scene::{Mesh, MeshObject, WeightMode};
use crate::stage::{Interpolation, Primvar, Stage, leaf_name};
use crate::{log_debug, log_warn};

use super::types::{ImportOptions, SkinImport, SkinWeights, codes};

// ─── Import ───────────────────────────────────────────────────────────────────

/// Transfers the joint influences of the mesh prim at `prim_path` into deform
/// groups on `mesh_object`.
///
/// One group is created per joint referenced by at least one influence,
/// named after the joint's leaf token. A group that already exists under
/// that name is reused, so joints sharing a leaf token share a group.
/// Influences below `options.weight_epsilon` are dropped; an influence
/// touching a vertex/group pair twice replaces it.
///
/// Returns `None` without changes when the prim has no skeleton binding or
/// no influences, and reports a warning when the influence data is malformed.
pub fn import_mesh_skel_bindings(
    mesh_object: &mut MeshObject,
    stage: &Stage,
    prim_path: &str,
    options: &ImportOptions,
    reports: &mut ReportList,
) -> Option<SkinImport> {
    let prim = stage.prim(prim_path)?;
    let skel_path = stage.inherited_skeleton(prim_path)?;
    let skeleton = stage.skeleton(&skel_path)?;

    let joints = match &prim.binding.joints {
        Some(joints) if !joints.is_empty() => joints,
        _ => &skeleton.joints,
    };
    if joints.is_empty() {
        log_debug!("no joints bound to {prim_path}");
        return None;
    }

    let (joint_indices, joint_weights) =
        match (&prim.binding.joint_indices, &prim.binding.joint_weights) {
            (Some(joint_indices), Some(joint_weights)) => (joint_indices, joint_weights),
            (None, None) => {
                log_debug!("mesh {prim_path} is bound to {skel_path} without joint influences");
                return None;
            }
            _ => {
                reports.warning(
                    codes::SKIN_PRIMVARS_MISSING,
                    format!(
                        "Mesh {prim_path} is bound to {skel_path} but lacks joint indices or weights"
                    ),
                );
                return None;
            }
        };

    if joint_indices.element_size != joint_weights.element_size {
        reports.warning(
            codes::SKIN_ELEMENT_SIZE_MISMATCH,
            format!(
                "Joint weights and joint indices element size mismatch for mesh {prim_path} ({} vs {})",
                joint_weights.element_size, joint_indices.element_size
            ),
        );
        return None;
    }

    let (Some(indices), Some(weights)) = (
        joint_indices.compute_flattened(),
        joint_weights.compute_flattened(),
    ) else {
        reports.warning(
            codes::SKIN_PRIMVAR_INVALID,
            format!("Couldn't flatten joint influence primvars of mesh {prim_path}"),
        );
        return None;
    };

    if indices.is_empty() || weights.is_empty() {
        return None;
    }

    if indices.len() != weights.len() {
        reports.warning(
            codes::SKIN_COUNT_MISMATCH,
            format!(
                "Joint weights and joint indices size mismatch for mesh {prim_path} ({} vs {})",
                weights.len(),
                indices.len()
            ),
        );
        return None;
    }

    let element_size = joint_weights.element_size.max(1);
    let vertex_count = mesh_object.mesh.vertex_count();
    let expected = match joint_weights.interpolation {
        Interpolation::Vertex => vertex_count * element_size,
        Interpolation::Constant => element_size,
        other => {
            reports.warning(
                codes::SKIN_INTERPOLATION_UNSUPPORTED,
                format!(
                    "Unexpected joint weights interpolation '{}' for mesh {prim_path}",
                    other.as_str()
                ),
            );
            return None;
        }
    };
    if weights.len() != expected {
        reports.warning(
            codes::SKIN_COUNT_MISMATCH,
            format!(
                "Joint weights of mesh {prim_path} have {} values, expected {expected} for '{}' interpolation",
                weights.len(),
                joint_weights.interpolation.as_str()
            ),
        );
        return None;
    }

    let mut used_joints: Vec<usize> = Vec::new();
    for &index in &indices {
        match usize::try_from(index) {
            Ok(joint) if joint < joints.len() => {
                if !used_joints.contains(&joint) {
                    used_joints.push(joint);
                }
            }
            _ => log_warn!("out of bound joint index {index} in mesh {prim_path}"),
        }
    }
    if used_joints.is_empty() {
        return None;
    }

    mesh_object.ensure_armature_modifier();

    let mesh = &mut mesh_object.mesh;
    let mut joint_groups: Vec<Option<usize>> = vec![None; joints.len()];
    let mut groups_created = 0;
    for &joint in &used_joints {
        let name = leaf_name(&joints[joint]);
        joint_groups[joint] = Some(match mesh.find_vertex_group(name) {
            Some(existing) => existing,
            None => {
                groups_created += 1;
                mesh.add_vertex_group(name)
            }
        });
    }

    let weights_assigned = assign_weights(
        mesh,
        &indices,
        &weights,
        element_size,
        joint_weights.interpolation == Interpolation::Constant,
        &joint_groups,
        options.weight_epsilon,
    );

    Some(SkinImport {
        groups_created,
        weights_assigned,
    })
}

fn assign_weights(
    mesh: &mut Mesh,
    indices: &[i32],
    weights: &[f32],
    element_size: usize,
    constant: bool,
    joint_groups: &[Option<usize>],
    epsilon: f32,
) -> usize {
    let mut assigned = 0;
    for vertex in 0..mesh.vertex_count() {
        let offset = if constant { 0 } else { vertex * element_size };
        for slot in offset..offset + element_size {
            let weight = weights[slot];
            if weight < epsilon {
                continue;
            }
            let Some(group) = usize::try_from(indices[slot])
                .ok()
                .and_then(|joint| joint_groups.get(joint).copied().flatten())
            else {
                continue;
            };
            if mesh.add_vertex_weight(vertex, group, weight, WeightMode::Replace) {
                assigned += 1;
            }
        }
    }
    assigned
}

// ─── Export ───────────────────────────────────────────────────────────────────

/// Converts deform groups into dense per-vertex joint indices and weights.
///
/// `bone_names` is the skeleton's joint order; a group maps to the position
/// of the bone sharing its name. Influences of unmapped groups are skipped.
/// The element size is the largest influence count of any vertex.
///
/// Returns `None` when the mesh has no deform groups.
pub fn export_deform_verts(
    mesh: &Mesh,
    bone_names: &[String],
    normalize: bool,
) -> Option<SkinWeights> {
    if mesh.vertex_groups().is_empty() {
        return None;
    }

    let group_joint: Vec<Option<i32>> = mesh
        .vertex_groups()
        .iter()
        .map(|group| {
            bone_names
                .iter()
                .position(|bone| *bone == group.name)
                .map(|joint| joint as i32)
        })
        .collect();

    let element_size = mesh
        .deform_verts()
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(1);

    let slot_count = mesh.vertex_count() * element_size;
    let mut joint_indices = vec![0i32; slot_count];
    let mut joint_weights = vec![0.0f32; slot_count];

    let vertex_count = mesh.vertex_count();
    for (vertex, entries) in mesh.deform_verts().iter().take(vertex_count).enumerate() {
        let offset = vertex * element_size;
        for (slot, entry) in entries.iter().take(element_size).enumerate() {
            let Some(joint) = group_joint.get(entry.group).copied().flatten() else {
                continue;
            };
            joint_indices[offset + slot] = joint;
            joint_weights[offset + slot] = entry.weight;
        }
    }

    if normalize {
        normalize_weights(&mut joint_weights, element_size);
    }

    Some(SkinWeights {
        joint_indices,
        joint_weights,
        element_size,
    })
}

/// Rescales each run of `element_size` weights to sum to one.
/// Runs whose sum is zero are left untouched.
pub fn normalize_weights(weights: &mut [f32], element_size: usize) {
    for influences in weights.chunks_mut(element_size.max(1)) {
        let sum: f32 = influences.iter().sum();
        if sum > f32::EPSILON {
            influences.iter_mut().for_each(|weight| *weight /= sum);
        }
    }
}

/// Authors `weights` as vertex-interpolated influence primvars on the prim at
/// `mesh_path`. Returns `false` when the prim does not exist.
pub fn write_deform_verts(stage: &mut Stage, mesh_path: &str, weights: SkinWeights) -> bool {
    let Some(prim) = stage.prim_mut(mesh_path) else {
        log_warn!("can't write joint influences, no prim at {mesh_path}");
        return false;
    };

    prim.binding.joint_indices = Some(Primvar::new(
        weights.joint_indices,
        weights.element_size,
        Interpolation::Vertex,
    ));
    prim.binding.joint_weights = Some(Primvar::new(
        weights.joint_weights,
        weights.element_size,
        Interpolation::Vertex,
    ));
    true
}

#[cfg(test)]
mod tests {
    use nalgebra::{Matrix4, Vector3};

    use super::*;
    use crate::stage::{MeshPrim, PrimKind, Skeleton};

    fn quad_positions() -> Vec<Vector3<f32>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ]
    }

    fn skinned_stage(indices: Primvar<i32>, weights: Primvar<f32>) -> Stage {
        rigged_stage(&["Hips", "Hips/Spine"], Some(indices), Some(weights))
    }

    fn rigged_stage(
        joints: &[&str],
        indices: Option<Primvar<i32>>,
        weights: Option<Primvar<f32>>,
    ) -> Stage {
        let mut stage = Stage::new();
        stage.define(
            "/Rig/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: joints.iter().map(|joint| joint.to_string()).collect(),
                bind_transforms: vec![Matrix4::identity(); joints.len()],
                rest_transforms: vec![Matrix4::identity(); joints.len()],
                parents: None,
            }),
        );
        let body = stage.define(
            "/Rig/Body",
            PrimKind::Mesh(MeshPrim {
                points: quad_positions(),
                ..MeshPrim::default()
            }),
        );
        body.binding.skeleton = Some("/Rig/Skel".to_string());
        body.binding.joint_indices = indices;
        body.binding.joint_weights = weights;
        stage
    }

    fn import_body(
        stage: &Stage,
        object: &mut MeshObject,
        reports: &mut ReportList,
    ) -> Option<SkinImport> {
        import_mesh_skel_bindings(
            object,
            stage,
            "/Rig/Body",
            &ImportOptions::default(),
            reports,
        )
    }

    fn body_object() -> MeshObject {
        MeshObject::new("Body", Mesh::new(quad_positions()))
    }

    #[test]
    fn given_vertex_influences_when_importing_then_groups_receive_weights() {
        let stage = skinned_stage(
            Primvar::new(vec![0, 1, 0, 1, 0, 1, 0, 1], 2, Interpolation::Vertex),
            Primvar::new(
                vec![1.0, 0.0, 0.5, 0.5, 0.3, 0.7, 0.0, 1.0],
                2,
                Interpolation::Vertex,
            ),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        let hips = object.mesh.find_vertex_group("Hips").expect("Hips group");
        let spine = object.mesh.find_vertex_group("Spine").expect("Spine group");
        assert_eq!(imported.groups_created, 2);
        assert_eq!(imported.weights_assigned, 6);
        assert_eq!(object.mesh.vertex_weight(0, hips), Some(1.0));
        assert_eq!(object.mesh.vertex_weight(0, spine), None);
        assert_eq!(object.mesh.vertex_weight(2, spine), Some(0.7));
        assert!(!object.ensure_armature_modifier());
        assert!(reports.is_empty());
    }

    #[test]
    fn given_constant_influences_when_importing_then_every_vertex_shares_them() {
        let stage = skinned_stage(
            Primvar::new(vec![1], 1, Interpolation::Constant),
            Primvar::new(vec![1.0], 1, Interpolation::Constant),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        let spine = object.mesh.find_vertex_group("Spine").expect("Spine group");
        assert!(object.mesh.find_vertex_group("Hips").is_none());
        assert!((0..4).all(|vertex| object.mesh.vertex_weight(vertex, spine) == Some(1.0)));
    }

    #[test]
    fn given_element_size_mismatch_when_importing_then_warning_aborts() {
        let stage = skinned_stage(
            Primvar::new(vec![0; 8], 2, Interpolation::Vertex),
            Primvar::new(vec![0.25; 4], 1, Interpolation::Vertex),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        );

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_ELEMENT_SIZE_MISMATCH));
        assert!(object.mesh.vertex_groups().is_empty());
    }

    #[test]
    fn given_bound_mesh_without_influences_when_importing_then_it_is_skipped_quietly() {
        let stage = rigged_stage(&["Hips"], None, None);
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_body(&stage, &mut object, &mut reports);

        assert!(imported.is_none());
        assert!(reports.is_empty());
        assert!(object.modifiers.is_empty());
    }

    #[test]
    fn given_only_joint_indices_when_importing_then_missing_weights_are_reported() {
        let stage = rigged_stage(
            &["Hips"],
            Some(Primvar::new(vec![0], 1, Interpolation::Constant)),
            None,
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_body(&stage, &mut object, &mut reports);

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_PRIMVARS_MISSING));
    }

    #[test]
    fn given_index_and_weight_lengths_differ_when_importing_then_count_mismatch_is_reported() {
        let stage = skinned_stage(
            Primvar::new(vec![0; 8], 2, Interpolation::Vertex),
            Primvar::new(vec![0.5; 6], 2, Interpolation::Vertex),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_body(&stage, &mut object, &mut reports);

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_COUNT_MISMATCH));
        assert!(object.mesh.vertex_groups().is_empty());
    }

    #[test]
    fn given_vertex_influences_for_too_few_vertices_when_importing_then_count_mismatch_is_reported()
    {
        let stage = skinned_stage(
            Primvar::new(vec![0, 1, 0, 1, 0, 1], 2, Interpolation::Vertex),
            Primvar::new(vec![0.5; 6], 2, Interpolation::Vertex),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_body(&stage, &mut object, &mut reports);

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_COUNT_MISMATCH));
    }

    #[test]
    fn given_constant_influences_with_extra_values_when_importing_then_count_mismatch_is_reported()
    {
        let stage = skinned_stage(
            Primvar::new(vec![0, 1], 1, Interpolation::Constant),
            Primvar::new(vec![1.0, 1.0], 1, Interpolation::Constant),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_body(&stage, &mut object, &mut reports);

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_COUNT_MISMATCH));
    }

    #[test]
    fn given_joints_sharing_leaf_name_when_importing_then_they_share_one_group() {
        let stage = rigged_stage(
            &["L/Hand", "R/Hand"],
            Some(Primvar::new(vec![0, 1], 2, Interpolation::Constant)),
            Some(Primvar::new(vec![0.4, 0.6], 2, Interpolation::Constant)),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported =
            import_body(&stage, &mut object, &mut reports).expect("import should succeed");

        let hand = object.mesh.find_vertex_group("Hand").expect("Hand group");
        assert_eq!(imported.groups_created, 1);
        assert_eq!(object.mesh.vertex_groups().len(), 1);
        assert_eq!(imported.weights_assigned, 8);
        assert!((0..4).all(|vertex| object.mesh.vertex_weight(vertex, hand) == Some(0.6)));
        assert!(reports.is_empty());
    }

    #[test]
    fn given_face_varying_influences_when_importing_then_interpolation_is_rejected() {
        let stage = skinned_stage(
            Primvar::new(vec![0; 4], 1, Interpolation::FaceVarying),
            Primvar::new(vec![1.0; 4], 1, Interpolation::FaceVarying),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        );

        assert!(imported.is_none());
        assert!(reports.has_code(codes::SKIN_INTERPOLATION_UNSUPPORTED));
    }

    #[test]
    fn given_out_of_range_and_tiny_influences_when_importing_then_they_are_skipped() {
        let stage = skinned_stage(
            Primvar::new(vec![0, 5, 0, 1, 0, 1, 0, 1], 2, Interpolation::Vertex),
            Primvar::new(
                vec![1.0, 0.9, 1.0, 1e-7, 1.0, 0.0, 1.0, 0.0],
                2,
                Interpolation::Vertex,
            ),
        );
        let mut object = body_object();
        let mut reports = ReportList::new();

        let imported = import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        let spine = object.mesh.find_vertex_group("Spine").expect("Spine group");
        assert_eq!(imported.weights_assigned, 4);
        assert_eq!(object.mesh.vertex_weight(1, spine), None);
    }

    #[test]
    fn given_existing_group_when_importing_then_it_is_reused() {
        let stage = skinned_stage(
            Primvar::new(vec![0], 1, Interpolation::Constant),
            Primvar::new(vec![0.5], 1, Interpolation::Constant),
        );
        let mut object = body_object();
        let existing = object.mesh.add_vertex_group("Hips");
        let mut reports = ReportList::new();

        let imported = import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        assert_eq!(imported.groups_created, 0);
        assert_eq!(object.mesh.vertex_groups().len(), 1);
        assert_eq!(object.mesh.vertex_weight(3, existing), Some(0.5));
    }

    #[test]
    fn given_deform_groups_when_exporting_then_arrays_are_dense_and_normalized() {
        let mut mesh = Mesh::new(quad_positions());
        let a = mesh.add_vertex_group("A");
        let b = mesh.add_vertex_group("B");
        let stray = mesh.add_vertex_group("NotABone");
        mesh.add_vertex_weight(0, a, 2.0, WeightMode::Replace);
        mesh.add_vertex_weight(2, a, 0.3, WeightMode::Replace);
        mesh.add_vertex_weight(2, b, 0.7, WeightMode::Replace);
        mesh.add_vertex_weight(3, stray, 1.0, WeightMode::Replace);

        let bones = vec!["A".to_string(), "B".to_string()];
        let exported = export_deform_verts(&mesh, &bones, true).expect("groups exist");

        assert_eq!(exported.element_size, 2);
        assert_eq!(exported.joint_indices, vec![0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(exported.joint_weights[0..2], [1.0, 0.0]);
        assert!((exported.joint_weights[4] - 0.3).abs() < 1e-6);
        assert!((exported.joint_weights[5] - 0.7).abs() < 1e-6);
        assert_eq!(exported.joint_weights[6..8], [0.0, 0.0]);
    }

    #[test]
    fn given_shrunk_mesh_when_exporting_then_arrays_follow_the_vertex_count() {
        let mut mesh = Mesh::new(quad_positions());
        let a = mesh.add_vertex_group("A");
        mesh.add_vertex_weight(0, a, 1.0, WeightMode::Replace);
        mesh.add_vertex_weight(3, a, 1.0, WeightMode::Replace);
        mesh.set_positions(quad_positions()[..2].to_vec());

        let exported =
            export_deform_verts(&mesh, &["A".to_string()], false).expect("groups exist");

        assert_eq!(exported.element_size, 1);
        assert_eq!(exported.joint_indices, vec![0, 0]);
        assert_eq!(exported.joint_weights, vec![1.0, 0.0]);
    }

    #[test]
    fn given_exported_weights_when_reimporting_then_ratios_are_preserved() {
        let mut source = Mesh::new(quad_positions());
        let hips = source.add_vertex_group("Hips");
        let spine = source.add_vertex_group("Spine");
        source.add_vertex_weight(0, hips, 0.8, WeightMode::Replace);
        source.add_vertex_weight(1, hips, 0.2, WeightMode::Replace);
        source.add_vertex_weight(1, spine, 0.6, WeightMode::Replace);
        source.add_vertex_weight(2, hips, 0.3, WeightMode::Replace);
        source.add_vertex_weight(2, spine, 0.7, WeightMode::Replace);
        source.add_vertex_weight(3, spine, 0.4, WeightMode::Replace);

        let bones = vec!["Hips".to_string(), "Spine".to_string()];
        let exported = export_deform_verts(&source, &bones, true).expect("groups exist");
        let mut stage = skinned_stage(
            Primvar::new(Vec::new(), 1, Interpolation::Vertex),
            Primvar::new(Vec::new(), 1, Interpolation::Vertex),
        );
        assert!(write_deform_verts(&mut stage, "/Rig/Body", exported));

        let mut object = body_object();
        let mut reports = ReportList::new();
        import_mesh_skel_bindings(
            &mut object,
            &stage,
            "/Rig/Body",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("reimport should succeed");

        let hips = object.mesh.find_vertex_group("Hips").expect("Hips");
        let spine = object.mesh.find_vertex_group("Spine").expect("Spine");
        let weight = |vertex, group| object.mesh.vertex_weight(vertex, group).unwrap_or(0.0);

        assert!((weight(0, hips) - 1.0).abs() < 1e-6);
        assert!((weight(1, hips) / weight(1, spine) - 0.2 / 0.6).abs() < 1e-5);
        assert!((weight(2, hips) - 0.3).abs() < 1e-6);
        assert!((weight(2, spine) - 0.7).abs() < 1e-6);
        assert!((weight(2, hips) + weight(2, spine) - 1.0).abs() < 1e-6);
        assert!((weight(3, spine) - 1.0).abs() < 1e-6);
    }
}
