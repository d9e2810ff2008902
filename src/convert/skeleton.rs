use nalgebra::{Matrix4, Vector3};

use crate::logging::ReportList;
use crate::scene::{Armature, ArmatureObject, BoneId};
use crate::stage::{Stage, Topology, leaf_name};
use crate::transform::{has_negative_determinant, max_magnitude_component, parent_relative};
use crate::{log_debug, log_warn};

use super::curves::import_skeleton_curves;
use super::types::{ImportOptions, JointToBoneMap, SkeletonImport, codes};

// ─── Bind pose ────────────────────────────────────────────────────────────────

/// Derives joint-local bind transforms from world bind transforms.
///
/// Parents are looked up by index, so they may appear after their children.
/// A joint whose parent bind matrix is singular or whose parent index is out
/// of range keeps its world transform.
///
/// # Arguments
///
/// * `world_bind` - One world-space bind matrix per joint.
/// * `topology` - Parent indices, same length as `world_bind`.
///
/// # Returns
///
/// One local bind matrix per joint such that
/// `world_bind[parent] * local[i] == world_bind[i]`.
pub fn resolve_local_bind_transforms(
    world_bind: &[Matrix4<f64>],
    topology: &Topology,
) -> Vec<Matrix4<f64>> {
    world_bind
        .iter()
        .enumerate()
        .map(|(joint, world)| {
            let Some(parent) = topology.parent(joint) else {
                if topology.parent_index(joint) >= 0 {
                    log_warn!(
                        "joint {joint} has out-of-range parent {}, treating it as a root",
                        topology.parent_index(joint)
                    );
                }
                return *world;
            };

            let Some(parent_world) = world_bind.get(parent) else {
                log_warn!("joint {joint} references parent {parent} without a bind transform");
                return *world;
            };

            parent_relative(parent_world, world).unwrap_or_else(|| {
                log_warn!("bind transform of joint {parent} is singular, joint {joint} stays in world space");
                *world
            })
        })
        .collect()
}

// ─── Structure builder ────────────────────────────────────────────────────────

/// Builds bones for the skeleton prim at `skel_path` inside `armature_object`.
///
/// Precondition failures are reported and return `None`. Bones created
/// before such a failure stay in the armature; discarding the object is up to
/// the caller. When `options.import_anim` is set and no bind matrix mirrors
/// its joint, pose curves are synthesized from the bound animation.
pub fn import_skeleton(
    armature_object: &mut ArmatureObject,
    stage: &Stage,
    skel_path: &str,
    options: &ImportOptions,
    reports: &mut ReportList,
) -> Option<SkeletonImport> {
    let query = match stage.skeleton_query(skel_path) {
        Ok(query) => query,
        Err(error) => {
            reports.warning(
                codes::SKELETON_QUERY_FAILED,
                format!("Couldn't query skeleton {skel_path}: {error}"),
            );
            return None;
        }
    };

    let joint_order = query.joint_order();
    let topology = query.topology();
    if joint_order.len() != topology.len() {
        reports.warning(
            codes::JOINT_COUNT_MISMATCH,
            format!(
                "Joint order size {} doesn't match topology size {} for skeleton {skel_path}",
                joint_order.len(),
                topology.len()
            ),
        );
        return None;
    }

    let armature = &mut armature_object.armature;
    let mut joint_to_bone = JointToBoneMap::new();
    let mut bones = Vec::with_capacity(joint_order.len());

    for joint in joint_order {
        let name = leaf_name(joint);
        match armature.add_bone(name) {
            Some(bone) => {
                joint_to_bone.insert(joint.clone(), armature.bone(bone).name.clone());
                bones.push(Some(bone));
            }
            None => {
                reports.warning(
                    codes::BONE_CREATION_FAILED,
                    format!("Couldn't add bone for joint '{joint}' of skeleton {skel_path}"),
                );
                bones.push(None);
            }
        }
    }

    let Some(bind_transforms) = query.world_bind_transforms() else {
        reports.warning(
            codes::BIND_TRANSFORMS_MISSING,
            format!("Couldn't get world bind transforms for skeleton {skel_path}"),
        );
        return None;
    };

    if bind_transforms.len() != bones.len() {
        reports.warning(
            codes::BIND_TRANSFORM_COUNT_MISMATCH,
            format!(
                "Bind transforms count {} doesn't match joint count {} for skeleton {skel_path}",
                bind_transforms.len(),
                bones.len()
            ),
        );
        return None;
    }

    let mut negative_determinant = false;
    for (bone, bind) in bones.iter().zip(bind_transforms) {
        let Some(bone) = bone else {
            continue;
        };
        armature.bone_mut(*bone).set_from_matrix(bind);
        negative_determinant |= has_negative_determinant(bind);
    }

    if negative_determinant {
        reports.warning(
            codes::NEGATIVE_DETERMINANT,
            format!(
                "Skeleton {skel_path} has a bind transform with a negative determinant, \
                 its animation will not be imported"
            ),
        );
    }

    let child_joints = link_parents(armature, &bones, topology, skel_path, reports);
    apply_length_heuristic(armature, &bones, &child_joints, options.bone_length_epsilon);

    let valid_for_animation = !negative_determinant;
    let curves = if options.import_anim && valid_for_animation {
        import_skeleton_curves(armature_object, &query, &joint_to_bone, reports)
    } else {
        None
    };

    Some(SkeletonImport {
        bones,
        joint_to_bone,
        valid_for_animation,
        curves,
    })
}

/// Sets bone parents from the topology and returns each joint's children.
fn link_parents(
    armature: &mut Armature,
    bones: &[Option<BoneId>],
    topology: &Topology,
    skel_path: &str,
    reports: &mut ReportList,
) -> Vec<Vec<usize>> {
    let mut child_joints = vec![Vec::new(); bones.len()];

    for (joint, bone) in bones.iter().enumerate() {
        let parent_index = topology.parent_index(joint);
        if parent_index < 0 {
            continue;
        }
        let Some(parent) = topology.parent(joint) else {
            reports.warning(
                codes::PARENT_OUT_OF_RANGE,
                format!(
                    "Joint {joint} of skeleton {skel_path} has out-of-range parent index {parent_index}"
                ),
            );
            continue;
        };

        child_joints[parent].push(joint);

        if let (Some(child_bone), Some(parent_bone)) = (bone, bones[parent])
            && !armature.set_parent(*child_bone, parent_bone)
        {
            log_warn!("refused to parent joint {joint} under {parent}: it would close a cycle");
        }
    }

    child_joints
}

/// Two-phase bone length heuristic.
///
/// Phase one rescales every bone with children to the distance from its head
/// to the mean head of its children. Phase two gives each leaf the mean of
/// the lengths applied in phase one. Both phases skip changes that are
/// negligible relative to the head's largest component.
///
/// # Returns
///
/// The mean applied length, or `None` when phase one changed nothing.
pub(super) fn apply_length_heuristic(
    armature: &mut Armature,
    bones: &[Option<BoneId>],
    child_joints: &[Vec<usize>],
    epsilon: f32,
) -> Option<f32> {
    let mut length_sum = 0.0f32;
    let mut applied = 0usize;

    for (joint, children) in child_joints.iter().enumerate() {
        let Some(bone) = bones[joint] else {
            continue;
        };

        let child_heads: Vec<Vector3<f32>> = children
            .iter()
            .filter_map(|&child| bones[child])
            .map(|child| armature.bone(child).head)
            .collect();
        if child_heads.is_empty() {
            continue;
        }

        let head = armature.bone(bone).head;
        let mean_head = child_heads.iter().sum::<Vector3<f32>>() / child_heads.len() as f32;
        let length = (mean_head - head).norm();

        if length > epsilon * max_magnitude_component(&head) {
            armature.bone_mut(bone).set_length(length);
            length_sum += length;
            applied += 1;
        }
    }

    if applied == 0 {
        log_debug!("no bone lengths derived from children; leaf bones keep their length");
        return None;
    }

    let mean_length = length_sum / applied as f32;
    for (joint, children) in child_joints.iter().enumerate() {
        if !children.is_empty() {
            continue;
        }
        let Some(bone) = bones[joint] else {
            continue;
        };
        let head = armature.bone(bone).head;
        if mean_length > epsilon * max_magnitude_component(&head) {
            armature.bone_mut(bone).set_length(mean_length);
        }
    }

    Some(mean_length)
}

#[cfg(test)]
mod tests {
    use nalgebra::{Translation3, UnitQuaternion};

    use super::*;
    use crate::stage::{PrimKind, Skeleton};

    fn translation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
        Translation3::new(x, y, z).to_homogeneous()
    }

    fn chain_stage(bind_transforms: Vec<Matrix4<f64>>) -> Stage {
        let mut stage = Stage::new();
        stage.define(
            "/Rig/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: vec!["Root".into(), "Root/Child".into(), "Root/Child/Grand".into()],
                rest_transforms: vec![Matrix4::identity(); bind_transforms.len()],
                bind_transforms,
                parents: None,
            }),
        );
        stage
    }

    #[test]
    fn given_three_joint_chain_when_resolving_then_locals_are_parent_relative() {
        let world = vec![
            Matrix4::identity(),
            translation(0.0, 1.0, 0.0),
            translation(0.0, 2.0, 0.0),
        ];
        let topology = Topology::new(vec![-1, 0, 1]);

        let local = resolve_local_bind_transforms(&world, &topology);

        assert!((local[0] - Matrix4::identity()).norm() < 1e-9);
        assert!((local[1] - translation(0.0, 1.0, 0.0)).norm() < 1e-9);
        assert!((local[2] - translation(0.0, 1.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn given_arbitrary_hierarchy_when_resolving_then_recomposition_reproduces_world() {
        let rotation = UnitQuaternion::from_euler_angles(0.3, -0.7, 1.1).to_homogeneous();
        let world = vec![
            translation(0.5, 0.0, 0.0) * rotation,
            translation(1.0, 2.0, 3.0) * Matrix4::new_scaling(2.0),
            rotation * translation(0.0, 4.0, 0.0),
            translation(-1.0, 0.0, 0.0),
        ];
        // Parent listed after its child.
        let topology = Topology::new(vec![-1, 2, 0, 1]);

        let local = resolve_local_bind_transforms(&world, &topology);

        assert!((local[0] - world[0]).norm() < 1e-9);
        for joint in 1..world.len() {
            let parent = topology.parent(joint).expect("non-root");
            assert!((world[parent] * local[joint] - world[joint]).norm() < 1e-9);
        }
    }

    #[test]
    fn given_singular_parent_when_resolving_then_child_keeps_world_transform() {
        let world = vec![Matrix4::zeros(), translation(0.0, 1.0, 0.0)];
        let local = resolve_local_bind_transforms(&world, &Topology::new(vec![-1, 0]));
        assert_eq!(local[1], world[1]);
    }

    #[test]
    fn given_three_joint_chain_when_importing_then_bones_are_parented_and_sized() {
        let stage = chain_stage(vec![
            Matrix4::identity(),
            translation(0.0, 1.0, 0.0),
            translation(0.0, 2.0, 0.0),
        ]);
        let mut object = ArmatureObject::new("Rig");
        let mut reports = ReportList::new();

        let imported = import_skeleton(
            &mut object,
            &stage,
            "/Rig/Skel",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        let armature = &object.armature;
        let root = armature.find_bone("Root").expect("root bone");
        let child = armature.find_bone("Child").expect("child bone");
        let grand = armature.find_bone("Grand").expect("grandchild bone");

        assert!(imported.valid_for_animation);
        assert!(imported.curves.is_none());
        assert_eq!(imported.joint_to_bone.get("Root/Child").map(String::as_str), Some("Child"));
        assert_eq!(armature.bone(child).parent, Some(root));
        assert_eq!(armature.bone(grand).parent, Some(child));
        assert!((armature.bone(root).length() - 1.0).abs() < 1e-5);
        assert!((armature.bone(child).length() - 1.0).abs() < 1e-5);
        assert!((armature.bone(grand).length() - 1.0).abs() < 1e-5);
        assert!((armature.bone(grand).head - Vector3::new(0.0, 2.0, 0.0)).norm() < 1e-6);
        assert!(reports.is_empty());
    }

    #[test]
    fn given_mirrored_bind_when_importing_then_rest_pose_is_built_and_flagged() {
        let stage = chain_stage(vec![
            Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0)),
            translation(0.0, 1.0, 0.0),
            translation(0.0, 2.0, 0.0),
        ]);
        let mut object = ArmatureObject::new("Rig");
        let mut reports = ReportList::new();

        let imported = import_skeleton(
            &mut object,
            &stage,
            "/Rig/Skel",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        assert!(!imported.valid_for_animation);
        assert_eq!(object.armature.len(), 3);
        assert!(reports.has_code(codes::NEGATIVE_DETERMINANT));
        assert!(object.action.is_none());
    }

    #[test]
    fn given_bind_count_mismatch_when_importing_then_import_aborts_with_warning() {
        let stage = chain_stage(vec![Matrix4::identity(), translation(0.0, 1.0, 0.0)]);
        let mut object = ArmatureObject::new("Rig");
        let mut reports = ReportList::new();

        let imported = import_skeleton(
            &mut object,
            &stage,
            "/Rig/Skel",
            &ImportOptions::default(),
            &mut reports,
        );

        assert!(imported.is_none());
        assert!(reports.has_code(codes::BIND_TRANSFORM_COUNT_MISMATCH));
    }

    #[test]
    fn given_blank_joint_name_when_importing_then_hole_is_kept_and_others_build() {
        let mut stage = Stage::new();
        stage.define(
            "/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: vec!["Root".into(), "Root/ ".into(), "Root/Tip".into()],
                bind_transforms: vec![
                    Matrix4::identity(),
                    translation(0.0, 1.0, 0.0),
                    translation(0.0, 3.0, 0.0),
                ],
                rest_transforms: Vec::new(),
                parents: None,
            }),
        );
        let mut object = ArmatureObject::new("Rig");
        let mut reports = ReportList::new();

        let imported = import_skeleton(
            &mut object,
            &stage,
            "/Skel",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        assert_eq!(imported.bones.len(), 3);
        assert!(imported.bones[1].is_none());
        assert!(!imported.joint_to_bone.contains_key("Root/ "));
        assert!(reports.has_code(codes::BONE_CREATION_FAILED));
        assert_eq!(object.armature.len(), 2);
    }

    #[test]
    fn given_out_of_range_parent_when_importing_then_joint_stays_root_with_warning() {
        let mut stage = Stage::new();
        stage.define(
            "/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: vec!["A".into(), "B".into()],
                bind_transforms: vec![Matrix4::identity(), translation(1.0, 0.0, 0.0)],
                rest_transforms: Vec::new(),
                parents: Some(vec![-1, 9]),
            }),
        );
        let mut object = ArmatureObject::new("Rig");
        let mut reports = ReportList::new();

        import_skeleton(
            &mut object,
            &stage,
            "/Skel",
            &ImportOptions::default(),
            &mut reports,
        )
        .expect("import should succeed");

        let b = object.armature.find_bone("B").expect("bone B");
        assert_eq!(object.armature.bone(b).parent, None);
        assert!(reports.has_code(codes::PARENT_OUT_OF_RANGE));
    }

    fn explicit_parent_stage(joints: &[&str], parents: Vec<i32>) -> Stage {
        let mut stage = Stage::new();
        stage.define(
            "/Skel",
            PrimKind::Skeleton(Skeleton {
                joints: joints.iter().map(|joint| joint.to_string()).collect(),
                bind_transforms: vec![Matrix4::identity(); joints.len()],
                rest_transforms: Vec::new(),
                parents: Some(parents),
            }),
        );
        stage
    }

    fn import_explicit(stage: &Stage, reports: &mut ReportList) -> (ArmatureObject, bool) {
        let mut object = ArmatureObject::new("Rig");
        let imported = import_skeleton(
            &mut object,
            stage,
            "/Skel",
            &ImportOptions::default(),
            reports,
        );
        (object, imported.is_some())
    }

    #[test]
    fn given_parent_list_shorter_than_joints_when_importing_then_joint_count_mismatch_aborts() {
        let stage = explicit_parent_stage(&["A", "B", "C"], vec![-1, 0]);
        let mut reports = ReportList::new();

        let (object, imported) = import_explicit(&stage, &mut reports);

        assert!(!imported);
        assert!(reports.has_code(codes::JOINT_COUNT_MISMATCH));
        assert!(object.armature.is_empty());
    }

    #[test]
    fn given_parent_cycle_when_importing_then_skeleton_query_failure_is_reported() {
        let stage = explicit_parent_stage(&["A", "B", "C"], vec![-1, 2, 1]);
        let mut reports = ReportList::new();

        let (object, imported) = import_explicit(&stage, &mut reports);

        assert!(!imported);
        assert!(reports.has_code(codes::SKELETON_QUERY_FAILED));
        assert!(object.armature.is_empty());
    }

    #[test]
    fn given_self_parented_joint_when_importing_then_skeleton_query_failure_is_reported() {
        let stage = explicit_parent_stage(&["A", "B"], vec![-1, 1]);
        let mut reports = ReportList::new();

        let (_, imported) = import_explicit(&stage, &mut reports);

        assert!(!imported);
        assert!(reports.has_code(codes::SKELETON_QUERY_FAILED));
    }

    fn placed_bones(armature: &mut Armature, heads: &[(f64, f64, f64)]) -> Vec<Option<BoneId>> {
        heads
            .iter()
            .enumerate()
            .map(|(index, &(x, y, z))| {
                let id = armature.add_bone(&format!("Bone{index}"));
                if let Some(id) = id {
                    armature.bone_mut(id).set_from_matrix(&translation(x, y, z));
                }
                id
            })
            .collect()
    }

    #[test]
    fn given_child_on_parent_head_when_applying_heuristic_then_parent_length_is_kept() {
        let mut armature = Armature::new();
        let ids = placed_bones(&mut armature, &[(10.0, 0.0, 0.0), (10.0, 0.0, 0.0)]);
        let children = vec![vec![1], vec![]];

        let mean = apply_length_heuristic(&mut armature, &ids, &children, 1e-5);

        assert!(mean.is_none());
        for id in ids.iter().flatten() {
            assert!((armature.bone(*id).length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn given_mean_length_negligible_at_far_leaf_when_applying_heuristic_then_leaf_is_kept() {
        let mut armature = Armature::new();
        let ids = placed_bones(
            &mut armature,
            &[(0.0, 0.0, 0.0), (0.0, 0.01, 0.0), (1000.0, 0.0, 0.0)],
        );
        let children = vec![vec![1], vec![], vec![]];

        let mean = apply_length_heuristic(&mut armature, &ids, &children, 1e-3)
            .expect("root has a child");

        let [root, tip, far] = [ids[0], ids[1], ids[2]].map(|id| id.expect("bone"));
        assert!((mean - 0.01).abs() < 1e-6);
        assert!((armature.bone(root).length() - 0.01).abs() < 1e-6);
        assert!((armature.bone(tip).length() - 0.01).abs() < 1e-6);
        assert!((armature.bone(far).length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn given_branching_bones_when_applying_heuristic_then_leaves_take_mean_length() {
        let mut armature = Armature::new();
        let ids: Vec<Option<BoneId>> = ["Hips", "Spine", "LegL", "LegR"]
            .iter()
            .map(|name| armature.add_bone(name))
            .collect();
        let placements = [
            translation(0.0, 1.0, 0.0),
            translation(0.0, 3.0, 0.0),
            translation(1.0, 1.0, 0.0),
            translation(-1.0, 1.0, 0.0),
        ];
        for (id, placement) in ids.iter().zip(&placements) {
            armature
                .bone_mut(id.expect("bone"))
                .set_from_matrix(placement);
        }
        let children = vec![vec![1, 2, 3], vec![], vec![], vec![]];

        let mean = apply_length_heuristic(&mut armature, &ids, &children, 1e-5)
            .expect("one bone has children");

        // Mean child head is (0, 5/3, 0), two thirds of a unit above the hips.
        assert!((mean - 2.0 / 3.0).abs() < 1e-5);
        for id in ids.iter().flatten() {
            assert!((armature.bone(*id).length() - mean).abs() < 1e-5);
        }
    }
}
