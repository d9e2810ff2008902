use nalgebra::Matrix4;

use crate::logging::ReportList;
use crate::scene::{Action, ArmatureObject, CurveId, FCurve, Interpolation};
use crate::stage::SkeletonQuery;
use crate::transform::decompose_transform;
use crate::{log_debug, log_warn};

use super::skeleton::resolve_local_bind_transforms;
use super::types::{
    ChannelCurves, JointToBoneMap, LOCATION_CHANNELS, ROTATION_CHANNELS, SCALE_CHANNELS, codes,
};

/// Data path of a pose bone property.
pub fn pose_bone_data_path(bone_name: &str, property: &str) -> String {
    format!("pose.bones[\"{bone_name}\"].{property}")
}

fn add_channel_curves(
    action: &mut Action,
    slots: &mut Vec<Option<CurveId>>,
    bone_name: Option<&str>,
    property: &str,
    channels: usize,
    capacity: usize,
) {
    let Some(bone_name) = bone_name else {
        slots.extend(std::iter::repeat_n(None, channels));
        return;
    };

    let data_path = pose_bone_data_path(bone_name, property);
    for channel in 0..channels {
        let mut curve = FCurve::with_capacity(&data_path, channel, capacity);
        curve.group = Some(bone_name.to_string());
        slots.push(Some(action.add_curve(curve)));
    }
}

/// Keys pose curves on `armature_object` from the animation bound to `query`.
///
/// Each sampled joint-local transform is expressed relative to the joint's
/// local bind transform and split into location, rotation `(w, x, y, z)` and
/// scale keys. Joints absent from `joint_to_bone` keep `None` slots.
///
/// Returns `None` when nothing is animated or a precondition fails; the
/// latter is reported.
pub fn import_skeleton_curves(
    armature_object: &mut ArmatureObject,
    query: &SkeletonQuery<'_>,
    joint_to_bone: &JointToBoneMap,
    reports: &mut ReportList,
) -> Option<ChannelCurves> {
    if joint_to_bone.is_empty() || !query.has_animation() {
        return None;
    }

    let samples = query.joint_transform_time_samples();
    if samples.is_empty() {
        log_debug!("skeleton {} has no joint transform samples", query.path());
        return None;
    }

    let joint_order = query.joint_order();
    let topology = query.topology();
    if joint_order.len() != topology.len() {
        reports.warning(
            codes::JOINT_COUNT_MISMATCH,
            format!(
                "Joint order size {} doesn't match topology size {} for skeleton {}",
                joint_order.len(),
                topology.len(),
                query.path()
            ),
        );
        return None;
    }

    let Some(bind_transforms) = query.world_bind_transforms() else {
        reports.warning(
            codes::BIND_TRANSFORMS_MISSING,
            format!("Couldn't get world bind transforms for skeleton {}", query.path()),
        );
        return None;
    };
    if bind_transforms.len() != joint_order.len() {
        reports.warning(
            codes::BIND_TRANSFORM_COUNT_MISMATCH,
            format!(
                "Bind transforms count {} doesn't match joint count {} for skeleton {}",
                bind_transforms.len(),
                joint_order.len(),
                query.path()
            ),
        );
        return None;
    }

    let inverse_local_bind: Vec<Option<Matrix4<f64>>> =
        resolve_local_bind_transforms(bind_transforms, topology)
            .into_iter()
            .map(Matrix4::try_inverse)
            .collect();

    let action = armature_object.ensure_action();
    let mut curves = ChannelCurves::with_joint_count(joint_order.len());
    for joint in joint_order {
        let bone_name = joint_to_bone.get(joint).map(String::as_str);
        let capacity = samples.len();
        add_channel_curves(
            action,
            &mut curves.locations,
            bone_name,
            "location",
            LOCATION_CHANNELS,
            capacity,
        );
        add_channel_curves(
            action,
            &mut curves.rotations,
            bone_name,
            "rotation_quaternion",
            ROTATION_CHANNELS,
            capacity,
        );
        add_channel_curves(
            action,
            &mut curves.scales,
            bone_name,
            "scale",
            SCALE_CHANNELS,
            capacity,
        );
    }

    for &frame in &samples {
        let Some(locals) = query.compute_joint_local_transforms(frame) else {
            log_warn!("couldn't compute joint local transforms at frame {frame}, skipping it");
            continue;
        };
        if locals.len() != joint_order.len() {
            log_warn!(
                "frame {frame} has {} joint local transforms, expected {}",
                locals.len(),
                joint_order.len()
            );
            continue;
        }

        for (joint, local) in locals.iter().enumerate() {
            if curves.location(joint, 0).is_none() {
                continue;
            }
            let Some(inverse_bind) = inverse_local_bind[joint] else {
                log_warn!("local bind transform of joint {joint} is singular, skipping it at frame {frame}");
                continue;
            };

            let pose = inverse_bind * local;
            let Some(trs) = decompose_transform(&pose) else {
                log_warn!("couldn't decompose pose of joint {joint} at frame {frame}");
                continue;
            };

            let rotation = trs.rotation_components();
            for axis in 0..LOCATION_CHANNELS {
                insert_key(action, curves.location(joint, axis), frame, trs.translation[axis]);
                insert_key(action, curves.scale(joint, axis), frame, trs.scale[axis]);
            }
            for (component, value) in rotation.iter().enumerate() {
                insert_key(action, curves.rotation(joint, component), frame, *value);
            }
        }
    }

    for curve in curves.all() {
        action.curve_mut(curve).recalc_handles();
    }

    Some(curves)
}

fn insert_key(action: &mut Action, curve: Option<CurveId>, frame: f64, value: f32) {
    if let Some(curve) = curve {
        action
            .curve_mut(curve)
            .insert_keyframe(frame, value, Interpolation::Linear);
    }
}
