use nalgebra::{Matrix4, Vector3};

use crate::error::ConvertError;
use crate::transform::trs_matrix;

use super::{SkelAnimation, Skeleton, Stage, Topology};

/// Read-only view over a skeleton and its bound animation.
#[derive(Debug, Clone)]
pub struct SkeletonQuery<'a> {
    path: String,
    skeleton: &'a Skeleton,
    topology: Topology,
    animation: Option<AnimationBinding<'a>>,
}

/// Bound animation plus the animation-joint → skeleton-joint mapping.
#[derive(Debug, Clone)]
struct AnimationBinding<'a> {
    animation: &'a SkelAnimation,
    skeleton_index: Vec<Option<usize>>,
}

impl<'a> SkeletonQuery<'a> {
    pub(super) fn new(stage: &'a Stage, path: &str) -> Result<Self, ConvertError> {
        let skeleton = stage.skeleton(path).ok_or_else(|| {
            ConvertError::InvalidTopology(format!("{path} is not a skeleton prim"))
        })?;
        let topology = skeleton.topology();
        topology.validate()?;

        let animation = stage
            .inherited_animation_source(path)
            .and_then(|anim_path| stage.animation(&anim_path))
            .map(|animation| AnimationBinding {
                animation,
                skeleton_index: animation
                    .joints
                    .iter()
                    .map(|joint| skeleton.joints.iter().position(|j| j == joint))
                    .collect(),
            });

        Ok(Self {
            path: path.to_string(),
            skeleton,
            topology,
            animation,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn joint_order(&self) -> &[String] {
        &self.skeleton.joints
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// World-space bind transforms, `None` when not authored.
    pub fn world_bind_transforms(&self) -> Option<&[Matrix4<f64>]> {
        if self.skeleton.bind_transforms.is_empty() {
            None
        } else {
            Some(&self.skeleton.bind_transforms)
        }
    }

    pub fn has_animation(&self) -> bool {
        self.animation.is_some()
    }

    /// Union of the translation, rotation and scale sample times, ascending.
    pub fn joint_transform_time_samples(&self) -> Vec<f64> {
        let Some(binding) = &self.animation else {
            return Vec::new();
        };
        let animation = binding.animation;

        let mut times = animation.translations.times();
        times.extend(animation.rotations.times());
        times.extend(animation.scales.times());
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// Joint-local transforms at `time`, in skeleton joint order.
    ///
    /// Joints the animation does not drive fall back to the rest transforms.
    /// Returns `None` when the data cannot produce a full array.
    pub fn compute_joint_local_transforms(&self, time: f64) -> Option<Vec<Matrix4<f64>>> {
        let joint_count = self.skeleton.joints.len();
        let rest = &self.skeleton.rest_transforms;
        let mut locals: Vec<Option<Matrix4<f64>>> = if rest.len() == joint_count {
            rest.iter().copied().map(Some).collect()
        } else {
            vec![None; joint_count]
        };

        if let Some(binding) = &self.animation {
            let animation = binding.animation;
            let anim_count = animation.joints.len();
            let translations = animation.translations.value_at(time)?;
            let rotations = animation.rotations.value_at(time)?;
            let scales = animation
                .scales
                .value_at(time)
                .unwrap_or_else(|| vec![Vector3::new(1.0, 1.0, 1.0); anim_count]);

            if translations.len() != anim_count
                || rotations.len() != anim_count
                || scales.len() != anim_count
            {
                return None;
            }

            for (anim_index, skeleton_index) in binding.skeleton_index.iter().enumerate() {
                let Some(skeleton_index) = *skeleton_index else {
                    continue;
                };
                locals[skeleton_index] = Some(trs_matrix(
                    &translations[anim_index],
                    &rotations[anim_index],
                    &scales[anim_index],
                ));
            }
        }

        locals.into_iter().collect()
    }
}
