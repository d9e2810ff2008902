use std::collections::HashMap;

use crate::error::ConvertError;

use super::parent_path;

/// Parent index per joint; negative marks a root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    parents: Vec<i32>,
}

impl Topology {
    pub fn new(parents: Vec<i32>) -> Self {
        Self { parents }
    }

    /// Derives parents from joint paths: a joint's parent is the nearest
    /// ancestor path that is itself a joint.
    pub fn from_joint_paths(joints: &[String]) -> Self {
        let index_of: HashMap<&str, usize> = joints
            .iter()
            .enumerate()
            .map(|(index, joint)| (joint.as_str(), index))
            .collect();

        let parents = joints
            .iter()
            .map(|joint| {
                let mut cursor = parent_path(joint);
                while let Some(ancestor) = cursor {
                    if let Some(&index) = index_of.get(ancestor) {
                        return index as i32;
                    }
                    cursor = parent_path(ancestor);
                }
                -1
            })
            .collect();

        Self { parents }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Raw parent index of `joint`, as authored.
    pub fn parent_index(&self, joint: usize) -> i32 {
        self.parents.get(joint).copied().unwrap_or(-1)
    }

    /// Parent of `joint` when it is a non-root joint with an in-range parent.
    pub fn parent(&self, joint: usize) -> Option<usize> {
        let parent = usize::try_from(self.parent_index(joint)).ok()?;
        (parent < self.parents.len()).then_some(parent)
    }

    pub fn parents(&self) -> &[i32] {
        &self.parents
    }

    /// Rejects self-parented joints and parent cycles.
    ///
    /// Out-of-range parents are tolerated here; consumers skip them.
    pub fn validate(&self) -> Result<(), ConvertError> {
        for joint in 0..self.parents.len() {
            if self.parent_index(joint) == joint as i32 {
                return Err(ConvertError::InvalidTopology(format!(
                    "joint {joint} is its own parent"
                )));
            }

            let mut steps = 0;
            let mut cursor = self.parent(joint);
            while let Some(parent) = cursor {
                steps += 1;
                if parent == joint || steps > self.parents.len() {
                    return Err(ConvertError::InvalidTopology(format!(
                        "joint {joint} is part of a parent cycle"
                    )));
                }
                cursor = self.parent(parent);
            }
        }
        Ok(())
    }
}
