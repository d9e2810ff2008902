//! Skeleton, skin weight and blend shape conversion library.
//!
//! Moves skeletons, their animation, joint influences and blend shapes
//! between an interchange stage and an armature/mesh scene, in both
//! directions.

pub mod convert;
pub mod error;
pub mod gltf_source;
pub mod invert;
pub mod logging;
pub mod scene;
pub mod stage;
pub mod transform;

pub use error::ConvertError;
pub use logging::{Report, ReportList, Severity};
