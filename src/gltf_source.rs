//! Populates a [`Stage`] from a glTF or GLB file.
//!
//! Nodes become transform prims, skins become skeletons, mesh primitives
//! become mesh prims with joint influences and blend shapes, and the first
//! animation is resampled onto one skeleton animation per skin.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use gltf::{
    Document,
    animation::{Interpolation as SamplerInterpolation, util::ReadOutputs},
};
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};

use crate::error::ConvertError;
use crate::stage::{
    BlendShape, Interpolation, Lerp, MeshPrim, PrimKind, Primvar, SkelAnimation, SkelBinding,
    Skeleton, Stage, TimeSamples, XformCache, child_path, make_safe_name,
};
use crate::transform::parent_relative;
use crate::{log_debug, log_info, log_warn};

/// Frame rate used to turn glTF seconds into stage time codes.
pub const FRAMES_PER_SECOND: f64 = 24.0;

const INFLUENCES_PER_VERTEX: usize = 4;

// ─── Public API ───────────────────────────────────────────────────────────────

/// Reads a `.gltf` or `.glb` file into a new stage.
pub fn load_stage(path: &Path) -> Result<Stage> {
    let (document, buffers, _images) = gltf::import(path)
        .with_context(|| format!("failed to read glTF: {}", path.display()))?;
    build_stage(&document, &buffers)
        .with_context(|| format!("failed to convert glTF: {}", path.display()))
}

/// Reads glTF or GLB bytes into a new stage.
pub fn load_stage_from_slice(bytes: &[u8]) -> Result<Stage> {
    let (document, buffers, _images) =
        gltf::import_slice(bytes).context("failed to parse glTF data")?;
    build_stage(&document, &buffers)
}

// ─── Stage building ───────────────────────────────────────────────────────────

/// Skin converted to a skeleton prim.
struct SkinSkeleton {
    path: String,
    joints: Vec<usize>,
}

/// Mesh primitive carrying morph targets, keyed by its node.
struct MorphMesh {
    skeleton: Option<String>,
    tokens: Vec<String>,
}

fn build_stage(document: &Document, buffers: &[gltf::buffer::Data]) -> Result<Stage> {
    if document.nodes().len() == 0 {
        return Err(ConvertError::Unsupported("glTF document has no nodes".to_string()).into());
    }

    let parents = node_parents(document);
    let mut stage = Stage::new();
    let node_paths = define_nodes(document, &parents, &mut stage);

    let mut xf_cache = XformCache::new();
    let node_worlds: Vec<Matrix4<f64>> = node_paths
        .iter()
        .map(|path| xf_cache.local_to_world(&stage, path))
        .collect();

    let skins = define_skeletons(
        document,
        buffers,
        &mut stage,
        &node_paths,
        &node_worlds,
        &parents,
    )?;
    let morph_meshes = define_meshes(document, buffers, &mut stage, &node_paths, &skins);
    define_animations(document, buffers, &mut stage, &skins, &morph_meshes);

    log_info!(
        "loaded glTF with {} nodes, {} skins and {} animations",
        document.nodes().len(),
        skins.len(),
        document.animations().len()
    );
    Ok(stage)
}

fn node_parents(document: &Document) -> Vec<Option<usize>> {
    let mut parents = vec![None; document.nodes().len()];
    for node in document.nodes() {
        for child in node.children() {
            if parents[child.index()].is_none() {
                parents[child.index()] = Some(node.index());
            }
        }
    }
    parents
}

/// Defines one transform prim per node reachable from a root node.
/// Unreachable nodes keep an empty path.
fn define_nodes(document: &Document, parents: &[Option<usize>], stage: &mut Stage) -> Vec<String> {
    let nodes: Vec<gltf::Node<'_>> = document.nodes().collect();
    let mut paths = vec![String::new(); nodes.len()];
    let mut stack: Vec<(usize, String)> = (0..nodes.len())
        .rev()
        .filter(|&index| parents[index].is_none())
        .map(|index| (index, "/".to_string()))
        .collect();

    while let Some((index, parent_path)) = stack.pop() {
        if !paths[index].is_empty() {
            continue;
        }
        let node = &nodes[index];
        let name = match node.name() {
            Some(name) if !name.is_empty() => make_safe_name(name),
            _ => format!("node_{index}"),
        };
        let path = stage.unique_child_path(&parent_path, &name);
        stage.define(&path, PrimKind::Xform).local_transform =
            Matrix4::from(node.transform().matrix()).cast::<f64>();

        let children: Vec<usize> = node.children().map(|child| child.index()).collect();
        stack.extend(children.into_iter().rev().map(|child| (child, path.clone())));
        paths[index] = path;
    }

    let unreachable = paths.iter().filter(|path| path.is_empty()).count();
    if unreachable > 0 {
        log_warn!("{unreachable} glTF nodes are not reachable from a root node");
    }
    paths
}

fn define_skeletons(
    document: &Document,
    buffers: &[gltf::buffer::Data],
    stage: &mut Stage,
    node_paths: &[String],
    node_worlds: &[Matrix4<f64>],
    parents: &[Option<usize>],
) -> Result<Vec<SkinSkeleton>> {
    let mut skins = Vec::new();

    for skin in document.skins() {
        let joints: Vec<usize> = skin.joints().map(|node| node.index()).collect();
        if let Some(&orphan) = joints.iter().find(|&&node| node_paths[node].is_empty()) {
            return Err(ConvertError::Unsupported(format!(
                "skin {} uses joint node {orphan}, which is not reachable from a root node",
                skin.index()
            ))
            .into());
        }

        let tokens: Vec<String> = joints
            .iter()
            .map(|&node| node_paths[node].trim_start_matches('/').to_string())
            .collect();

        let slot_of: HashMap<usize, usize> = joints
            .iter()
            .enumerate()
            .map(|(slot, &node)| (node, slot))
            .collect();
        let joint_parents: Vec<Option<usize>> = joints
            .iter()
            .map(|&node| {
                let mut cursor = parents[node];
                while let Some(ancestor) = cursor {
                    if let Some(&slot) = slot_of.get(&ancestor) {
                        return Some(slot);
                    }
                    cursor = parents[ancestor];
                }
                None
            })
            .collect();

        let reader = skin.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        let bind_transforms: Vec<Matrix4<f64>> = match reader.read_inverse_bind_matrices() {
            Some(inverse_binds) => inverse_binds
                .zip(&joints)
                .map(|(inverse_bind, &node)| {
                    Matrix4::from(inverse_bind)
                        .cast::<f64>()
                        .try_inverse()
                        .unwrap_or_else(|| {
                            log_warn!("singular inverse bind matrix for joint node {node}, using its world transform");
                            node_worlds[node]
                        })
                })
                .collect(),
            None => joints.iter().map(|&node| node_worlds[node]).collect(),
        };

        let rest_transforms: Vec<Matrix4<f64>> = joints
            .iter()
            .zip(&joint_parents)
            .map(|(&node, parent)| {
                let world = node_worlds[node];
                parent
                    .and_then(|slot| parent_relative(&node_worlds[joints[slot]], &world))
                    .unwrap_or(world)
            })
            .collect();

        let name = make_safe_name(skin.name().unwrap_or("Skeleton"));
        let path = stage.unique_child_path("/", &name);
        stage.define(
            &path,
            PrimKind::Skeleton(Skeleton {
                joints: tokens,
                bind_transforms,
                rest_transforms,
                parents: Some(
                    joint_parents
                        .iter()
                        .map(|parent| parent.map_or(-1, |slot| slot as i32))
                        .collect(),
                ),
            }),
        );
        log_debug!("skin {} becomes skeleton {path}", skin.index());
        skins.push(SkinSkeleton { path, joints });
    }

    Ok(skins)
}

fn define_meshes(
    document: &Document,
    buffers: &[gltf::buffer::Data],
    stage: &mut Stage,
    node_paths: &[String],
    skins: &[SkinSkeleton],
) -> HashMap<usize, Vec<MorphMesh>> {
    let mut morph_meshes: HashMap<usize, Vec<MorphMesh>> = HashMap::new();

    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let node_path = &node_paths[node.index()];
        if node_path.is_empty() {
            continue;
        }
        let skeleton = node
            .skin()
            .and_then(|skin| skins.get(skin.index()))
            .map(|skin| skin.path.clone());
        let base_name = make_safe_name(mesh.name().unwrap_or("Mesh"));
        let primitive_count = mesh.primitives().len();

        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
            let Some(positions) = reader.read_positions() else {
                log_warn!("primitive {primitive_index} of mesh {base_name} has no positions");
                continue;
            };
            let points: Vec<Vector3<f32>> = positions.map(Vector3::from).collect();

            let name = if primitive_count > 1 {
                format!("{base_name}_{primitive_index}")
            } else {
                base_name.clone()
            };
            let mesh_path = stage.unique_child_path(node_path, &name);

            let mut binding = SkelBinding {
                skeleton: skeleton.clone(),
                ..SkelBinding::default()
            };
            if skeleton.is_some()
                && let (Some(joints), Some(weights)) = (reader.read_joints(0), reader.read_weights(0))
            {
                binding.joint_indices = Some(Primvar::new(
                    joints.into_u16().flatten().map(i32::from).collect(),
                    INFLUENCES_PER_VERTEX,
                    Interpolation::Vertex,
                ));
                binding.joint_weights = Some(Primvar::new(
                    weights.into_f32().flatten().collect(),
                    INFLUENCES_PER_VERTEX,
                    Interpolation::Vertex,
                ));
            }

            let mut tokens = Vec::new();
            let mut targets = Vec::new();
            for (target_index, (offsets, _, _)) in reader.read_morph_targets().enumerate() {
                let target_path = child_path(&mesh_path, &format!("target_{target_index}"));
                stage.define(
                    &target_path,
                    PrimKind::BlendShape(BlendShape {
                        offsets: offsets.map(|offsets| offsets.map(Vector3::from).collect()),
                        point_indices: None,
                    }),
                );
                tokens.push(make_safe_name(&format!("{name}_target_{target_index}")));
                targets.push(target_path);
            }
            if !tokens.is_empty() {
                binding.blend_shapes = Some(tokens.clone());
                binding.blend_shape_targets = Some(targets);
                morph_meshes.entry(node.index()).or_default().push(MorphMesh {
                    skeleton: skeleton.clone(),
                    tokens,
                });
            }

            stage
                .define(
                    &mesh_path,
                    PrimKind::Mesh(MeshPrim {
                        points,
                        ..MeshPrim::default()
                    }),
                )
                .binding = binding;
        }
    }

    morph_meshes
}

// ─── Animation ────────────────────────────────────────────────────────────────

/// One animation channel resampled in stage time codes.
struct Track<T> {
    samples: TimeSamples<T>,
    step: bool,
}

impl<T: Lerp> Track<T> {
    fn new(times: &[f64], values: Vec<T>, interpolation: SamplerInterpolation) -> Self {
        // Cubic spline keys are stored as (in-tangent, value, out-tangent).
        let values: Vec<T> = match interpolation {
            SamplerInterpolation::CubicSpline => values.into_iter().skip(1).step_by(3).collect(),
            _ => values,
        };
        let mut samples = TimeSamples::new();
        for (&time, value) in times.iter().zip(values) {
            samples.insert(time, value);
        }
        Self {
            samples,
            step: matches!(interpolation, SamplerInterpolation::Step),
        }
    }

    fn value_at(&self, time: f64) -> Option<T> {
        if !self.step {
            return self.samples.value_at(time);
        }
        let samples = self.samples.samples();
        samples
            .iter()
            .rev()
            .find(|(sample_time, _)| *sample_time <= time)
            .or_else(|| samples.first())
            .map(|(_, value)| value.clone())
    }

    fn times(&self) -> Vec<f64> {
        self.samples.times()
    }
}

#[derive(Default)]
struct NodeTracks {
    translation: Option<Track<Vector3<f32>>>,
    rotation: Option<Track<UnitQuaternion<f32>>>,
    scale: Option<Track<Vector3<f32>>>,
    weights: Option<Track<Vec<f32>>>,
}

impl NodeTracks {
    fn transform_times(&self) -> Vec<f64> {
        let mut times = Vec::new();
        times.extend(self.translation.iter().flat_map(Track::times));
        times.extend(self.rotation.iter().flat_map(Track::times));
        times.extend(self.scale.iter().flat_map(Track::times));
        times
    }
}

fn read_tracks(document: &Document, buffers: &[gltf::buffer::Data]) -> HashMap<usize, NodeTracks> {
    let mut tracks: HashMap<usize, NodeTracks> = HashMap::new();
    let Some(animation) = document.animations().next() else {
        return tracks;
    };
    if document.animations().len() > 1 {
        log_info!("only the first of {} glTF animations is imported", document.animations().len());
    }

    for (channel_index, channel) in animation.channels().enumerate() {
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        let (Some(inputs), Some(outputs)) = (reader.read_inputs(), reader.read_outputs()) else {
            log_warn!("animation channel {channel_index} has no readable samples");
            continue;
        };
        let times: Vec<f64> = inputs
            .map(|seconds| f64::from(seconds) * FRAMES_PER_SECOND)
            .collect();
        let interpolation = channel.sampler().interpolation();
        let node_tracks = tracks.entry(channel.target().node().index()).or_default();

        match outputs {
            ReadOutputs::Translations(values) => {
                node_tracks.translation = Some(Track::new(
                    &times,
                    values.map(Vector3::from).collect(),
                    interpolation,
                ));
            }
            ReadOutputs::Rotations(values) => {
                let rotations = values
                    .into_f32()
                    .map(|[x, y, z, w]| UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
                    .collect();
                node_tracks.rotation = Some(Track::new(&times, rotations, interpolation));
            }
            ReadOutputs::Scales(values) => {
                node_tracks.scale = Some(Track::new(
                    &times,
                    values.map(Vector3::from).collect(),
                    interpolation,
                ));
            }
            ReadOutputs::MorphTargetWeights(values) => {
                let flat: Vec<f32> = values.into_f32().collect();
                let keys_per_time = match interpolation {
                    SamplerInterpolation::CubicSpline => 3,
                    _ => 1,
                };
                let width = flat.len() / (times.len() * keys_per_time).max(1);
                if width == 0 {
                    continue;
                }
                let weights = flat.chunks_exact(width).map(<[f32]>::to_vec).collect();
                node_tracks.weights = Some(Track::new(&times, weights, interpolation));
            }
        }
    }

    tracks
}

/// Resamples the first animation onto one skeleton animation per skin.
///
/// Joints without a channel hold their node's rest transform. Morph weight
/// channels of meshes bound to the skin become its blend shape weights.
fn define_animations(
    document: &Document,
    buffers: &[gltf::buffer::Data],
    stage: &mut Stage,
    skins: &[SkinSkeleton],
    morph_meshes: &HashMap<usize, Vec<MorphMesh>>,
) {
    let tracks = read_tracks(document, buffers);
    if tracks.is_empty() {
        return;
    }
    let nodes: Vec<gltf::Node<'_>> = document.nodes().collect();

    for skin in skins {
        let weight_sources: Vec<(&Track<Vec<f32>>, &MorphMesh)> = morph_meshes
            .iter()
            .filter_map(|(node, meshes)| Some((tracks.get(node)?.weights.as_ref()?, meshes)))
            .flat_map(|(track, meshes)| meshes.iter().map(move |mesh| (track, mesh)))
            .filter(|(_, mesh)| mesh.skeleton.as_deref() == Some(skin.path.as_str()))
            .collect();

        let mut times: Vec<f64> = skin
            .joints
            .iter()
            .filter_map(|node| tracks.get(node))
            .flat_map(NodeTracks::transform_times)
            .collect();
        times.extend(weight_sources.iter().flat_map(|(track, _)| track.times()));
        times.sort_by(f64::total_cmp);
        times.dedup();
        if times.is_empty() {
            continue;
        }

        let rest: Vec<(Vector3<f32>, UnitQuaternion<f32>, Vector3<f32>)> = skin
            .joints
            .iter()
            .map(|&node| {
                let (translation, [x, y, z, w], scale) = nodes[node].transform().decomposed();
                (
                    Vector3::from(translation),
                    UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
                    Vector3::from(scale),
                )
            })
            .collect();

        let mut translations = TimeSamples::new();
        let mut rotations = TimeSamples::new();
        let mut scales = TimeSamples::new();
        let mut blend_shape_weights = TimeSamples::new();
        for &time in &times {
            let mut frame_translations = Vec::with_capacity(skin.joints.len());
            let mut frame_rotations = Vec::with_capacity(skin.joints.len());
            let mut frame_scales = Vec::with_capacity(skin.joints.len());
            for (node, (rest_translation, rest_rotation, rest_scale)) in skin.joints.iter().zip(&rest) {
                let node_tracks = tracks.get(node);
                frame_translations.push(
                    node_tracks
                        .and_then(|t| t.translation.as_ref())
                        .and_then(|track| track.value_at(time))
                        .unwrap_or(*rest_translation),
                );
                frame_rotations.push(
                    node_tracks
                        .and_then(|t| t.rotation.as_ref())
                        .and_then(|track| track.value_at(time))
                        .unwrap_or(*rest_rotation),
                );
                frame_scales.push(
                    node_tracks
                        .and_then(|t| t.scale.as_ref())
                        .and_then(|track| track.value_at(time))
                        .unwrap_or(*rest_scale),
                );
            }
            translations.insert(time, frame_translations);
            rotations.insert(time, frame_rotations);
            scales.insert(time, frame_scales);

            if !weight_sources.is_empty() {
                let mut frame_weights = Vec::new();
                for (track, mesh) in &weight_sources {
                    let mut weights = track.value_at(time).unwrap_or_default();
                    weights.resize(mesh.tokens.len(), 0.0);
                    frame_weights.extend(weights);
                }
                blend_shape_weights.insert(time, frame_weights);
            }
        }

        let blend_shapes = (!weight_sources.is_empty()).then(|| {
            weight_sources
                .iter()
                .flat_map(|(_, mesh)| mesh.tokens.iter().cloned())
                .collect()
        });

        let Some(skeleton) = stage.skeleton(&skin.path) else {
            continue;
        };
        let joints = skeleton.joints.clone();
        let anim_path = child_path(&skin.path, "Anim");
        stage.define(
            &anim_path,
            PrimKind::Animation(SkelAnimation {
                joints,
                translations,
                rotations,
                scales,
                blend_shapes,
                blend_shape_weights,
            }),
        );
        if let Some(prim) = stage.prim_mut(&skin.path) {
            prim.binding.animation_source = Some(anim_path);
        }
        log_debug!("resampled {} frames onto {}", times.len(), skin.path);
    }
}
