//! CPU-side model preparation: vertices, bones, material keys and bounds.
//!
//! Everything here runs before any GPU resource exists, so a scene can be
//! fully validated and normalized without a device.

use crimson_core::Aabb;
use glam::{Mat4, Vec2};
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::animation::Animator;
use crate::error::{RenderError, Result};
use crate::scene::{SceneData, SceneMesh, SceneNode};
use crate::skeleton::{assign_bone_weights, BoneMap};
use crate::vertex::Vertex;

/// Where a material's texture comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TextureSource {
    File(PathBuf),
    /// 1x1 white texture for meshes without a usable diffuse map.
    Placeholder,
}

/// Geometry ready for upload.
#[derive(Debug, Clone)]
pub struct PreparedMesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Index into [`PreparedModel::materials`].
    pub material: usize,
}

/// Output of [`prepare_scene`].
#[derive(Debug)]
pub struct PreparedModel {
    pub meshes: Vec<PreparedMesh>,
    /// Distinct material keys in first-use order.
    pub materials: Vec<TextureSource>,
    pub bounds: Aabb,
    pub normalization: Mat4,
    pub animator: Animator,
}

/// Candidate on-disk location of a texture referenced by a model in
/// `model_dir`.
///
/// Prefers `<model_dir>/../textures/<file name>`, falling back to
/// `<model_dir>/<file name>`. Only the file name of `texture` is used; both
/// `/` and `\` separators are accepted.
pub fn resolve_texture_path(model_dir: &Path, texture: &str) -> PathBuf {
    let file_name = texture.rsplit(['/', '\\']).next().unwrap_or(texture);

    let preferred = model_dir.join("..").join("textures").join(file_name);
    if preferred.exists() {
        return preferred;
    }

    let fallback = model_dir.join(file_name);
    warn!(
        "Texture not found at default path: {}. Trying alongside model: {}",
        preferred.display(),
        fallback.display()
    );
    fallback
}

/// Texture source for a mesh, downgrading to the placeholder when the
/// mesh has no diffuse texture or the file is missing.
fn texture_source(scene: &SceneData, mesh: &SceneMesh, model_dir: &Path) -> TextureSource {
    let texture = mesh
        .material_index
        .and_then(|i| scene.materials.get(i))
        .and_then(|m| m.diffuse_texture.as_deref());

    let Some(texture) = texture else {
        warn!("Mesh '{}' has no diffuse texture, using placeholder", mesh.name);
        return TextureSource::Placeholder;
    };

    let path = resolve_texture_path(model_dir, texture);
    if path.is_file() {
        info!("Attempting to load texture from: {}", path.display());
        TextureSource::File(path)
    } else {
        warn!(
            "Texture '{}' for mesh '{}' not found, using placeholder",
            path.display(),
            mesh.name
        );
        TextureSource::Placeholder
    }
}

fn build_vertices(mesh: &SceneMesh) -> Vec<Vertex> {
    mesh.positions
        .iter()
        .enumerate()
        .map(|(i, position)| {
            let normal = mesh.normals.get(i).copied().unwrap_or_default();
            let tex_coord = mesh
                .tex_coords
                .as_ref()
                .and_then(|uvs| uvs.get(i).copied())
                .unwrap_or(Vec2::ZERO);
            Vertex {
                position: position.to_array(),
                color: normal.to_array(),
                tex_coord: tex_coord.to_array(),
                ..Default::default()
            }
        })
        .collect()
}

/// Mesh indices in hierarchy order (node meshes first, then children).
fn collect_mesh_order(node: &SceneNode, out: &mut Vec<usize>) {
    out.extend_from_slice(&node.meshes);
    for child in &node.children {
        collect_mesh_order(child, out);
    }
}

/// Flatten a scene into upload-ready meshes.
///
/// Fails when the scene yields no meshes, when a mesh references a vertex
/// it does not have, or when the model uses more than `MAX_BONES` bones.
pub fn prepare_scene(scene: SceneData, model_dir: &Path) -> Result<PreparedModel> {
    let mut order = Vec::new();
    collect_mesh_order(&scene.root, &mut order);

    let mut bones = BoneMap::new();
    let mut bounds = Aabb::EMPTY;
    let mut material_keys: HashMap<TextureSource, usize> = HashMap::new();
    let mut materials = Vec::new();
    let mut meshes = Vec::with_capacity(order.len());

    for mesh_index in order {
        let Some(mesh) = scene.meshes.get(mesh_index) else {
            warn!("Node references missing mesh {mesh_index}");
            continue;
        };

        let mut vertices = build_vertices(mesh);
        assign_bone_weights(&mesh.name, &mut vertices, &mesh.bones, &mut bones)?;

        if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::VertexOutOfRange {
                mesh: mesh.name.clone(),
                vertex: bad,
                count: vertices.len(),
            });
        }

        let source = texture_source(&scene, mesh, model_dir);
        let material = *material_keys.entry(source.clone()).or_insert_with(|| {
            materials.push(source);
            materials.len() - 1
        });

        for position in &mesh.positions {
            bounds.expand_to_include(*position);
        }

        info!(
            "Processed mesh: {}\t- Vertices: {}, Indices: {}",
            mesh.name,
            vertices.len(),
            mesh.indices.len()
        );

        meshes.push(PreparedMesh {
            name: mesh.name.clone(),
            vertices,
            indices: mesh.indices.clone(),
            material,
        });
    }

    if meshes.is_empty() {
        return Err(RenderError::EmptyScene(scene.root.name));
    }

    let normalization = bounds.normalization_matrix();
    let center = bounds.center();
    let max_dimension = bounds.max_dimension();
    let scale = if max_dimension > 0.0 { 2.0 / max_dimension } else { 1.0 };
    info!(
        "Model normalized: center({}, {}, {}), scale_factor: {}",
        center.x, center.y, center.z, scale
    );

    let animator = Animator::new(scene.root, scene.animations, bones);

    Ok(PreparedModel {
        meshes,
        materials,
        bounds,
        normalization,
        animator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SceneBone, SceneMaterial, VertexWeight};
    use approx::assert_relative_eq;
    use glam::Vec3;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "crimson_{tag}_{}_{:?}",
                std::process::id(),
                std::thread::current().id()
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).ok();
        }
    }

    fn quad(name: &str, offset: Vec3, material_index: Option<usize>) -> SceneMesh {
        SceneMesh {
            name: name.to_string(),
            positions: vec![
                offset,
                offset + Vec3::X,
                offset + Vec3::X + Vec3::Y,
                offset + Vec3::Y,
            ],
            normals: vec![Vec3::Z; 4],
            tex_coords: Some(vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]),
            indices: vec![0, 1, 2, 0, 2, 3],
            material_index,
            bones: Vec::new(),
        }
    }

    fn scene(meshes: Vec<SceneMesh>, materials: Vec<SceneMaterial>) -> SceneData {
        let mut root = SceneNode::new("root");
        let mut child = SceneNode::new("child");
        child.meshes = (1..meshes.len()).collect();
        root.meshes = vec![0];
        root.children.push(child);
        SceneData {
            root,
            meshes,
            materials,
            animations: Vec::new(),
        }
    }

    #[test]
    fn textured_and_untextured_meshes_both_draw() {
        let dir = TempDir::new("two_mesh");
        let model_dir = dir.0.join("source");
        let texture_dir = dir.0.join("textures");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(&texture_dir).unwrap();
        std::fs::write(texture_dir.join("chest.png"), b"png").unwrap();

        let materials = vec![
            SceneMaterial {
                name: "wood".into(),
                diffuse_texture: Some("C:\\art\\chest.png".into()),
            },
            SceneMaterial {
                name: "bare".into(),
                diffuse_texture: None,
            },
        ];
        let mut mesh_b = quad("B", Vec3::new(2.0, 0.0, 0.0), Some(1));
        mesh_b.indices.extend_from_slice(&[1, 2, 3]);
        let scene = scene(vec![quad("A", Vec3::ZERO, Some(0)), mesh_b], materials);

        let model = prepare_scene(scene, &model_dir).unwrap();

        assert_eq!(model.meshes.len(), 2);
        let a = &model.meshes[0];
        let b = &model.meshes[1];
        assert_eq!(a.indices.len(), 2 * 3);
        assert_eq!(b.indices.len(), 3 * 3);

        match &model.materials[a.material] {
            TextureSource::File(path) => assert!(path.ends_with("textures/chest.png")),
            other => panic!("expected texture file, got {other:?}"),
        }
        assert_eq!(model.materials[b.material], TextureSource::Placeholder);
    }

    #[test]
    fn materials_are_deduplicated_by_source() {
        let dir = TempDir::new("dedup");
        let scene = scene(
            vec![
                quad("a", Vec3::ZERO, None),
                quad("b", Vec3::ONE, Some(0)),
                quad("c", Vec3::NEG_ONE, None),
            ],
            vec![SceneMaterial {
                name: "missing".into(),
                diffuse_texture: Some("gone.png".into()),
            }],
        );

        let model = prepare_scene(scene, &dir.0).unwrap();

        assert_eq!(model.materials, vec![TextureSource::Placeholder]);
        assert!(model.meshes.iter().all(|m| m.material == 0));
    }

    #[test]
    fn texture_falls_back_to_model_directory() {
        let dir = TempDir::new("fallback");
        std::fs::write(dir.0.join("skin.png"), b"png").unwrap();

        let resolved = resolve_texture_path(&dir.0, "textures/skin.png");
        assert_eq!(resolved, dir.0.join("skin.png"));
    }

    #[test]
    fn normalization_fits_longest_axis_into_two_units() {
        let dir = TempDir::new("norm");
        let mut mesh = quad("wide", Vec3::new(10.0, 0.0, 0.0), None);
        mesh.positions[1] = Vec3::new(14.0, 0.0, 0.0);
        let model = prepare_scene(scene(vec![mesh], Vec::new()), &dir.0).unwrap();

        let min = model.normalization.transform_point3(model.bounds.min);
        let max = model.normalization.transform_point3(model.bounds.max);
        assert_relative_eq!(max.x - min.x, 2.0, epsilon = 1e-5);
        assert_relative_eq!((min + max).length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn empty_scene_is_rejected() {
        let dir = TempDir::new("empty");
        let err = prepare_scene(scene(Vec::new(), Vec::new()), &dir.0).unwrap_err();
        assert!(matches!(err, RenderError::EmptyScene(_)));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let dir = TempDir::new("oob");
        let mut mesh = quad("broken", Vec3::ZERO, None);
        mesh.indices.push(9);
        let err = prepare_scene(scene(vec![mesh], Vec::new()), &dir.0).unwrap_err();
        assert!(matches!(err, RenderError::VertexOutOfRange { vertex: 9, .. }));
    }

    #[test]
    fn skinned_mesh_gets_bone_indices() {
        let dir = TempDir::new("skin");
        let mut mesh = quad("arm", Vec3::ZERO, None);
        mesh.bones = vec![SceneBone {
            name: "shoulder".into(),
            offset: Mat4::IDENTITY,
            weights: vec![VertexWeight {
                vertex: 2,
                weight: 0.5,
            }],
        }];

        let model = prepare_scene(scene(vec![mesh], Vec::new()), &dir.0).unwrap();
        let v = model.meshes[0].vertices[2];
        assert_eq!(v.bone_ids[0], 0);
        assert_relative_eq!(v.weights[0], 1.0);
        assert_eq!(model.animator.bone_transforms().len(), 1);
    }
}
