//! Wavefront OBJ/MTL importer.

use glam::{Vec2, Vec3};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{RenderError, Result};
use crate::scene::{SceneData, SceneImporter, SceneMaterial, SceneMesh, SceneNode};

/// Imports OBJ files through `tobj`.
///
/// Faces are triangulated and attributes share a single index stream. Every
/// OBJ object becomes one mesh attached to the root node. UVs are flipped to
/// top-left origin and missing normals are generated by area-weighted
/// averaging of face normals. OBJ has no skeletons or animations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjImporter;

impl SceneImporter for ObjImporter {
    fn import(&self, path: &Path) -> Result<SceneData> {
        let import_error = |reason: String| RenderError::Import {
            path: path.display().to_string(),
            reason,
        };

        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, materials) =
            tobj::load_obj(path, &options).map_err(|e| import_error(e.to_string()))?;

        let materials = match materials {
            Ok(materials) => materials
                .into_iter()
                .map(|m| SceneMaterial {
                    name: m.name,
                    diffuse_texture: m.diffuse_texture.filter(|t| !t.is_empty()),
                })
                .collect(),
            Err(e) => {
                warn!("No materials for {}: {e}", path.display());
                Vec::new()
            }
        };

        let mut root = SceneNode::new(
            path.file_stem()
                .map_or_else(|| "root".to_string(), |s| s.to_string_lossy().into_owned()),
        );

        let meshes: Vec<SceneMesh> = models.into_iter().map(convert_model).collect();
        root.meshes = (0..meshes.len()).collect();

        debug!(
            "Imported {}: {} meshes, {} materials",
            path.display(),
            meshes.len(),
            materials.len()
        );

        Ok(SceneData {
            root,
            meshes,
            materials,
            animations: Vec::new(),
        })
    }
}

fn convert_model(model: tobj::Model) -> SceneMesh {
    let mesh = model.mesh;

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();

    let normals = if mesh.normals.len() == mesh.positions.len() {
        mesh.normals
            .chunks_exact(3)
            .map(|n| Vec3::new(n[0], n[1], n[2]))
            .collect()
    } else {
        smooth_normals(&positions, &mesh.indices)
    };

    let tex_coords = (mesh.texcoords.len() / 2 == positions.len() && !positions.is_empty()).then(|| {
        mesh.texcoords
            .chunks_exact(2)
            .map(|t| Vec2::new(t[0], 1.0 - t[1]))
            .collect()
    });

    SceneMesh {
        name: model.name,
        positions,
        normals,
        tex_coords,
        indices: mesh.indices,
        material_index: mesh.material_id,
        bones: Vec::new(),
    }
}

/// Per-vertex normals from a triangle list.
pub fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (Some(pa), Some(pb), Some(pc)) = (positions.get(a), positions.get(b), positions.get(c))
        else {
            continue;
        };
        // Unnormalized cross product weights by triangle area.
        let face = (*pb - *pa).cross(*pc - *pa);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }

    for n in &mut normals {
        *n = n.normalize_or_zero();
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn smooth_normals_of_flat_quad_point_up() {
        let positions = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let indices = [0, 1, 2, 0, 2, 3];

        for n in smooth_normals(&positions, &indices) {
            assert_relative_eq!(n.y, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn out_of_range_indices_are_skipped() {
        let positions = [Vec3::ZERO, Vec3::X];
        let normals = smooth_normals(&positions, &[0, 1, 7]);
        assert_eq!(normals, vec![Vec3::ZERO, Vec3::ZERO]);
    }

    #[test]
    fn imports_triangulated_quad() {
        let dir = std::env::temp_dir().join(format!("crimson_obj_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quad.obj");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "o Quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4"
        )
        .unwrap();
        drop(file);

        let scene = ObjImporter.import(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(scene.meshes.len(), 1);
        let mesh = &scene.meshes[0];
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.normals.len(), mesh.positions.len());

        let uvs = mesh.tex_coords.as_ref().unwrap();
        let v_of_origin = mesh
            .positions
            .iter()
            .position(|p| *p == Vec3::ZERO)
            .map(|i| uvs[i].y)
            .unwrap();
        assert_relative_eq!(v_of_origin, 1.0);
        assert_eq!(scene.root.meshes, vec![0]);
    }

    #[test]
    fn missing_file_is_an_import_error() {
        let err = ObjImporter
            .import(Path::new("/nonexistent/model.obj"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Import { .. }));
    }
}
