//! Bone registry and per-vertex skinning weights.

use crimson_core::constants::MAX_BONES;
use glam::Mat4;
use hashbrown::HashMap;

use crate::error::{RenderError, Result};
use crate::scene::SceneBone;
use crate::vertex::Vertex;

/// Model-wide bone indices, shared by every mesh of the model.
#[derive(Debug, Clone, Default)]
pub struct BoneMap {
    indices: HashMap<String, usize>,
    offsets: Vec<Mat4>,
}

impl BoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, registering it with `offset` on first sight.
    pub fn register(&mut self, name: &str, offset: Mat4) -> Result<usize> {
        if let Some(&index) = self.indices.get(name) {
            return Ok(index);
        }

        let index = self.offsets.len();
        if index >= MAX_BONES {
            return Err(RenderError::TooManyBones {
                count: index + 1,
                max: MAX_BONES,
            });
        }
        self.indices.insert(name.to_string(), index);
        self.offsets.push(offset);
        Ok(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    /// Offset matrix of a registered bone.
    pub fn offset(&self, index: usize) -> Option<Mat4> {
        self.offsets.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Write each bone's influences into the first free slot of its vertices,
/// then normalize.
///
/// A vertex already holding four influences silently drops further ones.
pub fn assign_bone_weights(
    mesh_name: &str,
    vertices: &mut [Vertex],
    bones: &[SceneBone],
    map: &mut BoneMap,
) -> Result<()> {
    for bone in bones {
        let bone_index = map.register(&bone.name, bone.offset)?;

        for influence in &bone.weights {
            let count = vertices.len();
            let vertex = vertices.get_mut(influence.vertex as usize).ok_or_else(|| {
                RenderError::VertexOutOfRange {
                    mesh: mesh_name.to_string(),
                    vertex: influence.vertex,
                    count,
                }
            })?;

            if let Some(slot) = vertex.weights.iter().position(|w| *w == 0.0) {
                vertex.bone_ids[slot] = bone_index as i32;
                vertex.weights[slot] = influence.weight;
            }
        }
    }

    normalize_weights(vertices);
    Ok(())
}

/// Scale every vertex's weights to sum to one. Zero-weight vertices are left
/// untouched.
pub fn normalize_weights(vertices: &mut [Vertex]) {
    for vertex in vertices {
        let total: f32 = vertex.weights.iter().sum();
        if total > 0.0 {
            for w in &mut vertex.weights {
                *w /= total;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::VertexWeight;
    use approx::assert_relative_eq;

    fn bone(name: &str, weights: &[(u32, f32)]) -> SceneBone {
        SceneBone {
            name: name.to_string(),
            offset: Mat4::IDENTITY,
            weights: weights
                .iter()
                .map(|&(vertex, weight)| VertexWeight { vertex, weight })
                .collect(),
        }
    }

    #[test]
    fn weights_sum_to_one_after_assignment() {
        let mut vertices = vec![Vertex::default(); 3];
        let bones = [
            bone("hip", &[(0, 0.2), (1, 1.0)]),
            bone("knee", &[(0, 0.6)]),
            bone("foot", &[(0, 0.2), (1, 3.0)]),
        ];
        let mut map = BoneMap::new();

        assign_bone_weights("leg", &mut vertices, &bones, &mut map).unwrap();

        for v in &vertices[..2] {
            assert_relative_eq!(v.weights.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        }
        assert_eq!(vertices[0].bone_ids, [0, 1, 2, -1]);
        assert_relative_eq!(vertices[1].weights[0], 0.25);
        assert_relative_eq!(vertices[1].weights[1], 0.75);

        // Untouched vertex keeps zero weights.
        assert_eq!(vertices[2], Vertex::default());
    }

    #[test]
    fn fifth_influence_is_dropped() {
        let mut vertices = vec![Vertex::default()];
        let bones: Vec<_> = (0..5).map(|i| bone(&format!("b{i}"), &[(0, 1.0)])).collect();
        let mut map = BoneMap::new();

        assign_bone_weights("m", &mut vertices, &bones, &mut map).unwrap();

        assert_eq!(vertices[0].bone_ids, [0, 1, 2, 3]);
        assert_relative_eq!(vertices[0].weights[3], 0.25);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn bones_are_shared_across_meshes() {
        let mut map = BoneMap::new();
        let first = map.register("spine", Mat4::IDENTITY).unwrap();
        let again = map.register("spine", Mat4::from_scale(glam::Vec3::splat(3.0))).unwrap();

        assert_eq!(first, again);
        assert_eq!(map.offset(first), Some(Mat4::IDENTITY));
    }

    #[test]
    fn bone_limit_fails() {
        let mut map = BoneMap::new();
        for i in 0..MAX_BONES {
            map.register(&format!("b{i}"), Mat4::IDENTITY).unwrap();
        }

        let err = map.register("one_too_many", Mat4::IDENTITY).unwrap_err();
        assert!(matches!(
            err,
            RenderError::TooManyBones { count, max } if count == MAX_BONES + 1 && max == MAX_BONES
        ));
    }

    #[test]
    fn influence_past_vertex_count_is_rejected() {
        let mut vertices = vec![Vertex::default(); 2];
        let mut map = BoneMap::new();

        let err =
            assign_bone_weights("m", &mut vertices, &[bone("b", &[(5, 1.0)])], &mut map).unwrap_err();
        assert!(matches!(err, RenderError::VertexOutOfRange { vertex: 5, count: 2, .. }));
    }
}
