//! Plain-data scene description produced by importers.
//!
//! The renderer never sees a file format: an importer turns a file into
//! [`SceneData`], and everything downstream works on these types.

use glam::{Mat4, Quat, Vec2, Vec3};
use std::path::Path;

use crate::error::Result;

/// A node in the scene hierarchy.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    /// Transform relative to the parent node.
    pub transform: Mat4,
    /// Indices into [`SceneData::meshes`].
    pub meshes: Vec<usize>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Depth-first search by name.
    pub fn find(&self, name: &str) -> Option<&SceneNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

/// Influence of one bone on one vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexWeight {
    pub vertex: u32,
    pub weight: f32,
}

/// A bone as referenced by a single mesh.
#[derive(Debug, Clone)]
pub struct SceneBone {
    pub name: String,
    /// Mesh space to bone space.
    pub offset: Mat4,
    pub weights: Vec<VertexWeight>,
}

/// Triangulated mesh geometry.
#[derive(Debug, Clone, Default)]
pub struct SceneMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Same length as `positions`, or empty.
    pub normals: Vec<Vec3>,
    /// First UV channel, if the mesh has one.
    pub tex_coords: Option<Vec<Vec2>>,
    /// Triangle list.
    pub indices: Vec<u32>,
    pub material_index: Option<usize>,
    pub bones: Vec<SceneBone>,
}

impl SceneMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Surface description; only the diffuse texture is consumed.
#[derive(Debug, Clone, Default)]
pub struct SceneMaterial {
    pub name: String,
    /// Texture path as written in the source file.
    pub diffuse_texture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorKey {
    pub time: f64,
    pub value: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuatKey {
    pub time: f64,
    pub value: Quat,
}

/// Keyframes driving one node.
#[derive(Debug, Clone, Default)]
pub struct NodeChannel {
    pub node_name: String,
    pub positions: Vec<VectorKey>,
    pub rotations: Vec<QuatKey>,
    pub scalings: Vec<VectorKey>,
}

/// A keyframed animation, timed in ticks.
#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: String,
    pub duration: f64,
    /// Zero when the source file does not specify a rate.
    pub ticks_per_second: f64,
    pub channels: Vec<NodeChannel>,
}

impl Animation {
    pub fn channel(&self, node_name: &str) -> Option<&NodeChannel> {
        self.channels.iter().find(|c| c.node_name == node_name)
    }
}

/// A fully imported scene.
#[derive(Debug, Clone)]
pub struct SceneData {
    pub root: SceneNode,
    pub meshes: Vec<SceneMesh>,
    pub materials: Vec<SceneMaterial>,
    pub animations: Vec<Animation>,
}

/// Turns a file into [`SceneData`].
pub trait SceneImporter {
    fn import(&self, path: &Path) -> Result<SceneData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_walks_children() {
        let mut root = SceneNode::new("root");
        let mut arm = SceneNode::new("arm");
        arm.children.push(SceneNode::new("hand"));
        root.children.push(arm);
        root.children.push(SceneNode::new("leg"));

        assert_eq!(root.find("hand").map(|n| n.name.as_str()), Some("hand"));
        assert_eq!(root.find("leg").map(|n| n.name.as_str()), Some("leg"));
        assert!(root.find("tail").is_none());
    }

    #[test]
    fn channel_lookup_by_node_name() {
        let animation = Animation {
            name: "walk".into(),
            duration: 10.0,
            ticks_per_second: 0.0,
            channels: vec![NodeChannel {
                node_name: "hip".into(),
                ..Default::default()
            }],
        };

        assert!(animation.channel("hip").is_some());
        assert!(animation.channel("knee").is_none());
    }
}
