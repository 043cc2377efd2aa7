//! Vertex layout shared by every mesh pipeline.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use crimson_core::constants::MAX_BONES_PER_VERTEX;
use crimson_gpu::VertexLayout;
use std::mem::offset_of;

/// Skinned vertex.
///
/// `color` carries the surface normal; shaders treat it as a shading input.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
    /// Bone indices; `-1` marks an unused influence slot.
    pub bone_ids: [i32; MAX_BONES_PER_VERTEX],
    pub weights: [f32; MAX_BONES_PER_VERTEX],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            color: [0.0; 3],
            tex_coord: [0.0; 2],
            bone_ids: [-1; MAX_BONES_PER_VERTEX],
            weights: [0.0; MAX_BONES_PER_VERTEX],
        }
    }
}

impl Vertex {
    /// Single interleaved binding at slot 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attributes at locations 0..=4.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 5] {
        let attribute = |location: u32, format: vk::Format, offset: usize| {
            vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset: offset as u32,
            }
        };

        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, color)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex_coord)),
            attribute(3, vk::Format::R32G32B32A32_SINT, offset_of!(Self, bone_ids)),
            attribute(4, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Self, weights)),
        ]
    }

    /// Pipeline vertex input for this layout.
    pub fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![Self::binding_description()],
            attributes: Self::attribute_descriptions().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 64);
        assert_eq!(Vertex::binding_description().stride, 64);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24, 32, 48]);
    }

    #[test]
    fn default_vertex_has_no_bones() {
        let v = Vertex::default();
        assert_eq!(v.bone_ids, [-1; 4]);
        assert_eq!(v.weights, [0.0; 4]);
    }
}
