//! Vertex input description for [`Vertex`]

use std::mem::{offset_of, size_of};

use ash::vk;
use crate::render::mesh::Vertex;

/// Binding 0, one [`Vertex`] per vertex
pub fn binding_description() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Locations 0..=2: position, colour, texture coordinates
pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 2,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, uv) as u32,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_offsets() {
        let attributes = attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();

        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(binding_description().stride, 32);
    }
}
