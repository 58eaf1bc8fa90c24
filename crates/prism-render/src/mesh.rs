//! Vertex layout and the demo mesh.

use ash::vk;
use glam::{Vec2, Vec3};
use prism_gpu::{GpuBuffer, GpuContext, TransferContext, DEVICE_LOCAL};
use std::mem::{offset_of, size_of};

use crate::error::Result;

/// Vertex as consumed by the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos: Vec3::from_array(pos),
            color: Vec3::from_array(color),
            tex_coord: Vec2::from_array(tex_coord),
        }
    }

    /// Single interleaved binding at index 0.
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Position, color and texture coordinate at locations 0, 1 and 2.
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, tex_coord) as u32,
            },
        ]
    }
}

/// Indexed triangle list.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl Mesh {
    /// Two stacked textured quads, half a unit apart along Z.
    pub fn demo() -> Self {
        let quad = |z: f32| {
            [
                Vertex::new([-0.5, -0.5, z], [1.0, 0.0, 0.0], [0.0, 0.0]),
                Vertex::new([0.5, -0.5, z], [0.0, 1.0, 0.0], [1.0, 0.0]),
                Vertex::new([0.5, 0.5, z], [0.0, 0.0, 1.0], [1.0, 1.0]),
                Vertex::new([-0.5, 0.5, z], [1.0, 1.0, 1.0], [0.0, 1.0]),
            ]
        };

        let mut vertices = quad(0.0).to_vec();
        vertices.extend(quad(-0.5));

        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }
}

/// Device-local vertex and index buffers for one mesh.
pub struct MeshBuffers {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl MeshBuffers {
    /// Upload `mesh` through staging buffers.
    pub fn upload(gpu: &GpuContext, transfer: &TransferContext, mesh: &Mesh) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let vertex_buffer = gpu.allocator().create_buffer(
            vertex_bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            DEVICE_LOCAL,
            "vertex buffer",
        )?;
        transfer.upload_via_staging(&vertex_buffer, vertex_bytes)?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);
        let index_buffer = gpu.allocator().create_buffer(
            index_bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER,
            DEVICE_LOCAL,
            "index buffer",
        )?;
        transfer.upload_via_staging(&index_buffer, index_bytes)?;

        tracing::debug!(
            "Uploaded mesh: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        })
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub const fn index_type() -> vk::IndexType {
        vk::IndexType::UINT16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 32);

        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);

        assert_eq!(Vertex::binding_descriptions()[0].stride, 32);
    }

    #[test]
    fn demo_mesh_indices_are_in_range() {
        let mesh = Mesh::demo();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices.len(), 12);
        assert!(mesh
            .indices
            .iter()
            .all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn demo_quads_are_stacked_along_z() {
        let mesh = Mesh::demo();
        assert!(mesh.vertices[..4].iter().all(|v| v.pos.z == 0.0));
        assert!(mesh.vertices[4..].iter().all(|v| v.pos.z == -0.5));
        assert_eq!(mesh.vertices[2].tex_coord, Vec2::new(1.0, 1.0));
    }
}
