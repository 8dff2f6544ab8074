/// Flattened vertex buffers and Bevy mesh conversion for triangle output
use bevy::asset::RenderAssetUsages;
use bevy::color::ColorToComponents;
use bevy::prelude::Mesh;
use bevy::render::mesh::{Indices, PrimitiveTopology};

use super::Triangle;

/// Unshared vertex buffers, three vertices per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        let vertex_count = triangles.len() * 3;
        let mut data = Self {
            positions: Vec::with_capacity(vertex_count),
            normals: Vec::with_capacity(vertex_count),
            colors: Vec::with_capacity(vertex_count),
            uvs: Vec::with_capacity(vertex_count),
            indices: Vec::with_capacity(vertex_count),
        };

        for triangle in triangles {
            for i in 0..3 {
                data.indices.push(data.positions.len() as u32);
                data.positions.push(triangle.vertices[i].to_array());
                data.normals.push(triangle.normals[i].to_array());
                data.colors.push(triangle.colors[i].to_f32_array());
                data.uvs.push(triangle.uvs[i].to_array());
            }
        }

        data
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Triangle list mesh kept in both worlds so it can be re-read after upload
    pub fn into_mesh(self) -> Mesh {
        let mut mesh = Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::RENDER_WORLD | RenderAssetUsages::MAIN_WORLD,
        );
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, self.positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, self.normals);
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, self.colors);
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, self.uvs);
        mesh.insert_indices(Indices::U32(self.indices));
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::color::LinearRgba;
    use bevy::math::{Vec2, Vec3};

    #[test]
    fn triangles_flatten_into_mesh_buffers() {
        let triangle = Triangle::flat(
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            Vec3::Z,
            LinearRgba::new(0.5, 0.25, 1.0, 1.0),
            [Vec2::ZERO, Vec2::X, Vec2::Y],
        );

        let data = MeshData::from_triangles(&[triangle, triangle]);
        assert_eq!(data.triangle_count(), 2);
        assert_eq!(data.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(data.colors[4], [0.5, 0.25, 1.0, 1.0]);

        let mesh = data.into_mesh();
        assert_eq!(mesh.count_vertices(), 6);
        assert_eq!(mesh.indices().map(|indices| indices.len()), Some(6));
    }
}
