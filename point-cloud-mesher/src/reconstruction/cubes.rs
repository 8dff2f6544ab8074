/// Axis aligned cube emission shared by the point splat and voxel algorithms
use bevy::color::LinearRgba;
use bevy::math::{Vec2, Vec3};

use super::Triangle;

/// Corner signs, bottom face first then top face.
const CORNERS: [Vec3; 8] = [
    Vec3::new(-1.0, -1.0, -1.0),
    Vec3::new(1.0, -1.0, -1.0),
    Vec3::new(1.0, 1.0, -1.0),
    Vec3::new(-1.0, 1.0, -1.0),
    Vec3::new(-1.0, -1.0, 1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
    Vec3::new(-1.0, 1.0, 1.0),
];

/// Outward wound quads as corner indices.
const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [3, 7, 6, 2],
    [0, 4, 7, 3],
    [1, 2, 6, 5],
];

const FACE_UVS: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
];

pub const TRIANGLES_PER_CUBE: usize = 12;

/// Append the 12 triangles of a cube spanning `center ± half_size`
pub fn push_cube(
    triangles: &mut Vec<Triangle>,
    center: Vec3,
    half_size: f32,
    color: LinearRgba,
    normal: Vec3,
) {
    let corners = CORNERS.map(|corner| center + corner * half_size);

    for [a, b, c, d] in FACES {
        triangles.push(Triangle::flat(
            [corners[a], corners[b], corners[c]],
            normal,
            color,
            [FACE_UVS[0], FACE_UVS[1], FACE_UVS[2]],
        ));
        triangles.push(Triangle::flat(
            [corners[a], corners[c], corners[d]],
            normal,
            color,
            [FACE_UVS[0], FACE_UVS[2], FACE_UVS[3]],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let mut triangles = Vec::new();
        push_cube(&mut triangles, Vec3::ZERO, 1.0, LinearRgba::WHITE, Vec3::Z);

        assert_eq!(triangles.len(), TRIANGLES_PER_CUBE);
        for triangle in &triangles {
            let centroid = (triangle.vertices[0] + triangle.vertices[1] + triangle.vertices[2]) / 3.0;
            assert!(triangle.face_normal().dot(centroid) > 0.0);
        }
    }
}
