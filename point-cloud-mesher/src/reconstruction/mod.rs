//! Surface reconstruction algorithms.
//!
//! Every algorithm is a pure function of `(points, config)` producing a
//! triangle list. The [`Checkpoint`] hook lets the same code run inline on the
//! consumer thread or inside a scheduler job with cooperative cancellation.

mod checkpoint;
mod cubes;
pub mod fan;
pub mod marching_cubes;
pub mod mesh_data;
pub mod point_cloud;
mod tables;
pub mod voxel;

use std::fmt;
use std::str::FromStr;

use bevy::color::LinearRgba;
use bevy::log::warn;
use bevy::math::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::ReconstructionConfig;
use crate::error::MesherError;
use crate::point::Point;

pub use checkpoint::Checkpoint;
pub use mesh_data::MeshData;

/// Reconstruction algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    #[default]
    PointCloud,
    Mesh,
    Voxel,
    /// Alias of `Mesh`.
    Surface,
    MarchingCubes,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::PointCloud => "pointcloud",
            AlgorithmKind::Mesh => "mesh",
            AlgorithmKind::Voxel => "voxel",
            AlgorithmKind::Surface => "surface",
            AlgorithmKind::MarchingCubes => "marchingcubes",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = MesherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalised.as_str() {
            "pointcloud" => Ok(AlgorithmKind::PointCloud),
            "mesh" => Ok(AlgorithmKind::Mesh),
            "voxel" => Ok(AlgorithmKind::Voxel),
            "surface" => Ok(AlgorithmKind::Surface),
            "marchingcubes" => Ok(AlgorithmKind::MarchingCubes),
            _ => Err(MesherError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Output triangle with per-vertex attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertices: [Vec3; 3],
    pub normals: [Vec3; 3],
    pub colors: [LinearRgba; 3],
    pub uvs: [Vec2; 3],
}

impl Triangle {
    /// Size of a triangle in bytes, used for memory estimates
    pub const SIZE_BYTES: usize = std::mem::size_of::<Triangle>();

    /// Triangle with a single normal and colour on all three vertices
    pub fn flat(vertices: [Vec3; 3], normal: Vec3, color: LinearRgba, uvs: [Vec2; 3]) -> Self {
        Self {
            vertices,
            normals: [normal; 3],
            colors: [color; 3],
            uvs,
        }
    }

    /// Unit normal from the winding order, zero when degenerate
    pub fn face_normal(&self) -> Vec3 {
        let [a, b, c] = self.vertices;
        (b - a).cross(c - a).normalize_or_zero()
    }
}

/// Run an algorithm with cancellation and progress reporting.
/// Returns `None` when the checkpoint observed a cancellation request.
pub fn reconstruct(
    kind: AlgorithmKind,
    points: &[Point],
    config: &ReconstructionConfig,
    checkpoint: &mut Checkpoint,
) -> Option<Vec<Triangle>> {
    checkpoint.report(0.0);
    if checkpoint.is_cancelled() {
        return None;
    }

    let triangles = match kind {
        AlgorithmKind::PointCloud => point_cloud::generate(points, config, checkpoint)?,
        AlgorithmKind::Mesh | AlgorithmKind::Surface => fan::generate(points, checkpoint)?,
        AlgorithmKind::Voxel => voxel::generate(points, config, checkpoint)?,
        AlgorithmKind::MarchingCubes => marching_cubes::generate(points, config, checkpoint)?,
    };

    checkpoint.complete();
    Some(triangles)
}

/// Run an algorithm inline to completion
pub fn generate(kind: AlgorithmKind, points: &[Point], config: &ReconstructionConfig) -> Vec<Triangle> {
    reconstruct(kind, points, config, &mut Checkpoint::inline()).unwrap_or_default()
}

/// Run an algorithm selected by name, returning nothing for unknown names
pub fn generate_named(name: &str, points: &[Point], config: &ReconstructionConfig) -> Vec<Triangle> {
    match name.parse::<AlgorithmKind>() {
        Ok(kind) => generate(kind, points, config),
        Err(err) => {
            warn!("{}", err);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_parse_case_insensitively() {
        assert_eq!("MarchingCubes".parse::<AlgorithmKind>().ok(), Some(AlgorithmKind::MarchingCubes));
        assert_eq!("point_cloud".parse::<AlgorithmKind>().ok(), Some(AlgorithmKind::PointCloud));
        assert_eq!("SURFACE".parse::<AlgorithmKind>().ok(), Some(AlgorithmKind::Surface));
        assert!("delaunay".parse::<AlgorithmKind>().is_err());
    }

    #[test]
    fn algorithm_kind_serialises_lowercase() {
        let json = serde_json::to_string(&AlgorithmKind::MarchingCubes).unwrap();
        assert_eq!(json, "\"marchingcubes\"");
        let kind: AlgorithmKind = serde_json::from_str("\"voxel\"").unwrap();
        assert_eq!(kind, AlgorithmKind::Voxel);
    }

    #[test]
    fn unknown_name_yields_empty_result() {
        let points = vec![Point::default(); 4];
        let triangles = generate_named("nurbs", &points, &ReconstructionConfig::default());
        assert!(triangles.is_empty());
    }
}
