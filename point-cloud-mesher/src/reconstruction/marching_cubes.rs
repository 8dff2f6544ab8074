/// Grid based isosurface extraction over a point density field
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bevy::color::{ColorToComponents, LinearRgba, Mix};
use bevy::log::{debug, warn};
use bevy::math::{IVec3, UVec3, Vec2, Vec3, Vec4};
use constants::reconstruction::{
    DENSITY_RADIUS_FACTOR, ISO_EPSILON, MAX_GRID_RESOLUTION, MAX_SMOOTHING_TRIANGLES,
    MIN_GRID_RESOLUTION,
};
use rayon::prelude::*;

use super::tables::{CORNER_OFFSETS, EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};
use super::{Checkpoint, Triangle};
use crate::bounds::Bounds;
use crate::config::ReconstructionConfig;
use crate::point::Point;

/// Z slices sampled between progress reports.
const SLICES_PER_BATCH: usize = 8;

/// Progress fractions for each stage.
const DENSITY_PHASE: (f32, f32) = (0.0, 0.4);
const MARCH_PHASE: (f32, f32) = (0.5, 0.9);
const SMOOTH_PHASE: (f32, f32) = (0.9, 1.0);

/// Transient density sample at a grid node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub density: f32,
    pub position: Vec3,
    /// Unit normal pointing from dense toward empty space.
    pub normal: Vec3,
    pub color: LinearRgba,
}

impl Default for Voxel {
    fn default() -> Self {
        Self {
            density: 0.0,
            position: Vec3::ZERO,
            normal: Vec3::Z,
            color: LinearRgba::WHITE,
        }
    }
}

/// Regular node grid spanning `min..=max` with `resolution` nodes per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub min: Vec3,
    pub max: Vec3,
    pub resolution: UVec3,
}

impl GridLayout {
    /// Derive the grid from explicit bounds, or from point extents plus padding.
    /// Returns None when there is nothing to sample.
    pub fn for_points(points: &[Point], config: &ReconstructionConfig) -> Option<Self> {
        let clamp_resolution = |resolution: UVec3| {
            resolution.clamp(
                UVec3::splat(MIN_GRID_RESOLUTION),
                UVec3::splat(MAX_GRID_RESOLUTION),
            )
        };

        if let Some([min, max]) = config.grid_bounds {
            let bounds = Bounds::from_corners(Vec3::from_array(min), Vec3::from_array(max));
            return Some(Self {
                min: bounds.min,
                max: bounds.max,
                resolution: clamp_resolution(UVec3::splat(config.grid_resolution)),
            });
        }

        let bounds = Bounds::from_points(points);
        if !bounds.is_valid() {
            return None;
        }

        let padding = config
            .padding
            .unwrap_or(config.voxel_size * DENSITY_RADIUS_FACTOR);
        let bounds = bounds.expanded(padding.max(0.0));
        let resolution = (bounds.dimensions() / config.voxel_size).ceil().as_uvec3();

        Some(Self {
            min: bounds.min,
            max: bounds.max,
            resolution: clamp_resolution(resolution),
        })
    }

    pub fn spacing(&self) -> Vec3 {
        (self.max - self.min) / (self.resolution - UVec3::ONE).as_vec3()
    }

    pub fn node_count(&self) -> usize {
        (self.resolution.x * self.resolution.y * self.resolution.z) as usize
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let (rx, ry) = (self.resolution.x as usize, self.resolution.y as usize);
        z * rx * ry + y * rx + x
    }

    pub fn node_position(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.min + Vec3::new(x as f32, y as f32, z as f32) * self.spacing()
    }

    /// Grid space XY of a position in 0..1
    pub fn uv(&self, position: Vec3) -> Vec2 {
        let size = (self.max - self.min).truncate().max(Vec2::splat(f32::EPSILON));
        (position - self.min).truncate() / size
    }
}

/// Sampled density field.
pub struct DensityGrid {
    pub layout: GridLayout,
    pub voxels: Vec<Voxel>,
}

impl DensityGrid {
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> &Voxel {
        &self.voxels[self.layout.index(x, y, z)]
    }

    /// The 8 corners of the cell whose lowest corner is `(x, y, z)`
    pub fn cell_corners(&self, x: usize, y: usize, z: usize) -> [Voxel; 8] {
        CORNER_OFFSETS.map(|(dx, dy, dz)| *self.voxel(x + dx, y + dy, z + dz))
    }
}

/// Points bucketed by cells of the sampling radius.
struct PointBuckets<'a> {
    points: &'a [Point],
    radius: f32,
    buckets: HashMap<IVec3, Vec<usize>>,
}

impl<'a> PointBuckets<'a> {
    fn new(points: &'a [Point], radius: f32) -> Self {
        let mut buckets: HashMap<IVec3, Vec<usize>> = HashMap::new();
        for (index, point) in points.iter().enumerate() {
            buckets
                .entry((point.position / radius).floor().as_ivec3())
                .or_default()
                .push(index);
        }
        Self {
            points,
            radius,
            buckets,
        }
    }

    /// Quadratic falloff density `(1 - d/r)^2 * intensity` and weighted colour
    fn sample(&self, position: Vec3) -> Voxel {
        let key = (position / self.radius).floor().as_ivec3();
        let radius_sq = self.radius * self.radius;
        let mut density = 0.0;
        let mut weight_sum = 0.0;
        let mut color_sum = Vec4::ZERO;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let neighbour = key.saturating_add(IVec3::new(dx, dy, dz));
                    let Some(bucket) = self.buckets.get(&neighbour) else {
                        continue;
                    };
                    for &index in bucket {
                        let point = &self.points[index];
                        let distance_sq = point.position.distance_squared(position);
                        if distance_sq >= radius_sq {
                            continue;
                        }
                        let falloff = 1.0 - distance_sq.sqrt() / self.radius;
                        let weight = falloff * falloff;
                        density += weight * point.intensity;
                        weight_sum += weight;
                        color_sum += point.color.to_vec4() * weight;
                    }
                }
            }
        }

        let color = if weight_sum > 0.0 {
            LinearRgba::from_vec4(color_sum / weight_sum)
        } else {
            LinearRgba::WHITE
        };

        Voxel {
            density,
            position,
            normal: Vec3::Z,
            color,
        }
    }
}

/// Sample the density field at every node, one parallel task per Z slice
pub fn sample_density_grid(
    points: &[Point],
    layout: GridLayout,
    radius: f32,
    checkpoint: &mut Checkpoint,
) -> Option<DensityGrid> {
    let buckets = PointBuckets::new(points, radius);
    let cancel = checkpoint.cancel_flag();
    let (rx, ry, rz) = (
        layout.resolution.x as usize,
        layout.resolution.y as usize,
        layout.resolution.z as usize,
    );

    let mut voxels = Vec::with_capacity(layout.node_count());
    for batch_start in (0..rz).step_by(SLICES_PER_BATCH) {
        let batch_end = (batch_start + SLICES_PER_BATCH).min(rz);
        let slices: Option<Vec<Vec<Voxel>>> = (batch_start..batch_end)
            .into_par_iter()
            .map(|z| {
                let mut slice = Vec::with_capacity(rx * ry);
                for y in 0..ry {
                    if is_set(cancel) {
                        return None;
                    }
                    for x in 0..rx {
                        slice.push(buckets.sample(layout.node_position(x, y, z)));
                    }
                }
                Some(slice)
            })
            .collect();

        voxels.extend(slices?.into_iter().flatten());

        let done = batch_end as f32 / rz as f32;
        checkpoint.report(DENSITY_PHASE.0 + (DENSITY_PHASE.1 - DENSITY_PHASE.0) * done);
        if checkpoint.is_cancelled() {
            return None;
        }
    }

    let mut grid = DensityGrid { layout, voxels };
    assign_gradient_normals(&mut grid);
    Some(grid)
}

fn is_set(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Normals from the central difference density gradient, pointing down the gradient
fn assign_gradient_normals(grid: &mut DensityGrid) {
    let layout = grid.layout;
    let (rx, ry) = (layout.resolution.x as usize, layout.resolution.y as usize);
    let max = layout.resolution.as_ivec3() - IVec3::ONE;

    let normals: Vec<Vec3> = (0..grid.voxels.len())
        .into_par_iter()
        .map(|index| {
            let node = IVec3::new(
                (index % rx) as i32,
                ((index / rx) % ry) as i32,
                (index / (rx * ry)) as i32,
            );
            let density_at = |offset: IVec3| {
                let p = (node + offset).clamp(IVec3::ZERO, max);
                grid.voxels[layout.index(p.x as usize, p.y as usize, p.z as usize)].density
            };
            let gradient = Vec3::new(
                density_at(IVec3::X) - density_at(IVec3::NEG_X),
                density_at(IVec3::Y) - density_at(IVec3::NEG_Y),
                density_at(IVec3::Z) - density_at(IVec3::NEG_Z),
            );
            (-gradient).try_normalize().unwrap_or(Vec3::Z)
        })
        .collect();

    for (voxel, normal) in grid.voxels.iter_mut().zip(normals) {
        voxel.normal = normal;
    }
}

/// Cube index with bit `i` set when corner `i` is below the iso value
pub fn cube_index(corners: &[Voxel; 8], iso_value: f32) -> usize {
    corners
        .iter()
        .enumerate()
        .filter(|(_, corner)| corner.density < iso_value)
        .fold(0, |index, (bit, _)| index | (1 << bit))
}

/// Crossing point on the edge between two corners. Densities within
/// `ISO_EPSILON` of the iso value snap to that corner.
pub fn interpolate_edge(a: &Voxel, b: &Voxel, iso_value: f32) -> Voxel {
    if (iso_value - a.density).abs() < ISO_EPSILON {
        return *a;
    }
    if (iso_value - b.density).abs() < ISO_EPSILON {
        return *b;
    }
    if (a.density - b.density).abs() < ISO_EPSILON {
        return *a;
    }

    let mu = (iso_value - a.density) / (b.density - a.density);
    Voxel {
        density: iso_value,
        position: a.position.lerp(b.position, mu),
        normal: a.normal.lerp(b.normal, mu).try_normalize().unwrap_or(a.normal),
        color: a.color.mix(&b.color, mu),
    }
}

/// Append the triangles for one cell, returning how many were added
pub fn polygonise_cell(
    corners: &[Voxel; 8],
    iso_value: f32,
    layout: &GridLayout,
    triangles: &mut Vec<Triangle>,
) -> usize {
    let index = cube_index(corners, iso_value);
    let active_edges = EDGE_TABLE[index];
    if active_edges == 0 {
        return 0;
    }

    let mut crossings = [Voxel::default(); 12];
    for (edge, &(a, b)) in EDGE_CORNERS.iter().enumerate() {
        if active_edges & (1 << edge) != 0 {
            crossings[edge] = interpolate_edge(&corners[a], &corners[b], iso_value);
        }
    }

    let before = triangles.len();
    for edges in TRI_TABLE[index]
        .chunks_exact(3)
        .take_while(|edges| edges[0] >= 0)
    {
        let ends = [
            crossings[edges[0] as usize],
            crossings[edges[1] as usize],
            crossings[edges[2] as usize],
        ];
        let vertices = ends.map(|end| end.position);
        let normal = (vertices[1] - vertices[0])
            .cross(vertices[2] - vertices[0])
            .try_normalize()
            .unwrap_or(ends[0].normal);

        triangles.push(Triangle {
            vertices,
            normals: [normal; 3],
            colors: ends.map(|end| end.color),
            uvs: vertices.map(|vertex| layout.uv(vertex)),
        });
    }
    triangles.len() - before
}

/// March every cell of the grid
pub fn extract_surface(
    grid: &DensityGrid,
    iso_value: f32,
    checkpoint: &mut Checkpoint,
) -> Option<Vec<Triangle>> {
    let cells = (grid.layout.resolution - UVec3::ONE).as_ivec3().max(IVec3::ZERO);
    let (cx, cy, cz) = (cells.x as usize, cells.y as usize, cells.z as usize);
    let total = cx * cy * cz;
    let mut triangles = Vec::new();
    let mut cell_index = 0;

    for z in 0..cz {
        for y in 0..cy {
            for x in 0..cx {
                if !checkpoint.step(cell_index, total, MARCH_PHASE) {
                    return None;
                }
                cell_index += 1;
                polygonise_cell(
                    &grid.cell_corners(x, y, z),
                    iso_value,
                    &grid.layout,
                    &mut triangles,
                );
            }
        }
    }

    Some(triangles)
}

/// Average each vertex normal with all vertex normals closer than
/// `smoothing_factor`. Quadratic in triangle count.
pub fn smooth_normals(
    triangles: &mut [Triangle],
    smoothing_factor: f32,
    checkpoint: &mut Checkpoint,
) -> Option<()> {
    let source: Vec<Triangle> = triangles.to_vec();
    let threshold_sq = smoothing_factor * smoothing_factor;

    for (i, triangle) in triangles.iter_mut().enumerate() {
        if !checkpoint.step(i, source.len(), SMOOTH_PHASE) {
            return None;
        }
        for j in 0..3 {
            let vertex = source[i].vertices[j];
            let mut sum = source[i].normals[j];
            let mut samples = 1.0;

            for (k, other) in source.iter().enumerate() {
                if k == i {
                    continue;
                }
                for l in 0..3 {
                    if vertex.distance_squared(other.vertices[l]) < threshold_sq {
                        sum += other.normals[l];
                        samples += 1.0;
                    }
                }
            }

            triangle.normals[j] = (sum / samples)
                .try_normalize()
                .unwrap_or(source[i].normals[j]);
        }
    }

    Some(())
}

pub fn generate(
    points: &[Point],
    config: &ReconstructionConfig,
    checkpoint: &mut Checkpoint,
) -> Option<Vec<Triangle>> {
    if points.is_empty() {
        warn!("Isosurface extraction skipped: empty point set");
        return Some(Vec::new());
    }
    let Some(layout) = GridLayout::for_points(points, config) else {
        return Some(Vec::new());
    };

    let radius = config.voxel_size * DENSITY_RADIUS_FACTOR;
    let grid = sample_density_grid(points, layout, radius, checkpoint)?;
    checkpoint.report(MARCH_PHASE.0);

    let mut triangles = extract_surface(&grid, config.iso_value, checkpoint)?;

    if config.smooth_normals && config.smoothing_factor > 0.0 {
        if triangles.len() > MAX_SMOOTHING_TRIANGLES {
            warn!(
                "Normal smoothing skipped for {} triangles (limit {})",
                triangles.len(),
                MAX_SMOOTHING_TRIANGLES
            );
        } else {
            smooth_normals(&mut triangles, config.smoothing_factor, checkpoint)?;
        }
    }

    debug!(
        "Marching cubes generated {} triangles from {} voxels",
        triangles.len(),
        grid.voxels.len()
    );
    Some(triangles)
}
