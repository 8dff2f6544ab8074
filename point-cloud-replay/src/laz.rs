/// LAS/LAZ loading into scene space points
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bevy::color::LinearRgba;
use bevy::math::Vec3;
use constants::coordinate_system::transform_coordinates;
use indicatif::{ProgressBar, ProgressStyle};
use las::Reader;
use point_cloud_mesher::Point;
use point_cloud_mesher::bounds::Bounds;
use rayon::prelude::*;

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> Result<Reader, Box<dyn std::error::Error>> {
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Ok(Reader::new(buf_reader)?)
}

pub fn progress_bar(len: u64, template: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)?
            .progress_chars("▉▊▋▌▍▎▏ "),
    );
    Ok(pb)
}

/// Print header information for the input file
pub fn log_file_info(file_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = create_reader(file_path)?;
    let header = reader.header();

    println!("LAS/LAZ File Information:");
    println!("  File: {}", file_path.display());
    println!(
        "  Version: {}.{}",
        header.version().major,
        header.version().minor
    );
    println!("  Points: {}", header.number_of_points());
    println!("  Point format: {:?}", header.point_format().to_u8());
    println!(
        "  Scale factors: X={}, Y={}, Z={}",
        header.transforms().x.scale,
        header.transforms().y.scale,
        header.transforms().z.scale
    );
    println!();
    Ok(())
}

/// Read every point, convert to scene units relative to the cloud's minimum
/// corner and stamp them with timestamp zero. The replay assigns receipt times.
pub fn load_points(file_path: &Path, limit: Option<usize>) -> Result<Vec<Point>, Box<dyn std::error::Error>> {
    let mut reader = create_reader(file_path)?;
    let total_points = reader.header().number_of_points() as usize;
    let total_points = limit.map_or(total_points, |limit| limit.min(total_points));

    let pb = progress_bar(
        total_points as u64,
        "[{bar:40.cyan/blue}] {pos}/{len} points ({percent}%) {msg}",
    )?;
    pb.set_message("Loading points");

    let mut raw = Vec::with_capacity(total_points);
    for (idx, point_result) in reader.points().take(total_points).enumerate() {
        raw.push(point_result?);
        if idx % 50_000 == 0 {
            pb.set_position(idx as u64);
        }
    }
    pb.finish_with_message("Points loaded");

    let origin = raw
        .par_chunks(25_000)
        .map(|chunk| {
            chunk.iter().fold([f64::INFINITY; 3], |min, point| {
                [min[0].min(point.x), min[1].min(point.y), min[2].min(point.z)]
            })
        })
        .reduce_with(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])])
        .unwrap_or([0.0; 3]);

    let points = raw
        .par_iter()
        .map(|point| {
            let (x, y, z) = transform_coordinates(point.x, point.y, point.z, origin);
            let color = point.color.map_or(LinearRgba::WHITE, |c| {
                LinearRgba::rgb(
                    c.red as f32 / u16::MAX as f32,
                    c.green as f32 / u16::MAX as f32,
                    c.blue as f32 / u16::MAX as f32,
                )
            });
            let intensity = if point.intensity == 0 {
                1.0
            } else {
                point.intensity as f32 / u16::MAX as f32
            };
            Point::new(Vec3::new(x as f32, y as f32, z as f32), color, 0.0).with_intensity(intensity)
        })
        .collect::<Vec<_>>();

    print_bounds(&Bounds::from_points(&points));
    Ok(points)
}

fn print_bounds(bounds: &Bounds) {
    let dimensions = bounds.dimensions();
    println!("Scene bounds:");
    println!("  X: {:.2} to {:.2}", bounds.min.x, bounds.max.x);
    println!("  Y: {:.2} to {:.2}", bounds.min.y, bounds.max.y);
    println!("  Z: {:.2} to {:.2} (elevation)", bounds.min.z, bounds.max.z);
    println!(
        "  Size: {:.1} x {:.1} x {:.1}",
        dimensions.x, dimensions.y, dimensions.z
    );
}
