/// Streams a LAS/LAZ file or a simulated sensor feed through a meshing session
mod laz;
mod replay;

use std::env;
use std::path::{Path, PathBuf};

use constants::streaming::{DEFAULT_BATCH_INTERVAL_SECS, DEFAULT_BATCH_SIZE};
use point_cloud_mesher::{AlgorithmKind, PipelineConfig};
use replay::{Replay, ReplayOptions, Source};

const USAGE: &str = "Usage: point-cloud-replay <input.laz | --simulate COUNT> [options]

Options:
  --config PATH           pipeline configuration JSON
  --algorithm NAME        pointcloud | mesh | voxel | surface | marchingcubes
  --batch-size N          points per batch
  --batch-interval SECS   simulated seconds between batches
  --drop-tracking START DURATION
                          inject a tracking loss on the simulated clock
  --limit N               read at most N points from the input file
  --planes                run plane detection after the replay";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            std::process::exit(1);
        }
    };

    Replay::new(options).run()
}

fn parse_args(args: &[String]) -> Result<ReplayOptions, Box<dyn std::error::Error>> {
    let mut source = None;
    let mut config = PipelineConfig::default();
    let mut algorithm = None;
    let mut batch_size = DEFAULT_BATCH_SIZE;
    let mut batch_interval = DEFAULT_BATCH_INTERVAL_SECS as f64;
    let mut outage = None;
    let mut limit = None;
    let mut detect_planes = false;

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .cloned()
                .ok_or_else(|| format!("{} expects a value", name))
        };

        match arg.as_str() {
            "--simulate" => source = Some(Source::Simulate(value(arg)?.parse()?)),
            "--config" => config = PipelineConfig::load(Path::new(&value(arg)?))?,
            "--algorithm" => algorithm = Some(value(arg)?.parse::<AlgorithmKind>()?),
            "--batch-size" => batch_size = value(arg)?.parse()?,
            "--batch-interval" => batch_interval = value(arg)?.parse()?,
            "--drop-tracking" => {
                let start: f64 = value(arg)?.parse()?;
                let duration: f64 = value(arg)?.parse()?;
                outage = Some((start, duration));
            }
            "--limit" => limit = Some(value(arg)?.parse()?),
            "--planes" => detect_planes = true,
            "-h" | "--help" => return Err("".into()),
            path if !path.starts_with("--") && source.is_none() => {
                source = Some(Source::File(PathBuf::from(path)));
            }
            other => return Err(format!("Unexpected argument: {}", other).into()),
        }
    }

    let source = source.ok_or("No input file or --simulate count given")?;
    Ok(ReplayOptions {
        source,
        algorithm: algorithm.unwrap_or(config.reconstruction.algorithm),
        config,
        batch_size,
        batch_interval,
        outage,
        detect_planes,
        limit,
    })
}
