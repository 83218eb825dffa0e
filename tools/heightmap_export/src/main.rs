use std::env;
use std::path::{Path, PathBuf};

use glam::Vec3;
use image::{ImageBuffer, Luma};
use perlinscape_core::frame::{ChunkDraw, FrameLoop};
use perlinscape_core::promoter::HeadlessBackend;
use perlinscape_core::store::ChunkStore;
use perlinscape_shared::config::TerrainSettings;
use perlinscape_shared::coords::{ChunkDims, GridCoord, BORDER};
use tracing::{debug, info};

const USAGE: &str = "Usage: heightmap_export [--settings FILE] [--radius N] [--seed N] [--chunk-size N] [OUTPUT.png]";
const MAX_FRAMES: u64 = 2_000;

type Heightmap = ImageBuffer<Luma<u16>, Vec<u16>>;

#[derive(Debug, Default, PartialEq)]
struct ExportArgs {
    output: Option<PathBuf>,
    settings: Option<PathBuf>,
    radius: Option<i32>,
    seed: Option<u32>,
    chunk_size: Option<u32>,
}

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("heightmap_export error: {err}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<ExportArgs, String> {
    let mut parsed = ExportArgs::default();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {flag}"))
        };
        match arg.as_str() {
            "--settings" => parsed.settings = Some(PathBuf::from(value("--settings")?)),
            "--radius" => parsed.radius = Some(parse_number("--radius", &value("--radius")?)?),
            "--seed" => parsed.seed = Some(parse_number("--seed", &value("--seed")?)?),
            "--chunk-size" => {
                parsed.chunk_size = Some(parse_number("--chunk-size", &value("--chunk-size")?)?)
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path => {
                if parsed.output.is_some() {
                    return Err(format!("unexpected argument {path}"));
                }
                parsed.output = Some(PathBuf::from(path));
            }
        }
    }

    Ok(parsed)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got {value:?}"))
}

fn resolve_settings(args: &ExportArgs) -> Result<TerrainSettings, String> {
    let mut settings = match args.settings.as_deref() {
        Some(path) => TerrainSettings::load(path)
            .map_err(|err| format!("failed to load {}: {err}", path.display()))?,
        None => TerrainSettings::default(),
    };
    if let Some(radius) = args.radius {
        settings.streaming.render_distance = radius;
    }
    if let Some(seed) = args.seed {
        settings.noise.seed = seed;
    }
    if let Some(size) = args.chunk_size {
        settings.streaming.chunk_width = size;
        settings.streaming.chunk_height = size;
    }
    // Only the rendered window ends up in the image.
    settings.streaming.expand_range = 0;
    Ok(settings.sanitize())
}

fn run(args: ExportArgs) -> Result<(), String> {
    let settings = resolve_settings(&args)?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from("heightmap.png"));

    let (mut frame_loop, mut loader) = FrameLoop::start(&settings, Vec3::ZERO)
        .map_err(|err| format!("failed to start streaming: {err}"))?;
    let mut backend = HeadlessBackend::new();

    let draws = loop {
        let frame = frame_loop.run_frame(Vec3::ZERO, &mut backend);
        let frames = frame_loop.frames();
        debug!(
            "Frame {frames}: {} drawn, {} holes",
            frame.stats.drawn, frame.stats.holes
        );
        if frame.stats.holes == 0 && frame.stats.failed_promotions == 0 {
            break frame.draws;
        }
        if frames >= MAX_FRAMES {
            loader.stop();
            return Err(format!(
                "window still incomplete after {frames} frames ({} holes)",
                frame.stats.holes
            ));
        }
    };
    loader.stop();
    log_loaded_extent(frame_loop.store());

    let heightmap = stitch(frame_loop.store(), &draws, frame_loop.dims())?;
    frame_loop.shutdown(&mut backend);
    save(&heightmap, &output)?;

    info!(
        "Exported {} chunks ({}x{}) to {} after {} frames",
        draws.len(),
        heightmap.width(),
        heightmap.height(),
        output.display(),
        frame_loop.frames()
    );
    Ok(())
}

fn log_loaded_extent(store: &ChunkStore) {
    let coords = store.coords();
    let Some(first) = coords.first() else {
        return;
    };
    let (mut min, mut max) = (*first, *first);
    for coord in &coords {
        min = GridCoord::new(min.x.min(coord.x), min.y.min(coord.y));
        max = GridCoord::new(max.x.max(coord.x), max.y.max(coord.y));
    }
    debug!("Store holds {} chunks from {min} to {max}", coords.len());
}

/// Places the interior samples of every drawn chunk at its world offset.
fn stitch(store: &ChunkStore, draws: &[ChunkDraw], dims: ChunkDims) -> Result<Heightmap, String> {
    let Some(first) = draws.first() else {
        return Err("no chunks to export".to_string());
    };
    let (mut min, mut max) = (first.world_offset, first.world_offset);
    for draw in draws {
        min = min.min(draw.world_offset);
        max = max.max(draw.world_offset);
    }

    let width = (max.x - min.x) as u32 + dims.width;
    let height = (max.z - min.z) as u32 + dims.height;
    let mut image = Heightmap::new(width, height);

    for draw in draws {
        let record = store
            .get(draw.coord)
            .ok_or_else(|| format!("chunk {} is not loaded", draw.coord))?;
        let heights = record.heights();
        let left = (draw.world_offset.x - min.x) as u32;
        let top = (draw.world_offset.z - min.z) as u32;
        for y in 0..dims.height {
            for x in 0..dims.width {
                let value = heights.sample(x + BORDER, y + BORDER);
                image.put_pixel(left + x, top + y, Luma([to_gray(value)]));
            }
        }
    }

    Ok(image)
}

fn to_gray(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * f32::from(u16::MAX)).round() as u16
}

fn save(image: &Heightmap, path: &Path) -> Result<(), String> {
    image
        .save(path)
        .map_err(|err| format!("failed to write {}: {err}", path.display()))
}
