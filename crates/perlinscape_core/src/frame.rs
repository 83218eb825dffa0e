use std::fmt;
use std::time::{Duration, Instant};

use glam::Vec3;
use perlinscape_shared::chunk::{ChunkRecord, GpuHandle};
use perlinscape_shared::config::{ConfigError, NoiseParams, StreamSettings, TerrainSettings};
use perlinscape_shared::coords::{square_window_nearest_first, ChunkDims, GridCoord};
use perlinscape_shared::heightfield::HeightField;
use tracing::{debug, info, warn};

use crate::events::{promotion_channel, PromotionReceiver};
use crate::loader::{ChunkLoader, LoaderError, LoaderState};
use crate::params::{ParamsCell, ParamsSnapshot};
use crate::promoter::{GpuPromoter, TextureBackend};
use crate::store::ChunkStore;
use crate::viewpoint::Viewpoint;

/// Stale chunks rebuilt inline per frame; the rest keep their old heights
/// until a later frame reaches them.
pub const MAX_RESYNTHESIS_PER_FRAME: u32 = 4;

#[derive(Debug)]
pub enum StartError {
    Config(ConfigError),
    Loader(LoaderError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid terrain settings: {err}"),
            Self::Loader(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Loader(err) => Some(err),
        }
    }
}

impl From<ConfigError> for StartError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<LoaderError> for StartError {
    fn from(err: LoaderError) -> Self {
        Self::Loader(err)
    }
}

/// One chunk the renderer should draw this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkDraw {
    pub coord: GridCoord,
    pub handle: GpuHandle,
    pub world_offset: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawn: u32,
    /// Window cells still missing when the frame's wait budget ran out.
    pub holes: u32,
    pub waits: u32,
    pub inline_promotions: u32,
    pub queued_promotions: u32,
    pub failed_promotions: u32,
    pub resynthesized: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub draws: Vec<ChunkDraw>,
    pub stats: FrameStats,
}

/// Per-frame consumer side of terrain streaming. Lives on the render thread.
pub struct FrameLoop {
    store: ChunkStore,
    queue: PromotionReceiver,
    viewpoint: Viewpoint,
    params: ParamsCell,
    promoter: GpuPromoter,
    dims: ChunkDims,
    render_distance: i32,
    wait_budget: Duration,
    frames: u64,
}

impl FrameLoop {
    pub fn new(
        store: ChunkStore,
        queue: PromotionReceiver,
        viewpoint: Viewpoint,
        params: ParamsCell,
        settings: &StreamSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            store,
            queue,
            viewpoint,
            params,
            promoter: GpuPromoter::new(),
            dims: settings.dims(),
            render_distance: settings.render_distance,
            wait_budget: settings.wait_timeout(),
            frames: 0,
        })
    }

    /// Wires a store, promotion queue and background loader around `position`.
    pub fn start(
        settings: &TerrainSettings,
        position: Vec3,
    ) -> Result<(Self, ChunkLoader), StartError> {
        settings.streaming.validate()?;
        let params = ParamsCell::new(settings.noise.clone())?;
        let store = ChunkStore::new();
        let viewpoint = Viewpoint::new(position);
        let (queue_tx, queue_rx) = promotion_channel();

        let loader = ChunkLoader::spawn(LoaderState::new(
            store.clone(),
            queue_tx,
            viewpoint.clone(),
            params.clone(),
            &settings.streaming,
        )?)?;
        let frame_loop = Self::new(store, queue_rx, viewpoint, params, &settings.streaming)?;
        info!(
            "Terrain streaming started: {}x{} chunks, render distance {}",
            frame_loop.dims.width, frame_loop.dims.height, frame_loop.render_distance
        );
        Ok((frame_loop, loader))
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn params(&self) -> &ParamsCell {
        &self.params
    }

    pub fn dims(&self) -> ChunkDims {
        self.dims
    }

    pub fn render_distance(&self) -> i32 {
        self.render_distance
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pending_promotions(&self) -> usize {
        self.queue.pending() + self.promoter.pending_retries()
    }

    pub fn run_frame<B: TextureBackend + ?Sized>(
        &mut self,
        position: Vec3,
        backend: &mut B,
    ) -> FrameOutput {
        self.frames += 1;
        self.viewpoint.set(position);
        let mut stats = FrameStats::default();

        if let Some(result) = self.promoter.drain_one(&self.queue, &self.store, backend) {
            match result {
                Ok(_) => stats.queued_promotions += 1,
                Err(_) => stats.failed_promotions += 1,
            }
        }

        let snapshot = self.params.snapshot();
        let center = self.dims.world_to_grid(position);
        let deadline = Instant::now() + self.wait_budget;
        let mut draws = Vec::new();

        for coord in square_window_nearest_first(center, self.render_distance) {
            let record = match self.store.get(coord) {
                Some(record) => record,
                None => {
                    stats.waits += 1;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.store.wait_for(coord, remaining) {
                        Some(record) => record,
                        None => {
                            stats.holes += 1;
                            continue;
                        }
                    }
                }
            };

            if record.revision() < snapshot.revision()
                && stats.resynthesized < MAX_RESYNTHESIS_PER_FRAME
                && self.resynthesize(&record, &snapshot, backend)
            {
                stats.resynthesized += 1;
            }

            let handle = match record.gpu_handle() {
                Some(handle) => handle,
                None => match self.promoter.promote(&record, backend) {
                    Ok(handle) => {
                        stats.inline_promotions += 1;
                        handle
                    }
                    Err(_) => {
                        stats.failed_promotions += 1;
                        continue;
                    }
                },
            };

            draws.push(ChunkDraw {
                coord,
                handle,
                world_offset: self.dims.grid_origin(coord),
            });
        }

        stats.drawn = draws.len() as u32;
        if stats.holes > 0 {
            debug!(
                "Frame {}: {} of {} chunks not ready around {center}",
                self.frames,
                stats.holes,
                stats.holes + stats.drawn + stats.failed_promotions
            );
        }
        FrameOutput { draws, stats }
    }

    /// Publishes new noise parameters and rebuilds every loaded chunk with them.
    /// Returns how many chunks were re-synthesized.
    pub fn regenerate<B: TextureBackend + ?Sized>(
        &mut self,
        params: NoiseParams,
        backend: &mut B,
    ) -> Result<usize, ConfigError> {
        let snapshot = self.params.replace(params)?;
        let started = Instant::now();
        let mut rebuilt = 0;
        for record in self.store.records() {
            if record.revision() < snapshot.revision()
                && self.resynthesize(&record, &snapshot, backend)
            {
                rebuilt += 1;
            }
        }
        info!(
            "Regenerated {rebuilt} chunks at revision {} in {:.1} ms",
            snapshot.revision(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(rebuilt)
    }

    /// Releases every texture created for stored chunks.
    pub fn shutdown<B: TextureBackend + ?Sized>(&mut self, backend: &mut B) {
        self.promoter.release_all(&self.store, backend);
    }

    fn resynthesize<B: TextureBackend + ?Sized>(
        &self,
        record: &ChunkRecord,
        snapshot: &ParamsSnapshot,
        backend: &mut B,
    ) -> bool {
        let heights = match HeightField::synthesize(
            snapshot.field(),
            self.dims,
            snapshot.params(),
            snapshot.revision(),
            record.coord(),
        ) {
            Ok(heights) => heights,
            Err(err) => {
                warn!("Failed to regenerate chunk {}: {err}", record.coord());
                return false;
            }
        };
        record.replace_heights(heights);

        if let Some(handle) = record.gpu_handle() {
            let heights = record.heights();
            if let Err(err) = backend.update_height_texture(handle, &heights) {
                warn!("Failed to re-upload chunk {}: {err}", record.coord());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glam::Vec3;
    use perlinscape_shared::chunk::ChunkRecord;
    use perlinscape_shared::config::{ConfigError, NoiseParams, StreamSettings, TerrainSettings};
    use perlinscape_shared::coords::ChunkDims;
    use perlinscape_shared::heightfield::HeightField;
    use perlinscape_shared::noise_field::NoiseField;
    use perlinscape_shared::coords::{square_window, GridCoord};

    use super::{FrameLoop, StartError, MAX_RESYNTHESIS_PER_FRAME};
    use crate::events::promotion_channel;
    use crate::loader::LoaderState;
    use crate::params::ParamsCell;
    use crate::promoter::HeadlessBackend;
    use crate::store::ChunkStore;
    use crate::viewpoint::Viewpoint;

    fn settings(render_distance: i32) -> StreamSettings {
        StreamSettings {
            render_distance,
            expand_range: 1,
            chunk_width: 16,
            chunk_height: 16,
            wait_timeout_ms: 10,
        }
    }

    struct Harness {
        store: ChunkStore,
        loader: LoaderState,
        frame_loop: FrameLoop,
    }

    fn harness(render_distance: i32) -> Harness {
        let store = ChunkStore::new();
        let (tx, rx) = promotion_channel();
        let viewpoint = Viewpoint::default();
        let params = ParamsCell::new(NoiseParams::default()).expect("params");
        let settings = settings(render_distance);
        Harness {
            store: store.clone(),
            loader: LoaderState::new(
                store.clone(),
                tx,
                viewpoint.clone(),
                params.clone(),
                &settings,
            )
            .expect("loader state"),
            frame_loop: FrameLoop::new(store, rx, viewpoint, params, &settings)
                .expect("frame loop"),
        }
    }

    #[test]
    fn one_frame_after_first_sweep_realizes_whole_window() {
        let mut h = harness(3);
        let mut backend = HeadlessBackend::new();

        h.loader.sweep().expect("sweep");
        assert_eq!(h.store.len(), 49);
        assert!(h.store.records().iter().all(|record| !record.is_realized()));

        let output = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);

        assert!(square_window(GridCoord::ORIGIN, 3).all(|coord| h
            .store
            .get(coord)
            .is_some_and(|record| record.is_realized())));
        assert_eq!(output.draws.len(), 49);
        assert_eq!(output.stats.holes, 0);
        assert_eq!(output.stats.queued_promotions, 1);
        assert_eq!(output.stats.inline_promotions, 48);
        assert_eq!(backend.created(), 49);
    }

    #[test]
    fn draws_are_offset_by_chunk_size() {
        let mut h = harness(1);
        let mut backend = HeadlessBackend::new();
        h.loader.sweep().expect("sweep");

        let output = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        let draw = output
            .draws
            .iter()
            .find(|draw| draw.coord == GridCoord::new(-1, 1))
            .expect("corner drawn");
        assert_eq!(draw.world_offset, Vec3::new(-16.0, 0.0, 16.0));
        assert_eq!(output.draws[0].coord, GridCoord::ORIGIN);
    }

    #[test]
    fn missing_chunks_become_holes_within_wait_budget() {
        let mut h = harness(1);
        let mut backend = HeadlessBackend::new();

        let output = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert!(output.draws.is_empty());
        assert_eq!(output.stats.holes, 9);
        assert_eq!(output.stats.waits, 9);
    }

    #[test]
    fn queue_is_drained_one_entry_per_frame() {
        let mut h = harness(0);
        let mut backend = HeadlessBackend::new();
        h.loader.sweep().expect("first sweep");
        h.loader.sweep().expect("expanded sweep");
        assert_eq!(h.frame_loop.pending_promotions(), 9);

        let first = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert_eq!(first.stats.queued_promotions, 1);
        assert_eq!(first.stats.inline_promotions, 0);
        assert_eq!(h.frame_loop.pending_promotions(), 8);

        h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert_eq!(h.frame_loop.pending_promotions(), 7);
    }

    #[test]
    fn failed_promotion_is_retried_next_frame() {
        let mut h = harness(0);
        let mut backend = HeadlessBackend::new();
        h.loader.sweep().expect("sweep");

        backend.fail_next(2);
        let failed = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert!(failed.draws.is_empty());
        assert_eq!(failed.stats.failed_promotions, 2);
        assert!(h
            .store
            .get(GridCoord::ORIGIN)
            .is_some_and(|record| !record.is_realized()));

        let retried = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert_eq!(retried.draws.len(), 1);
        assert_eq!(retried.stats.queued_promotions, 1);
    }

    #[test]
    fn regenerate_rebuilds_loaded_chunks_and_keeps_handles() {
        let mut h = harness(1);
        let mut backend = HeadlessBackend::new();
        h.loader.sweep().expect("sweep");
        let output = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        let origin = h.store.get(GridCoord::ORIGIN).expect("origin loaded");
        let before = origin.heights().samples().to_vec();
        let handle = origin.gpu_handle().expect("realized");

        let rebuilt = h
            .frame_loop
            .regenerate(
                NoiseParams {
                    scale: 0.05,
                    layer_count: 3,
                    ..NoiseParams::default()
                },
                &mut backend,
            )
            .expect("regenerate");

        assert_eq!(rebuilt, 9);
        assert_ne!(origin.heights().samples(), before.as_slice());
        assert_eq!(origin.gpu_handle(), Some(handle));
        assert_eq!(origin.revision(), 1);
        assert_eq!(backend.updated(), output.draws.len() as u64);
        assert_eq!(backend.texture(handle).map(|texture| texture.revision), Some(1));
        assert!(!h.store.contains(GridCoord::new(5, 5)));
    }

    #[test]
    fn regenerate_rejects_invalid_params() {
        let mut h = harness(0);
        let mut backend = HeadlessBackend::new();
        let result = h.frame_loop.regenerate(
            NoiseParams {
                layer_count: 0,
                ..NoiseParams::default()
            },
            &mut backend,
        );
        assert!(result.is_err());
        assert_eq!(h.frame_loop.params().revision(), 0);
    }

    fn stale_record(coord: GridCoord) -> ChunkRecord {
        let params = NoiseParams::default();
        let heights = HeightField::synthesize(
            &NoiseField::new(params.seed),
            ChunkDims::new(16, 16),
            &params,
            0,
            coord,
        )
        .expect("synthesize");
        ChunkRecord::new(coord, heights)
    }

    #[test]
    fn stale_chunks_are_refreshed_when_drawn() {
        let mut h = harness(0);
        let mut backend = HeadlessBackend::new();
        h.frame_loop
            .params()
            .replace(NoiseParams {
                seed: 9,
                ..NoiseParams::default()
            })
            .expect("replace");
        h.store
            .insert(stale_record(GridCoord::ORIGIN))
            .expect("insert stale record");

        let output = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert_eq!(output.stats.resynthesized, 1);
        assert_eq!(h.store.get(GridCoord::ORIGIN).map(|r| r.revision()), Some(1));
    }

    #[test]
    fn start_streams_in_background_until_window_is_drawn() {
        let settings = TerrainSettings {
            streaming: StreamSettings {
                render_distance: 2,
                expand_range: 0,
                chunk_width: 16,
                chunk_height: 16,
                wait_timeout_ms: 200,
            },
            ..TerrainSettings::default()
        };
        let (mut frame_loop, mut loader) =
            FrameLoop::start(&settings, Vec3::ZERO).expect("start streaming");
        let mut backend = HeadlessBackend::new();

        let mut drawn = 0;
        for _ in 0..200 {
            drawn = frame_loop.run_frame(Vec3::ZERO, &mut backend).draws.len();
            if drawn == 25 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        loader.stop();
        frame_loop.shutdown(&mut backend);

        assert_eq!(drawn, 25);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn stale_refresh_is_spread_over_frames() {
        let mut h = harness(1);
        let mut backend = HeadlessBackend::new();
        h.frame_loop
            .params()
            .replace(NoiseParams {
                seed: 9,
                ..NoiseParams::default()
            })
            .expect("replace");
        for coord in square_window(GridCoord::ORIGIN, 1) {
            h.store.insert(stale_record(coord)).expect("insert stale record");
        }

        let first = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
        assert_eq!(first.stats.resynthesized, MAX_RESYNTHESIS_PER_FRAME);
        assert_eq!(first.draws.len(), 9);
        // Nearest cells are refreshed first.
        assert_eq!(h.store.get(GridCoord::ORIGIN).map(|r| r.revision()), Some(1));

        let mut refreshed = first.stats.resynthesized;
        while refreshed < 9 {
            let frame = h.frame_loop.run_frame(Vec3::ZERO, &mut backend);
            assert!(frame.stats.resynthesized > 0);
            assert!(frame.stats.resynthesized <= MAX_RESYNTHESIS_PER_FRAME);
            refreshed += frame.stats.resynthesized;
        }
        assert_eq!(refreshed, 9);
        assert_eq!(h.frame_loop.frames(), 3);
        assert!(h.store.records().iter().all(|record| record.revision() == 1));
    }

    #[test]
    fn start_rejects_zero_sized_chunks() {
        let terrain = TerrainSettings {
            streaming: StreamSettings {
                chunk_width: 0,
                ..settings(1)
            },
            ..TerrainSettings::default()
        };

        let result = FrameLoop::start(&terrain, Vec3::new(10.0, 0.0, 0.0));
        assert!(matches!(
            result,
            Err(StartError::Config(ConfigError::ZeroChunkSize { width: 0, .. }))
        ));

        let (_, rx) = promotion_channel();
        let params = ParamsCell::new(NoiseParams::default()).expect("params");
        let negative = StreamSettings {
            render_distance: -1,
            ..settings(1)
        };
        assert!(matches!(
            FrameLoop::new(ChunkStore::new(), rx, Viewpoint::default(), params, &negative),
            Err(ConfigError::NegativeRenderDistance(-1))
        ));
    }

    #[test]
    fn frame_far_from_origin_draws_clipped_window() {
        let mut h = harness(1);
        let mut backend = HeadlessBackend::new();
        let far = Vec3::new(1.0e30, 0.0, 0.0);

        let empty = h.frame_loop.run_frame(far, &mut backend);
        assert_eq!(empty.stats.holes, 6);

        h.loader.sweep().expect("edge sweep");
        let output = h.frame_loop.run_frame(far, &mut backend);
        assert_eq!(output.stats.holes, 0);
        assert_eq!(output.draws.len(), 6);
        assert_eq!(output.draws[0].coord, GridCoord::new(i32::MAX, 0));
    }
}
