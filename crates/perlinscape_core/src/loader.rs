use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use perlinscape_shared::chunk::ChunkRecord;
use perlinscape_shared::config::{ConfigError, StreamSettings};
use perlinscape_shared::coords::{square_window_nearest_first, ChunkDims, GridCoord};
use perlinscape_shared::heightfield::{HeightField, HeightFieldError};
use tracing::{debug, error, info};

use crate::events::PromotionSender;
use crate::params::ParamsCell;
use crate::store::{ChunkStore, StoreError};
use crate::viewpoint::Viewpoint;

#[derive(Debug)]
pub enum LoaderError {
    Spawn(io::Error),
    Synthesis {
        coord: GridCoord,
        source: HeightFieldError,
    },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to spawn chunk generation thread: {err}"),
            Self::Synthesis { coord, source } => {
                write!(f, "failed to synthesize chunk {coord}: {source}")
            }
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::Synthesis { source, .. } => Some(source),
        }
    }
}

/// Counters published by the loader thread.
#[derive(Debug, Default)]
pub struct LoaderStats {
    generated: AtomicU64,
    sweeps: AtomicU64,
}

impl LoaderStats {
    pub fn chunks_generated(&self) -> u64 {
        self.generated.load(Ordering::Acquire)
    }

    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed { generated: usize },
    /// The promotion queue has no consumer left.
    Disconnected,
}

/// Everything one sweep needs. Owned by the loader thread, or by a test that
/// drives sweeps by hand.
pub struct LoaderState {
    store: ChunkStore,
    queue: PromotionSender,
    viewpoint: Viewpoint,
    params: ParamsCell,
    dims: ChunkDims,
    render_distance: i32,
    expand_target: i32,
    expand_range: i32,
    stats: Arc<LoaderStats>,
}

impl LoaderState {
    pub fn new(
        store: ChunkStore,
        queue: PromotionSender,
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
            dims: settings.dims(),
            render_distance: settings.render_distance,
            expand_target: settings.expand_range,
            expand_range: 0,
            stats: Arc::new(LoaderStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<LoaderStats> {
        self.stats.clone()
    }

    /// Radius the next sweep will cover around the viewpoint's grid cell.
    pub fn radius(&self) -> i32 {
        self.render_distance + self.expand_range
    }

    /// Generates every missing chunk around the current viewpoint, nearest first.
    pub fn sweep(&mut self) -> Result<SweepOutcome, LoaderError> {
        let snapshot = self.params.snapshot();
        let center = self.dims.world_to_grid(self.viewpoint.get());
        let mut generated = 0;

        for coord in square_window_nearest_first(center, self.radius()) {
            if self.store.contains(coord) {
                continue;
            }
            let heights = HeightField::synthesize(
                snapshot.field(),
                self.dims,
                snapshot.params(),
                snapshot.revision(),
                coord,
            )
            .map_err(|source| LoaderError::Synthesis { coord, source })?;

            let id = match self.store.insert(ChunkRecord::new(coord, heights)) {
                Ok(id) => id,
                Err(StoreError::AlreadyPresent { .. }) => {
                    debug!("Chunk {coord} appeared while it was being generated");
                    continue;
                }
            };
            generated += 1;
            self.stats.generated.fetch_add(1, Ordering::AcqRel);

            if self.queue.push(id).is_err() {
                return Ok(SweepOutcome::Disconnected);
            }
        }

        if self.expand_range != self.expand_target {
            debug!(
                "Widening loader expansion range from {} to {}",
                self.expand_range, self.expand_target
            );
            self.expand_range = self.expand_target;
        }
        self.stats.sweeps.fetch_add(1, Ordering::AcqRel);

        Ok(SweepOutcome::Completed { generated })
    }

    fn run(mut self, stop: &AtomicBool) {
        info!(
            "Chunk loader started (render distance {}, expansion {})",
            self.render_distance, self.expand_target
        );
        while !stop.load(Ordering::Acquire) {
            match self.sweep() {
                Ok(SweepOutcome::Completed { generated: 0 }) => std::thread::yield_now(),
                Ok(SweepOutcome::Completed { .. }) => {}
                Ok(SweepOutcome::Disconnected) => {
                    info!("Promotion queue closed; chunk loader exiting");
                    return;
                }
                Err(err) => {
                    error!("Chunk loader stopped: {err}");
                    return;
                }
            }
        }
        info!(
            "Chunk loader stopped after {} chunks",
            self.stats.chunks_generated()
        );
    }
}

/// Handle to the background `chunk-gen` thread.
pub struct ChunkLoader {
    stop: Arc<AtomicBool>,
    stats: Arc<LoaderStats>,
    thread: Option<JoinHandle<()>>,
}

impl ChunkLoader {
    pub fn spawn(state: LoaderState) -> Result<Self, LoaderError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = state.stats();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("chunk-gen".to_string())
            .spawn(move || state.run(&thread_stop))
            .map_err(LoaderError::Spawn)?;

        Ok(Self {
            stop,
            stats,
            thread: Some(thread),
        })
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Raises the stop flag and waits for the current sweep to finish.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Chunk loader thread panicked");
            }
        }
    }
}

impl Drop for ChunkLoader {
    fn drop(&mut self) {
        self.stop();
    }
}
