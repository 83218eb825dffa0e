use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use perlinscape_shared::chunk::{ChunkRecord, GpuHandle};
use perlinscape_shared::coords::GridCoord;
use perlinscape_shared::heightfield::HeightField;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::events::PromotionReceiver;
use crate::store::{ChunkId, ChunkStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteError {
    Backend(String),
    UnknownHandle(GpuHandle),
}

impl fmt::Display for PromoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(message) => write!(f, "texture backend failed: {message}"),
            Self::UnknownHandle(handle) => write!(f, "unknown height texture {handle}"),
        }
    }
}

impl std::error::Error for PromoteError {}

/// Where height fields become GPU textures. Only ever called on the render thread.
pub trait TextureBackend {
    fn create_height_texture(
        &mut self,
        coord: GridCoord,
        heights: &HeightField,
    ) -> Result<GpuHandle, PromoteError>;

    fn update_height_texture(
        &mut self,
        handle: GpuHandle,
        heights: &HeightField,
    ) -> Result<(), PromoteError>;

    fn release(&mut self, handle: GpuHandle);
}

/// Turns stored chunk records into GPU textures.
///
/// Not `Send`: it lives on the thread that owns the graphics context.
pub struct GpuPromoter {
    retry: VecDeque<ChunkId>,
    promoted: u64,
    failures: u64,
    _render_thread: PhantomData<*const ()>,
}

impl Default for GpuPromoter {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuPromoter {
    pub fn new() -> Self {
        Self {
            retry: VecDeque::new(),
            promoted: 0,
            failures: 0,
            _render_thread: PhantomData,
        }
    }

    pub fn promoted(&self) -> u64 {
        self.promoted
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    /// Uploads `record` unless it already has a texture. On failure the record
    /// stays unrealized so a later frame can try again.
    pub fn promote<B: TextureBackend + ?Sized>(
        &mut self,
        record: &ChunkRecord,
        backend: &mut B,
    ) -> Result<GpuHandle, PromoteError> {
        if let Some(handle) = record.gpu_handle() {
            return Ok(handle);
        }

        let created = {
            let heights = record.heights();
            backend.create_height_texture(record.coord(), &heights)
        };
        let handle = match created {
            Ok(handle) => handle,
            Err(err) => {
                self.failures += 1;
                warn!("Failed to promote chunk {}: {err}", record.coord());
                return Err(err);
            }
        };

        match record.realize(handle) {
            Ok(()) => {
                self.promoted += 1;
                Ok(handle)
            }
            Err(existing) => {
                backend.release(handle);
                Ok(existing)
            }
        }
    }

    /// Promotes at most one queued chunk. Chunks whose promotion failed earlier
    /// are retried before new queue entries.
    pub fn drain_one<B: TextureBackend + ?Sized>(
        &mut self,
        queue: &PromotionReceiver,
        store: &ChunkStore,
        backend: &mut B,
    ) -> Option<Result<GpuHandle, PromoteError>> {
        let id = self.retry.pop_front().or_else(|| queue.pop())?;
        let Some(record) = store.get_by_id(id) else {
            warn!("Promotion queue referenced empty slot {}", id.index());
            return None;
        };

        let result = self.promote(&record, backend);
        if result.is_err() {
            self.retry.push_back(id);
        }
        Some(result)
    }

    /// Frees every texture handed out for records in `store`.
    pub fn release_all<B: TextureBackend + ?Sized>(&mut self, store: &ChunkStore, backend: &mut B) {
        let mut released = 0;
        for record in store.records() {
            if let Some(handle) = record.gpu_handle() {
                backend.release(handle);
                released += 1;
            }
        }
        self.retry.clear();
        debug!("Released {released} height textures");
    }
}

/// Stored metadata for one texture of a [`HeadlessBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessTexture {
    pub coord: GridCoord,
    pub width: u32,
    pub height: u32,
    pub revision: u64,
    pub uploads: u32,
}

/// Texture backend with no GPU behind it. Tracks handles and upload counts.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: u32,
    textures: FxHashMap<GpuHandle, HeadlessTexture>,
    fail_next: u32,
    created: u64,
    updated: u64,
    released: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` create/update calls fail.
    pub fn fail_next(&mut self, count: u32) {
        self.fail_next = count;
    }

    pub fn texture(&self, handle: GpuHandle) -> Option<&HeadlessTexture> {
        self.textures.get(&handle)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    fn injected_failure(&mut self) -> Result<(), PromoteError> {
        if self.fail_next == 0 {
            return Ok(());
        }
        self.fail_next -= 1;
        Err(PromoteError::Backend("injected failure".to_string()))
    }
}

impl TextureBackend for HeadlessBackend {
    fn create_height_texture(
        &mut self,
        coord: GridCoord,
        heights: &HeightField,
    ) -> Result<GpuHandle, PromoteError> {
        self.injected_failure()?;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        let handle = GpuHandle::from_raw(self.next_handle)
            .ok_or_else(|| PromoteError::Backend("handle space exhausted".to_string()))?;
        self.textures.insert(
            handle,
            HeadlessTexture {
                coord,
                width: heights.width(),
                height: heights.height(),
                revision: heights.revision(),
                uploads: 1,
            },
        );
        self.created += 1;
        Ok(handle)
    }

    fn update_height_texture(
        &mut self,
        handle: GpuHandle,
        heights: &HeightField,
    ) -> Result<(), PromoteError> {
        self.injected_failure()?;
        let texture = self
            .textures
            .get_mut(&handle)
            .ok_or(PromoteError::UnknownHandle(handle))?;
        texture.revision = heights.revision();
        texture.uploads += 1;
        self.updated += 1;
        Ok(())
    }

    fn release(&mut self, handle: GpuHandle) {
        if self.textures.remove(&handle).is_some() {
            self.released += 1;
        }
    }
}
