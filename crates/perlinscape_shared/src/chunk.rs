use std::fmt;
use std::num::NonZeroU32;
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard};

use crate::coords::GridCoord;
use crate::heightfield::HeightField;

/// Opaque identifier of an uploaded height texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(NonZeroU32);

impl GpuHandle {
    pub fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// One cached chunk: its coordinate, height samples and (once promoted) GPU handle.
///
/// Height samples are complete when the record is built, so handing out an
/// `Arc<ChunkRecord>` never exposes a partially written field.
pub struct ChunkRecord {
    coord: GridCoord,
    heights: RwLock<HeightField>,
    gpu: OnceLock<GpuHandle>,
}

impl ChunkRecord {
    pub fn new(coord: GridCoord, heights: HeightField) -> Self {
        Self {
            coord,
            heights: RwLock::new(heights),
            gpu: OnceLock::new(),
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn heights(&self) -> RwLockReadGuard<'_, HeightField> {
        self.heights.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parameter revision the current samples were synthesized with.
    pub fn revision(&self) -> u64 {
        self.heights().revision()
    }

    /// Swaps in a freshly synthesized field and returns the old one.
    pub fn replace_heights(&self, heights: HeightField) -> HeightField {
        let mut guard = self.heights.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, heights)
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.gpu.get().copied()
    }

    pub fn is_realized(&self) -> bool {
        self.gpu.get().is_some()
    }

    /// Records the GPU handle. Fails with the handle already stored if the
    /// record was realized before.
    pub fn realize(&self, handle: GpuHandle) -> Result<(), GpuHandle> {
        match self.gpu.set(handle) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.gpu.get().copied().unwrap_or(handle)),
        }
    }
}

impl fmt::Debug for ChunkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkRecord")
            .field("coord", &self.coord)
            .field("revision", &self.revision())
            .field("gpu", &self.gpu.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ChunkRecord, GpuHandle};
    use crate::config::NoiseParams;
    use crate::coords::{ChunkDims, GridCoord};
    use crate::heightfield::HeightField;
    use crate::noise_field::NoiseField;

    fn record_at(coord: GridCoord, revision: u64) -> ChunkRecord {
        let params = NoiseParams::default();
        let field = NoiseField::new(params.seed);
        let heights = HeightField::synthesize(&field, ChunkDims::new(8, 8), &params, revision, coord)
            .expect("synthesize");
        ChunkRecord::new(coord, heights)
    }

    #[test]
    fn handle_is_set_at_most_once() {
        let record = record_at(GridCoord::new(1, 2), 0);
        let first = GpuHandle::from_raw(3).expect("non-zero");
        let second = GpuHandle::from_raw(4).expect("non-zero");

        assert!(!record.is_realized());
        assert_eq!(record.gpu_handle(), None);
        assert_eq!(record.realize(first), Ok(()));
        assert_eq!(record.realize(second), Err(first));
        assert_eq!(record.gpu_handle(), Some(first));
    }

    #[test]
    fn replacing_heights_bumps_revision_and_keeps_handle() {
        let coord = GridCoord::new(-4, 9);
        let record = record_at(coord, 1);
        let handle = GpuHandle::from_raw(1).expect("non-zero");
        record.realize(handle).expect("first realize");

        let params = NoiseParams {
            scale: 0.2,
            ..NoiseParams::default()
        };
        let field = NoiseField::new(params.seed);
        let fresh = HeightField::synthesize(&field, ChunkDims::new(8, 8), &params, 2, coord)
            .expect("synthesize");
        let old = record.replace_heights(fresh.clone());

        assert_eq!(old.revision(), 1);
        assert_eq!(record.revision(), 2);
        assert_eq!(*record.heights(), fresh);
        assert_eq!(record.gpu_handle(), Some(handle));
        assert_eq!(record.coord(), coord);
    }

    #[test]
    fn records_can_be_read_from_other_threads() {
        let record = Arc::new(record_at(GridCoord::ORIGIN, 0));
        let expected = record.heights().samples().to_vec();
        let reader = {
            let record = record.clone();
            std::thread::spawn(move || record.heights().samples().to_vec())
        };
        assert_eq!(reader.join().expect("reader panicked"), expected);
    }

    #[test]
    fn zero_is_not_a_valid_handle() {
        assert_eq!(GpuHandle::from_raw(0), None);
        assert_eq!(GpuHandle::from_raw(7).map(GpuHandle::raw), Some(7));
    }
}
