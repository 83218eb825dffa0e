use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use perlinscape_shared::chunk::ChunkRecord;
use perlinscape_shared::coords::GridCoord;
use rustc_hash::FxHashMap;

/// Slot index of a record inside a [`ChunkStore`]. Stable for the life of the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(usize);

impl ChunkId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    AlreadyPresent { coord: GridCoord, existing: ChunkId },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPresent { coord, existing } => write!(
                f,
                "chunk {coord} is already stored in slot {}",
                existing.index()
            ),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Default)]
struct Slots {
    index: FxHashMap<GridCoord, ChunkId>,
    records: Vec<Arc<ChunkRecord>>,
}

#[derive(Default)]
struct StoreShared {
    slots: RwLock<Slots>,
    // Bumped on every insertion; waiters sleep on `inserted` until it moves.
    epoch: Mutex<u64>,
    inserted: Condvar,
}

/// Append-only cache of chunk records keyed by grid coordinate.
///
/// Cloning yields another handle to the same store. Records are never removed.
#[derive(Clone, Default)]
pub struct ChunkStore {
    shared: Arc<StoreShared>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, coord: GridCoord) -> bool {
        self.read_slots(|slots| slots.index.contains_key(&coord))
    }

    pub fn insert(&self, record: ChunkRecord) -> Result<ChunkId, StoreError> {
        let coord = record.coord();
        let id = {
            let mut slots = self
                .shared
                .slots
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(&existing) = slots.index.get(&coord) {
                return Err(StoreError::AlreadyPresent { coord, existing });
            }
            let id = ChunkId(slots.records.len());
            slots.records.push(Arc::new(record));
            slots.index.insert(coord, id);
            id
        };

        let mut epoch = self
            .shared
            .epoch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.shared.inserted.notify_all();

        Ok(id)
    }

    pub fn get(&self, coord: GridCoord) -> Option<Arc<ChunkRecord>> {
        self.read_slots(|slots| {
            slots
                .index
                .get(&coord)
                .map(|id| slots.records[id.0].clone())
        })
    }

    pub fn get_by_id(&self, id: ChunkId) -> Option<Arc<ChunkRecord>> {
        self.read_slots(|slots| slots.records.get(id.0).cloned())
    }

    /// Returns the record for `coord`, sleeping until another thread inserts it
    /// or `timeout` elapses.
    pub fn wait_for(&self, coord: GridCoord, timeout: Duration) -> Option<Arc<ChunkRecord>> {
        if let Some(record) = self.get(coord) {
            return Some(record);
        }

        let deadline = Instant::now() + timeout;
        let mut epoch = self
            .shared
            .epoch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            // Checked under the epoch lock so an insertion cannot slip in
            // between this lookup and the wait below.
            if let Some(record) = self.get(coord) {
                return Some(record);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .shared
                .inserted
                .wait_timeout(epoch, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            epoch = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.read_slots(|slots| slots.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates in insertion order.
    pub fn coords(&self) -> Vec<GridCoord> {
        self.read_slots(|slots| slots.records.iter().map(|record| record.coord()).collect())
    }

    /// Snapshot of every record in insertion order.
    pub fn records(&self) -> Vec<Arc<ChunkRecord>> {
        self.read_slots(|slots| slots.records.clone())
    }

    fn read_slots<R>(&self, read: impl FnOnce(&Slots) -> R) -> R {
        let slots = self
            .shared
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        read(&slots)
    }
}

impl fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStore").field("len", &self.len()).finish()
    }
}
