use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use crate::store::ChunkId;

/// Producer half of the promotion queue, owned by the chunk loader.
pub struct PromotionSender {
    tx: mpsc::Sender<ChunkId>,
    pending: Arc<AtomicUsize>,
}

/// Consumer half of the promotion queue, drained on the render thread.
pub struct PromotionReceiver {
    rx: mpsc::Receiver<ChunkId>,
    pending: Arc<AtomicUsize>,
}

/// FIFO of freshly inserted chunk ids awaiting GPU promotion. Unbounded, so the
/// loader never blocks on the renderer.
pub fn promotion_channel() -> (PromotionSender, PromotionReceiver) {
    let (tx, rx) = mpsc::channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        PromotionSender {
            tx,
            pending: pending.clone(),
        },
        PromotionReceiver { rx, pending },
    )
}

impl Clone for PromotionSender {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl PromotionSender {
    pub fn push(&self, id: ChunkId) -> Result<(), mpsc::SendError<ChunkId>> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(id).inspect_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        })
    }
}

impl PromotionReceiver {
    /// Takes the oldest entry, if any, without blocking.
    pub fn pop(&self) -> Option<ChunkId> {
        let id = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(id)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
