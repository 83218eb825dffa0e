use std::sync::{Arc, PoisonError, RwLock};

use glam::Vec3;

/// Latest camera position, written by the render thread and read by the loader.
///
/// Reads copy the whole vector under the lock, so a reader never sees a
/// half-updated position.
#[derive(Clone, Debug, Default)]
pub struct Viewpoint {
    position: Arc<RwLock<Vec3>>,
}

impl Viewpoint {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: Arc::new(RwLock::new(position)),
        }
    }

    pub fn set(&self, position: Vec3) {
        *self
            .position
            .write()
            .unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn get(&self) -> Vec3 {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }
}
