use std::fmt;

use noise::{NoiseFn, Perlin};

/// Seeded 2D coherent noise remapped into `[0, 1]`.
#[derive(Clone)]
pub struct NoiseField {
    seed: u32,
    perlin: Perlin,
}

impl NoiseField {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            perlin: Perlin::new(seed),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn sample(&self, sx: f64, sy: f64) -> f64 {
        let raw = self.perlin.get([sx, sy]);
        (raw * 0.5 + 0.5).clamp(0.0, 1.0)
    }
}

impl fmt::Debug for NoiseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseField").field("seed", &self.seed).finish()
    }
}
