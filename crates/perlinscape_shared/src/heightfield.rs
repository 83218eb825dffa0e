use std::fmt;

use crate::config::{ConfigError, NoiseParams};
use crate::coords::{ChunkDims, GridCoord, BORDER};
use crate::noise_field::NoiseField;

#[derive(Debug, Clone, PartialEq)]
pub enum HeightFieldError {
    /// The buffer must hold at least one sample inside the border on each axis.
    TooSmall { width: u32, height: u32 },
    BufferLength { expected: usize, actual: usize },
    InvalidParams(ConfigError),
}

impl fmt::Display for HeightFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { width, height } => write!(
                f,
                "height field {width}x{height} leaves no samples inside a {BORDER}-sample border"
            ),
            Self::BufferLength { expected, actual } => write!(
                f,
                "height buffer holds {actual} samples, expected {expected}"
            ),
            Self::InvalidParams(err) => write!(f, "invalid noise parameters: {err}"),
        }
    }
}

impl std::error::Error for HeightFieldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidParams(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for HeightFieldError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidParams(err)
    }
}

/// Fills `buffer` (row-major, `width * height`, border included) with
/// normalized layered noise for the chunk at `coord`.
///
/// Sample `(x, y)` of the buffer lands on noise-domain cell
/// `coord * (size - 2 * BORDER) + (x, y) - BORDER`, so the outermost samples
/// of one chunk repeat the first interior samples of its neighbour.
pub fn synthesize(
    field: &NoiseField,
    buffer: &mut [f32],
    width: u32,
    height: u32,
    params: &NoiseParams,
    coord: GridCoord,
) -> Result<(), HeightFieldError> {
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return Err(HeightFieldError::TooSmall { width, height });
    }
    let expected = width as usize * height as usize;
    if buffer.len() != expected {
        return Err(HeightFieldError::BufferLength {
            expected,
            actual: buffer.len(),
        });
    }
    params.validate()?;

    let layers: Vec<(f64, f64)> = (0..params.layer_count as i32)
        .map(|layer| {
            (
                params.layer_lacunarity.powi(layer),
                params.layer_amplitude.powi(layer),
            )
        })
        .collect();
    let max_possible_height = params.max_possible_height();

    let stride_x = i64::from(width - 2 * BORDER);
    let stride_y = i64::from(height - 2 * BORDER);
    let origin_x = i64::from(coord.x) * stride_x - i64::from(BORDER);
    let origin_y = i64::from(coord.y) * stride_y - i64::from(BORDER);

    for (y, row) in buffer.chunks_exact_mut(width as usize).enumerate() {
        let base_y = (origin_y + y as i64) as f64 * params.scale;
        for (x, sample) in row.iter_mut().enumerate() {
            let base_x = (origin_x + x as i64) as f64 * params.scale;
            let accumulated: f64 = layers
                .iter()
                .map(|&(frequency, amplitude)| {
                    field.sample(base_x * frequency, base_y * frequency) * amplitude
                })
                .sum();
            *sample = (accumulated / max_possible_height).clamp(0.0, 1.0) as f32;
        }
    }

    Ok(())
}

/// Bordered height samples for one chunk plus the parameter revision that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    width: u32,
    height: u32,
    revision: u64,
    samples: Vec<f32>,
}

impl HeightField {
    pub fn synthesize(
        field: &NoiseField,
        dims: ChunkDims,
        params: &NoiseParams,
        revision: u64,
        coord: GridCoord,
    ) -> Result<Self, HeightFieldError> {
        let width = dims.texture_width();
        let height = dims.texture_height();
        let mut samples = vec![0.0; dims.texture_len()];
        synthesize(field, &mut samples, width, height, params, coord)?;
        Ok(Self {
            width,
            height,
            revision,
            samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample(&self, x: u32, y: u32) -> f32 {
        self.samples[y as usize * self.width as usize + x as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}
