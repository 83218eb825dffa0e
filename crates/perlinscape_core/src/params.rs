use std::sync::{Arc, PoisonError, RwLock};

use perlinscape_shared::config::{ConfigError, NoiseParams};
use perlinscape_shared::noise_field::NoiseField;

/// Immutable noise configuration tagged with a revision number.
#[derive(Debug)]
pub struct ParamsSnapshot {
    revision: u64,
    params: NoiseParams,
    field: NoiseField,
}

impl ParamsSnapshot {
    fn new(revision: u64, params: NoiseParams) -> Self {
        let field = NoiseField::new(params.seed);
        Self {
            revision,
            params,
            field,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    pub fn field(&self) -> &NoiseField {
        &self.field
    }
}

/// Shared, atomically swapped noise parameters.
///
/// Readers take an `Arc` to the whole snapshot, so one sweep or one frame
/// always works against a single consistent parameter set.
#[derive(Clone, Debug)]
pub struct ParamsCell {
    current: Arc<RwLock<Arc<ParamsSnapshot>>>,
}

impl ParamsCell {
    pub fn new(params: NoiseParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(ParamsSnapshot::new(0, params)))),
        })
    }

    pub fn snapshot(&self) -> Arc<ParamsSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot().revision()
    }

    /// Publishes `params` under the next revision.
    pub fn replace(&self, params: NoiseParams) -> Result<Arc<ParamsSnapshot>, ConfigError> {
        params.validate()?;
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(ParamsSnapshot::new(current.revision + 1, params));
        *current = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use perlinscape_shared::config::{ConfigError, NoiseParams};

    use super::ParamsCell;

    #[test]
    fn replace_bumps_revision_and_keeps_old_snapshots_alive() {
        let cell = ParamsCell::new(NoiseParams::default()).expect("valid defaults");
        let before = cell.snapshot();
        assert_eq!(before.revision(), 0);

        let changed = NoiseParams {
            seed: 77,
            layer_count: 3,
            ..NoiseParams::default()
        };
        let after = cell.replace(changed.clone()).expect("replace");

        assert_eq!(after.revision(), 1);
        assert_eq!(cell.revision(), 1);
        assert_eq!(cell.snapshot().params(), &changed);
        assert_eq!(cell.snapshot().field().seed(), 77);
        assert_eq!(before.params(), &NoiseParams::default());
    }

    #[test]
    fn invalid_params_are_rejected_without_publishing() {
        let cell = ParamsCell::new(NoiseParams::default()).expect("valid defaults");
        let bad = NoiseParams {
            layer_count: 0,
            ..NoiseParams::default()
        };
        assert_eq!(cell.replace(bad.clone()).err(), Some(ConfigError::ZeroLayerCount));
        assert_eq!(cell.revision(), 0);
        assert!(ParamsCell::new(bad).is_err());
    }
}
