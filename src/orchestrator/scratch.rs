//! Per-invocation scratch datasets.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{EngineResult, GeoEngine};

/// Names and tracks the intermediate datasets of one merge.
///
/// Every name carries the invocation token, so two merges never share a
/// scratch dataset.
#[derive(Debug)]
pub struct ScratchSpace {
    prefix: String,
    token: String,
    names: Vec<String>,
}

impl ScratchSpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            token: Uuid::new_v4().simple().to_string(),
            names: Vec::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Reserve the scratch name for `role`, e.g. `memory\units_<token>`.
    pub fn name(&mut self, role: &str) -> String {
        let name = format!("{}\\{}_{}", self.prefix, role, self.token);
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Delete every reserved dataset. Keeps going past failures and returns
    /// the first one.
    pub fn clear(&mut self, engine: &mut dyn GeoEngine) -> EngineResult<usize> {
        let mut deleted = 0;
        let mut first_error = None;
        for name in self.names.drain(..) {
            match engine.delete_dataset(&name) {
                Ok(true) => {
                    debug!("Deleted scratch dataset {}", name);
                    deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not delete scratch dataset {}: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Dataset, MemoryEngine};

    #[test]
    fn test_names_are_unique_per_invocation() {
        let mut a = ScratchSpace::new("memory");
        let mut b = ScratchSpace::new("memory");

        let units = a.name("units");
        assert!(units.starts_with("memory\\units_"));
        assert!(units.ends_with(a.token()));
        assert_ne!(units, b.name("units"));
        assert_eq!(a.name("units"), units);
        assert_eq!(a.names().len(), 1);
    }

    #[test]
    fn test_clear_deletes_only_existing() {
        let mut scratch = ScratchSpace::new("memory");
        let units = scratch.name("units");
        scratch.name("dissolved");
        let mut engine = MemoryEngine::new().with_dataset(units.clone(), Dataset::default());

        assert_eq!(scratch.clear(&mut engine).unwrap(), 1);
        assert!(engine.dataset(&units).is_none());
        assert!(scratch.names().is_empty());
    }
}
