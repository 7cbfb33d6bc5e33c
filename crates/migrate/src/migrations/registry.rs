//! Migration Registry - the ordered set of known units

use std::collections::HashMap;

use super::unit::MigrationUnit;
use crate::error::{MigrationError, MigrationResult};

/// All compiled-in migration units, sorted ascending by version
pub struct MigrationRegistry {
    units: Vec<Box<dyn MigrationUnit>>,
}

impl MigrationRegistry {
    /// Build a registry, rejecting duplicate versions and duplicate names
    pub fn new(mut units: Vec<Box<dyn MigrationUnit>>) -> MigrationResult<Self> {
        units.sort_by_key(|unit| unit.version());

        for pair in units.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[0].version(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }

        let mut names: HashMap<&str, i64> = HashMap::new();
        for unit in &units {
            if let Some(first) = names.insert(unit.name(), unit.version()) {
                return Err(MigrationError::DuplicateName {
                    name: unit.name().to_string(),
                    first,
                    second: unit.version(),
                });
            }
        }

        Ok(Self { units })
    }

    /// Units in ascending version order
    pub fn units(&self) -> &[Box<dyn MigrationUnit>] {
        &self.units
    }

    pub fn get(&self, version: i64) -> Option<&dyn MigrationUnit> {
        self.units
            .binary_search_by_key(&version, |unit| unit.version())
            .ok()
            .map(|index| self.units[index].as_ref())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.units.last().map(|unit| unit.version())
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.units.iter().map(|unit| (unit.version(), unit.name())))
            .finish()
    }
}
