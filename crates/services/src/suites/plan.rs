use std::collections::BTreeMap;

use rand::rng;
use rand::seq::IndexedRandom;

use suite_core::model::{ExerciseCategory, ExerciseRef};

use crate::error::SuiteError;

/// Picks the passages of a single-suite run: one reading exercise per part, in part order.
pub struct SuitePlanner {
    shuffle: bool,
}

impl SuitePlanner {
    #[must_use]
    pub fn new() -> Self {
        Self { shuffle: true }
    }

    /// Pick randomly within each part, or take the lowest id when disabled.
    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Build the sequence from a catalog snapshot.
    ///
    /// Entries that are not reading exercises, or whose category does not normalize to
    /// one of the three parts, are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SuiteError::MissingCategory` for the first part with no candidate.
    pub fn plan(&self, catalog: impl IntoIterator<Item = ExerciseRef>) -> Result<Vec<ExerciseRef>, SuiteError> {
        let mut pools: BTreeMap<ExerciseCategory, Vec<ExerciseRef>> = BTreeMap::new();
        for exercise in catalog {
            if !exercise.is_reading() {
                continue;
            }
            if let Some(category) = exercise.normalized_category() {
                pools.entry(category).or_default().push(exercise);
            }
        }

        let mut rng = rng();
        ExerciseCategory::ALL
            .iter()
            .map(|category| {
                let mut pool = pools.remove(category).unwrap_or_default();
                pool.sort_by(|a, b| a.id.cmp(&b.id));
                let picked = if self.shuffle {
                    pool.choose(&mut rng).cloned()
                } else {
                    pool.into_iter().next()
                };
                picked.ok_or(SuiteError::MissingCategory(*category))
            })
            .collect()
    }
}

impl Default for SuitePlanner {
    fn default() -> Self {
        Self::new()
    }
}
