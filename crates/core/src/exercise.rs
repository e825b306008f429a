//! Exercise model and the read-only catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id::ExerciseId;

/// Difficulty tier of an exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    /// Entry-level exercises
    Beginner,
    /// Mid-tier exercises
    Intermediate,
    /// Hardest tier
    Advanced,
}

/// A coding exercise as published by the backend catalog.
///
/// Immutable once loaded; the engine never mutates catalog entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    /// Catalog identifier
    pub id: ExerciseId,

    /// Display title
    pub title: String,

    /// Difficulty tier
    pub difficulty: Difficulty,

    /// Problem statement shown to the user
    pub prompt: String,

    /// Code the editor is seeded with
    pub starter_code: String,

    /// Human-readable descriptor of the expected output
    pub expected_output: String,
}

/// Read-only collection of exercises fetched from the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    exercises: HashMap<ExerciseId, Exercise>,
}

impl Catalog {
    /// Build a catalog from loaded exercises.
    pub fn new(exercises: Vec<Exercise>) -> Self {
        Self {
            exercises: exercises.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Look up an exercise by id.
    pub fn get(&self, id: &ExerciseId) -> Option<&Exercise> {
        self.exercises.get(id)
    }

    /// Whether the catalog contains the exercise.
    pub fn contains(&self, id: &ExerciseId) -> bool {
        self.exercises.contains_key(id)
    }

    /// Number of exercises loaded.
    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    /// Iterate over all exercises.
    pub fn iter(&self) -> impl Iterator<Item = &Exercise> {
        self.exercises.values()
    }
}
