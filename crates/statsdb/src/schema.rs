//! Key schema: the ordered, fixed-depth list of level descriptors a tree
//! is sized to.

#[cfg(test)]
#[path = "tests/schema.rs"]
mod tests;

use core::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// Error raised when a path passed to a navigation operation is malformed.
///
/// This is a programmer error: it is surfaced to the caller immediately
/// and never retried.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid path: {reason}")]
pub struct InvalidPathError {
    reason: String,
}

impl InvalidPathError {
    pub(crate) fn empty() -> Self {
        Self {
            reason: "path is empty".to_owned(),
        }
    }

    pub(crate) fn too_deep(depth: usize, max: usize) -> Self {
        Self {
            reason: format!("path depth {depth} exceeds schema depth {max}"),
        }
    }
}

/// Factory producing a default value for nodes materialized at a level.
pub type ValueFactory<V> = Arc<dyn Fn() -> V + Send + Sync>;

/// One rank of the tree: a human-readable name used for diagnostics and
/// storage ids, and an optional default-value factory used when the merge
/// algorithm must create a previously-absent node at this level.
#[derive(Clone)]
pub struct Level<V> {
    name: String,
    factory: Option<ValueFactory<V>>,
}

impl<V: Value> Level<V> {
    /// A level with no default-value factory: nodes created here start
    /// valueless and adopt the first value merged into them.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: None,
        }
    }

    /// A level whose absent nodes are materialized via `factory`.
    pub fn with_factory(
        name: impl Into<String>,
        factory: impl Fn() -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Some(Arc::new(factory)),
        }
    }

    /// The level's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<V> Debug for Level<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Level")
            .field("name", &self.name)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

/// An ordered, immutable sequence of level descriptors.
///
/// All path-based operations on a tree are sized to `1..=len()` keys; a
/// deeper path is invalid.
#[derive(Clone, Debug)]
pub struct KeySchema<V> {
    levels: Vec<Level<V>>,
}

impl<V: Value> KeySchema<V> {
    /// Builds a schema from its level descriptors, root first.
    #[must_use]
    pub fn new(levels: Vec<Level<V>>) -> Self {
        Self { levels }
    }

    /// Builds a factory-less schema from level names, root first.
    #[must_use]
    pub fn from_names(names: &[&str]) -> Self {
        Self {
            levels: names.iter().map(|n| Level::new(*n)).collect(),
        }
    }

    /// The schema depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the schema has no levels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The descriptor at `level`, if within the schema depth.
    #[must_use]
    pub fn level(&self, level: usize) -> Option<&Level<V>> {
        self.levels.get(level)
    }

    /// Materializes the default value for `level`, when a factory exists.
    #[must_use]
    pub fn new_value(&self, level: usize) -> Option<V> {
        self.levels
            .get(level)
            .and_then(|l| l.factory.as_ref())
            .map(|f| f())
    }

    /// Validates a path against the schema depth.
    ///
    /// # Errors
    ///
    /// [`InvalidPathError`] when the path is empty or deeper than the
    /// schema.
    pub fn validate(&self, path: &[&str]) -> Result<(), InvalidPathError> {
        if path.is_empty() {
            return Err(InvalidPathError::empty());
        }
        if path.len() > self.levels.len() {
            return Err(InvalidPathError::too_deep(path.len(), self.levels.len()));
        }
        Ok(())
    }
}
