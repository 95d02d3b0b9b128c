//! The merge/aggregate algebra for tree values.

use core::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error raised by [`Value::merge`].
///
/// A kind mismatch means two structurally incompatible values met at the
/// same tree position - a contract violation between node and master
/// schemas. It is recorded and skipped by the merge machinery, never
/// propagated as a panic, so sibling merges always continue.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum MergeError {
    /// The remote value's concrete kind differs from the local one.
    #[error("value kind mismatch: cannot merge {remote} into {local}")]
    KindMismatch {
        /// Kind name of the value already stored at this position.
        local: &'static str,
        /// Kind name of the incoming remote value.
        remote: &'static str,
    },
}

/// A polymorphic payload attached to a tree node.
///
/// Implementors form a closed set of value kinds, typically an enum, with
/// merge behaviour selected at compile time rather than via runtime type
/// inspection.
///
/// `merge` must not mutate `self` when it fails: a
/// [`MergeError::KindMismatch`] is reported by the caller, and the value
/// must remain as it was.
///
/// Merges should be commutative and associative. The master applies
/// snapshots from independent origins without any cross-origin ordering,
/// so concurrent merges into the same subtree interleave in arbitrary
/// order.
pub trait Value:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Merges `other` into `self`, accumulating its raw fields.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::KindMismatch`] when the two values are of
    /// different concrete kinds.
    fn merge(&mut self, other: &Self) -> Result<(), MergeError>;

    /// Recomputes derived fields purely from the current values of the
    /// node's immediate children.
    ///
    /// The default is a no-op; container kinds override it. Aggregation
    /// runs depth-first (children before parents) and only on the master,
    /// after merges and after bulk loads - derived fields are never
    /// trusted as persisted.
    fn aggregate(&mut self, _children: &[Self]) {}
}
