//! Mock value kinds shared by the test suites of this crate and its
//! dependents (enabled via the `testing` feature).

use serde::{Deserialize, Serialize};

use crate::schema::{KeySchema, Level};
use crate::value::{MergeError, Value};

/// A two-kind closed value set: a container [`Value`](MockMetric::Value)
/// aggregating over [`Child`](MockMetric::Child) counters.
///
/// Aggregate fields (`sum`) are `#[serde(skip)]`-ed: persisted and
/// transmitted data is raw, and the master rebuilds the sums.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MockMetric {
    Value {
        l1: i64,
        i2: i64,
        #[serde(skip)]
        sum: i64,
    },
    Child {
        ci: i64,
        #[serde(skip)]
        sum: i64,
    },
}

impl MockMetric {
    pub fn value(i2: i64) -> Self {
        Self::Value { l1: 0, i2, sum: 0 }
    }

    pub fn child(ci: i64) -> Self {
        Self::Child { ci, sum: 0 }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Value { .. } => "Value",
            Self::Child { .. } => "Child",
        }
    }

    /// `ci` for child kinds, zero otherwise.
    pub fn ci(&self) -> i64 {
        match *self {
            Self::Child { ci, .. } => ci,
            Self::Value { .. } => 0,
        }
    }

    /// `i2` of a `Value`; panics on a child (test helper).
    pub fn i2(&self) -> i64 {
        match *self {
            Self::Value { i2, .. } => i2,
            Self::Child { .. } => panic!("not a Value kind"),
        }
    }

    pub fn sum(&self) -> i64 {
        match *self {
            Self::Value { sum, .. } | Self::Child { sum, .. } => sum,
        }
    }

    /// Bumps `i2` on a `Value`; panics on a child (test helper).
    pub fn add_i2(&mut self, delta: i64) {
        match self {
            Self::Value { i2, .. } => *i2 += delta,
            Self::Child { .. } => panic!("not a Value kind"),
        }
    }

    /// Bumps `ci` on a `Child`; panics on a value (test helper).
    pub fn add_ci(&mut self, delta: i64) {
        match self {
            Self::Child { ci, .. } => *ci += delta,
            Self::Value { .. } => panic!("not a Child kind"),
        }
    }

    /// A two-level schema (`n1` container over `n2` children) with
    /// default-value factories, as the master-side merge expects.
    pub fn schema2() -> KeySchema<Self> {
        KeySchema::new(vec![
            Level::with_factory("n1", || Self::value(0)),
            Level::with_factory("n2", || Self::child(0)),
        ])
    }

    /// A three-level schema: `n1` container, `n2`/`n3` children.
    pub fn schema3() -> KeySchema<Self> {
        KeySchema::new(vec![
            Level::with_factory("n1", || Self::value(0)),
            Level::with_factory("n2", || Self::child(0)),
            Level::with_factory("n3", || Self::child(0)),
        ])
    }
}

impl Value for MockMetric {
    fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        match (&mut *self, other) {
            (
                Self::Value { l1, i2, .. },
                Self::Value {
                    l1: other_l1,
                    i2: other_i2,
                    ..
                },
            ) => {
                *l1 += other_l1;
                *i2 += other_i2;
                Ok(())
            }
            (Self::Child { ci, .. }, Self::Child { ci: other_ci, .. }) => {
                *ci += other_ci;
                Ok(())
            }
            (local, remote) => Err(MergeError::KindMismatch {
                local: local.kind(),
                remote: remote.kind(),
            }),
        }
    }

    fn aggregate(&mut self, children: &[Self]) {
        match self {
            // A container's sum folds in each child's own sum, so deep
            // subtrees roll all the way up.
            Self::Value { sum, .. } => {
                *sum = children.iter().map(|c| c.sum() + c.ci()).sum();
            }
            Self::Child { sum, .. } => {
                *sum = children.iter().map(MockMetric::ci).sum();
            }
        }
    }
}
