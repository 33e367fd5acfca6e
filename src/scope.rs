//! Typing environment (C2): the scope lattice and the cardinality lattice.
//!
//! Grounded on `qc0/scope.py`: `Cardinality` as an ordered enum combined by
//! `max`, and a `Scope` sum type each variant of which knows how to resolve
//! a name (`navigate`, implemented in `crate::planner`).

use std::rc::Rc;

use crate::op::{ComputeList, Rel};
use crate::syntax::Syn;

/// Row-count classification. `ONE < SEQ`, combined pointwise by [`Cardinality::max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cardinality {
    One,
    Seq,
}

impl Cardinality {
    pub fn max(self, other: Cardinality) -> Cardinality {
        std::cmp::max(self, other)
    }
}

/// A scalar type a column or literal can carry, as seen by the scope
/// lattice. Distinct from [`crate::metadata::ColumnType`]: this is the
/// *planning-time* type used to pick the next scope, not the schema's wire
/// representation (kept separate so `Synthetic` scopes can be added without
/// touching `metadata`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Json,
}

/// A single named field captured by a [`Scope::Record`], remembering both
/// the syntax that produced it and the scope it was planned under, so that
/// `Record` navigation can re-run it (see `qc0/bind.py`'s `RecordScope`
/// handling in its `Nav_to_op`).
#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub syn: Syn,
}

/// The scope lattice (C2). Every variant exposes name resolution through
/// `crate::planner::navigate`.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Entry scope: navigation picks a table.
    Univ,
    /// At a row of `table`: navigation picks a column, an outgoing FK, or
    /// an incoming FK.
    Table { table: String },
    /// A just-selected record: navigation picks a field, re-entering the
    /// planner in `parent`'s scope.
    Record {
        parent: Box<Scope>,
        fields: Vec<RecordField>,
    },
    /// A post-`group` scope: navigation picks a grouping key, or `_` drops
    /// into the aggregated subrelation.
    Group {
        /// The scope the grouped relation had before `group()` was applied
        /// — what `_` resolves back into.
        inner: Box<Scope>,
        /// The relation being grouped, prior to the `RelGroup` wrap — what
        /// `_` under `SEQ` cardinality resolves back into.
        inner_rel: Rc<Rel>,
        fields: Vec<String>,
        /// Shared with the `RelGroup::fields`'s owning `Rel::compute` list;
        /// aggregates planned under `_` are hoisted here.
        compute: ComputeList,
    },
    /// Attached to `Date` columns: offers `year`/`month`/`day`.
    Date,
    /// Attached to `Json`/`Jsonb` columns: offers dynamic member access.
    Json,
    /// Terminal; any lookup against it is an error.
    Empty,
}

impl Scope {
    pub fn scalar_for(ty: ScalarType) -> Scope {
        match ty {
            ScalarType::Date => Scope::Date,
            ScalarType::Json => Scope::Json,
            ScalarType::Integer | ScalarType::Float | ScalarType::Text | ScalarType::Boolean => {
                Scope::Empty
            }
        }
    }
}
