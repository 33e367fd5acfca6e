//! Op IR (C4): the unified `Op` envelope and its `Rel`/`Expr` halves.
//!
//! Grounded on `qc0/plan.py` and `qc0/compile.py`'s import lists (the
//! nominal `qc0/op.py` is a superseded variant missing
//! `ExprCompute`/`RelAroundParent`/`RelSort` that both of those files rely
//! on — this module reconstructs the shape those two files actually
//! require). The `compile`/`embed` closures `qc0/plan.py` carries directly
//! on `ExprApply`/`ExprConst` are replaced here with enum tags
//! (`sig::FuncSig`/`sig::BinOpSig`, and a small embedded literal) resolved to
//! SQL only at emission time.

use std::cell::RefCell;
use std::rc::Rc;

use crate::metadata::ForeignKey;
use crate::scope::{Cardinality, Scope};
use crate::sig::{AggrSig, BinOpSig, FuncSig};
use crate::syntax::{Literal, Syn};

/// The append-only list of hoisted fields a [`Rel`] carries. Shared via
/// `Rc<RefCell<_>>` rather than owned outright: `Scope::Group` needs a
/// handle to the *same* list so that navigating `_` during field
/// elaboration can push onto it while the `Rel::Group` node that owns it is
/// already threaded through the `Op` tree under construction (see
/// `planner::navigate_group`). Made shareable so the list can accumulate
/// while nested under construction — after planning finishes no further
/// writer holds a clone, so it is deeply immutable from the emitter's point
/// of view, same as `qc0/plan.py`'s fully-owned list.
pub type ComputeList = Rc<RefCell<Vec<Field>>>;

pub fn new_compute_list() -> ComputeList {
    Rc::new(RefCell::new(Vec::new()))
}

/// A named sub-op: a `select`/`group` field, or a hoisted `compute` entry.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub op: Op,
}

/// One key of a `RelSort`.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub op: Op,
    pub desc: bool,
}

/// Relation-producing half of the IR.
#[derive(Debug, Clone)]
pub enum Rel {
    Void,
    Table(String),
    Join { rel: Box<Rel>, fk: ForeignKey },
    /// `fk.references_table` names the *current* table (the join's left
    /// side); `table` names the table owning `fk` (the FK's referencing
    /// side, which is what actually gets joined in). `ForeignKey` alone
    /// doesn't carry its owning table's name, so it's threaded alongside.
    RevJoin { rel: Box<Rel>, table: String, fk: ForeignKey },
    /// References the enclosing `Op` (whose `rel`/`scope` this relation
    /// reuses) — the planner's back-pointer for `around()`'s RelParent walk
    /// and for distinguishing "joining off the immediate parent" from
    /// "joining off a deeper relation" during emission.
    Parent(Box<Op>),
    /// Marks "we've escaped to the pre-group row level", produced by
    /// `GroupScope`'s `_` navigation under `ONE` cardinality.
    AggregateParent,
    /// Marks the rewound base `around()`/`around(through)` re-root onto.
    AroundParent,
    Take { rel: Box<Rel>, take: Box<Op> },
    Filter { rel: Box<Rel>, cond: Box<Op> },
    Sort { rel: Box<Rel>, sort: Vec<SortKey> },
    /// `rel` is `Rc`, not `Box`: `Scope::Group::inner_rel` keeps a second
    /// handle onto the very same pre-group relation so that navigating `_`
    /// can reconstruct `Op{rel: inner_rel, ..}` without needing to walk
    /// back up through the `Op` tree (see `scope.rs` and
    /// `planner::navigate_group`). `compute` is likewise shared with
    /// `Scope::Group::compute` — the one genuinely mutable list in the
    /// whole tree.
    Group {
        rel: Rc<Rel>,
        fields: Vec<Field>,
        compute: ComputeList,
    },
}

impl Rel {
    /// The `compute` list hoisted aggregates/scalars attach to at this
    /// relational level. Only `Group` actually accumulates entries in this
    /// implementation (matching `qc0/plan.py`, where no other `Rel` variant
    /// is ever the target of a hoist) — every other variant reports an
    /// always-empty list so the emitter's generic "materialize pending
    /// compute" step stays uniform across variants.
    pub fn compute(&self) -> ComputeList {
        match self {
            Rel::Group { compute, .. } => compute.clone(),
            _ => new_compute_list(),
        }
    }
}

/// Value-producing half of the IR.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Wraps a nested `Op` whose value (not its relation) is what's wanted
    /// here — e.g. a record field whose syntax resolved to a plain value.
    Op(Box<Op>),
    Record(Vec<Field>),
    Column(String),
    /// References a hoisted `compute` entry by its synthesized name.
    Compute(String),
    /// The enclosing table's primary-key tuple, rendered as text. Carries
    /// the table name since the emitter needs it to look up which columns
    /// make up the key (the original reaches this via a `table` reference
    /// stashed directly on its `ExprIdentity` node; `Scope::Table` is gone
    /// by the time `build_op_expr` finalizes this, so the name is copied in
    /// at construction instead of re-derived from `scope`).
    Identity(String),
    Const(Literal),
    Apply {
        parent: Option<Box<Op>>,
        args: Vec<Op>,
        sig: AppliedSig,
    },
}

/// The tag a planner-produced `ExprApply` carries, resolved to SQL only at
/// emission (see module docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedSig {
    Func(FuncSig),
    BinOp(BinOpSig),
    Synthetic(SyntheticOp),
}

/// The transform a `Synthetic` scope's member access performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticOp {
    DateYear,
    DateMonth,
    DateDay,
}

/// The unified node envelope (C4): `rel` is always present; `expr` is set
/// for value-producing pipelines; `sig` is set when this op is itself the
/// result of applying an aggregate. `scope`/`card` describe the *output* of
/// this node. `syn` remembers the syntax that produced it, consulted only
/// by `around()`'s replay.
#[derive(Debug, Clone)]
pub struct Op {
    pub rel: Rel,
    pub expr: Option<Expr>,
    pub scope: Scope,
    pub card: Cardinality,
    pub sig: Option<AggrSig>,
    pub syn: Option<Syn>,
}

impl Op {
    pub fn void(scope: Scope, card: Cardinality) -> Op {
        Op {
            rel: Rel::Void,
            expr: None,
            scope,
            card,
            sig: None,
            syn: None,
        }
    }

    pub fn with_syn(mut self, syn: Syn) -> Op {
        self.syn = Some(syn);
        self
    }

    pub fn with_expr(mut self, expr: Expr) -> Op {
        self.expr = Some(expr);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Op {
        self.scope = scope;
        self
    }

    /// Grows a value onto this op: same `rel`, a freshly computed
    /// `expr`/`scope`/`card`, `sig` reset. Mirrors `qc0/plan.py`'s
    /// `Op.grow_expr` (used at its many call sites whenever navigation or
    /// application yields a new value at the same relation).
    pub fn grow_expr(&self, expr: Expr, scope: Scope, card: Cardinality, syn: Option<Syn>) -> Op {
        Op {
            rel: self.rel.clone(),
            expr: Some(expr),
            scope,
            card,
            sig: None,
            syn,
        }
    }

    /// Grows a relation onto this op: a new `rel`/`scope`/`card`, `expr`
    /// reset to `None` (no value has been computed at the new relational
    /// level yet). Mirrors `Op.grow_rel`.
    pub fn grow_rel(&self, rel: Rel, scope: Scope, card: Cardinality, syn: Option<Syn>) -> Op {
        Op {
            rel,
            expr: None,
            scope,
            card,
            sig: None,
            syn,
        }
    }

    /// Marks this op as the result of applying an aggregate: `card`
    /// collapses to `ONE`, `sig` is set, `rel`/`expr` are otherwise
    /// unchanged (the emitter decides how to fold them).
    pub fn aggregate(&self, sig: AggrSig) -> Op {
        Op {
            rel: self.rel.clone(),
            expr: self.expr.clone(),
            scope: Scope::Empty,
            card: Cardinality::One,
            sig: Some(sig),
            syn: self.syn.clone(),
        }
    }
}
