//! Syntax tree (C1): the immutable algebraic form the surface builder
//! produces and the planner consumes.
//!
//! Grounded on `qc0/syntax.py`: `Syn`/`Nav`/`Select`/`Field`/`Apply`/
//! `Literal`/`Compose`/`BinOp`, plus `Desc` (sort-descending marker) which
//! the historical `syntax.py` doesn't carry directly but `sort()`'s
//! handling in `plan.py::SortSig_to_op` requires.

use serde_json::Value as Json;

/// A named argument to `select`/`group`: `Apply("select", {name: Field})`.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub syn: Syn,
}

/// The operator carried by a `BinOp` node. Named after the comparison or
/// arithmetic it performs rather than a Python dunder, since Rust has no
/// operator-overload position that fits (`Q: PartialEq` can't return `Q`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

/// A typed constant. The scalar type is carried by the variant itself
/// rather than a separate opaque handle, since this crate owns its own
/// literal type space (no external type-handle collaborator).
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Date { year: i32, month: u32, day: u32 },
    Json(Json),
}

/// Either a positional argument list (`filter(cond)`, `take(n)`, binary
/// operators) or a named field mapping (`select`, `group`).
#[derive(Debug, Clone)]
pub enum Args {
    Positional(Vec<Syn>),
    Named(Vec<Field>),
}

/// The surface syntax tree (C1).
#[derive(Debug, Clone)]
pub enum Syn {
    /// A name to resolve in the ambient scope.
    Nav(String),
    /// Apply `b` in the scope produced by `a`.
    Compose(Box<Syn>, Box<Syn>),
    /// A named combinator invocation.
    Apply(String, Args),
    /// A binary operator by kind.
    BinOp(BinOpKind, Box<Syn>, Box<Syn>),
    /// A typed constant.
    Literal(Literal),
    /// Sort-descending marker; only meaningful directly under `sort`.
    Desc(Box<Syn>),
}

impl Syn {
    pub fn then(self, next: Syn) -> Syn {
        Syn::Compose(Box::new(self), Box::new(next))
    }
}

/// Coerces a host value into a [`Literal`], mirroring `qc0/syn.py::make_value`'s
/// dispatch over Python's `int`/`str`/`bool`/`dict`/`list`/`date`.
pub trait IntoLiteral {
    fn into_literal(self) -> Literal;
}

impl IntoLiteral for i64 {
    fn into_literal(self) -> Literal {
        Literal::Integer(self)
    }
}
impl IntoLiteral for f64 {
    fn into_literal(self) -> Literal {
        Literal::Float(self)
    }
}
impl IntoLiteral for &str {
    fn into_literal(self) -> Literal {
        Literal::Text(self.to_string())
    }
}
impl IntoLiteral for String {
    fn into_literal(self) -> Literal {
        Literal::Text(self)
    }
}
impl IntoLiteral for bool {
    fn into_literal(self) -> Literal {
        Literal::Boolean(self)
    }
}
impl IntoLiteral for Json {
    fn into_literal(self) -> Literal {
        Literal::Json(self)
    }
}
