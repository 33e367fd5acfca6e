//! Signature registry (C3): named combinators, closed at build time.
//!
//! Grounded on `qc0/sig.py` (the canonical registry: `SelectSig`/`FilterSig`/
//! `TakeSig`/`FirstSig`/`SortSig`/`GroupSig`/`AroundSig` as shape-only
//! markers; `CountSig`/`SumSig`/`AvgSig`/`MinSig`/`MaxSig`/`ExistsSig`/
//! `JsonAggSig` as aggregates with a `unit`; `EqSig`/`NeSig`/… as binary
//! operators) and `qc0/func.py` (the concrete scalar-function set:
//! `substring`/`upper`/`lower`/`like`/`ilike`/`matches`/`imatches`). Unlike
//! the original's subclass-registry-via-`__subclasses__`, this is a native
//! Rust enum dispatch: each signature is a tag stored on the `Op` IR, resolved
//! to SQL only at the emitter by matching on the tag.

use once_cell::sync::Lazy;
use sqlparser::ast::{
    BinaryOperator, DataType, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr, Ident,
    ObjectName, UnaryOperator, Value as SqlValue,
};
use std::collections::HashMap;

use crate::syntax::BinOpKind;

/// The shape-only built-in combinators: they affect `Rel`/`Scope` shape but
/// carry no SQL-builder closure of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCombinator {
    Select,
    Filter,
    Take,
    First,
    Sort,
    Group,
    Around,
}

/// Aggregate signatures: `compile` folds a per-row expression into a
/// per-group scalar; `unit` is the value substituted via `COALESCE` over an
/// empty input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrSig {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Exists,
    JsonAgg,
}

impl AggrSig {
    pub fn name(&self) -> &'static str {
        match self {
            AggrSig::Count => "count",
            AggrSig::Sum => "sum",
            AggrSig::Avg => "avg",
            AggrSig::Min => "min",
            AggrSig::Max => "max",
            AggrSig::Exists => "exists",
            AggrSig::JsonAgg => "jsonb_agg",
        }
    }

    fn sql_func_name(&self) -> &'static str {
        match self {
            AggrSig::Count => "count",
            AggrSig::Sum => "sum",
            AggrSig::Avg => "avg",
            AggrSig::Min => "min",
            AggrSig::Max => "max",
            AggrSig::Exists => "bool_and",
            AggrSig::JsonAgg => "jsonb_agg",
        }
    }

    /// `COALESCE`'s identity value over an empty input (testable property 5).
    pub fn unit(&self) -> SqlExpr {
        match self {
            AggrSig::Count => SqlExpr::Value(SqlValue::Number("0".to_string(), false)),
            AggrSig::Sum => SqlExpr::Value(SqlValue::Number("0".to_string(), false)),
            AggrSig::Avg => SqlExpr::Value(SqlValue::Null),
            AggrSig::Min => SqlExpr::Value(SqlValue::Null),
            AggrSig::Max => SqlExpr::Value(SqlValue::Null),
            AggrSig::Exists => SqlExpr::Value(SqlValue::Boolean(false)),
            AggrSig::JsonAgg => SqlExpr::Cast {
                expr: Box::new(SqlExpr::Value(SqlValue::SingleQuotedString("[]".to_string()))),
                data_type: DataType::Custom(ObjectName(vec![Ident::new("jsonb")]), vec![]),
            },
        }
    }

    /// Builds the aggregate call over `arg`. `Exists` ignores its argument
    /// value and aggregates a constant `TRUE`, per `qc0/sig.py::ExistsSig`
    /// (`compile = bool_and(True)`): existence only cares whether any row
    /// reached this point.
    pub fn compile(&self, arg: SqlExpr) -> SqlExpr {
        let call_arg = match self {
            AggrSig::Exists => SqlExpr::Value(SqlValue::Boolean(true)),
            _ => arg,
        };
        call_function(self.sql_func_name(), vec![call_arg])
    }
}

/// Scalar function signatures, supplemented from `qc0/func.py`/`qc0/sig.py`'s
/// concrete scalar-function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncSig {
    Substring,
    Upper,
    Lower,
    Like,
    Ilike,
    Matches,
    Imatches,
    Length,
    Not,
    IsNull,
    /// PostgreSQL `jsonb -> key` member access, used by `Scope::Json`'s
    /// dynamic navigation. Not present in `qc0/sig.py`'s enumerated `FuncSig`
    /// set (JSON member access there is a `SyntheticScope` transform closure,
    /// not a named combinator) — modeled here as a `FuncSig` so it reuses the
    /// same enum-tag dispatch as every other scalar function.
    JsonGet,
}

impl FuncSig {
    pub fn name(&self) -> &'static str {
        match self {
            FuncSig::Substring => "substring",
            FuncSig::Upper => "upper",
            FuncSig::Lower => "lower",
            FuncSig::Like => "like",
            FuncSig::Ilike => "ilike",
            FuncSig::Matches => "matches",
            FuncSig::Imatches => "imatches",
            FuncSig::Length => "length",
            FuncSig::Not => "not",
            FuncSig::IsNull => "is_null",
            FuncSig::JsonGet => "->",
        }
    }

    /// Number of arguments beyond the receiver expression.
    pub fn extra_arity(&self) -> usize {
        match self {
            FuncSig::Substring => 2,
            FuncSig::Upper | FuncSig::Lower | FuncSig::Length | FuncSig::Not | FuncSig::IsNull => 0,
            FuncSig::Like | FuncSig::Ilike | FuncSig::Matches | FuncSig::Imatches => 1,
            FuncSig::JsonGet => 1,
        }
    }

    /// Builds the call. `like`/`ilike`/`matches`/`imatches` lower to the
    /// binary SQL operators `LIKE`/`ILIKE`/`~`/`~*` rather than function
    /// calls, per `qc0/sig.py`'s custom `compile` overrides for those four.
    pub fn compile(&self, expr: SqlExpr, mut args: Vec<SqlExpr>) -> SqlExpr {
        match self {
            FuncSig::Substring => {
                let length = args.pop().unwrap();
                let start = args.pop().unwrap();
                call_function("substring", vec![expr, start, length])
            }
            FuncSig::Upper => call_function("upper", vec![expr]),
            FuncSig::Lower => call_function("lower", vec![expr]),
            FuncSig::Length => call_function("length", vec![expr]),
            FuncSig::Like => SqlExpr::Like {
                negated: false,
                expr: Box::new(expr),
                pattern: Box::new(args.pop().unwrap()),
                escape_char: None,
            },
            FuncSig::Ilike => SqlExpr::ILike {
                negated: false,
                expr: Box::new(expr),
                pattern: Box::new(args.pop().unwrap()),
                escape_char: None,
            },
            FuncSig::Matches => SqlExpr::BinaryOp {
                left: Box::new(expr),
                op: BinaryOperator::PGRegexMatch,
                right: Box::new(args.pop().unwrap()),
            },
            FuncSig::Imatches => SqlExpr::BinaryOp {
                left: Box::new(expr),
                op: BinaryOperator::PGRegexIMatch,
                right: Box::new(args.pop().unwrap()),
            },
            FuncSig::Not => SqlExpr::UnaryOp {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
            },
            FuncSig::IsNull => SqlExpr::IsNull(Box::new(expr)),
            FuncSig::JsonGet => SqlExpr::BinaryOp {
                left: Box::new(expr),
                op: BinaryOperator::Arrow,
                right: Box::new(args.pop().unwrap()),
            },
        }
    }
}

/// Binary operator signatures. Looked up directly from [`BinOpKind`] — the
/// surface already carries a typed operator, so (unlike the original's
/// string-keyed `__eq__`/`__add__`/… dunder registry) no name lookup is
/// needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpSig {
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

impl BinOpSig {
    pub fn from_kind(kind: BinOpKind) -> BinOpSig {
        match kind {
            BinOpKind::Eq => BinOpSig::Eq,
            BinOpKind::Ne => BinOpSig::Ne,
            BinOpKind::Lt => BinOpSig::Lt,
            BinOpKind::Gt => BinOpSig::Gt,
            BinOpKind::Le => BinOpSig::Le,
            BinOpKind::Ge => BinOpSig::Ge,
            BinOpKind::Add => BinOpSig::Add,
            BinOpKind::Sub => BinOpSig::Sub,
            BinOpKind::Mul => BinOpSig::Mul,
            BinOpKind::Div => BinOpSig::Div,
            BinOpKind::And => BinOpSig::And,
            BinOpKind::Or => BinOpSig::Or,
        }
    }

    pub fn compile(&self, a: SqlExpr, b: SqlExpr) -> SqlExpr {
        let op = match self {
            BinOpSig::Eq => BinaryOperator::Eq,
            BinOpSig::Ne => BinaryOperator::NotEq,
            BinOpSig::Lt => BinaryOperator::Lt,
            BinOpSig::Gt => BinaryOperator::Gt,
            BinOpSig::Le => BinaryOperator::LtEq,
            BinOpSig::Ge => BinaryOperator::GtEq,
            BinOpSig::Add => BinaryOperator::Plus,
            BinOpSig::Sub => BinaryOperator::Minus,
            BinOpSig::Mul => BinaryOperator::Multiply,
            BinOpSig::Div => BinaryOperator::Divide,
            BinOpSig::And => BinaryOperator::And,
            BinOpSig::Or => BinaryOperator::Or,
        };
        SqlExpr::BinaryOp {
            left: Box::new(a),
            op,
            right: Box::new(b),
        }
    }
}

/// What a name in `Apply(name, ..)` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigKind {
    Builtin(BuiltinCombinator),
    Aggregate(AggrSig),
    Func(FuncSig),
}

/// The process-wide, read-only-after-init registry of combinator names.
/// Mirrors `qc0/sig.py::Sig.registry()`, but as a static table instead of a
/// subclass walk.
static REGISTRY: Lazy<HashMap<&'static str, SigKind>> = Lazy::new(|| {
    use BuiltinCombinator::*;
    use SigKind::*;
    let mut m = HashMap::new();
    m.insert("select", Builtin(Select));
    m.insert("filter", Builtin(Filter));
    m.insert("take", Builtin(Take));
    m.insert("first", Builtin(First));
    m.insert("sort", Builtin(Sort));
    m.insert("group", Builtin(Group));
    m.insert("around", Builtin(Around));

    m.insert("count", Aggregate(AggrSig::Count));
    m.insert("sum", Aggregate(AggrSig::Sum));
    m.insert("avg", Aggregate(AggrSig::Avg));
    m.insert("min", Aggregate(AggrSig::Min));
    m.insert("max", Aggregate(AggrSig::Max));
    m.insert("exists", Aggregate(AggrSig::Exists));
    m.insert("jsonb_agg", Aggregate(AggrSig::JsonAgg));

    m.insert("substring", Func(FuncSig::Substring));
    m.insert("upper", Func(FuncSig::Upper));
    m.insert("lower", Func(FuncSig::Lower));
    m.insert("like", Func(FuncSig::Like));
    m.insert("ilike", Func(FuncSig::Ilike));
    m.insert("matches", Func(FuncSig::Matches));
    m.insert("imatches", Func(FuncSig::Imatches));
    m.insert("length", Func(FuncSig::Length));
    m.insert("not", Func(FuncSig::Not));
    m.insert("is_null", Func(FuncSig::IsNull));
    m
});

pub fn lookup(name: &str) -> Option<SigKind> {
    REGISTRY.get(name).copied()
}

fn call_function(name: &str, args: Vec<SqlExpr>) -> SqlExpr {
    SqlExpr::Function(Function {
        name: ObjectName(vec![Ident::new(name)]),
        args: args
            .into_iter()
            .map(|e| FunctionArg::Unnamed(FunctionArgExpr::Expr(e)))
            .collect(),
        over: None,
        distinct: false,
        special: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_builtins_and_funcs() {
        assert_eq!(lookup("select"), Some(SigKind::Builtin(BuiltinCombinator::Select)));
        assert_eq!(lookup("count"), Some(SigKind::Aggregate(AggrSig::Count)));
        assert_eq!(lookup("like"), Some(SigKind::Func(FuncSig::Like)));
        assert_eq!(lookup("nonsense"), None);
    }

    #[test]
    fn exists_unit_is_false() {
        assert_eq!(AggrSig::Exists.unit(), SqlExpr::Value(SqlValue::Boolean(false)));
    }
}
