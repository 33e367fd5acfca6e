//! Planner (C5): `Syn` → `Op`.
//!
//! Grounded on `qc0/plan.py`: `plan`/`build_op`/`build_op_expr`/`make_parent`
//! as the driver, a `functools.singledispatch`-keyed `to_op` over syntax
//! variants and `navigate` over scope variants. Dispatch here is a plain
//! `match` instead of a registry of registered handlers, since every variant
//! is known at compile time.
//!
//! The continuation pairs `qc0/plan.py::norm_to_op` returns become
//! `(Op, Cont)` here, where `Cont` is a boxed `FnOnce` — the planner's only
//! explicit control-flow oddity, kept because `GroupScope`'s `_` rewrite
//! genuinely needs to defer wrapping the surrounding context until the
//! aggregate inside is known.

use std::rc::Rc;

use crate::error::{self, Result};
use crate::metadata::{ColumnType, MetaData};
use crate::op::{
    new_compute_list, AppliedSig, Expr, Field, Op, Rel, SortKey, SyntheticOp,
};
use crate::scope::{Cardinality, RecordField, Scope, ScalarType};
use crate::sig::{lookup, AggrSig, BinOpSig, BuiltinCombinator, FuncSig, SigKind};
use crate::syntax::{Args, BinOpKind, Literal, Syn};

/// A deferred wrap of the surrounding context, threaded through
/// `norm_to_op`/`to_op`. Most productions don't need one and return the
/// identity continuation.
type Cont = Box<dyn FnOnce(Op) -> Op>;

fn id_cont() -> Cont {
    Box::new(|op| op)
}

/// Entry point: plans `syn` against `metadata`, starting from `Univ` scope.
pub fn plan(syn: &Syn, metadata: &MetaData) -> Result<Op> {
    let parent = Op {
        rel: Rel::Void,
        expr: None,
        card: Cardinality::One,
        scope: Scope::Univ,
        sig: None,
        syn: None,
    };
    build_op(syn, parent, metadata)
}

/// Drives a single syntax node to a fully finalized op: `to_op` produces a
/// continuation pair, which is collapsed (`k(...)`) only after
/// `build_op_expr` has had a chance to materialize any pending `Record`/
/// `Table`/`Group` finalization on the *inner* op. Mirrors `build_op`.
fn build_op(syn: &Syn, parent: Op, meta: &MetaData) -> Result<Op> {
    let (op, k) = to_op(syn, parent, meta)?;
    Ok(k(build_op_expr(op, meta)?))
}

/// Like `build_op`, but collapses the continuation without finalizing —
/// used by navigation/combinator handlers that need the *raw* result of
/// planning a sub-syntax (they finalize it themselves, or feed it straight
/// into another `grow_*`). Mirrors `run_to_op`.
fn run_to_op(syn: &Syn, parent: Op, meta: &MetaData) -> Result<Op> {
    let (op, k) = to_op(syn, parent, meta)?;
    Ok(k(op))
}

/// `make_parent`: wraps `parent` in a `Rel::Parent` unless it already is
/// one with no value computed yet (avoids nesting `Parent(Parent(..))`).
fn make_parent(parent: Op) -> Op {
    if matches!(parent.rel, Rel::Parent(_)) && parent.expr.is_none() {
        return parent;
    }
    Op {
        rel: Rel::Parent(Box::new(parent.clone())),
        expr: None,
        scope: parent.scope,
        card: Cardinality::One,
        sig: None,
        syn: None,
    }
}

/// Finalizes an op that has no `expr` yet by materializing whatever its
/// scope calls for: a `Record` becomes `ExprRecord`, a bare `Table` becomes
/// `ExprIdentity`, a post-`group` scope becomes the grouping-key record.
/// Mirrors `build_op_expr`.
fn build_op_expr(op: Op, meta: &MetaData) -> Result<Op> {
    if op.expr.is_some() {
        return Ok(op);
    }
    match op.scope.clone() {
        Scope::Record { parent, fields } => {
            let mut built = Vec::with_capacity(fields.len());
            for RecordField { name, syn } in fields {
                let field_parent = make_parent(Op {
                    rel: op.rel.clone(),
                    expr: None,
                    scope: (*parent).clone(),
                    card: op.card,
                    sig: None,
                    syn: None,
                });
                let mut field_op = build_op(&syn, field_parent, meta)?;
                if field_op.card == Cardinality::Seq {
                    field_op = field_op.aggregate(AggrSig::JsonAgg);
                }
                built.push(Field { name, op: field_op });
            }
            Ok(Op {
                rel: op.rel,
                expr: Some(Expr::Record(built)),
                scope: Scope::Record {
                    parent,
                    fields: Vec::new(),
                },
                card: op.card,
                sig: None,
                syn: op.syn,
            })
        }
        Scope::Table { table } => Ok(Op {
            rel: op.rel,
            expr: Some(Expr::Identity(table)),
            scope: Scope::Empty,
            card: op.card,
            sig: None,
            syn: op.syn,
        }),
        Scope::Group { ref fields, .. } => {
            let mut built = Vec::with_capacity(fields.len());
            for name in fields {
                let field_op = Op {
                    rel: Rel::Parent(Box::new(op.clone())),
                    expr: Some(Expr::Column(name.clone())),
                    scope: Scope::Empty,
                    card: Cardinality::One,
                    sig: None,
                    syn: Some(Syn::Nav(name.clone())),
                };
                built.push(Field {
                    name: name.clone(),
                    op: field_op,
                });
            }
            Ok(Op {
                rel: op.rel.clone(),
                expr: Some(Expr::Record(built)),
                scope: op.scope.clone(),
                card: op.card,
                sig: None,
                syn: None,
            })
        }
        _ => Ok(op),
    }
}

//
// Produce an operation out of syntax (`to_op`)
//

fn to_op(syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    match syn {
        Syn::Nav(name) => navigate(&parent.scope.clone(), name, parent, meta),
        Syn::Apply(name, args) => apply_to_op(name, args, syn, parent, meta),
        Syn::BinOp(kind, a, b) => binop_to_op(*kind, a, b, syn, parent, meta),
        Syn::Literal(lit) => literal_to_op(lit, syn, parent),
        Syn::Compose(a, b) => {
            let (a_op, ak) = to_op(a, parent, meta)?;
            let (b_op, bk) = to_op(b, a_op, meta)?;
            Ok((b_op, Box::new(move |op| bk(ak(op)))))
        }
        Syn::Desc(_) => Err(error::bad_syntax_position("desc() is only valid inside sort(..)")),
    }
}

fn literal_to_op(lit: &Literal, syn: &Syn, parent: Op) -> Result<(Op, Cont)> {
    let scalar = match lit {
        Literal::Date { .. } => ScalarType::Date,
        Literal::Json(_) => ScalarType::Json,
        Literal::Integer(_) => ScalarType::Integer,
        Literal::Float(_) => ScalarType::Float,
        Literal::Text(_) => ScalarType::Text,
        Literal::Boolean(_) => ScalarType::Boolean,
    };
    let op = parent.grow_expr(
        Expr::Const(lit.clone()),
        Scope::scalar_for(scalar),
        parent.card,
        Some(syn.clone()),
    );
    Ok((op, id_cont()))
}

//
// Navigation, scope-dispatched
//

fn navigate(scope: &Scope, name: &str, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    match scope {
        Scope::Univ => navigate_univ(name, parent, meta),
        Scope::Table { table } => navigate_table(table, name, parent, meta),
        Scope::Record { .. } => navigate_record(name, parent, meta),
        Scope::Group { .. } => navigate_group(name, parent, meta),
        Scope::Date => navigate_date(name, parent),
        Scope::Json => navigate_json(name, parent),
        Scope::Empty => Err(error::unknown_name(name)),
    }
}

fn navigate_univ(name: &str, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let table = meta.table(name).ok_or_else(|| error::unknown_name(name))?;
    let rel = Rel::Table(table.name.clone());
    let op = Op {
        rel,
        expr: None,
        card: Cardinality::Seq,
        scope: Scope::Table {
            table: table.name.clone(),
        },
        sig: None,
        syn: Some(Syn::Nav(name.to_string())),
    };
    Ok((op, id_cont()))
}

fn column_scalar_type(ty: ColumnType) -> ScalarType {
    match ty {
        ColumnType::Integer => ScalarType::Integer,
        ColumnType::Float => ScalarType::Float,
        ColumnType::Text => ScalarType::Text,
        ColumnType::Boolean => ScalarType::Boolean,
        ColumnType::Date => ScalarType::Date,
        ColumnType::Json => ScalarType::Json,
    }
}

fn navigate_table(table_name: &str, name: &str, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let table = meta
        .table(table_name)
        .ok_or_else(|| error::internal(format!("table `{table_name}` vanished from metadata")))?;

    if let Some(column) = table.column(name) {
        let next_scope = Scope::scalar_for(column_scalar_type(column.ty));
        let op = parent.grow_expr(
            Expr::Column(name.to_string()),
            next_scope,
            parent.card,
            Some(Syn::Nav(name.to_string())),
        );
        return Ok((op, id_cont()));
    }

    let outgoing = meta.outgoing_foreign_keys(table_name);
    if let Some(fk) = outgoing.get(name) {
        let rel = Rel::Join {
            rel: Box::new(parent.rel.clone()),
            fk: fk.clone(),
        };
        let scope = Scope::Table {
            table: fk.references_table.clone(),
        };
        let op = parent.grow_rel(rel, scope, parent.card, Some(Syn::Nav(name.to_string())));
        return Ok((op, id_cont()));
    }

    let incoming = meta.incoming_foreign_keys(table_name);
    if let Some(fk) = incoming.get(name) {
        let rel = Rel::RevJoin {
            rel: Box::new(parent.rel.clone()),
            table: name.to_string(),
            fk: fk.clone(),
        };
        let scope = Scope::Table {
            table: name.to_string(),
        };
        let op = parent.grow_rel(
            rel,
            scope,
            parent.card.max(Cardinality::Seq),
            Some(Syn::Nav(name.to_string())),
        );
        return Ok((op, id_cont()));
    }

    Err(error::unknown_name(name))
}

/// Replaces the deepest `Rel::Parent` leaf of `rel` with `base` — used when
/// re-running a record field's syntax in its enclosing scope rather than the
/// field's own parent placeholder. Mirrors `RecordScope_navigate`'s local
/// `rebase` closure.
fn rebase_rel(rel: &Rel, base: &Rel) -> Rel {
    match rel {
        Rel::Parent(_) => base.clone(),
        Rel::Join { rel: r, fk } => Rel::Join {
            rel: Box::new(rebase_rel(r, base)),
            fk: fk.clone(),
        },
        Rel::RevJoin { rel: r, table, fk } => Rel::RevJoin {
            rel: Box::new(rebase_rel(r, base)),
            table: table.clone(),
            fk: fk.clone(),
        },
        Rel::Take { rel: r, take } => Rel::Take {
            rel: Box::new(rebase_rel(r, base)),
            take: take.clone(),
        },
        Rel::Filter { rel: r, cond } => Rel::Filter {
            rel: Box::new(rebase_rel(r, base)),
            cond: cond.clone(),
        },
        Rel::Sort { rel: r, sort } => Rel::Sort {
            rel: Box::new(rebase_rel(r, base)),
            sort: sort.clone(),
        },
        other => other.clone(),
    }
}

fn navigate_record(name: &str, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let (record_parent_scope, fields) = match &parent.scope {
        Scope::Record { parent, fields } => ((**parent).clone(), fields.clone()),
        _ => unreachable!("navigate_record called outside Record scope"),
    };
    let field = fields
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| error::unknown_name(name))?;

    let field_parent = make_parent(Op {
        rel: parent.rel.clone(),
        expr: None,
        scope: record_parent_scope,
        card: parent.card,
        sig: None,
        syn: None,
    });
    let op = run_to_op(&field.syn, field_parent, meta)?;

    if op.expr.is_some() || op.sig.is_some() {
        let card = op.card.max(parent.card);
        let out = parent.grow_expr(Expr::Op(Box::new(op.clone())), op.scope.clone(), card, op.syn.clone());
        return Ok((out, id_cont()));
    }

    let rel = rebase_rel(&op.rel, &parent.rel);
    let card = op.card.max(parent.card);
    let out = parent.grow_rel(rel, op.scope.clone(), card, op.syn.clone());
    Ok((out, id_cont()))
}

fn navigate_group(name: &str, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let (inner, inner_rel, fields, compute) = match &parent.scope {
        Scope::Group {
            inner,
            inner_rel,
            fields,
            compute,
        } => ((**inner).clone(), inner_rel.clone(), fields.clone(), compute.clone()),
        _ => unreachable!("navigate_group called outside Group scope"),
    };

    if name == "_" {
        if parent.card == Cardinality::Seq {
            let mut cur = parent;
            loop {
                match cur.rel {
                    Rel::Parent(inner_op) => cur = *inner_op,
                    other => {
                        cur.rel = other;
                        break;
                    }
                }
            }
            let group_inner_rel = match &cur.rel {
                Rel::Group { rel, .. } => (**rel).clone(),
                _ => return Err(error::internal("`_` escaped a group scope without a RelGroup ancestor")),
            };
            let op = Op {
                rel: group_inner_rel,
                expr: None,
                card: Cardinality::Seq,
                scope: inner,
                sig: None,
                syn: Some(Syn::Nav("_".to_string())),
            };
            return Ok((op, id_cont()));
        }

        let base = Op {
            rel: Rel::AggregateParent,
            expr: None,
            scope: inner,
            card: Cardinality::Seq,
            sig: None,
            syn: Some(Syn::Nav("_".to_string())),
        };
        let wrap: Cont = Box::new(move |op: Op| {
            let op = if op.card == Cardinality::Seq {
                op.aggregate(AggrSig::JsonAgg)
            } else {
                debug_assert!(op.sig.is_some(), "`_` aggregate result must carry a sig or be SEQ");
                op
            };
            let idx = compute.borrow().len();
            let field_name = format!("compute_{idx}");
            compute.borrow_mut().push(Field {
                name: field_name.clone(),
                op: op.clone(),
            });
            parent.grow_expr(
                Expr::Column(field_name),
                Scope::Empty,
                parent.card,
                Some(Syn::Nav("_".to_string())),
            )
        });
        return Ok((base, wrap));
    }

    let _ = inner_rel;
    if fields.iter().any(|f| f == name) {
        let op = parent.grow_expr(
            Expr::Column(name.to_string()),
            Scope::Empty,
            parent.card,
            Some(Syn::Nav(name.to_string())),
        );
        return Ok((op, id_cont()));
    }

    Err(error::unknown_name(name))
}

fn navigate_date(name: &str, parent: Op) -> Result<(Op, Cont)> {
    let synthetic = match name {
        "year" => SyntheticOp::DateYear,
        "month" => SyntheticOp::DateMonth,
        "day" => SyntheticOp::DateDay,
        _ => return Err(error::unknown_name(name)),
    };
    let expr = Expr::Apply {
        parent: Some(Box::new(parent.clone())),
        args: Vec::new(),
        sig: AppliedSig::Synthetic(synthetic),
    };
    let op = parent.grow_expr(expr, Scope::Empty, parent.card, Some(Syn::Nav(name.to_string())));
    Ok((op, id_cont()))
}

fn navigate_json(name: &str, parent: Op) -> Result<(Op, Cont)> {
    let key_op = Op {
        rel: Rel::Void,
        expr: Some(Expr::Const(Literal::Text(name.to_string()))),
        scope: Scope::Empty,
        card: Cardinality::One,
        sig: None,
        syn: None,
    };
    let expr = Expr::Apply {
        parent: Some(Box::new(parent.clone())),
        args: vec![key_op],
        sig: AppliedSig::Func(FuncSig::JsonGet),
    };
    // Dynamic member access: the result is itself JSON, so navigation may
    // continue arbitrarily deep (`val({"a":{"b":1}}).a.b`).
    let op = parent.grow_expr(expr, Scope::Json, parent.card, Some(Syn::Nav(name.to_string())));
    Ok((op, id_cont()))
}

//
// Application of signatures
//

fn apply_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let kind = lookup(name).ok_or_else(|| error::unknown_combinator(name))?;
    match kind {
        SigKind::Builtin(b) => builtin_to_op(b, name, args, syn, parent, meta),
        SigKind::Aggregate(a) => aggregate_to_op(a, name, args, parent, meta),
        SigKind::Func(f) => func_to_op(f, name, args, syn, parent, meta),
    }
}

fn positional<'a>(name: &str, args: &'a Args) -> Result<&'a [Syn]> {
    match args {
        Args::Positional(v) => Ok(v),
        Args::Named(_) => Err(error::operand_shape(name, "expected positional arguments")),
    }
}

fn named(name: &str, args: &Args) -> Result<&[crate::syntax::Field]> {
    match args {
        Args::Named(v) => Ok(v),
        Args::Positional(_) => Err(error::operand_shape(name, "expected named arguments")),
    }
}

fn builtin_to_op(
    b: BuiltinCombinator,
    name: &str,
    args: &Args,
    syn: &Syn,
    parent: Op,
    meta: &MetaData,
) -> Result<(Op, Cont)> {
    match b {
        BuiltinCombinator::Select => select_to_op(name, args, parent),
        BuiltinCombinator::Filter => filter_to_op(name, args, syn, parent, meta),
        BuiltinCombinator::Take => take_to_op(name, args, syn, parent, meta),
        BuiltinCombinator::First => first_to_op(name, args, syn, parent, meta),
        BuiltinCombinator::Sort => sort_to_op(name, args, syn, parent, meta),
        BuiltinCombinator::Group => group_to_op(name, args, syn, parent, meta),
        BuiltinCombinator::Around => around_to_op(name, args, parent, meta),
    }
}

fn select_to_op(name: &str, args: &Args, parent: Op) -> Result<(Op, Cont)> {
    let fields = named(name, args)?;
    let record_fields = fields
        .iter()
        .map(|f| RecordField {
            name: f.name.clone(),
            syn: f.syn.clone(),
        })
        .collect();
    let scope = Scope::Record {
        parent: Box::new(parent.scope.clone()),
        fields: record_fields,
    };
    Ok((parent.with_scope(scope), id_cont()))
}

fn filter_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if positional_args.len() != 1 {
        return Err(error::arity(name, "1", positional_args.len()));
    }
    if parent.card < Cardinality::Seq {
        return Err(error::cardinality(format!("{name}(...): expected a sequence of items")));
    }
    let cond = run_to_op(&positional_args[0], make_parent(parent.clone()), meta)?;
    let rel = Rel::Filter {
        rel: Box::new(parent.rel.clone()),
        cond: Box::new(cond),
    };
    let op = parent.grow_rel(rel, parent.scope.clone(), parent.card, Some(syn.clone()));
    Ok((op, id_cont()))
}

fn take_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if positional_args.len() != 1 {
        return Err(error::arity(name, "1", positional_args.len()));
    }
    if parent.card < Cardinality::Seq {
        return Err(error::cardinality(format!("{name}(...): expected a sequence of items")));
    }
    let take = run_to_op(&positional_args[0], make_parent(parent.clone()), meta)?;
    if take.card != Cardinality::One {
        return Err(error::cardinality(format!("{name}(...): argument must be singular")));
    }
    let rel = Rel::Take {
        rel: Box::new(parent.rel.clone()),
        take: Box::new(take),
    };
    let op = parent.grow_rel(rel, parent.scope.clone(), parent.card, Some(syn.clone()));
    Ok((op, id_cont()))
}

fn first_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if !positional_args.is_empty() {
        return Err(error::arity(name, "0", positional_args.len()));
    }
    if parent.card < Cardinality::Seq {
        return Err(error::cardinality(format!("{name}(): expected a sequence of items")));
    }
    let one = run_to_op(&Syn::Literal(Literal::Integer(1)), make_parent(parent.clone()), meta)?;
    let rel = Rel::Take {
        rel: Box::new(parent.rel.clone()),
        take: Box::new(one),
    };
    let op = parent.grow_rel(rel, parent.scope.clone(), Cardinality::One, Some(syn.clone()));
    Ok((op, id_cont()))
}

fn sort_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if parent.card < Cardinality::Seq {
        return Err(error::cardinality(format!("{name}(): expected a sequence of items")));
    }
    let mut sort = Vec::with_capacity(positional_args.len());
    for arg in positional_args {
        let (inner, desc) = match arg {
            Syn::Desc(inner) => (inner.as_ref(), true),
            other => (other, false),
        };
        let key_op = run_to_op(inner, make_parent(parent.clone()), meta)?;
        if key_op.card != Cardinality::One {
            return Err(error::cardinality(format!("{name}(): sort key must be singular")));
        }
        sort.push(SortKey { op: key_op, desc });
    }
    let rel = Rel::Sort {
        rel: Box::new(parent.rel.clone()),
        sort,
    };
    let op = parent.grow_rel(rel, parent.scope.clone(), parent.card, Some(syn.clone()));
    Ok((op, id_cont()))
}

fn group_to_op(name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let named_args = named(name, args)?;
    if parent.card < Cardinality::Seq {
        return Err(error::cardinality(format!("{name}(...): expected a sequence of items")));
    }
    let mut fields = Vec::with_capacity(named_args.len());
    for f in named_args {
        let mut op = run_to_op(&f.syn, make_parent(parent.clone()), meta)?;
        if op.expr.is_none() {
            if let Scope::Table { table } = op.scope.clone() {
                op = op.grow_expr(Expr::Identity(table), Scope::Empty, op.card, op.syn.clone());
            }
        }
        fields.push(Field {
            name: f.name.clone(),
            op,
        });
    }
    let compute = new_compute_list();
    let pre_group_rel = Rc::new(parent.rel.clone());
    let rel = Rel::Group {
        rel: pre_group_rel.clone(),
        fields: fields.clone(),
        compute: compute.clone(),
    };
    let card = if fields.is_empty() {
        Cardinality::One
    } else {
        Cardinality::Seq
    };
    let scope = Scope::Group {
        inner: Box::new(parent.scope.clone()),
        inner_rel: pre_group_rel,
        fields: fields.iter().map(|f| f.name.clone()).collect(),
        compute,
    };
    let op = parent.grow_rel(rel, scope, card, Some(syn.clone()));
    Ok((op, id_cont()))
}

/// `around()` / `around(through)`: rewind to the relation that fed the
/// current pipeline (or, with `through`, the relation a given subexpression
/// resolves against), by replaying the enclosing op's own `syn` rather than
/// the just-applied combinator's. Only one level of `Rel::Parent` is
/// unwrapped — matching `qc0/plan.py::AroundSig_to_op` exactly (not a
/// general walk through arbitrarily many `Parent` wrappers).
fn around_to_op(name: &str, args: &Args, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if positional_args.len() > 1 {
        return Err(error::arity(name, "0 or 1", positional_args.len()));
    }
    let base_syn = match &parent.rel {
        Rel::Parent(inner) => inner.syn.clone(),
        _ => parent.syn.clone(),
    };
    let base_syn = base_syn.ok_or_else(|| error::internal("around(): no base syntax to replay"))?;

    if let Some(through) = positional_args.first() {
        let around_base = Op {
            rel: Rel::AroundParent,
            ..parent.clone()
        };
        let on = run_to_op(through, around_base, meta)?;
        let op = run_to_op(&base_syn, on, meta)?;
        Ok((op, id_cont()))
    } else {
        let seq_parent = Op {
            card: Cardinality::Seq,
            ..parent
        };
        let op = run_to_op(&base_syn, seq_parent, meta)?;
        Ok((op, id_cont()))
    }
}

fn aggregate_to_op(sig: AggrSig, name: &str, args: &Args, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    if !positional_args.is_empty() {
        return Err(error::arity(name, "0", positional_args.len()));
    }
    let already_aggregated = parent.card == Cardinality::One && parent.sig == Some(AggrSig::JsonAgg);
    if parent.card < Cardinality::Seq && !already_aggregated {
        return Err(error::cardinality(format!(
            "{name}(): expected a sequence of items, or an already-aggregated value"
        )));
    }
    // A bare relation (no column/record navigated yet) has no value to fold
    // over — finalize it the same way the pipeline's own tail would, so
    // `table.count()` counts identities rather than failing on a missing expr.
    let parent = if parent.expr.is_none() {
        build_op_expr(parent, meta)?
    } else {
        parent
    };
    Ok((parent.aggregate(sig), id_cont()))
}

fn func_to_op(sig: FuncSig, name: &str, args: &Args, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let positional_args = positional(name, args)?;
    let expected = sig.extra_arity();
    if positional_args.len() != expected {
        return Err(error::arity(name, &expected.to_string(), positional_args.len()));
    }
    let mut arg_ops = Vec::with_capacity(positional_args.len());
    for arg in positional_args {
        let arg_op = run_to_op(arg, make_parent(parent.clone()), meta)?;
        if arg_op.card != Cardinality::One {
            return Err(error::cardinality(format!("{name}(...): arguments must be singular")));
        }
        arg_ops.push(arg_op);
    }
    let expr = Expr::Apply {
        parent: Some(Box::new(parent.clone())),
        args: arg_ops,
        sig: AppliedSig::Func(sig),
    };
    let op = parent.grow_expr(expr, Scope::Empty, parent.card, Some(syn.clone()));
    Ok((op, id_cont()))
}

//
// Binary operators
//

fn binop_to_op(kind: BinOpKind, a_syn: &Syn, b_syn: &Syn, syn: &Syn, parent: Op, meta: &MetaData) -> Result<(Op, Cont)> {
    let sig = BinOpSig::from_kind(kind);

    // Both operands are planned from the same `make_parent(parent)` base, so
    // they necessarily share a relation path — a `SEQ op SEQ` comparison
    // across genuinely *different* parents can't arise here by construction,
    // so no extra check is needed.
    let (a0, ak) = to_op(a_syn, make_parent(parent.clone()), meta)?;
    let a0 = build_op_expr(a0, meta)?;
    let (b0, bk) = to_op(b_syn, make_parent(parent.clone()), meta)?;
    let b0 = build_op_expr(b0, meta)?;

    let make_apply = |a: Expr, b: Expr| -> Expr {
        let wrap = |e: Expr| Op {
            rel: Rel::Void,
            expr: Some(e),
            scope: Scope::Empty,
            card: Cardinality::One,
            sig: None,
            syn: None,
        };
        Expr::Apply {
            parent: None,
            args: vec![wrap(a), wrap(b)],
            sig: AppliedSig::BinOp(sig),
        }
    };

    let (expr, final_a_card, final_b_card) = if a0.card > b0.card {
        let b_final = bk(b0.clone());
        let expr = make_apply(a0.expr.clone().unwrap(), b_final.expr.clone().unwrap());
        let a1 = ak(a0.grow_expr(expr, a0.scope.clone(), a0.card, Some(a_syn.clone())));
        (Expr::Op(Box::new(a1.clone())), a1.card, b0.card)
    } else if a0.card < b0.card {
        let a_final = ak(a0.clone());
        let expr = make_apply(a_final.expr.clone().unwrap(), b0.expr.clone().unwrap());
        let b1 = bk(b0.grow_expr(expr, b0.scope.clone(), b0.card, Some(b_syn.clone())));
        (Expr::Op(Box::new(b1.clone())), a0.card, b1.card)
    } else {
        let a1 = ak(a0);
        let b1 = bk(b0);
        let expr = make_apply(a1.expr.clone().unwrap(), b1.expr.clone().unwrap());
        (expr, a1.card, b1.card)
    };

    let card = parent.card.max(final_a_card).max(final_b_card);
    let op = parent.grow_expr(expr, Scope::Empty, card, Some(syn.clone()));
    Ok((op, id_cont()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Column, ColumnType, ForeignKey, Table};

    fn schema() -> MetaData {
        let region = Table {
            name: "region".into(),
            columns: vec![
                Column { name: "id".into(), ty: ColumnType::Integer },
                Column { name: "name".into(), ty: ColumnType::Text },
                Column { name: "comment".into(), ty: ColumnType::Text },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        };
        let nation = Table {
            name: "nation".into(),
            columns: vec![
                Column { name: "id".into(), ty: ColumnType::Integer },
                Column { name: "name".into(), ty: ColumnType::Text },
                Column { name: "region_id".into(), ty: ColumnType::Integer },
                Column { name: "comment".into(), ty: ColumnType::Text },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKey {
                column: "region_id".into(),
                references_table: "region".into(),
                references_column: "id".into(),
            }],
        };
        MetaData::new(vec![region, nation])
    }

    #[test]
    fn navigates_table_then_column() {
        let meta = schema();
        let syn = Syn::Nav("region".into()).then(Syn::Nav("name".into()));
        let op = plan(&syn, &meta).unwrap();
        assert_eq!(op.card, Cardinality::Seq);
        assert!(matches!(op.expr, Some(Expr::Column(ref c)) if c == "name"));
    }

    #[test]
    fn unknown_table_is_an_error() {
        let meta = schema();
        let syn = Syn::Nav("nonsense".into());
        let err = plan(&syn, &meta).unwrap_err();
        assert!(matches!(err.reason, crate::error::Reason::UnknownName { .. }));
    }

    #[test]
    fn filter_requires_sequence_cardinality() {
        let meta = schema();
        // first() collapses to ONE; a further filter() must fail.
        let syn = Syn::Nav("region".into())
            .then(Syn::Apply("first".into(), Args::Positional(vec![])))
            .then(Syn::Apply(
                "filter".into(),
                Args::Positional(vec![Syn::BinOp(
                    BinOpKind::Eq,
                    Box::new(Syn::Nav("name".into())),
                    Box::new(Syn::Literal(Literal::Text("AFRICA".into()))),
                )]),
            ));
        let err = plan(&syn, &meta).unwrap_err();
        assert!(matches!(err.reason, crate::error::Reason::Cardinality { .. }));
    }

    #[test]
    fn group_idempotence_shape() {
        let meta = schema();
        let syn = Syn::Nav("nation".into()).then(Syn::Apply(
            "group".into(),
            Args::Named(vec![crate::syntax::Field {
                name: "r".into(),
                syn: Syn::Nav("region_id".into()),
            }]),
        ));
        let op = plan(&syn, &meta).unwrap();
        assert_eq!(op.card, Cardinality::Seq);
        assert!(matches!(op.rel, Rel::Group { .. }));
    }
}
