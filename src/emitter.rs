//! SQL emitter (C6): `Op` → a single SQL `SELECT`.
//!
//! Grounded on `qc0/op_to_sql.py`: a `From` frame threaded through two
//! mutually recursive passes (`rel_to_sql`/`expr_to_sql`, composed through
//! `op_to_sql`), join deduplication keyed on `(outer alias, target, join
//! columns)`, correlated lateral subqueries for reverse-FK navigation, and
//! `RelGroup`'s kernel-rebuild-per-aggregate pattern. Builds a `sqlparser`
//! AST directly, struct-literal construction rather than a string template.
//!
//! One deliberate simplification: rather than a separate `Namespace`
//! threaded alongside the frame, hoisted `compute` fields are materialized
//! as ordinary named columns on the relation they're hoisted onto
//! (`RelGroup`'s kernel wrap, see `lower_group`) and referenced exactly like
//! `ExprColumn` thereafter. Frame-sealing always reprojects `*`, so a
//! hoisted name survives every subsequent seal without a parallel lookup
//! table. See `DESIGN.md` for the reasoning.

use std::collections::HashMap;

use sqlparser::ast::{
    BinaryOperator, DataType, DateTimeField, Expr as SqlExpr, Function, FunctionArg,
    FunctionArgExpr, Ident, Join, JoinConstraint, JoinOperator, ObjectName, OrderByExpr, Query,
    Select, SelectItem, SetExpr, TableAlias, TableFactor, TableWithJoins, Value as SqlValue,
    WildcardAdditionalOptions,
};

use crate::error::{self, Result};
use crate::metadata::MetaData;
use crate::op::{AppliedSig, ComputeList, Expr, Field, Op, Rel, SyntheticOp};
use crate::scope::Cardinality;
use crate::sig::{AggrSig, FuncSig};
use crate::syntax::Literal;
use crate::utils::IdGenerator;

/// The emitter's only configuration knob, modeled on `sql::Options`. `true`
/// emits every `ExprConst` as a numbered placeholder instead of an inline
/// literal — this core never executes the query, so placeholders exist
/// purely to match the shape callers that *do* bind parameters expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub literal_binds: bool,
}

/// A fully emitted query, ready to `.to_string()` or hand to a driver.
pub type SqlSelect = Query;

/// Entry point (C6): `compile(op, metadata, options) -> SqlSelect`. A `SEQ`
/// top-level op is aggregated to a JSON array at this outermost step; a
/// `ONE` op's value is projected directly. Every compiled query has exactly
/// one selected column, named `value`.
pub fn compile(op: &Op, meta: &MetaData, options: &Options) -> Result<SqlSelect> {
    let ids = IdGenerator::new();
    log::debug!("compile: top-level card={:?}", op.card);
    let (value, frame) = if op.card == Cardinality::Seq {
        wrap_aggregate(AggrSig::JsonAgg, op, Frame::empty(), meta, options, &ids)?
    } else {
        let (v, f) = op_to_sql(op, Frame::empty(), meta, options, &ids)?;
        (v.ok_or_else(|| error::internal("top-level op produced no value"))?, f)
    };

    let select = Select {
        projection: vec![labeled(value, "value")],
        from: frame.current.clone().into_iter().collect(),
        selection: frame.selection.clone(),
        ..default_select()
    };
    Ok(Query {
        order_by: frame.order_by,
        limit: frame.limit,
        ..default_query(SetExpr::Select(Box::new(select)))
    })
}

//
// The From frame
//

type JoinKey = (Option<String>, String, Vec<(String, String)>);

/// The emitter's threaded bookkeeping object — the `From` frame each
/// relation/expression lowering step consumes and extends. Built by
/// functional update: every mutator below returns a new `Frame` rather than
/// mutating in place.
#[derive(Debug, Clone)]
struct Frame {
    /// The current SQL FROM tree, absent until the first relation is
    /// lowered (e.g. the starting point of a correlated subquery).
    current: Option<TableWithJoins>,
    /// The alias naming the "current row" — what bare `ExprColumn`
    /// references resolve against.
    at: Option<String>,
    /// Join-dedup cache: repeated navigation through the same FK from the
    /// same row reuses the existing alias instead of introducing a new one.
    existing: HashMap<JoinKey, String>,
    /// Pending WHERE, folded conjunctively until something forces a seal.
    selection: Option<SqlExpr>,
    order_by: Vec<OrderByExpr>,
    limit: Option<SqlExpr>,
    /// The outer row's alias, when this frame is being built as a
    /// correlated subquery against it (set only at the root of a fresh
    /// `wrap_aggregate`/`RevJoin` lowering).
    correlate: Option<String>,
}

impl Frame {
    fn empty() -> Frame {
        Frame {
            current: None,
            at: None,
            existing: HashMap::new(),
            selection: None,
            order_by: Vec::new(),
            limit: None,
            correlate: None,
        }
    }

    /// Attaches `factor` as the base FROM item (if this frame has none yet)
    /// or as a join against the existing one, with `operator` defaulting to
    /// a plain `CROSS JOIN` (used for the always-exactly-one-row aggregate
    /// subqueries `wrap_aggregate` attaches).
    fn attach(&self, alias: &str, factor: TableFactor, operator: Option<JoinOperator>) -> Frame {
        match &self.current {
            None => Frame {
                current: Some(TableWithJoins { relation: factor, joins: Vec::new() }),
                at: Some(alias.to_string()),
                ..self.clone()
            },
            Some(twj) => {
                let mut twj = twj.clone();
                twj.joins.push(Join {
                    relation: factor,
                    join_operator: operator.unwrap_or(JoinOperator::CrossJoin),
                });
                Frame { current: Some(twj), at: Some(alias.to_string()), ..self.clone() }
            }
        }
    }

    /// Joins `target_table` onto the current row via the column pairs in
    /// `by` (`(this side, target side)`), reusing a prior join through the
    /// same `(row, target, columns)` key when one exists.
    fn join_at(&self, ids: &IdGenerator, target_table: &str, by: &[(String, String)], outer: bool) -> Result<Frame> {
        let key: JoinKey = (self.at.clone(), target_table.to_string(), by.to_vec());
        if let Some(alias) = self.existing.get(&key) {
            log::trace!("join_at: reusing `{alias}` for `{target_table}`");
            return Ok(Frame { at: Some(alias.clone()), ..self.clone() });
        }
        let at = self
            .at
            .clone()
            .ok_or_else(|| error::internal("join navigated with no established row position"))?;
        let alias = ids.next_named("t");
        let factor = TableFactor::Table {
            name: object_name(target_table),
            alias: Some(table_alias(&alias)),
            args: None,
            with_hints: Vec::new(),
        };
        let cond = by
            .iter()
            .map(|(l, r)| and_pair(col(&at, l), col(&alias, r)))
            .reduce(and_exprs);
        let operator = cond.map(|c| {
            if outer {
                JoinOperator::LeftOuter(JoinConstraint::On(c))
            } else {
                JoinOperator::Inner(JoinConstraint::On(c))
            }
        });
        let mut frame = self.attach(&alias, factor, operator);
        frame.existing.insert(key, alias);
        Ok(frame)
    }

    /// Materializes any pending WHERE/ORDER/LIMIT into an aliased subselect,
    /// projecting every column through so later references keep working.
    /// A no-op when nothing is pending.
    fn seal(&self, ids: &IdGenerator) -> Frame {
        if self.selection.is_none() && self.order_by.is_empty() && self.limit.is_none() {
            return self.clone();
        }
        log::debug!("seal: materializing pending clauses into a subselect");
        let select = Select {
            projection: vec![wildcard_item()],
            from: self.current.clone().into_iter().collect(),
            selection: self.selection.clone(),
            ..default_select()
        };
        let query = Query {
            order_by: self.order_by.clone(),
            limit: self.limit.clone(),
            ..default_query(SetExpr::Select(Box::new(select)))
        };
        let alias = ids.next_named("s");
        let factor = TableFactor::Derived {
            lateral: false,
            subquery: Box::new(query),
            alias: Some(table_alias(&alias)),
        };
        Frame {
            current: Some(TableWithJoins { relation: factor, joins: Vec::new() }),
            at: Some(alias),
            existing: HashMap::new(),
            selection: None,
            order_by: Vec::new(),
            limit: None,
            correlate: self.correlate.clone(),
        }
    }
}

fn and_pair(a: SqlExpr, b: SqlExpr) -> SqlExpr {
    SqlExpr::BinaryOp { left: Box::new(a), op: BinaryOperator::Eq, right: Box::new(b) }
}

fn and_exprs(a: SqlExpr, b: SqlExpr) -> SqlExpr {
    SqlExpr::BinaryOp { left: Box::new(a), op: BinaryOperator::And, right: Box::new(b) }
}

//
// rel_to_sql — Rel, dispatched by variant
//

fn rel_to_sql(rel: &Rel, frame: Frame, meta: &MetaData, options: &Options, ids: &IdGenerator) -> Result<Frame> {
    match rel {
        Rel::Void | Rel::Parent(_) | Rel::AggregateParent | Rel::AroundParent => Ok(frame),

        Rel::Table(name) => {
            let alias = ids.next_named("t");
            let factor = TableFactor::Table {
                name: object_name(name),
                alias: Some(table_alias(&alias)),
                args: None,
                with_hints: Vec::new(),
            };
            Ok(Frame {
                current: Some(TableWithJoins { relation: factor, joins: Vec::new() }),
                at: Some(alias),
                existing: HashMap::new(),
                selection: None,
                order_by: Vec::new(),
                limit: None,
                correlate: frame.correlate,
            })
        }

        Rel::Join { rel, fk } => {
            let frame = rel_to_sql(rel, frame, meta, options, ids)?;
            if frame.current.is_none() {
                return Err(error::internal(
                    "forward join navigated with no row established yet (e.g. off a bare `around()`/`_` marker)",
                ));
            }
            frame.join_at(ids, &fk.references_table, &[(fk.column.clone(), fk.references_column.clone())], false)
        }

        // `frame.current.is_none()` exactly distinguishes "starting a fresh
        // (possibly correlated) lowering" — the root of `wrap_aggregate`'s
        // inner frame, or a bare `around()` — from "continuing an
        // already-established pipeline", where this is an ordinary join.
        Rel::RevJoin { rel, table, fk } => {
            let frame = rel_to_sql(rel, frame, meta, options, ids)?;
            if frame.current.is_none() {
                let alias = ids.next_named("t");
                let factor = TableFactor::Table {
                    name: object_name(table),
                    alias: Some(table_alias(&alias)),
                    args: None,
                    with_hints: Vec::new(),
                };
                let mut base = Frame {
                    current: Some(TableWithJoins { relation: factor, joins: Vec::new() }),
                    at: Some(alias.clone()),
                    existing: HashMap::new(),
                    selection: None,
                    order_by: Vec::new(),
                    limit: None,
                    correlate: frame.correlate.clone(),
                };
                if let Some(outer) = frame.correlate {
                    log::trace!("rev-join: correlating `{table}` against `{outer}`");
                    base.selection = Some(and_pair(col(&alias, &fk.column), col(&outer, &fk.references_column)));
                }
                Ok(base)
            } else {
                frame.join_at(ids, table, &[(fk.references_column.clone(), fk.column.clone())], false)
            }
        }

        Rel::Take { rel, take } => {
            let mut frame = rel_to_sql(rel, frame, meta, options, ids)?;
            if frame.limit.is_some() {
                frame = frame.seal(ids);
            }
            let (value, frame) = op_to_sql(take, frame, meta, options, ids)?;
            let value = value.ok_or_else(|| error::internal("take(): count produced no value"))?;
            Ok(Frame { limit: Some(value), ..frame })
        }

        Rel::Filter { rel, cond } => {
            let mut frame = rel_to_sql(rel, frame, meta, options, ids)?;
            if frame.limit.is_some() {
                frame = frame.seal(ids);
            }
            let (value, frame) = op_to_sql(cond, frame, meta, options, ids)?;
            let value = value.ok_or_else(|| error::internal("filter(): condition produced no value"))?;
            let selection = match frame.selection.clone() {
                Some(prev) => and_exprs(prev, value),
                None => value,
            };
            Ok(Frame { selection: Some(selection), ..frame })
        }

        Rel::Sort { rel, sort } => {
            let mut frame = rel_to_sql(rel, frame, meta, options, ids)?;
            if frame.limit.is_some() {
                frame = frame.seal(ids);
            }
            let mut order_by = Vec::with_capacity(sort.len());
            for key in sort {
                let (value, f2) = op_to_sql(&key.op, frame, meta, options, ids)?;
                frame = f2;
                let value = value.ok_or_else(|| error::internal("sort(): key produced no value"))?;
                order_by.push(OrderByExpr { expr: value, asc: Some(!key.desc), nulls_first: None });
            }
            Ok(Frame { order_by, ..frame })
        }

        Rel::Group { rel, fields, compute } => lower_group(rel, fields, compute, frame, meta, options, ids),
    }
}

//
// expr_to_sql — Expr, dispatched by variant
//

fn expr_to_sql(expr: &Expr, frame: Frame, meta: &MetaData, options: &Options, ids: &IdGenerator) -> Result<(SqlExpr, Frame)> {
    match expr {
        Expr::Op(inner) => {
            let (value, frame) = op_to_sql(inner, frame, meta, options, ids)?;
            let value = value.ok_or_else(|| error::internal("nested op produced no value"))?;
            Ok((value, frame))
        }

        Expr::Record(fields) => {
            let original_at = frame.at.clone();
            let mut current = frame;
            let mut items = Vec::with_capacity(fields.len());
            for f in fields {
                let field_frame = Frame { at: original_at.clone(), ..current };
                let (value, f2) = op_to_sql(&f.op, field_frame, meta, options, ids)?;
                let value = value.ok_or_else(|| error::internal(format!("record field `{}` produced no value", f.name)))?;
                items.push((f.name.clone(), value));
                current = f2;
            }
            Ok((jsonb_build_object(items), Frame { at: original_at, ..current }))
        }

        Expr::Column(name) => {
            let at = frame.at.clone().ok_or_else(|| error::internal("column reference with no established row"))?;
            Ok((col(&at, name), frame))
        }

        // Hoisted `compute` fields are materialized as ordinary named
        // columns (see module docs) — resolved exactly like `ExprColumn`.
        Expr::Compute(name) => {
            let at = frame.at.clone().ok_or_else(|| error::internal("compute reference with no established row"))?;
            Ok((col(&at, name), frame))
        }

        Expr::Identity(table) => {
            let t = meta
                .table(table)
                .ok_or_else(|| error::internal(format!("table `{table}` vanished from metadata")))?;
            let at = frame.at.clone().ok_or_else(|| error::internal("identity requested with no established row"))?;
            let row = call_function("row", t.primary_key.iter().map(|pk| col(&at, pk)).collect());
            Ok((SqlExpr::Cast { expr: Box::new(row), data_type: DataType::Varchar(None) }, frame))
        }

        Expr::Const(lit) => {
            let value = embed_literal(lit, options, ids);
            Ok((value, frame))
        }

        Expr::Apply { parent, args, sig } => {
            let (receiver, mut frame) = match parent {
                Some(p) => op_to_sql(p, frame, meta, options, ids)?,
                None => (None, frame),
            };
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                let (value, f2) = op_to_sql(a, frame, meta, options, ids)?;
                frame = f2;
                arg_values.push(value.ok_or_else(|| error::internal("apply argument produced no value"))?);
            }
            let value = match sig {
                AppliedSig::Func(f) => {
                    let receiver =
                        receiver.ok_or_else(|| error::internal("function application missing its receiver"))?;
                    f.compile(receiver, arg_values)
                }
                AppliedSig::BinOp(b) => {
                    let mut it = arg_values.into_iter();
                    let a = it.next().ok_or_else(|| error::internal("binary operator missing left operand"))?;
                    let b2 = it.next().ok_or_else(|| error::internal("binary operator missing right operand"))?;
                    b.compile(a, b2)
                }
                AppliedSig::Synthetic(s) => {
                    let receiver =
                        receiver.ok_or_else(|| error::internal("synthetic member access missing its receiver"))?;
                    synthetic_compile(*s, receiver)
                }
            };
            Ok((value, frame))
        }
    }
}

fn synthetic_compile(op: SyntheticOp, expr: SqlExpr) -> SqlExpr {
    let field = match op {
        SyntheticOp::DateYear => DateTimeField::Year,
        SyntheticOp::DateMonth => DateTimeField::Month,
        SyntheticOp::DateDay => DateTimeField::Day,
    };
    SqlExpr::Extract { field, expr: Box::new(expr) }
}

//
// op_to_sql — the composed driver: lower the relation, then the value
//

fn op_to_sql(op: &Op, frame: Frame, meta: &MetaData, options: &Options, ids: &IdGenerator) -> Result<(Option<SqlExpr>, Frame)> {
    if let Some(sig) = op.sig {
        let (value, frame) = wrap_aggregate(sig, op, frame, meta, options, ids)?;
        return Ok((Some(value), frame));
    }
    log::trace!("op_to_sql: card={:?}", op.card);
    let mut frame = rel_to_sql(&op.rel, frame, meta, options, ids)?;
    let value = match &op.expr {
        Some(e) => {
            let (v, f2) = expr_to_sql(e, frame, meta, options, ids)?;
            frame = f2;
            Some(v)
        }
        None => None,
    };
    Ok((value, frame))
}

/// `op.sig` is set: lower `op.rel`/`op.expr` from a *fresh* frame (the
/// enclosing row, if any, passed along only via `correlate`), fold the
/// result through `COALESCE(sig(value), sig.unit)`, and attach the whole
/// thing back onto `outer` as a `CROSS JOIN LATERAL` (or, if `outer` has no
/// rows of its own yet, as the base relation outright).
fn wrap_aggregate(sig: AggrSig, op: &Op, outer: Frame, meta: &MetaData, options: &Options, ids: &IdGenerator) -> Result<(SqlExpr, Frame)> {
    log::debug!("wrap_aggregate: {}", sig.name());
    let inner_start = Frame { correlate: outer.at.clone(), ..Frame::empty() };
    let mut inner = rel_to_sql(&op.rel, inner_start, meta, options, ids)?;
    // A pending ORDER/LIMIT has no effect once folded into the same
    // aggregate query (the aggregate collapses to one row regardless) —
    // seal it into a subselect first so `sort().take(n)` actually bounds
    // what gets aggregated.
    if inner.limit.is_some() || !inner.order_by.is_empty() {
        inner = inner.seal(ids);
    }
    let expr = op
        .expr
        .as_ref()
        .ok_or_else(|| error::internal("aggregate applied to a valueless op"))?;
    let (value, inner) = expr_to_sql(expr, inner, meta, options, ids)?;

    let agg_expr = coalesce(sig.compile(value), sig.unit());
    let select = Select {
        projection: vec![labeled(agg_expr, "value")],
        from: inner.current.clone().into_iter().collect(),
        selection: inner.selection.clone(),
        ..default_select()
    };
    let query = Query {
        order_by: inner.order_by.clone(),
        limit: inner.limit.clone(),
        ..default_query(SetExpr::Select(Box::new(select)))
    };
    let alias = ids.next_named("agg");
    let lateral = outer.at.is_some();
    let factor = TableFactor::Derived { lateral, subquery: Box::new(query), alias: Some(table_alias(&alias)) };
    let new_outer = outer.attach(&alias, factor, None);
    Ok((col(&alias, "value"), new_outer))
}

/// Lowers `op.rel` then `op.expr` without the generic aggregate wrap (used
/// inside `lower_group`, where the aggregate is attached via a grouped
/// equi-join rather than a lateral one).
fn lower_value(op: &Op, frame: Frame, meta: &MetaData, options: &Options, ids: &IdGenerator) -> Result<(SqlExpr, Frame)> {
    let frame = rel_to_sql(&op.rel, frame, meta, options, ids)?;
    let expr = op.expr.as_ref().ok_or_else(|| error::internal("value lowering on a valueless op"))?;
    expr_to_sql(expr, frame, meta, options, ids)
}

//
// RelGroup — kernel-rebuild-per-aggregate
//

/// `RelGroup`'s lowering: `fields` are the user's named
/// `group(...)` arguments — each independently may be a plain grouping key
/// (`op.sig.is_none()`) or an aggregate computed per group (`op.sig.is_some()`,
/// e.g. `group(region: ..., n: _.count())`); `compute` holds the anonymous
/// aggregates hoisted from a `_` reference nested deeper inside some field's
/// own syntax (named `compute_0`, `compute_1`, … by `navigate_group`). Builds
/// a "kernel" select grouped on the plain keys, then — for every aggregate,
/// whether a named field or a hoisted `compute` entry — independently
/// rebuilds that same grouping, computes the aggregate over it, and joins
/// the result back keyed on the group columns. Grouped on nothing (every
/// field is an aggregate, or there are no fields at all — the whole
/// relation collapses to one group), a synthetic `_group` join key stands in
/// so the attach logic stays uniform.
fn lower_group(
    rel: &Rel,
    fields: &[Field],
    compute: &ComputeList,
    outer: Frame,
    meta: &MetaData,
    options: &Options,
    ids: &IdGenerator,
) -> Result<Frame> {
    let keys: Vec<&Field> = fields.iter().filter(|f| f.op.sig.is_none()).collect();
    let aggregates: Vec<&Field> = fields.iter().filter(|f| f.op.sig.is_some()).collect();
    log::debug!(
        "lower_group: {} key(s), {} named aggregate(s), {} hoisted aggregate(s)",
        keys.len(),
        aggregates.len(),
        compute.borrow().len()
    );

    let build_base = |ids: &IdGenerator| -> Result<Frame> {
        let mut base = rel_to_sql(rel, Frame { correlate: outer.correlate.clone(), ..Frame::empty() }, meta, options, ids)?;
        if base.selection.is_some() || base.limit.is_some() || !base.order_by.is_empty() {
            base = base.seal(ids);
        }
        Ok(base)
    };

    let collect_keys = |mut frame: Frame, ids: &IdGenerator| -> Result<(Vec<(String, SqlExpr)>, Frame)> {
        let mut cols = Vec::with_capacity(keys.len());
        for f in &keys {
            let (value, f2) = op_to_sql(&f.op, frame, meta, options, ids)?;
            frame = f2;
            let value = value.ok_or_else(|| error::internal(format!("group key `{}` produced no value", f.name)))?;
            cols.push((f.name.clone(), value));
        }
        Ok((cols, frame))
    };

    let join_cols = |named: &[(String, SqlExpr)]| -> Vec<(String, SqlExpr)> {
        if named.is_empty() {
            vec![("_group".to_string(), SqlExpr::Value(SqlValue::Number("1".to_string(), false)))]
        } else {
            named.to_vec()
        }
    };

    let kernel_base = build_base(ids)?;
    let (named_keys, kernel_frame) = collect_keys(kernel_base, ids)?;
    let kernel_join_cols = join_cols(&named_keys);

    let kernel_select = Select {
        projection: kernel_join_cols.iter().map(|(n, e)| labeled(e.clone(), n)).collect(),
        from: kernel_frame.current.clone().into_iter().collect(),
        group_by: kernel_join_cols.iter().map(|(_, e)| e.clone()).collect(),
        ..default_select()
    };
    let kernel_alias = ids.next_named("g");
    let kernel_factor = TableFactor::Derived {
        lateral: false,
        subquery: Box::new(default_query(SetExpr::Select(Box::new(kernel_select)))),
        alias: Some(table_alias(&kernel_alias)),
    };
    let mut result = Frame {
        current: Some(TableWithJoins { relation: kernel_factor, joins: Vec::new() }),
        at: Some(kernel_alias.clone()),
        existing: HashMap::new(),
        selection: None,
        order_by: Vec::new(),
        limit: None,
        correlate: outer.correlate.clone(),
    };

    // Every aggregate — a named `group(...)` field carrying its own `sig`,
    // or an anonymous `compute` entry hoisted from a nested `_` — goes
    // through the identical rebuild-and-join-back pattern, keeping only its
    // output name distinct.
    let compute_borrowed = compute.borrow();
    let aggregate_entries: Vec<(&str, &Op)> = aggregates
        .iter()
        .map(|f| (f.name.as_str(), &f.op))
        .chain(compute_borrowed.iter().map(|f| (f.name.as_str(), &f.op)))
        .collect();

    let mut aggregate_aliases = Vec::with_capacity(aggregate_entries.len());
    for (out_name, agg_op) in &aggregate_entries {
        let agg_base = build_base(ids)?;
        let (agg_named_keys, agg_frame) = collect_keys(agg_base, ids)?;
        let agg_join_cols = join_cols(&agg_named_keys);
        let (raw_value, agg_frame) = lower_value(agg_op, agg_frame, meta, options, ids)?;
        let sig = agg_op
            .sig
            .ok_or_else(|| error::internal(format!("group field `{out_name}` is not an aggregate")))?;
        let agg_value = coalesce(sig.compile(raw_value), sig.unit());

        let agg_select = Select {
            projection: agg_join_cols
                .iter()
                .map(|(n, e)| labeled(e.clone(), n))
                .chain(std::iter::once(labeled(agg_value, "value")))
                .collect(),
            from: agg_frame.current.clone().into_iter().collect(),
            group_by: agg_join_cols.iter().map(|(_, e)| e.clone()).collect(),
            ..default_select()
        };
        let agg_alias = ids.next_named("a");
        let agg_factor = TableFactor::Derived {
            lateral: false,
            subquery: Box::new(default_query(SetExpr::Select(Box::new(agg_select)))),
            alias: Some(table_alias(&agg_alias)),
        };
        let cond = kernel_join_cols
            .iter()
            .map(|(n, _)| and_pair(col(&kernel_alias, n), col(&agg_alias, n)))
            .reduce(and_exprs);
        result = result.attach(&agg_alias, agg_factor, cond.map(|c| JoinOperator::LeftOuter(JoinConstraint::On(c))));
        aggregate_aliases.push((out_name.to_string(), agg_alias));
    }
    drop(compute_borrowed);

    let mut final_projection: Vec<SelectItem> =
        named_keys.iter().map(|(n, _)| labeled(col(&kernel_alias, n), n)).collect();
    for (out_name, agg_alias) in &aggregate_aliases {
        final_projection.push(labeled(col(agg_alias, "value"), out_name));
    }
    let final_select = Select {
        projection: final_projection,
        from: result.current.clone().into_iter().collect(),
        ..default_select()
    };
    let final_alias = ids.next_named("g");
    let final_factor = TableFactor::Derived {
        lateral: false,
        subquery: Box::new(default_query(SetExpr::Select(Box::new(final_select)))),
        alias: Some(table_alias(&final_alias)),
    };
    Ok(Frame {
        current: Some(TableWithJoins { relation: final_factor, joins: Vec::new() }),
        at: Some(final_alias),
        existing: HashMap::new(),
        selection: None,
        order_by: Vec::new(),
        limit: None,
        correlate: outer.correlate,
    })
}

//
// SQL AST builder helpers
//

fn ident(s: &str) -> Ident {
    Ident::new(s)
}

fn object_name(s: &str) -> ObjectName {
    ObjectName(vec![ident(s)])
}

fn table_alias(s: &str) -> TableAlias {
    TableAlias { name: ident(s), columns: Vec::new() }
}

fn col(alias: &str, name: &str) -> SqlExpr {
    SqlExpr::CompoundIdentifier(vec![ident(alias), ident(name)])
}

fn labeled(expr: SqlExpr, name: &str) -> SelectItem {
    SelectItem::ExprWithAlias { expr, alias: ident(name) }
}

fn wildcard_item() -> SelectItem {
    SelectItem::Wildcard(WildcardAdditionalOptions::default())
}

fn call_function(name: &str, args: Vec<SqlExpr>) -> SqlExpr {
    SqlExpr::Function(Function {
        name: object_name(name),
        args: args.into_iter().map(|e| FunctionArg::Unnamed(FunctionArgExpr::Expr(e))).collect(),
        over: None,
        distinct: false,
        special: false,
    })
}

fn coalesce(value: SqlExpr, unit: SqlExpr) -> SqlExpr {
    call_function("coalesce", vec![value, unit])
}

fn jsonb_build_object(fields: Vec<(String, SqlExpr)>) -> SqlExpr {
    let mut args = Vec::with_capacity(fields.len() * 2);
    for (name, value) in fields {
        args.push(SqlExpr::Value(SqlValue::SingleQuotedString(name)));
        args.push(value);
    }
    call_function("jsonb_build_object", args)
}

fn embed_literal(lit: &Literal, options: &Options, ids: &IdGenerator) -> SqlExpr {
    if options.literal_binds {
        return SqlExpr::Value(SqlValue::Placeholder(format!("${}", ids.next())));
    }
    match lit {
        Literal::Integer(n) => SqlExpr::Value(SqlValue::Number(n.to_string(), false)),
        Literal::Float(f) => SqlExpr::Value(SqlValue::Number(f.to_string(), false)),
        Literal::Text(s) => SqlExpr::Value(SqlValue::SingleQuotedString(s.clone())),
        Literal::Boolean(b) => SqlExpr::Value(SqlValue::Boolean(*b)),
        Literal::Date { year, month, day } => SqlExpr::TypedString {
            data_type: DataType::Date,
            value: format!("{year:04}-{month:02}-{day:02}"),
        },
        Literal::Json(v) => SqlExpr::Cast {
            expr: Box::new(SqlExpr::Value(SqlValue::SingleQuotedString(v.to_string()))),
            data_type: DataType::Custom(ObjectName(vec![ident("jsonb")]), vec![]),
        },
    }
}

fn default_select() -> Select {
    Select {
        distinct: false,
        top: None,
        projection: Vec::new(),
        into: None,
        from: Vec::new(),
        lateral_views: Vec::new(),
        selection: None,
        group_by: Vec::new(),
        cluster_by: Vec::new(),
        distribute_by: Vec::new(),
        sort_by: Vec::new(),
        having: None,
        qualify: None,
    }
}

fn default_query(body: SetExpr) -> Query {
    Query {
        with: None,
        body: Box::new(body),
        order_by: Vec::new(),
        limit: None,
        offset: None,
        fetch: None,
        locks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Column, ColumnType, ForeignKey, Table};
    use crate::planner::plan;
    use crate::syntax::{Args, BinOpKind};

    fn schema() -> MetaData {
        let region = Table {
            name: "region".into(),
            columns: vec![
                Column { name: "id".into(), ty: ColumnType::Integer },
                Column { name: "name".into(), ty: ColumnType::Text },
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
    fn scalar_column_compiles_to_a_single_value_select() {
        let meta = schema();
        let syn = Syn::Nav("region".into())
            .then(Syn::Apply("first".into(), Args::Positional(vec![])))
            .then(Syn::Nav("name".into()));
        let op = plan(&syn, &meta).unwrap();
        let query = compile(&op, &meta, &Options::default()).unwrap();
        let sql = query.to_string();
        assert!(sql.to_lowercase().contains("select"));
        assert!(sql.contains("AS value"));
    }

    #[test]
    fn sequence_of_records_wraps_in_jsonb_agg() {
        let meta = schema();
        let syn = Syn::Nav("region".into());
        let op = plan(&syn, &meta).unwrap();
        let query = compile(&op, &meta, &Options::default()).unwrap();
        let sql = query.to_string().to_lowercase();
        assert!(sql.contains("jsonb_agg"));
        assert!(sql.contains("coalesce"));
    }

    #[test]
    fn reverse_fk_navigation_joins_nation_onto_region() {
        let meta = schema();
        let syn = Syn::Nav("region".into()).then(Syn::Nav("nation".into()));
        let op = plan(&syn, &meta).unwrap();
        let query = compile(&op, &meta, &Options::default()).unwrap();
        let sql = query.to_string().to_lowercase();
        assert!(sql.contains("nation"));
        assert!(sql.contains("region_id"));
    }

    #[test]
    fn filter_condition_lowers_into_a_where_clause() {
        let meta = schema();
        let syn = Syn::Nav("region".into()).then(Syn::Apply(
            "filter".into(),
            Args::Positional(vec![Syn::BinOp(
                BinOpKind::Eq,
                Box::new(Syn::Nav("name".into())),
                Box::new(Syn::Literal(Literal::Text("AFRICA".into()))),
            )]),
        ));
        let op = plan(&syn, &meta).unwrap();
        let query = compile(&op, &meta, &Options::default()).unwrap();
        let sql = query.to_string();
        assert!(sql.contains("WHERE"));
        assert!(sql.contains("AFRICA"));
    }

    #[test]
    fn group_by_region_hoists_a_count_aggregate() {
        let meta = schema();
        let syn = Syn::Nav("nation".into()).then(Syn::Apply(
            "group".into(),
            Args::Named(vec![crate::syntax::Field { name: "r".into(), syn: Syn::Nav("region_id".into()) }]),
        ));
        let op = plan(&syn, &meta).unwrap();
        let query = compile(&op, &meta, &Options::default()).unwrap();
        let sql = query.to_string().to_lowercase();
        assert!(sql.contains("group by"));
    }

    #[test]
    fn literal_binds_emit_placeholders_instead_of_inline_values() {
        let meta = schema();
        let syn = Syn::Nav("region".into()).then(Syn::Apply(
            "filter".into(),
            Args::Positional(vec![Syn::BinOp(
                BinOpKind::Eq,
                Box::new(Syn::Nav("name".into())),
                Box::new(Syn::Literal(Literal::Text("AFRICA".into()))),
            )]),
        ));
        let op = plan(&syn, &meta).unwrap();
        let options = Options { literal_binds: true };
        let query = compile(&op, &meta, &options).unwrap();
        let sql = query.to_string();
        assert!(!sql.contains("AFRICA"));
        assert!(sql.contains('$'));
    }
}
