//! Surface builder: lets callers construct [`Syn`] without touching
//! scopes or metadata.
//!
//! Grounded on `qc0/q.py`'s `Q` class. Rust has no `__getattr__`/`__call__`,
//! so dynamic name access becomes an explicit `.nav(name)` call and
//! invocation becomes an explicit `.call(args)` that rewrites the trailing
//! `Nav` into an `Apply` — the same rewrite `Q.__call__` performs, just
//! spelled as a method instead of intercepted syntax. Likewise, Python
//! dunder comparison/arithmetic overloads (which must return `bool` in
//! Rust, not a new `Q`) become named builder methods, in the style Rust's
//! query-builder crates (e.g. Diesel's `.eq()`/`.gt()`) already use for the
//! same reason.

use serde_json::Value as Json;

use crate::error::{bad_syntax_position, Error};
use crate::syntax::{Args, BinOpKind, Field, IntoLiteral, Literal, Syn};

/// A query under construction. Wraps a `Syn`; every method returns a new
/// `Q`, leaving the receiver untouched (construction is append-only, like
/// the rest of the syntax layer).
#[derive(Debug, Clone)]
pub struct Q {
    syn: Option<Syn>,
}

impl Default for Q {
    fn default() -> Self {
        Q::new()
    }
}

impl Q {
    /// The empty pipeline: navigation from here resolves against `Univ`.
    pub fn new() -> Self {
        Q { syn: None }
    }

    fn from_syn(syn: Syn) -> Self {
        Q { syn: Some(syn) }
    }

    /// Exposes the built syntax for the planner to consume.
    pub fn into_syn(self) -> Option<Syn> {
        self.syn
    }

    /// Name access, composed with any prior syntax — `Nav`.
    pub fn nav(&self, name: &str) -> Q {
        let nav = Syn::Nav(name.to_string());
        match &self.syn {
            None => Q::from_syn(nav),
            Some(syn) => Q::from_syn(syn.clone().then(nav)),
        }
    }

    /// `then(q)` — `Compose`.
    pub fn then(&self, next: Q) -> Q {
        match (&self.syn, next.syn) {
            (None, b) => Q { syn: b },
            (Some(a), Some(b)) => Q::from_syn(a.clone().then(b)),
            (Some(a), None) => Q::from_syn(a.clone()),
        }
    }

    /// Invocation: rewrites the trailing `Nav` (possibly inside a
    /// `Compose`) into an `Apply(name, args)`. Mirrors `Q.__call__`.
    pub fn call(&self, args: Vec<Q>) -> Result<Q, Error> {
        let args: Vec<Syn> = args.into_iter().filter_map(|q| q.syn).collect();
        match &self.syn {
            Some(Syn::Nav(name)) => Ok(Q::from_syn(Syn::Apply(name.clone(), Args::Positional(args)))),
            Some(Syn::Compose(a, b)) => match b.as_ref() {
                Syn::Nav(name) => Ok(Q::from_syn(
                    a.as_ref().clone().then(Syn::Apply(name.clone(), Args::Positional(args))),
                )),
                _ => Err(bad_syntax_position("call on a non-name position")),
            },
            _ => Err(bad_syntax_position("call on a non-name position")),
        }
    }

    /// `select(name: q, …)` — `Apply("select", {name: Field{name, q.syn}})`.
    pub fn select(&self, fields: Vec<(&str, Q)>) -> Q {
        self.named_apply("select", fields)
    }

    /// `group(name: q, …)` — `Apply("group", …)`.
    pub fn group(&self, fields: Vec<(&str, Q)>) -> Q {
        self.named_apply("group", fields)
    }

    fn named_apply(&self, name: &str, fields: Vec<(&str, Q)>) -> Q {
        let fields = fields
            .into_iter()
            .map(|(name, q)| Field {
                name: name.to_string(),
                syn: q.syn.unwrap_or(Syn::Nav(String::new())),
            })
            .collect();
        let apply = Syn::Apply(name.to_string(), Args::Named(fields));
        match &self.syn {
            None => Q::from_syn(apply),
            Some(syn) => Q::from_syn(syn.clone().then(apply)),
        }
    }

    /// `desc()` — `Desc`.
    pub fn desc(&self) -> Q {
        match &self.syn {
            Some(syn) => Q::from_syn(Syn::Desc(Box::new(syn.clone()))),
            None => Q::from_syn(Syn::Desc(Box::new(Syn::Nav(String::new())))),
        }
    }

    /// `val(v)` — `Literal` with the appropriate type handle.
    pub fn val(&self, v: impl IntoLiteral) -> Q {
        self.push_literal(v.into_literal())
    }

    /// `json_val(v)` — `Literal` tagged as JSON regardless of shape.
    pub fn json_val(&self, v: Json) -> Q {
        self.push_literal(Literal::Json(v))
    }

    fn push_literal(&self, lit: Literal) -> Q {
        let syn = Syn::Literal(lit);
        match &self.syn {
            None => Q::from_syn(syn),
            Some(prior) => Q::from_syn(prior.clone().then(syn)),
        }
    }

    fn binop(&self, kind: BinOpKind, other: Q) -> Q {
        let a = self.syn.clone().expect("binary operator on empty pipeline");
        let b = other.syn.expect("binary operator against empty pipeline");
        Q::from_syn(Syn::BinOp(kind, Box::new(a), Box::new(b)))
    }

    pub fn eq(&self, other: Q) -> Q {
        self.binop(BinOpKind::Eq, other)
    }
    pub fn ne(&self, other: Q) -> Q {
        self.binop(BinOpKind::Ne, other)
    }
    pub fn lt(&self, other: Q) -> Q {
        self.binop(BinOpKind::Lt, other)
    }
    pub fn gt(&self, other: Q) -> Q {
        self.binop(BinOpKind::Gt, other)
    }
    pub fn le(&self, other: Q) -> Q {
        self.binop(BinOpKind::Le, other)
    }
    pub fn ge(&self, other: Q) -> Q {
        self.binop(BinOpKind::Ge, other)
    }
    pub fn add(&self, other: Q) -> Q {
        self.binop(BinOpKind::Add, other)
    }
    pub fn sub(&self, other: Q) -> Q {
        self.binop(BinOpKind::Sub, other)
    }
    pub fn mul(&self, other: Q) -> Q {
        self.binop(BinOpKind::Mul, other)
    }
    pub fn div(&self, other: Q) -> Q {
        self.binop(BinOpKind::Div, other)
    }
    pub fn and(&self, other: Q) -> Q {
        self.binop(BinOpKind::And, other)
    }
    pub fn or(&self, other: Q) -> Q {
        self.binop(BinOpKind::Or, other)
    }
}

impl std::ops::Shr<Q> for Q {
    type Output = Q;
    /// `a >> b` — explicit `Compose` sugar, mirroring `Q.__rshift__`.
    fn shr(self, rhs: Q) -> Q {
        self.then(rhs)
    }
}

/// Starts a pipeline by navigating to a top-level table, e.g. `table("region")`.
pub fn table(name: &str) -> Q {
    Q::new().nav(name)
}
