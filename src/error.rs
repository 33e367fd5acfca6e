//! Structured errors raised by the planner.
//!
//! Modeled on `prql_compiler::Error`: a small `reason` tag plus an optional
//! human hint, with `Result<T> = Result<T, Error>` used everywhere else in
//! the crate. There is no `span` here (there is no source text to point
//! into — the surface is a builder, not a parser).

use std::fmt;

/// One of the named error kinds a planner invocation can fail with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// `Nav` could not be resolved against the current scope.
    UnknownName { name: String },
    /// `Apply(name, ..)` did not match any registered signature.
    UnknownCombinator { name: String },
    /// A signature received the wrong number of arguments.
    Arity {
        combinator: String,
        expected: String,
        found: usize,
    },
    /// An operand's type or cardinality violates the signature's shape.
    OperandShape { combinator: String, detail: String },
    /// A `ONE`-requiring position received `SEQ`, or the reverse.
    Cardinality { detail: String },
    /// `desc()` outside `sort`, invocation on a non-name, etc.
    BadSyntaxPosition { detail: String },
    /// A literal's type has no `embed` registered for it.
    UnsupportedLiteral { detail: String },
    /// A defensive assertion the emitter relies on the planner to uphold.
    InternalInvariant { detail: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::UnknownName { name } => write!(f, "unknown name `{name}`"),
            Reason::UnknownCombinator { name } => {
                write!(f, "unknown combinator `{name}`")
            }
            Reason::Arity {
                combinator,
                expected,
                found,
            } => write!(
                f,
                "`{combinator}`: expected {expected} argument(s), found {found}"
            ),
            Reason::OperandShape { combinator, detail } => {
                write!(f, "`{combinator}`: {detail}")
            }
            Reason::Cardinality { detail } => write!(f, "cardinality error: {detail}"),
            Reason::BadSyntaxPosition { detail } => {
                write!(f, "bad syntax position: {detail}")
            }
            Reason::UnsupportedLiteral { detail } => {
                write!(f, "unsupported literal: {detail}")
            }
            Reason::InternalInvariant { detail } => {
                write!(f, "internal invariant violated: {detail}")
            }
        }
    }
}

/// A planner error: a [`Reason`] plus an optional hint for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub reason: Reason,
    pub help: Option<String>,
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error { reason, help: None }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(help) = &self.help {
            write!(f, " ({help})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Extension trait for attaching a hint to a `Result<_, Error>` in place.
pub trait WithErrorInfo {
    fn with_help(self, help: impl Into<String>) -> Self;
}

impl<T> WithErrorInfo for Result<T, Error> {
    fn with_help(self, help: impl Into<String>) -> Self {
        self.map_err(|e| e.with_help(help))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn unknown_name(name: impl Into<String>) -> Error {
    Error::new(Reason::UnknownName { name: name.into() })
}

pub(crate) fn unknown_combinator(name: impl Into<String>) -> Error {
    Error::new(Reason::UnknownCombinator { name: name.into() })
}

pub(crate) fn arity(combinator: impl Into<String>, expected: impl Into<String>, found: usize) -> Error {
    Error::new(Reason::Arity {
        combinator: combinator.into(),
        expected: expected.into(),
        found,
    })
}

pub(crate) fn operand_shape(combinator: impl Into<String>, detail: impl Into<String>) -> Error {
    Error::new(Reason::OperandShape {
        combinator: combinator.into(),
        detail: detail.into(),
    })
}

pub(crate) fn cardinality(detail: impl Into<String>) -> Error {
    Error::new(Reason::Cardinality {
        detail: detail.into(),
    })
}

pub(crate) fn bad_syntax_position(detail: impl Into<String>) -> Error {
    Error::new(Reason::BadSyntaxPosition {
        detail: detail.into(),
    })
}

pub(crate) fn unsupported_literal(detail: impl Into<String>) -> Error {
    Error::new(Reason::UnsupportedLiteral {
        detail: detail.into(),
    })
}

pub(crate) fn internal(detail: impl Into<String>) -> Error {
    Error::new(Reason::InternalInvariant {
        detail: detail.into(),
    })
}
