//! A compositional query-combinator language, compiled to a single SQL
//! `SELECT` over a user-supplied relational schema.
//!
//! Mirrors `qc0`'s overall pipeline in structure, Rust idiom throughout
//! (see each module's doc comment for its specific grounding):
//!
//! - [`syntax`] — the surface AST (C1): `Nav`/`Compose`/`Apply`/`BinOp`/
//!   `Literal`/`Desc`, plus [`builder::Q`] for constructing it fluently.
//! - [`metadata`] — the relational schema (tables, columns, foreign keys)
//!   the planner binds names against.
//! - [`scope`] — the name-resolution lattice (C2) and the `ONE`/`SEQ`
//!   cardinality lattice.
//! - [`sig`] — the combinator/aggregate/function signature registry (C3).
//! - [`op`] — the unified `Op` IR (C4): `Rel`/`Expr`.
//! - [`planner`] — the binder (C5): `Syn` + `MetaData` → `Op`.
//! - [`emitter`] — the SQL emitter (C6): `Op` → a single `SELECT`.
//!
//! ```no_run
//! use rabbitql::{compile, plan, table, ColumnType, Column, ForeignKey, MetaData, Options, Q, Table};
//!
//! let region = Table {
//!     name: "region".into(),
//!     columns: vec![
//!         Column { name: "id".into(), ty: ColumnType::Integer },
//!         Column { name: "name".into(), ty: ColumnType::Text },
//!     ],
//!     primary_key: vec!["id".into()],
//!     foreign_keys: vec![],
//! };
//! let nation = Table {
//!     name: "nation".into(),
//!     columns: vec![
//!         Column { name: "id".into(), ty: ColumnType::Integer },
//!         Column { name: "name".into(), ty: ColumnType::Text },
//!         Column { name: "region_id".into(), ty: ColumnType::Integer },
//!     ],
//!     primary_key: vec!["id".into()],
//!     foreign_keys: vec![ForeignKey {
//!         column: "region_id".into(),
//!         references_table: "region".into(),
//!         references_column: "id".into(),
//!     }],
//! };
//! let meta = MetaData::new(vec![region, nation]);
//!
//! let syn = table("region")
//!     .select(vec![("name", Q::new().nav("name")), ("nations", Q::new().nav("nation"))])
//!     .into_syn()
//!     .expect("non-empty pipeline");
//!
//! let op = plan(&syn, &meta).expect("plan");
//! let query = compile(&op, &meta, &Options::default()).expect("compile");
//! println!("{query}");
//! ```

pub mod builder;
pub mod emitter;
pub mod error;
pub mod metadata;
pub mod op;
pub mod planner;
pub mod scope;
pub mod sig;
pub mod syntax;
pub mod utils;

pub use builder::{table, Q};
pub use emitter::{compile, Options, SqlSelect};
pub use error::{Error, Reason, Result};
pub use metadata::{Column, ColumnType, ForeignKey, MetaData, Table};
pub use planner::plan;
pub use scope::{Cardinality, ScalarType};
pub use syntax::{BinOpKind, Field, Literal, Syn};
