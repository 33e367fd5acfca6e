//! The relational schema the planner binds names against.
//!
//! Stands in for the "opaque `MetaData` providing tables, columns, foreign
//! keys, primary keys, column types" external collaborator. Concrete and
//! in-process here (there is no catalog reflection to perform), but never
//! touched by the emitter — only the planner consults it.

use std::collections::HashMap;

/// A column's scalar type, as far as the planner cares. Drives `Synthetic`
/// scope selection (`Date`, `Json`) and literal `embed`ding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Json,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// A foreign key, named by its local column. `references_table` /
/// `references_column` identify the target.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The full schema: every table, keyed by name.
///
/// Navigation from a `Table` scope needs both outgoing foreign keys (from
/// this table to another, keyed by the *target table's name* — mirroring
/// `qc0/bind.py`'s `fks = {fk.column.table.name: fk for fk in
/// table.foreign_keys}`) and incoming ones (any other table's FK that
/// targets this one, keyed by the *referencing table's name* — mirroring
/// `rev_fks`). Both maps are derived on demand rather than stored, since
/// `MetaData` is small and built once per compilation.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    tables: Vec<Table>,
}

impl MetaData {
    pub fn new(tables: Vec<Table>) -> Self {
        MetaData { tables }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Outgoing foreign keys from `table`, keyed by the table they point at.
    pub fn outgoing_foreign_keys(&self, table: &str) -> HashMap<String, ForeignKey> {
        let mut out = HashMap::new();
        if let Some(t) = self.table(table) {
            for fk in &t.foreign_keys {
                out.insert(fk.references_table.clone(), fk.clone());
            }
        }
        out
    }

    /// Incoming foreign keys into `table`: every other table's FK whose
    /// target is `table`, keyed by the referencing table's name.
    pub fn incoming_foreign_keys(&self, table: &str) -> HashMap<String, ForeignKey> {
        let mut out = HashMap::new();
        for t in &self.tables {
            for fk in &t.foreign_keys {
                if fk.references_table == table {
                    out.insert(t.name.clone(), fk.clone());
                }
            }
        }
        out
    }
}
