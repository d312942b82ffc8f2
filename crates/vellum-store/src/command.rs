//! Prepared store commands and the table that owns them
//!
//! Every entity type resolves its SQL through a `(type name, operation)`
//! key, so a host can override any statement before the engine runs it.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::Connection;

use vellum_core::errors::VellumError;
use vellum_core::model::OperationKind;

use crate::errors::{from_rusqlite, Result};

/// Type name reserved for the project root row.
pub const PROJECT_INFO_TYPE: &str = "project_info";

/// Type name reserved for shape connection rows.
pub const SHAPE_CONNECTION_TYPE: &str = "shape_connection";

/// One parameterized statement plus its declared positional parameter count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCommand {
    sql: String,
    parameters: usize,
}

impl StoreCommand {
    pub fn new(sql: impl Into<String>, parameters: usize) -> Self {
        StoreCommand {
            sql: sql.into(),
            parameters,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of positional parameters the statement binds.
    pub fn parameters(&self) -> usize {
        self.parameters
    }

    /// Execute through the connection's prepared-statement cache.
    pub fn execute(&self, conn: &Connection, op: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| from_rusqlite(op, e))?;
        stmt.execute(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| from_rusqlite(op, e))
    }

    /// Run the query and materialize every row as positional values.
    pub fn query_rows(&self, conn: &Connection, op: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| from_rusqlite(op, e))?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| from_rusqlite(op, e))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| from_rusqlite(op, e))? {
            let mut columns = Vec::with_capacity(column_count);
            for index in 0..column_count {
                columns.push(row.get::<_, Value>(index).map_err(|e| from_rusqlite(op, e))?);
            }
            result.push(columns);
        }
        Ok(result)
    }

    /// Run a check query; the first column of the first row decides.
    ///
    /// An empty result or a NULL column reads as false.
    pub fn query_flag(&self, conn: &Connection, op: &str, params: &[Value]) -> Result<bool> {
        let rows = self.query_rows(conn, op, params)?;
        match rows.first().and_then(|row| row.first()) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Integer(flag)) => Ok(*flag != 0),
            Some(other) => Err(VellumError::invalid_format(format!(
                "check query for {} returned a non-integer flag: {:?}",
                op, other
            ))),
        }
    }
}

/// Lookup table mapping `(entity type name, operation)` to its statement.
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: HashMap<(String, OperationKind), StoreCommand>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the statement for one slot.
    pub fn set(&mut self, entity_type: impl Into<String>, operation: OperationKind, command: StoreCommand) {
        self.commands.insert((entity_type.into(), operation), command);
    }

    /// Resolve a statement, failing with the offending type and verb.
    pub fn get(&self, entity_type: &str, operation: OperationKind) -> Result<&StoreCommand> {
        self.commands
            .get(&(entity_type.to_string(), operation))
            .ok_or_else(|| VellumError::missing_command(entity_type, operation))
    }

    pub fn contains(&self, entity_type: &str, operation: OperationKind) -> bool {
        self.commands.contains_key(&(entity_type.to_string(), operation))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
