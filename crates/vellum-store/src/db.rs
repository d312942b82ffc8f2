//! Database connection management
//!
//! Provides utilities for opening and configuring SQLite connections

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| from_rusqlite("open database", e))?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| from_rusqlite("open database", e))?;
    configure(&conn)?;
    Ok(conn)
}

/// Configure a connection with the settings the engine relies on
pub fn configure(conn: &Connection) -> Result<()> {
    // Enable foreign keys
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| from_rusqlite("configure connection", e))?;

    // WAL mode returns a result row, so it has to go through pragma_update
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| from_rusqlite("configure connection", e))?;

    Ok(())
}
