//! Config and metadata key-value access.

use std::collections::HashMap;

use rusqlite::{Connection, params};

use spool_core::enums::OrphanPolicy;
use spool_core::idgen::DEFAULT_MAX_DEPTH;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;

/// Known configuration keys.
pub mod keys {
    /// Required. All generated and validated IDs use `<value>-...`.
    pub const ISSUE_PREFIX: &str = "issue_prefix";
    /// Max dot-depth for hierarchical IDs.
    pub const HIERARCHY_MAX_DEPTH: &str = "hierarchy.max-depth";
    /// One of `strict|resurrect|skip|allow`; unknown falls back to allow.
    pub const IMPORT_ORPHAN_HANDLING: &str = "import.orphan_handling";
    /// Comma-separated custom issue types accepted by validation.
    pub const TYPES_CUSTOM: &str = "types.custom";
    /// Comma-separated custom statuses accepted by validation.
    pub const STATUSES_CUSTOM: &str = "statuses.custom";
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("config", key),
        other => StorageError::Query(other),
    })
}

pub(crate) fn set_metadata_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_metadata_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("metadata", key),
        other => StorageError::Query(other),
    })
}

/// Reads the configured issue prefix, failing with `NotInitialized` when the
/// key is absent or empty.
pub(crate) fn require_prefix_on_conn(conn: &Connection) -> Result<String> {
    let prefix = match get_config_on_conn(conn, keys::ISSUE_PREFIX) {
        Ok(p) => p,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => return Err(e),
    };
    if prefix.trim().is_empty() {
        return Err(StorageError::NotInitialized {
            reason: format!("config key {} is not set", keys::ISSUE_PREFIX),
        });
    }
    Ok(prefix)
}

/// Splits a comma-separated whitelist config value.
fn split_whitelist(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

pub(crate) fn custom_statuses_on_conn(conn: &Connection) -> Result<Vec<String>> {
    match get_config_on_conn(conn, keys::STATUSES_CUSTOM) {
        Ok(v) => Ok(split_whitelist(&v)),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub(crate) fn custom_types_on_conn(conn: &Connection) -> Result<Vec<String>> {
    match get_config_on_conn(conn, keys::TYPES_CUSTOM) {
        Ok(v) => Ok(split_whitelist(&v)),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Sets a configuration key-value pair.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_config_on_conn(&conn, key, value)
    }

    /// Gets a configuration value by key.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_config_on_conn(&conn, key)
    }

    /// Returns all configuration key-value pairs.
    pub fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// The orphan policy configured for imports.
    pub fn configured_orphan_policy_impl(&self) -> Result<OrphanPolicy> {
        let conn = self.lock_conn()?;
        match get_config_on_conn(&conn, keys::IMPORT_ORPHAN_HANDLING) {
            Ok(v) => Ok(OrphanPolicy::from_config(&v)),
            Err(e) if e.is_not_found() => Ok(OrphanPolicy::Allow),
            Err(e) => Err(e),
        }
    }

    /// The configured hierarchy depth cap, with the built-in fallback for
    /// absent or unparsable values.
    pub fn max_hierarchy_depth_impl(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        match get_config_on_conn(&conn, keys::HIERARCHY_MAX_DEPTH) {
            Ok(v) => Ok(v.trim().parse().unwrap_or(DEFAULT_MAX_DEPTH)),
            Err(e) if e.is_not_found() => Ok(DEFAULT_MAX_DEPTH),
            Err(e) => Err(e),
        }
    }
}
