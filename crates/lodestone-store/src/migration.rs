//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL
//! string that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (?1, datetime('now'))",
                rusqlite::params![version],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Corrupt(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: one table per conceptual keyspace.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Blocks, stored as canonical bencoding
        CREATE TABLE blocks (
            hash BLOB PRIMARY KEY,            -- 32 bytes, SHA-256
            encoded BLOB NOT NULL
        );

        -- Transactions, stored as canonical bencoding
        CREATE TABLE transactions (
            id BLOB PRIMARY KEY,              -- 32 bytes, SHA-256
            encoded BLOB NOT NULL
        );

        -- Per-block delta snapshots: bencoded dict of address -> state value
        CREATE TABLE block_states (
            block_hash BLOB PRIMARY KEY,
            encoded BLOB NOT NULL
        );

        -- Staging pool
        CREATE TABLE staged_transactions (
            tx_id BLOB PRIMARY KEY,
            broadcast INTEGER NOT NULL        -- 1 = locally originated
        );

        -- Canonical chain pointer (at most one row)
        CREATE TABLE canonical_chain (
            singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
            chain_id BLOB NOT NULL            -- 16 bytes
        );

        -- Per-chain ordered block hashes
        CREATE TABLE chain_index (
            chain_id BLOB NOT NULL,
            idx INTEGER NOT NULL,
            hash BLOB NOT NULL,
            PRIMARY KEY (chain_id, idx)
        );

        -- Per-chain per-address state references. The primary key keeps
        -- (address, block_index) iteration in numeric block order.
        CREATE TABLE state_references (
            chain_id BLOB NOT NULL,
            address BLOB NOT NULL,            -- 20 bytes
            block_index INTEGER NOT NULL,
            block_hash BLOB NOT NULL,
            PRIMARY KEY (chain_id, address, block_index)
        );

        -- Per-chain per-address confirmed transaction counts
        CREATE TABLE tx_nonces (
            chain_id BLOB NOT NULL,
            address BLOB NOT NULL,
            nonce INTEGER NOT NULL,
            PRIMARY KEY (chain_id, address)
        );

        CREATE INDEX idx_chain_index_hash ON chain_index(chain_id, hash);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "blocks",
            "transactions",
            "block_states",
            "staged_transactions",
            "canonical_chain",
            "chain_index",
            "state_references",
            "tx_nonces",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
