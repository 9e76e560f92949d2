//! SQLite record store.
//!
//! Layout:
//! - `pii_values`: one row per (attribute, record): envelope blob, capability,
//!   fixed-width blind index, index version.
//! - `pii_trigrams`: one row per trigram token of a value.
//!
//! A value and all its tokens are replaced in a single transaction.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::attribute::{SearchCapability, StoredValue};
use crate::blind_index::BlindIndexToken;
use crate::envelope::CiphertextEnvelope;
use crate::error::{PiiError, Result};
use crate::trigram::{TrigramToken, TrigramTokenSet};

use super::traits::RecordStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pii_values (
        attribute     TEXT NOT NULL,
        record_id     TEXT NOT NULL,
        capability    TEXT NOT NULL,
        envelope      BLOB NOT NULL,
        blind_index   BLOB,
        index_version INTEGER,
        PRIMARY KEY (attribute, record_id)
    );
    CREATE INDEX IF NOT EXISTS pii_values_blind
        ON pii_values (attribute, blind_index);
    CREATE TABLE IF NOT EXISTS pii_trigrams (
        attribute     TEXT NOT NULL,
        record_id     TEXT NOT NULL,
        index_version INTEGER NOT NULL,
        token         BLOB NOT NULL,
        PRIMARY KEY (attribute, record_id, token)
    );
    CREATE INDEX IF NOT EXISTS pii_trigrams_token
        ON pii_trigrams (attribute, index_version, token);
";

/// Raw `pii_values` row before decoding.
struct ValueRow {
    capability: String,
    envelope: Vec<u8>,
    blind_index: Option<Vec<u8>>,
    index_version: Option<i64>,
}

fn to_version(raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| PiiError::Storage(format!("invalid index version {}", raw)))
}

/// Decode a `pii_values` row, reading its trigram tokens on the same
/// connection so both come from one snapshot.
fn decode(conn: &Connection, record_id: &str, attribute: &str, row: ValueRow) -> Result<StoredValue> {
    let capability: SearchCapability = row.capability.parse().map_err(|_| {
        PiiError::Storage(format!(
            "row {}/{} has unknown search capability \"{}\"",
            attribute, record_id, row.capability
        ))
    })?;
    // A structurally broken blob is a value that cannot be authenticated.
    let envelope = CiphertextEnvelope::from_bytes(&row.envelope)?;
    let blind_index = row
        .blind_index
        .as_deref()
        .map(BlindIndexToken::from_bytes)
        .transpose()?;

    let trigrams = match (capability.supports_partial(), row.index_version) {
        (true, Some(version)) => {
            let version = to_version(version)?;
            let mut stmt = conn.prepare_cached(
                "SELECT token FROM pii_trigrams
                 WHERE attribute = ?1 AND record_id = ?2 AND index_version = ?3",
            )?;
            let raw = stmt
                .query_map(params![attribute, record_id, version], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let tokens = raw
                .iter()
                .map(|bytes| TrigramToken::from_slice(bytes))
                .collect::<Result<_>>()?;
            Some(TrigramTokenSet { version, tokens })
        }
        _ => None,
    };

    Ok(StoredValue {
        capability,
        envelope,
        blind_index,
        trigrams,
    })
}

/// Record store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteStore {
    fn put(&self, record_id: &str, attribute: &str, value: &StoredValue) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM pii_trigrams WHERE attribute = ?1 AND record_id = ?2",
            params![attribute, record_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO pii_values
                (attribute, record_id, capability, envelope, blind_index, index_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attribute,
                record_id,
                value.capability.as_str(),
                value.envelope.to_bytes(),
                value.blind_index.map(|t| t.to_bytes().to_vec()),
                value.index_version(),
            ],
        )?;
        if let Some(set) = &value.trigrams {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO pii_trigrams (attribute, record_id, index_version, token)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for token in set.iter() {
                stmt.execute(params![attribute, record_id, set.version, &token.0[..]])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get(&self, record_id: &str, attribute: &str) -> Result<Option<StoredValue>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT capability, envelope, blind_index, index_version
                 FROM pii_values WHERE attribute = ?1 AND record_id = ?2",
                params![attribute, record_id],
                |row| {
                    Ok(ValueRow {
                        capability: row.get(0)?,
                        envelope: row.get(1)?,
                        blind_index: row.get(2)?,
                        index_version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        let value = row
            .map(|row| decode(&tx, record_id, attribute, row))
            .transpose()?;
        tx.commit()?;
        Ok(value)
    }

    fn delete(&self, record_id: &str, attribute: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM pii_trigrams WHERE attribute = ?1 AND record_id = ?2",
            params![attribute, record_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM pii_values WHERE attribute = ?1 AND record_id = ?2",
            params![attribute, record_id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn scan(&self, attribute: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT record_id FROM pii_values WHERE attribute = ?1 ORDER BY record_id",
        )?;
        let ids = stmt
            .query_map(params![attribute], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn find_by_blind_index(
        &self,
        attribute: &str,
        token: &BlindIndexToken,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT record_id FROM pii_values
             WHERE attribute = ?1 AND blind_index = ?2 ORDER BY record_id",
        )?;
        let ids = stmt
            .query_map(params![attribute, &token.to_bytes()[..]], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn find_trigram_candidates(
        &self,
        attribute: &str,
        query: &TrigramTokenSet,
    ) -> Result<Vec<String>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; query.len()].join(", ");
        let sql = format!(
            "SELECT record_id FROM pii_trigrams
             WHERE attribute = ? AND index_version = ? AND token IN ({placeholders})
             GROUP BY record_id
             HAVING COUNT(DISTINCT token) = ?
             ORDER BY record_id"
        );

        let mut values: Vec<Value> = Vec::with_capacity(query.len() + 3);
        values.push(Value::Text(attribute.to_string()));
        values.push(Value::Integer(i64::from(query.version)));
        values.extend(query.iter().map(|t| Value::Blob(t.0.to_vec())));
        values.push(Value::Integer(query.len() as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn index_versions(&self, attribute: &str) -> Result<Vec<u32>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT index_version FROM pii_values
             WHERE attribute = ?1 AND index_version IS NOT NULL
             ORDER BY index_version",
        )?;
        let raw = stmt
            .query_map(params![attribute], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(to_version).collect()
    }
}
