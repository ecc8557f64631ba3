//! Encrypted-field ownership: which entity types carry fields of which
//! encryption domain, and how to re-save them page by page.
//!
//! Owners are registered explicitly at startup instead of discovered by
//! runtime introspection. The rotation service builds its domain→owner
//! index from `domain_ids()` once and treats it as read-only.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::StoreError;

/// Per-field transformation run on every value during a re-save.
///
/// Implementations are total: they log and pass values through rather
/// than failing, so a re-save never aborts on one bad field.
pub trait FieldCodec: Send + Sync {
    /// Transform a loaded (stored) value into its in-memory form.
    fn decode(&self, domain_id: &str, value: &str) -> String;

    /// Transform an in-memory value into its stored form.
    fn encode(&self, domain_id: &str, value: &str) -> String;
}

/// One entity type whose fields are encrypted.
///
/// The persistence layer implements this per entity type; the rotation
/// service only ever asks "which domains do you use" and "re-save page N".
pub trait EncryptedFieldOwner: Send + Sync {
    /// Name of the entity type, for logs.
    fn entity_type(&self) -> &str;

    /// Domains declared by this entity type's encrypted fields.
    fn domain_ids(&self) -> Vec<String>;

    /// Load page `page` (0-based, `page_size` records per page), run every
    /// encrypted field through the codec, and save the page back.
    ///
    /// Returns the number of records in the page; fewer than `page_size`
    /// means this was the last page.
    fn resave_page(&self, page: u64, page_size: u64) -> Result<u64, StoreError>;
}

/// An encrypted TEXT column and the domain its values belong to.
#[derive(Debug, Clone)]
pub struct EncryptedColumn {
    pub column: String,
    pub domain_id: String,
}

impl EncryptedColumn {
    pub fn new(column: impl Into<String>, domain_id: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            domain_id: domain_id.into(),
        }
    }
}

/// Generic `EncryptedFieldOwner` over one SQLite table.
///
/// Re-saves declared TEXT columns through a `FieldCodec`, paging by the
/// primary key column so rows keep a stable order while being updated
/// in place.
pub struct SqliteColumnOwner {
    conn: Arc<Mutex<Connection>>,
    table: String,
    id_column: String,
    columns: Vec<EncryptedColumn>,
    codec: Arc<dyn FieldCodec>,
}

impl SqliteColumnOwner {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        table: impl Into<String>,
        id_column: impl Into<String>,
        columns: Vec<EncryptedColumn>,
        codec: Arc<dyn FieldCodec>,
    ) -> Self {
        Self {
            conn,
            table: table.into(),
            id_column: id_column.into(),
            columns,
            codec,
        }
    }

    fn select_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.column))
            .collect();
        format!(
            "SELECT \"{id}\", {cols} FROM \"{table}\" ORDER BY \"{id}\" LIMIT ?1 OFFSET ?2",
            id = self.id_column,
            cols = cols.join(", "),
            table = self.table,
        )
    }

    fn update_sql(&self) -> String {
        let sets: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("\"{}\" = ?{}", c.column, i + 2))
            .collect();
        format!(
            "UPDATE \"{table}\" SET {sets} WHERE \"{id}\" = ?1",
            table = self.table,
            sets = sets.join(", "),
            id = self.id_column,
        )
    }
}

impl EncryptedFieldOwner for SqliteColumnOwner {
    fn entity_type(&self) -> &str {
        &self.table
    }

    fn domain_ids(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.columns.iter().map(|c| c.domain_id.clone()).collect();
        domains.sort();
        domains.dedup();
        domains
    }

    fn resave_page(&self, page: u64, page_size: u64) -> Result<u64, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&self.select_sql())?;
        let offset = page * page_size;
        let rows: Vec<(Value, Vec<Option<String>>)> = stmt
            .query_map(params![page_size, offset], |row| {
                let id: Value = row.get(0)?;
                let mut values = Vec::with_capacity(self.columns.len());
                for i in 0..self.columns.len() {
                    values.push(row.get::<_, Option<String>>(i + 1)?);
                }
                Ok((id, values))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut update = conn.prepare(&self.update_sql())?;
        for (id, values) in &rows {
            let resaved: Vec<Option<String>> = self
                .columns
                .iter()
                .zip(values)
                .map(|(col, value)| {
                    value.as_deref().map(|v| {
                        let decoded = self.codec.decode(&col.domain_id, v);
                        self.codec.encode(&col.domain_id, &decoded)
                    })
                })
                .collect();

            let mut bound: Vec<&dyn rusqlite::ToSql> = vec![id];
            for value in &resaved {
                bound.push(value);
            }
            update.execute(bound.as_slice())?;
        }

        debug!(
            entity_type = %self.table,
            page,
            rows = rows.len(),
            "re-saved encrypted column page"
        );
        Ok(rows.len() as u64)
    }
}
