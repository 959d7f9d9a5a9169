use relay_core::Context;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON object column into a context, returning CorruptRow when the
/// text is not JSON or not an object.
pub fn parse_context(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Context, StoreError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })?;
    Context::try_from(value).map_err(|other| StoreError::CorruptRow {
        table,
        column,
        detail: format!("expected object, got {other}"),
    })
}
