//! SQL rendering. Only validated identifiers reach these strings.

use migrate_core::{ConflictAction, TableIdent, UpsertStatement};

pub(crate) fn quote_table(table: &TableIdent) -> String {
    match table.schema() {
        Some(schema) => format!("`{schema}`.`{}`", table.table()),
        None => format!("`{}`", table.table()),
    }
}

/// Render `INSERT ... ON DUPLICATE KEY UPDATE` with one `?` per column.
pub fn render_upsert(statement: &UpsertStatement) -> String {
    let columns = statement
        .columns
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; statement.columns.len()].join(", ");

    let updates = if statement.updates.is_empty() {
        // Keeps the statement an upsert; a duplicate key is then a no-op.
        let key = &statement.key_column;
        format!("`{key}` = `{key}`")
    } else {
        statement
            .updates
            .iter()
            .map(|u| match u.action {
                ConflictAction::Coalesce => {
                    format!("`{0}` = IFNULL(VALUES(`{0}`), `{0}`)", u.column)
                }
                _ => format!("`{0}` = VALUES(`{0}`)", u.column),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {updates}",
        quote_table(&statement.table)
    )
}

pub(crate) fn render_ledger_insert(table: &TableIdent) -> String {
    format!(
        "INSERT INTO {} (source_table, target_table, source_primary_key, failed_data, \
         error_message, migration_step, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        quote_table(table)
    )
}
