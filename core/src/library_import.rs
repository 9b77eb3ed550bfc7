use std::io::Read;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::db::Database;
use crate::models::IngredientUpdate;

/// A single row parsed from an ingredient library CSV.
///
/// `None` means the column was absent from the file, so the stored value is kept.
#[derive(Debug, Clone)]
pub struct LibraryRow {
    pub name: String,
    pub grocery_category: Option<String>,
    pub kitchen_staple: Option<bool>,
    pub notes: Option<String>,
}

/// Summary of what a library import would do / did.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryImportSummary {
    pub rows_parsed: usize,
    pub ingredients_updated: usize,
    pub unknown_names: Vec<String>,
}

/// Parse an ingredient library CSV from any reader.
///
/// Expected header: `Name,Category,Staple,Notes`. Only `Name` is required and
/// headers match case-insensitively.
pub fn parse_library_csv<R: Read>(reader: R) -> Result<Vec<LibraryRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_name = col("Name").context("Missing required column: Name")?;
    let idx_category = col("Category");
    let idx_staple = col("Staple");
    let idx_notes = col("Notes");

    let mut rows = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let row_num = line_num + 2;
        let record = result.with_context(|| format!("Failed to parse CSV row {row_num}"))?;

        let name = record.get(idx_name).unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }

        let text = |idx: Option<usize>| -> Option<String> {
            idx.map(|i| record.get(i).unwrap_or("").to_string())
        };

        let kitchen_staple = match idx_staple {
            Some(i) => Some(
                parse_staple_flag(record.get(i).unwrap_or(""))
                    .with_context(|| format!("Invalid Staple value on row {row_num}"))?,
            ),
            None => None,
        };

        rows.push(LibraryRow {
            name,
            grocery_category: text(idx_category),
            kitchen_staple,
            notes: text(idx_notes),
        });
    }

    Ok(rows)
}

/// Interpret a staple cell. Blank means not a staple.
pub fn parse_staple_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => Ok(false),
        "1" | "true" | "yes" | "y" => Ok(true),
        other => bail!("Expected yes/no, got '{other}'"),
    }
}

/// Apply parsed rows to existing catalog entries, matched by exact name.
///
/// Names not in the catalog are reported, never created. When `dry_run` is
/// true, nothing is written.
pub fn import_library(
    db: &Database,
    rows: &[LibraryRow],
    dry_run: bool,
) -> Result<LibraryImportSummary> {
    let mut updates = Vec::new();
    let mut unknown_names = Vec::new();

    for row in rows {
        let Some(existing) = db.find_ingredient_by_name(&row.name)? else {
            unknown_names.push(row.name.clone());
            continue;
        };
        updates.push(IngredientUpdate {
            id: existing.id,
            grocery_category: row
                .grocery_category
                .clone()
                .unwrap_or(existing.grocery_category),
            notes: row.notes.clone().unwrap_or(existing.notes),
            kitchen_staple: row.kitchen_staple.unwrap_or(existing.kitchen_staple),
        });
    }

    let ingredients_updated = if dry_run {
        updates.len()
    } else {
        db.update_ingredient_library(&updates)?
    };

    Ok(LibraryImportSummary {
        rows_parsed: rows.len(),
        ingredients_updated,
        unknown_names,
    })
}
