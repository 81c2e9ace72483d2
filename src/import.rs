//! Bulk book import from a CSV file with `title` and `author` columns.

use std::io::Read;

use rusqlite::Connection;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{self, NewBook};
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
struct BookRow {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub authors_created: usize,
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Rows without a title or author are skipped; authors are matched by name
/// and created on first use. Runs in one transaction.
pub fn import_books<R: Read>(conn: &mut Connection, reader: R) -> AppResult<ImportSummary> {
    let mut csv = csv::Reader::from_reader(reader);
    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();

    for (index, row) in csv.deserialize::<BookRow>().enumerate() {
        let row_num = index + 1;
        let row = row?;
        let (Some(title), Some(author)) = (present(row.title), present(row.author)) else {
            warn!(row = row_num, "skipping row: missing title or author");
            summary.skipped += 1;
            continue;
        };

        let (author_id, created) = db::find_or_create_author(&tx, &author)?;
        if created {
            summary.authors_created += 1;
        }
        db::insert_book(
            &tx,
            &NewBook {
                title: &title,
                subtitle: None,
                author_id,
                category_id: None,
                publisher_id: None,
                published_date: None,
                distribution_expense_cents: 0,
            },
        )?;
        info!(row = row_num, %title, %author, "imported book");
        summary.imported += 1;
    }

    tx.commit()?;
    Ok(summary)
}
