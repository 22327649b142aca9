use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::{IntegrationError, Result};
use crate::ident::{quote_ident, validate_name, QualifiedTable};
use crate::retry::sqlstate;

const UNDEFINED_TABLE: &str = "42P01";

/// Start bound handed to templates when a window has no watermark.
pub const FULL_EXTRACT_FLOOR: NaiveDate = match NaiveDate::from_ymd_opt(1900, 1, 1) {
    Some(date) => date,
    None => panic!("1900-01-01 is a valid date"),
};

/// `[start, stop)` bounds handed to an extract. `start == None` means a full
/// extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractWindow {
    pub start: Option<NaiveDate>,
    pub stop: NaiveDate,
}

impl ExtractWindow {
    pub fn full(stop: NaiveDate) -> Self {
        Self { start: None, stop }
    }

    pub fn from_watermark(watermark: Option<NaiveDate>, stop: NaiveDate) -> Self {
        Self {
            start: watermark,
            stop,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none()
    }

    /// The start bound to bind: the watermark, or `FULL_EXTRACT_FLOOR`.
    pub fn lower_bound(&self) -> NaiveDate {
        self.start.unwrap_or(FULL_EXTRACT_FLOOR)
    }
}

/// Latest stored value of `column` in `table`, as a calendar date.
///
/// An empty table, an all-null column and a table that does not exist yet all
/// yield `None`, which callers treat as "extract everything".
pub async fn resolve_watermark(
    pool: &DbPool,
    table: &QualifiedTable,
    column: &str,
) -> Result<Option<NaiveDate>> {
    validate_name(column)?;

    let sql = format!(
        "SELECT MAX({})::timestamp AS watermark FROM {}",
        quote_ident(column),
        table
    );

    let watermark = match sqlx::query_scalar::<_, Option<NaiveDateTime>>(&sql)
        .fetch_one(pool)
        .await
    {
        Ok(value) => value.map(|ts| ts.date()),
        Err(err) if sqlstate(&err).as_deref() == Some(UNDEFINED_TABLE) => {
            warn!(table = %table, "Destination table does not exist yet; no watermark");
            None
        }
        Err(source) => {
            return Err(IntegrationError::Watermark {
                table: table.table().to_string(),
                column: column.to_string(),
                source,
            })
        }
    };

    match watermark {
        Some(date) => info!(table = %table, column, %date, "Resolved watermark"),
        None => warn!(table = %table, column, "No watermark found; falling back to a full extract"),
    }

    Ok(watermark)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_watermark_means_full_window() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let window = ExtractWindow::from_watermark(None, today);
        assert!(window.is_full());
        assert_eq!(window, ExtractWindow::full(today));
        assert_eq!(window.lower_bound(), FULL_EXTRACT_FLOOR);
    }

    #[test]
    fn watermark_becomes_window_start() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let last = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let window = ExtractWindow::from_watermark(Some(last), today);
        assert_eq!(window.start, Some(last));
        assert_eq!(window.lower_bound(), last);
        assert_eq!(window.stop, today);
        assert!(!window.is_full());
    }
}
