//! Pure frame-to-frame derivations. None of these touch a database.

pub mod recommended_tasks;
pub mod sales_time;
pub mod task_status;

use polars::prelude::{DataFrame, PolarsResult};

/// Keeps every column of `df` except those listed; names that are absent are
/// ignored.
pub(crate) fn drop_columns_if_present(df: &DataFrame, names: &[&str]) -> PolarsResult<DataFrame> {
    let kept: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|name| !names.contains(&name.as_str()))
        .map(|name| name.to_string())
        .collect();
    df.select(kept)
}
