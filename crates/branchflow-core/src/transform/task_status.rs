//! Compares the tasks a branch actually has enabled with the tasks its
//! process scheme recommends.

use polars::prelude::*;

use super::drop_columns_if_present;
use super::recommended_tasks::{recommended_task_reference, SCHEMA, TASKS};
use crate::load::INGESTION_TIMESTAMP;

pub const ACTIVE_BRANCH_GUID: &str = "branchguid";
pub const SCHEME_BRANCH_GUID: &str = "branch_guid";
pub const BRANCH_NAME: &str = "branch_name";
pub const RECOMMENDED_SCHEME: &str = "recommended_scheme";
pub const TASK_NAME: &str = "TaskName";
pub const IS_USED: &str = "IsUsed";

/// 1 when the branch's setting agrees with the recommendation, 0 otherwise.
pub const MATCHES_RECOMMENDATION: &str = "true";

/// Left-joins each active-task record to its branch's scheme assignment.
/// The scheme side's ingestion timestamp is not carried over.
pub fn attach_branch_scheme(
    active_tasks: &DataFrame,
    scheme_work: &DataFrame,
) -> PolarsResult<DataFrame> {
    let schemes = drop_columns_if_present(scheme_work, &[INGESTION_TIMESTAMP])?;
    active_tasks
        .clone()
        .lazy()
        .join(
            schemes.lazy(),
            [col(ACTIVE_BRANCH_GUID)],
            [col(SCHEME_BRANCH_GUID)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()
}

fn matches_recommendation() -> Expr {
    let is_used = col(IS_USED).cast(DataType::Int64);
    let enabled_but_not_recommended = col(TASKS).is_null().and(is_used.clone().eq(lit(1)));
    let recommended_but_disabled = col(TASKS).is_not_null().and(is_used.eq(lit(0)));

    when(enabled_but_not_recommended.or(recommended_but_disabled))
        .then(lit(0i32))
        .otherwise(lit(1i32))
        .alias(MATCHES_RECOMMENDATION)
}

/// Flags every branch task against `reference` on (scheme, task name).
///
/// Rows whose scheme or task has no reference entry count as "not
/// recommended". The branch name, branch guid, ingestion timestamp and the
/// joined task column are dropped from the result.
pub fn detect_enablement_mismatch(
    branch_tasks: &DataFrame,
    reference: &DataFrame,
) -> PolarsResult<DataFrame> {
    let flagged = branch_tasks
        .clone()
        .lazy()
        .join(
            reference.clone().lazy(),
            [col(RECOMMENDED_SCHEME), col(TASK_NAME)],
            [col(SCHEMA), col(TASKS)],
            JoinArgs::new(JoinType::Left).with_coalesce(JoinCoalesce::KeepColumns),
        )
        .with_column(matches_recommendation())
        .collect()?;

    drop_columns_if_present(
        &flagged,
        &[BRANCH_NAME, SCHEME_BRANCH_GUID, INGESTION_TIMESTAMP, TASKS],
    )
}

/// The enablement chain of a run: scheme lookup, reference, comparison.
pub fn enablement_status(
    active_tasks: &DataFrame,
    scheme_work: &DataFrame,
) -> PolarsResult<DataFrame> {
    let branch_tasks = attach_branch_scheme(active_tasks, scheme_work)?;
    let reference = recommended_task_reference()?;
    detect_enablement_mismatch(&branch_tasks, &reference)
}
