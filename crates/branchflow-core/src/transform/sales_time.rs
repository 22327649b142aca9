//! Sales timing metrics: per-receipt derived durations and their monthly
//! per-branch means.

use polars::prelude::*;

pub const MONTH: &str = "Month";
pub const BRANCH_GUID: &str = "BranchGuid";

pub const SALE_TYPE: &str = "тип продажи";
pub const MANAGER_SALE: &str = "менеджер";

/// Categorical flags; a "net" sale has every one of them empty.
pub const SALE_FLAG_COLUMNS: [&str; 7] = [
    "возврат",
    "допка",
    "доставка",
    "обмен",
    "симка",
    "страховка",
    "услуга",
];

pub const CREATION_PLACE: &str = "место создания рн";
pub const ONLINE_CHANNEL: &str = "Сайт ДНС";

pub const CREATED_TO_POSTED: &str = "от создания РН до проведения РН";
pub const CREATED_TO_PAID: &str = "от создания РН до проведения оплаты";

pub const NET_SALE_TIME: &str = "Время чистой продажи";
pub const ONLINE_ASSEMBLY_TIME: &str = "Время набора интернет-заказа";

fn null_f64() -> Expr {
    lit(NULL).cast(DataType::Float64)
}

/// Adds `NET_SALE_TIME`: the creation-to-posting duration of manager sales
/// with no flag set, null for every other row. A null flag does not count as
/// empty.
pub fn derive_net_sale_time(sales: &DataFrame) -> PolarsResult<DataFrame> {
    let is_net_sale = SALE_FLAG_COLUMNS
        .iter()
        .fold(col(SALE_TYPE).eq(lit(MANAGER_SALE)), |acc, flag| {
            acc.and(col(*flag).eq(lit("")))
        });

    sales
        .clone()
        .lazy()
        .with_column(
            when(is_net_sale)
                .then(col(CREATED_TO_POSTED).cast(DataType::Float64))
                .otherwise(null_f64())
                .alias(NET_SALE_TIME),
        )
        .collect()
}

/// Adds `ONLINE_ASSEMBLY_TIME` for receipts created on the web shop.
pub fn derive_online_assembly_time(sales: &DataFrame) -> PolarsResult<DataFrame> {
    sales
        .clone()
        .lazy()
        .with_column(
            when(col(CREATION_PLACE).eq(lit(ONLINE_CHANNEL)))
                .then(col(CREATED_TO_PAID).cast(DataType::Float64))
                .otherwise(null_f64())
                .alias(ONLINE_ASSEMBLY_TIME),
        )
        .collect()
}

/// Mean of both derived durations per (month, branch), groups in order of
/// first appearance. Nulls do not take part in the mean, and rows missing
/// either key are dropped.
pub fn aggregate_by_month_branch(sales: &DataFrame) -> PolarsResult<DataFrame> {
    sales
        .clone()
        .lazy()
        .filter(col(MONTH).is_not_null().and(col(BRANCH_GUID).is_not_null()))
        .group_by_stable([col(MONTH), col(BRANCH_GUID)])
        .agg([
            col(NET_SALE_TIME).cast(DataType::Float64).mean(),
            col(ONLINE_ASSEMBLY_TIME).cast(DataType::Float64).mean(),
        ])
        .collect()
}

/// The full sales chain of a run.
pub fn summarize_sales_time(sales: &DataFrame) -> PolarsResult<DataFrame> {
    let with_net = derive_net_sale_time(sales)?;
    let with_online = derive_online_assembly_time(&with_net)?;
    aggregate_by_month_branch(&with_online)
}
