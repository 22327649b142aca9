use polars::prelude::*;

use branchflow_core::transform::sales_time::{
    aggregate_by_month_branch, derive_net_sale_time, derive_online_assembly_time, summarize_sales_time, BRANCH_GUID,
    CREATED_TO_PAID, CREATED_TO_POSTED, CREATION_PLACE, MANAGER_SALE, MONTH, NET_SALE_TIME,
    ONLINE_ASSEMBLY_TIME, ONLINE_CHANNEL, SALE_FLAG_COLUMNS, SALE_TYPE,
};

struct Receipt {
    month: &'static str,
    branch: &'static str,
    sale_type: &'static str,
    refund: Option<&'static str>,
    place: &'static str,
    posted: f64,
    paid: f64,
}

fn receipt(month: &'static str, branch: &'static str, posted: f64, paid: f64) -> Receipt {
    Receipt {
        month,
        branch,
        sale_type: MANAGER_SALE,
        refund: Some(""),
        place: "магазин",
        posted,
        paid,
    }
}

fn sales_frame(receipts: &[Receipt]) -> PolarsResult<DataFrame> {
    let mut columns: Vec<Column> = vec![
        Series::new(MONTH.into(), receipts.iter().map(|r| r.month).collect::<Vec<_>>()).into(),
        Series::new(BRANCH_GUID.into(), receipts.iter().map(|r| r.branch).collect::<Vec<_>>())
            .into(),
        Series::new(SALE_TYPE.into(), receipts.iter().map(|r| r.sale_type).collect::<Vec<_>>())
            .into(),
        Series::new(CREATION_PLACE.into(), receipts.iter().map(|r| r.place).collect::<Vec<_>>())
            .into(),
        Series::new(CREATED_TO_POSTED.into(), receipts.iter().map(|r| r.posted).collect::<Vec<_>>())
            .into(),
        Series::new(CREATED_TO_PAID.into(), receipts.iter().map(|r| r.paid).collect::<Vec<_>>())
            .into(),
    ];

    for flag in SALE_FLAG_COLUMNS {
        let values: Vec<Option<&str>> = if flag == SALE_FLAG_COLUMNS[0] {
            receipts.iter().map(|r| r.refund).collect()
        } else {
            receipts.iter().map(|_| Some("")).collect()
        };
        columns.push(Series::new(flag.into(), values).into());
    }

    DataFrame::new(columns)
}

#[test]
fn net_sale_time_requires_manager_sale_without_flags() -> PolarsResult<()> {
    let mut self_service = receipt("2024-01", "b1", 30.0, 1.0);
    self_service.sale_type = "самообслуживание";
    let mut refunded = receipt("2024-01", "b1", 40.0, 1.0);
    refunded.refund = Some("да");
    let mut unknown_flag = receipt("2024-01", "b1", 50.0, 1.0);
    unknown_flag.refund = None;

    let sales = sales_frame(&[
        receipt("2024-01", "b1", 10.0, 1.0),
        self_service,
        refunded,
        unknown_flag,
    ])?;

    let derived = derive_net_sale_time(&sales)?;
    let net = derived.column(NET_SALE_TIME)?.f64()?;

    assert_eq!(net.get(0), Some(10.0));
    assert_eq!(net.get(1), None);
    assert_eq!(net.get(2), None);
    assert_eq!(net.get(3), None, "a null flag is not an empty flag");
    Ok(())
}

#[test]
fn online_assembly_time_only_for_web_orders() -> PolarsResult<()> {
    let mut online = receipt("2024-01", "b1", 10.0, 7.5);
    online.place = ONLINE_CHANNEL;

    let sales = sales_frame(&[online, receipt("2024-01", "b1", 10.0, 3.0)])?;
    let derived = derive_online_assembly_time(&sales)?;
    let assembly = derived.column(ONLINE_ASSEMBLY_TIME)?.f64()?;

    assert_eq!(assembly.get(0), Some(7.5));
    assert_eq!(assembly.get(1), None);
    Ok(())
}

#[test]
fn summary_averages_per_month_and_branch_in_first_seen_order() -> PolarsResult<()> {
    let mut online = receipt("2024-02", "b2", 99.0, 8.0);
    online.place = ONLINE_CHANNEL;
    online.refund = Some("да");

    let sales = sales_frame(&[
        receipt("2024-02", "b2", 4.0, 1.0),
        receipt("2024-01", "b1", 10.0, 1.0),
        receipt("2024-01", "b1", 20.0, 1.0),
        online,
    ])?;

    let summary = summarize_sales_time(&sales)?;
    assert_eq!(summary.height(), 2);
    assert_eq!(
        summary.get_column_names_str(),
        vec![MONTH, BRANCH_GUID, NET_SALE_TIME, ONLINE_ASSEMBLY_TIME]
    );

    let months = summary.column(MONTH)?.str()?;
    let branches = summary.column(BRANCH_GUID)?.str()?;
    let net = summary.column(NET_SALE_TIME)?.f64()?;
    let assembly = summary.column(ONLINE_ASSEMBLY_TIME)?.f64()?;

    assert_eq!(months.get(0), Some("2024-02"));
    assert_eq!(branches.get(0), Some("b2"));
    assert_eq!(net.get(0), Some(4.0));
    assert_eq!(assembly.get(0), Some(8.0));

    assert_eq!(months.get(1), Some("2024-01"));
    assert_eq!(branches.get(1), Some("b1"));
    assert_eq!(net.get(1), Some(15.0));
    assert_eq!(assembly.get(1), None, "no web orders in this group");
    Ok(())
}

#[test]
fn summary_of_empty_extract_has_no_rows() -> PolarsResult<()> {
    let sales = sales_frame(&[])?;
    let summary = summarize_sales_time(&sales)?;
    assert_eq!(summary.height(), 0);
    assert!(summary.column(NET_SALE_TIME).is_ok());
    Ok(())
}

#[test]
fn rows_without_month_or_branch_are_not_grouped() -> PolarsResult<()> {
    let derived = df![
        MONTH => [Some("2024-01"), None, Some("2024-01")],
        BRANCH_GUID => [Some("b1"), Some("b1"), None],
        NET_SALE_TIME => [10.0, 20.0, 30.0],
        ONLINE_ASSEMBLY_TIME => [None::<f64>, None, None],
    ]?;

    let summary = aggregate_by_month_branch(&derived)?;
    assert_eq!(summary.height(), 1);
    assert_eq!(summary.column(BRANCH_GUID)?.str()?.get(0), Some("b1"));
    assert_eq!(summary.column(NET_SALE_TIME)?.f64()?.get(0), Some(10.0));
    Ok(())
}
