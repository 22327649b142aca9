use std::fs;

use anyhow::Result;
use branchflow_core::config::Engine;
use branchflow_core::error::IntegrationError;
use branchflow_core::template::{SqlTemplate, WindowBound};

#[test]
fn postgres_numbers_each_bound_once() -> Result<()> {
    let template = SqlTemplate::new(
        "Int.Poruchenij",
        "SELECT * FROM t WHERE d >= '{StartDate}' AND d < '{StopDate}' OR d = {StartDate}",
    );
    let rendered = template.render(Engine::Postgres)?;

    assert_eq!(
        rendered.sql,
        "SELECT * FROM t WHERE d >= $1 AND d < $2 OR d = $1"
    );
    assert_eq!(rendered.binds, vec![WindowBound::Start, WindowBound::Stop]);
    Ok(())
}

#[test]
fn clickhouse_binds_in_order_and_escapes_question_marks() -> Result<()> {
    let template = SqlTemplate::new(
        "Int.Sales_Time",
        "SELECT 'why?' FROM s WHERE m BETWEEN {StartDate} AND {StopDate} AND x > {StartDate}",
    );
    let rendered = template.render(Engine::ClickHouse)?;

    assert_eq!(
        rendered.sql,
        "SELECT 'why??' FROM s WHERE m BETWEEN ? AND ? AND x > ?"
    );
    assert_eq!(
        rendered.binds,
        vec![WindowBound::Start, WindowBound::Stop, WindowBound::Start]
    );
    Ok(())
}

#[test]
fn doubled_braces_are_literal() -> Result<()> {
    let template = SqlTemplate::new("Scheme_work", "SELECT '{{\"a\": 1}}'::json");
    let rendered = template.render(Engine::Postgres)?;

    assert_eq!(rendered.sql, "SELECT '{\"a\": 1}'::json");
    assert!(rendered.binds.is_empty());
    Ok(())
}

#[test]
fn unknown_placeholder_is_a_template_error() {
    let template = SqlTemplate::new("Active_tasks", "SELECT {Branch}");
    match template.render(Engine::Postgres) {
        Err(IntegrationError::Template { name, reason }) => {
            assert_eq!(name, "Active_tasks");
            assert!(reason.contains("Branch"));
        }
        other => panic!("expected template error, got {other:?}"),
    }
}

#[test]
fn unbalanced_braces_are_template_errors() {
    for text in ["SELECT {StartDate", "SELECT 1 }"] {
        let result = SqlTemplate::new("broken", text).render(Engine::Postgres);
        assert!(
            matches!(result, Err(IntegrationError::Template { .. })),
            "{text} should not render"
        );
    }
}

#[test]
fn load_reads_named_file_from_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("Int.Roly_Dolgnosti.sql"),
        "SELECT role FROM employees",
    )?;

    let template = SqlTemplate::load(dir.path(), "Int.Roly_Dolgnosti")?;
    assert_eq!(template.name(), "Int.Roly_Dolgnosti");
    assert_eq!(
        template.render(Engine::Postgres)?.sql,
        "SELECT role FROM employees"
    );
    Ok(())
}

#[test]
fn load_reports_missing_file_as_template_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let result = SqlTemplate::load(dir.path(), "Int.Modeli_Filialov");
    assert!(matches!(result, Err(IntegrationError::Template { .. })));
    Ok(())
}

#[test]
fn load_rejects_path_like_names() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for name in ["../secrets", "a/b", ""] {
        assert!(SqlTemplate::load(dir.path(), name).is_err(), "{name:?}");
    }
    Ok(())
}
