use once_cell::sync::Lazy;
use polars::prelude::*;

pub const SCHEMA: &str = "Schema";
pub const TASKS: &str = "Tasks";

/// A process family and the tasks a branch following it should have enabled.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    pub code: &'static str,
    pub tasks: &'static [&'static str],
}

/// A named process scheme and the catalog it follows.
#[derive(Debug, Clone)]
pub struct SchemeAssignment {
    pub scheme: &'static str,
    pub catalog: &'static str,
}

static CATALOGS: Lazy<Vec<TaskCatalog>> = Lazy::new(|| {
    vec![
        TaskCatalog {
            code: "ysm",
            tasks: &[
                "Выдача интернет-заказа",
                "Выдача товара",
                "Групповой разнос товара",
                "Набор для клиента с другого филиала в ячейку",
                "Набор интернет заказа в ячейку",
                "Набор товара",
                "Набор товара на транзит",
                "Набор товара с приемки New",
                "Снятие антикражки",
            ],
        },
        TaskCatalog {
            code: "konveer",
            tasks: &[
                "Выдача интернет-заказа",
                "Выдача товара",
                "Групповой разнос из постамата",
                "Групповой разнос товара",
                "Набор для клиента с другого филиала в ячейку",
                "Набор интернет заказа в ячейку",
                "Набор товара",
                "Набор товара на транзит",
                "Набор товара с приемки New",
                "Оказание услуг",
                "Снятие антикражки",
            ],
        },
    ]
});

static SCHEMES: Lazy<Vec<SchemeAssignment>> = Lazy::new(|| {
    vec![
        SchemeAssignment {
            scheme: "УСМ1",
            catalog: "ysm",
        },
        SchemeAssignment {
            scheme: "УСМ2",
            catalog: "ysm",
        },
        SchemeAssignment {
            scheme: "Конвеер1",
            catalog: "konveer",
        },
        SchemeAssignment {
            scheme: "Конвеер2",
            catalog: "konveer",
        },
    ]
});

pub fn all_task_catalogs() -> &'static [TaskCatalog] {
    CATALOGS.as_slice()
}

pub fn all_scheme_assignments() -> &'static [SchemeAssignment] {
    SCHEMES.as_slice()
}

/// Flattens `schemes` into one `(Schema, Tasks)` row per scheme and task of
/// its catalog, in catalog order.
pub fn build_reference(
    catalogs: &[TaskCatalog],
    schemes: &[SchemeAssignment],
) -> PolarsResult<DataFrame> {
    let mut scheme_column: Vec<&str> = Vec::new();
    let mut task_column: Vec<&str> = Vec::new();

    for assignment in schemes {
        let catalog = catalogs
            .iter()
            .find(|catalog| catalog.code == assignment.catalog)
            .ok_or_else(|| {
                PolarsError::ComputeError(
                    format!(
                        "scheme '{}' refers to unknown task catalog '{}'",
                        assignment.scheme, assignment.catalog
                    )
                    .into(),
                )
            })?;

        for task in catalog.tasks {
            scheme_column.push(assignment.scheme);
            task_column.push(*task);
        }
    }

    DataFrame::new(vec![
        Series::new(SCHEMA.into(), scheme_column).into(),
        Series::new(TASKS.into(), task_column).into(),
    ])
}

/// The reference table for the built-in catalogs.
pub fn recommended_task_reference() -> PolarsResult<DataFrame> {
    build_reference(all_task_catalogs(), all_scheme_assignments())
}
