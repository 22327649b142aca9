use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::config::{IntegrationConfig, SourceSystem};
use crate::db::Connections;
use crate::error::{IntegrationError, Result};
use crate::export::write_parquet_snapshot;
use crate::extract::{ExtractRequest, Extractor};
use crate::load::{Loader, WriteMode};
use crate::transform::{sales_time, task_status};
use crate::watermark::ExtractWindow;

pub const TASKS_TABLE: &str = "Int.Poruchenij";
pub const BRANCH_MODELS_TABLE: &str = "Int.Modeli_Filialov";
pub const ROLE_JOB_TITLES_TABLE: &str = "Int.Roly_Dolgnosti";
pub const SALES_TIME_TABLE: &str = "Int.Sales_Time";
pub const TASK_STATUS_TABLE: &str = "Int.Status_Vkluch_Poruch";

pub const ACTIVE_TASKS_EXTRACT: &str = "Active_tasks";
pub const SCHEME_WORK_EXTRACT: &str = "Scheme_work";

/// A named extract: its template, where it runs, and how it is windowed.
#[derive(Debug, Clone)]
pub struct ExtractDescriptor {
    pub name: &'static str,
    pub source: SourceSystem,
    pub watermark_column: Option<&'static str>,
    pub description: &'static str,
}

static EXTRACTS: Lazy<Vec<ExtractDescriptor>> = Lazy::new(|| {
    vec![
        ExtractDescriptor {
            name: TASKS_TABLE,
            source: SourceSystem::Warehouse,
            watermark_column: Some("ДатаСоздания"),
            description: "Tasks completed at branches since the last run",
        },
        ExtractDescriptor {
            name: BRANCH_MODELS_TABLE,
            source: SourceSystem::Warehouse,
            watermark_column: None,
            description: "Current format of every branch",
        },
        ExtractDescriptor {
            name: ROLE_JOB_TITLES_TABLE,
            source: SourceSystem::Warehouse,
            watermark_column: None,
            description: "Active employees with their roles and job titles",
        },
        ExtractDescriptor {
            name: SALES_TIME_TABLE,
            source: SourceSystem::Analytics,
            watermark_column: Some(sales_time::MONTH),
            description: "Sales receipts with timing columns since the last run",
        },
        ExtractDescriptor {
            name: ACTIVE_TASKS_EXTRACT,
            source: SourceSystem::Reporting,
            watermark_column: None,
            description: "Tasks currently enabled at each branch",
        },
        ExtractDescriptor {
            name: SCHEME_WORK_EXTRACT,
            source: SourceSystem::Reporting,
            watermark_column: None,
            description: "Recommended process scheme of each branch",
        },
    ]
});

pub fn all_extract_descriptors() -> &'static [ExtractDescriptor] {
    EXTRACTS.as_slice()
}

fn extract_descriptor(name: &str) -> Result<&'static ExtractDescriptor> {
    all_extract_descriptors()
        .iter()
        .find(|descriptor| descriptor.name == name)
        .ok_or_else(|| IntegrationError::Configuration(format!("no extract named '{name}'")))
}

/// Raw extracts of one run, before any derivation.
#[derive(Debug)]
pub struct RawExtracts {
    pub tasks: DataFrame,
    pub branch_models: DataFrame,
    pub role_job_titles: DataFrame,
    pub sales: DataFrame,
    pub active_tasks: DataFrame,
    pub scheme_work: DataFrame,
}

#[derive(Debug)]
pub struct OutputFrame {
    pub table: &'static str,
    pub mode: WriteMode,
    pub frame: DataFrame,
}

/// Runs every derivation and lists the five outputs in load order.
pub fn build_outputs(raw: RawExtracts) -> Result<Vec<OutputFrame>> {
    let sales_time = sales_time::summarize_sales_time(&raw.sales)?;
    let task_status = task_status::enablement_status(&raw.active_tasks, &raw.scheme_work)?;

    Ok(vec![
        OutputFrame {
            table: TASKS_TABLE,
            mode: WriteMode::Append,
            frame: raw.tasks,
        },
        OutputFrame {
            table: BRANCH_MODELS_TABLE,
            mode: WriteMode::Replace,
            frame: raw.branch_models,
        },
        OutputFrame {
            table: ROLE_JOB_TITLES_TABLE,
            mode: WriteMode::Replace,
            frame: raw.role_job_titles,
        },
        OutputFrame {
            table: SALES_TIME_TABLE,
            mode: WriteMode::Append,
            frame: sales_time,
        },
        OutputFrame {
            table: TASK_STATUS_TABLE,
            mode: WriteMode::Replace,
            frame: task_status,
        },
    ])
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extract and transform, but leave the reporting store untouched.
    pub dry_run: bool,
    /// Also write each output as `<table>.parquet` here.
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub name: String,
    pub source: String,
    pub description: String,
    pub rows: usize,
    pub window: ExtractWindow,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub table: String,
    pub mode: WriteMode,
    pub rows: usize,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    pub dry_run: bool,
    pub extracts: Vec<ExtractSummary>,
    pub outputs: Vec<OutputSummary>,
}

/// Connects to all three databases and runs the job once.
pub async fn run(config: &IntegrationConfig, options: &RunOptions) -> Result<RunSummary> {
    let connections = Connections::open(config).await?;
    run_with_connections(config, &connections, options).await
}

pub async fn run_with_connections(
    config: &IntegrationConfig,
    connections: &Connections,
    options: &RunOptions,
) -> Result<RunSummary> {
    let run_date = Local::now().date_naive();
    let extractor = Extractor::new(
        &config.sql_dir,
        &config.target_schema,
        connections.reporting.clone(),
        run_date,
    );

    let mut summary = RunSummary {
        run_date,
        dry_run: options.dry_run,
        extracts: Vec::new(),
        outputs: Vec::new(),
    };

    let raw = RawExtracts {
        tasks: extract(&extractor, connections, TASKS_TABLE, &mut summary).await?,
        branch_models: extract(&extractor, connections, BRANCH_MODELS_TABLE, &mut summary).await?,
        role_job_titles: extract(&extractor, connections, ROLE_JOB_TITLES_TABLE, &mut summary)
            .await?,
        sales: extract(&extractor, connections, SALES_TIME_TABLE, &mut summary).await?,
        active_tasks: extract(&extractor, connections, ACTIVE_TASKS_EXTRACT, &mut summary).await?,
        scheme_work: extract(&extractor, connections, SCHEME_WORK_EXTRACT, &mut summary).await?,
    };

    let outputs = build_outputs(raw)?;
    let loader = Loader::new(connections.reporting.clone(), &config.target_schema);

    for output in outputs {
        let snapshot = match &options.export_dir {
            Some(dir) => {
                let path = write_parquet_snapshot(dir, output.table, &output.frame)?;
                Some(path.display().to_string())
            }
            None => None,
        };

        let loaded = if options.dry_run {
            info!(table = output.table, rows = output.frame.height(), "Dry run; skipping load");
            false
        } else {
            loader
                .load(&output.frame, output.table, output.mode)
                .await?;
            true
        };

        summary.outputs.push(OutputSummary {
            table: output.table.to_string(),
            mode: output.mode,
            rows: output.frame.height(),
            loaded,
            snapshot,
        });
    }

    Ok(summary)
}

async fn extract(
    extractor: &Extractor,
    connections: &Connections,
    name: &str,
    summary: &mut RunSummary,
) -> Result<DataFrame> {
    let descriptor = extract_descriptor(name)?;
    let source = connections.source(descriptor.source);

    let extracted = extractor
        .extract(ExtractRequest {
            name: descriptor.name,
            source: &source,
            watermark_column: descriptor.watermark_column,
        })
        .await?;

    summary.extracts.push(ExtractSummary {
        name: descriptor.name.to_string(),
        source: descriptor.source.to_string(),
        description: descriptor.description.to_string(),
        rows: extracted.frame.height(),
        window: extracted.window,
    });

    Ok(extracted.frame)
}
