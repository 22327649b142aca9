use std::path::PathBuf;

use anyhow::{Context, Result};
use branchflow_core::config::IntegrationConfig;
use branchflow_core::pipeline::{self, RunOptions, RunSummary};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Branch task and sales-time integration job", long_about = None)]
struct Cli {
    /// Extract and transform without writing to the reporting store
    #[arg(long)]
    dry_run: bool,
    /// Write every output table as parquet into this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,
    /// Directory holding the extract templates (overrides BRANCHFLOW_SQL_DIR)
    #[arg(long)]
    sql_dir: Option<PathBuf>,
    /// Print the run summary as JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        IntegrationConfig::from_env().context("connection settings are incomplete")?;
    if let Some(sql_dir) = cli.sql_dir {
        config.sql_dir = sql_dir;
    }

    let options = RunOptions {
        dry_run: cli.dry_run,
        export_dir: cli.export_dir,
    };

    info!(dry_run = options.dry_run, sql_dir = %config.sql_dir.display(), "Starting run");
    let summary = pipeline::run(&config, &options)
        .await
        .context("integration run failed")?;
    info!(outputs = summary.outputs.len(), "Run finished");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mut extracts = Table::new();
    extracts
        .load_preset(UTF8_FULL)
        .set_header(vec!["Extract", "Source", "Description", "Window", "Rows"]);
    for extract in &summary.extracts {
        let window = match extract.window.start {
            Some(start) => format!("{start} .. {}", extract.window.stop),
            None => format!(".. {}", extract.window.stop),
        };
        extracts.add_row(vec![
            extract.name.clone(),
            extract.source.clone(),
            extract.description.clone(),
            window,
            extract.rows.to_string(),
        ]);
    }
    println!("{extracts}");

    let mut outputs = Table::new();
    outputs
        .load_preset(UTF8_FULL)
        .set_header(vec!["Table", "Mode", "Rows", "Loaded", "Snapshot"]);
    for output in &summary.outputs {
        outputs.add_row(vec![
            output.table.clone(),
            format!("{:?}", output.mode),
            output.rows.to_string(),
            if output.loaded { "yes" } else { "no" }.to_string(),
            output.snapshot.clone().unwrap_or_default(),
        ]);
    }
    println!("{outputs}");
}
