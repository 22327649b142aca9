use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::DataFrame;

use crate::error::Result;

/// Writes `frame` to `<dir>/<table>.parquet`, creating `dir` if needed.
pub fn write_parquet_snapshot(dir: &Path, table: &str, frame: &DataFrame) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{table}.parquet"));

    let mut file = File::create(&path)?;
    let mut clone = frame.clone();
    ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Zstd(None))
        .with_statistics(StatisticsOptions::default())
        .finish(&mut clone)?;

    Ok(path)
}
