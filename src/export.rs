// src/export.rs

use anyhow::{Context, Result};
use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::info;

use crate::aggregate::CropTable;

/// Create the directory `path` will be written into, if it is missing.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
        info!(dir = %parent.display(), "created output directory");
    }
    Ok(())
}

/// Write `batch` as CSV with a header row, replacing any existing file.
pub fn write_csv(path: &Path, batch: &RecordBatch) -> Result<()> {
    ensure_parent_dir(path)?;
    let file =
        File::create(path).with_context(|| format!("creating CSV file {}", path.display()))?;
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .build(BufWriter::new(file));
    writer
        .write(batch)
        .with_context(|| format!("writing CSV file {}", path.display()))?;
    writer
        .into_inner()
        .flush()
        .with_context(|| format!("flushing CSV file {}", path.display()))?;
    Ok(())
}

/// Write `batch` as a Snappy-compressed Parquet file, replacing any existing file.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    ensure_parent_dir(path)?;
    let file =
        File::create(path).with_context(|| format!("creating Parquet file {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating Arrow writer for results")?;
    writer.write(batch).context("writing results batch")?;
    writer.close().context("closing results writer")?;
    Ok(())
}

/// Write the accumulated table to `csv_path`, plus `parquet_path` when given.
/// Returns the number of rows written.
pub fn export(table: &CropTable, csv_path: &Path, parquet_path: Option<&Path>) -> Result<usize> {
    let batch = table.concat()?;
    write_csv(csv_path, &batch)?;
    info!(path = %csv_path.display(), rows = batch.num_rows(), "wrote CSV");

    if let Some(parquet_path) = parquet_path {
        write_parquet(parquet_path, &batch)?;
        info!(path = %parquet_path.display(), rows = batch.num_rows(), "wrote Parquet");
    }
    Ok(batch.num_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{shares_for_year, Crop, CropArea};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn table(rows: &[(u16, &str, Crop, f64, f64)]) -> CropTable {
        let mut table = CropTable::new();
        for &(year, state, crop, crop_ha, state_ha) in rows {
            let shares = shares_for_year(
                year,
                vec![CropArea {
                    state: state.to_string(),
                    crop,
                    crop_area_ha: crop_ha,
                    state_area_ha: state_ha,
                }],
            );
            table.push(&shares).unwrap();
        }
        table
    }

    #[test]
    fn writes_header_and_two_decimal_values() -> Result<()> {
        let tmp = tempdir()?;
        let out = tmp.path().join("output").join("cropland_fraction_hectarage.csv");

        let rows = export(
            &table(&[(2020, "Iowa", Crop::Corn, 9_000_000.0, 14_500_000.0)]),
            &out,
            None,
        )?;
        assert_eq!(rows, 1);

        let text = fs::read_to_string(&out)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "year,state,crop,total_crop_area_ha,crop_fraction");
        assert_eq!(lines[1], "2020,Iowa,corn,9000000.00,62.07");
        assert_eq!(lines.len(), 2);
        Ok(())
    }

    #[test]
    fn second_run_overwrites_first() -> Result<()> {
        let tmp = tempdir()?;
        let out = tmp.path().join("out.csv");

        export(
            &table(&[
                (2020, "Iowa", Crop::Corn, 9_000_000.0, 14_500_000.0),
                (2021, "Iowa", Crop::Soy, 1_000_000.0, 14_500_000.0),
            ]),
            &out,
            None,
        )?;
        export(
            &table(&[(2022, "Kansas", Crop::WinterWheat, 2_000_000.0, 21_300_000.0)]),
            &out,
            None,
        )?;

        let text = fs::read_to_string(&out)?;
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("2022,Kansas,winter_wheat,2000000.00,9.39"));
        assert!(!text.contains("Iowa"));
        Ok(())
    }

    #[test]
    fn empty_table_writes_header_only() -> Result<()> {
        let tmp = tempdir()?;
        let out = tmp.path().join("empty.csv");
        assert_eq!(export(&CropTable::new(), &out, None)?, 0);
        let text = fs::read_to_string(&out)?;
        assert_eq!(text.trim_end(), "year,state,crop,total_crop_area_ha,crop_fraction");
        Ok(())
    }

    #[test]
    fn creates_nested_output_directory() -> Result<()> {
        let tmp = tempdir()?;
        let out = tmp.path().join("a").join("b").join("out.csv");
        ensure_parent_dir(&out)?;
        assert!(out.parent().unwrap().is_dir());
        ensure_parent_dir(Path::new("bare.csv"))?;
        Ok(())
    }

    #[test]
    fn parquet_copy_matches_rows() -> Result<()> {
        let tmp = tempdir()?;
        let csv = tmp.path().join("out.csv");
        let pq = tmp.path().join("out.parquet");
        export(
            &table(&[
                (2020, "Iowa", Crop::Corn, 9_000_000.0, 14_500_000.0),
                (2020, "Ohio", Crop::Soy, 2_000_000.0, 10_600_000.0),
            ]),
            &csv,
            Some(pq.as_path()),
        )?;

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&pq)?)?.build()?;
        let mut total = 0;
        for batch in reader {
            let batch = batch?;
            assert_eq!(batch.schema().field(4).name(), "crop_fraction");
            total += batch.num_rows();
        }
        assert_eq!(total, 2);
        Ok(())
    }
}
