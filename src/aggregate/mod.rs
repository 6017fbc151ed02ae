// src/aggregate/mod.rs

pub mod crop;
pub mod query;

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Decimal128Array, Int32Array, StringArray},
    compute::concat_batches,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
    util::pretty::pretty_format_batches,
};
use std::{fmt, sync::Arc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::db::is_undefined_table_error;
pub use crop::Crop;
pub use query::PostgisSource;

const AREA_PRECISION: u8 = 38;
const AREA_SCALE: i8 = 2;

/// One row of the crop-area query, unrounded.
#[derive(Debug, Clone, PartialEq)]
pub struct CropArea {
    pub state: String,
    pub crop: Crop,
    pub crop_area_ha: f64,
    pub state_area_ha: f64,
}

/// A value with two decimal places, stored as an integer count of hundredths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hundredths(pub i64);

impl Hundredths {
    /// Round `v` to two decimals the way PostgreSQL's `ROUND(v::numeric, 2)`
    /// does: the float is first taken to 15 significant decimal digits, then
    /// rounded half away from zero. `None` for non-finite or out-of-range values.
    pub fn round(v: f64) -> Option<Self> {
        if !v.is_finite() {
            return None;
        }
        let sci = format!("{:.14e}", v);
        let (mantissa, exp) = sci.split_once('e')?;
        let exp: i32 = exp.parse().ok()?;
        let negative = mantissa.starts_with('-');
        let digits: i128 = mantissa
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()?;

        // v = digits * 10^(exp - 14), so v * 100 = digits * 10^(exp - 12)
        let shift = exp - 12;
        let magnitude = if shift >= 0 {
            digits.checked_mul(10i128.checked_pow(shift.unsigned_abs())?)?
        } else if shift < -38 {
            0
        } else {
            let div = 10i128.pow(shift.unsigned_abs());
            let (q, r) = (digits / div, digits % div);
            if r * 2 >= div {
                q + 1
            } else {
                q
            }
        };

        let magnitude = i64::try_from(magnitude).ok()?;
        Some(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Hundredths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// One output row: crop area and share of the state for a year.
#[derive(Debug, Clone, PartialEq)]
pub struct CropShare {
    pub year: u16,
    pub state: String,
    pub crop: Crop,
    pub total_crop_area_ha: Hundredths,
    pub crop_fraction: Hundredths,
}

impl CropShare {
    /// `None` when the state has no positive area to divide by.
    pub fn from_area(year: u16, area: CropArea) -> Option<Self> {
        if area.state_area_ha.is_nan() || area.state_area_ha <= 0.0 {
            return None;
        }
        Some(Self {
            year,
            crop_fraction: Hundredths::round(100.0 * area.crop_area_ha / area.state_area_ha)?,
            total_crop_area_ha: Hundredths::round(area.crop_area_ha)?,
            state: area.state,
            crop: area.crop,
        })
    }
}

/// Turn one year's query rows into output rows ordered by state, then crop.
pub fn shares_for_year(year: u16, areas: Vec<CropArea>) -> Vec<CropShare> {
    let mut shares: Vec<CropShare> = areas
        .into_iter()
        .filter_map(|area| {
            let state = area.state.clone();
            let share = CropShare::from_area(year, area);
            if share.is_none() {
                warn!(year, state = %state, "skipping row with unusable state or crop area");
            }
            share
        })
        .collect();
    shares.sort_by(|a, b| a.state.cmp(&b.state).then(a.crop.cmp(&b.crop)));
    shares
}

/// Where the job gets crop areas from.
#[allow(async_fn_in_trait)]
pub trait CropAreaSource {
    async fn crop_areas(&self, year: u16) -> Result<Vec<CropArea>>;
}

pub fn result_schema() -> Schema {
    let area = DataType::Decimal128(AREA_PRECISION, AREA_SCALE);
    Schema::new(vec![
        Field::new("year", DataType::Int32, false),
        Field::new("state", DataType::Utf8, false),
        Field::new("crop", DataType::Utf8, false),
        Field::new("total_crop_area_ha", area.clone(), false),
        Field::new("crop_fraction", area, false),
    ])
}

fn decimal_column(values: impl Iterator<Item = Hundredths>) -> Result<ArrayRef> {
    let array = Decimal128Array::from_iter_values(values.map(|v| i128::from(v.0)))
        .with_precision_and_scale(AREA_PRECISION, AREA_SCALE)
        .context("building decimal column")?;
    Ok(Arc::new(array))
}

/// Accumulates per-year batches; rows are appended as-is.
#[derive(Debug, Clone)]
pub struct CropTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Default for CropTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CropTable {
    pub fn new() -> Self {
        Self {
            schema: Arc::new(result_schema()),
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn push(&mut self, shares: &[CropShare]) -> Result<()> {
        if shares.is_empty() {
            return Ok(());
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from_iter_values(
                shares.iter().map(|s| i32::from(s.year)),
            )),
            Arc::new(StringArray::from_iter_values(
                shares.iter().map(|s| s.state.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                shares.iter().map(|s| s.crop.as_str()),
            )),
            decimal_column(shares.iter().map(|s| s.total_crop_area_ha))?,
            decimal_column(shares.iter().map(|s| s.crop_fraction))?,
        ];
        let batch = RecordBatch::try_new(self.schema(), columns)
            .context("building crop share batch")?;
        self.batches.push(batch);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// All years in one batch; empty (schema only) when nothing matched.
    pub fn concat(&self) -> Result<RecordBatch> {
        concat_batches(&self.schema, &self.batches).context("concatenating yearly results")
    }

    /// Pretty-printed first `n` rows, for the log.
    pub fn preview(&self, n: usize) -> Result<String> {
        let all = self.concat()?;
        let head = all.slice(0, n.min(all.num_rows()));
        Ok(pretty_format_batches(&[head])?.to_string())
    }
}

/// Run the query for each year in turn. A failing year logs and contributes
/// no rows; later years still run.
pub async fn run_years<S: CropAreaSource>(source: &S, years: &[u16]) -> Result<CropTable> {
    let mut table = CropTable::new();

    for &year in years {
        let start = Instant::now();
        let areas = match source.crop_areas(year).await {
            Ok(areas) => areas,
            Err(e) if is_undefined_table_error(&e) => {
                warn!(year, "no raster table for year; skipping: {:#}", e);
                Vec::new()
            }
            Err(e) => {
                error!(year, "error querying crop areas: {:#}", e);
                Vec::new()
            }
        };

        let shares = shares_for_year(year, areas);
        info!(year, rows = shares.len(), elapsed = ?start.elapsed(), "aggregated year");
        table.push(&shares)?;
    }

    info!(years = years.len(), rows = table.num_rows(), "aggregation finished");
    Ok(table)
}
