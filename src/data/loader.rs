use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::buffer::{HostArray, Unit};
use super::model::{AttrValue, Coordinate, DataArray, Dataset};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json`    – self-describing `{ "coords": .., "data_vars": .., "attrs": .. }`
/// * `.csv`     – tidy table: one column per index dimension and per variable
/// * `.parquet` – same tidy layout; a field's `units` metadata becomes an attr
///
/// `index` names the dimension columns of the tabular formats, outermost
/// first. JSON ignores it.
pub fn load_file(path: &Path, index: &[String]) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "json" => load_json(path)?,
        "csv" => table_to_dataset(read_csv(path)?, index)?,
        "parquet" | "pq" => table_to_dataset(read_parquet(path)?, index)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    log::info!(
        "loaded {} variables from {} (sizes {:?})",
        dataset.len(),
        path.display(),
        dataset.sizes()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// ```json
/// {
///   "coords":    { "lat": { "dims": ["lat"], "values": [75.0, 72.5] } },
///   "data_vars": {
///     "air": {
///       "dims": ["time", "lat"], "shape": [1, 2], "data": [241.2, null],
///       "attrs": { "long_name": "air temperature" },
///       "units": "K", "chunks": { "lat": 1 }
///     }
///   },
///   "attrs": { "title": "reanalysis" }
/// }
/// ```
///
/// `null` cells load as NaN. `chunks` wraps the buffer in a chunk layer and
/// `units` wraps the result in a quantity. Coordinates take `values` (or
/// `data`), an optional `shape` and `attrs`.
#[derive(Debug, Deserialize)]
struct JsonDataset {
    #[serde(default)]
    coords: BTreeMap<String, JsonCoordinate>,
    data_vars: BTreeMap<String, JsonVariable>,
    #[serde(default)]
    attrs: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct JsonVariable {
    dims: Vec<String>,
    #[serde(default)]
    shape: Option<Vec<usize>>,
    data: Vec<Option<f64>>,
    #[serde(default)]
    attrs: BTreeMap<String, JsonValue>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    chunks: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct JsonCoordinate {
    dims: Vec<String>,
    #[serde(default)]
    shape: Option<Vec<usize>>,
    #[serde(alias = "data")]
    values: Vec<Option<f64>>,
    #[serde(default)]
    attrs: BTreeMap<String, JsonValue>,
}

/// Dense buffer from JSON cells; 1-d entries may omit `shape`.
fn host_array(
    name: &str,
    dims: &[String],
    shape: Option<&[usize]>,
    cells: &[Option<f64>],
) -> Result<HostArray> {
    let shape = match (shape, dims.len()) {
        (Some(shape), _) => shape.to_vec(),
        (None, 1) => vec![cells.len()],
        (None, n) => bail!("'{name}': {n}-d variable needs an explicit 'shape'"),
    };
    let values = cells.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    HostArray::new(shape, values).with_context(|| format!("'{name}': bad data"))
}

fn load_json(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonDataset = serde_json::from_str(&text).context("parsing JSON")?;

    let mut dataset = Dataset::new();
    for (key, val) in &root.attrs {
        dataset = dataset.with_attr(key.clone(), json_to_attr(val));
    }

    for (name, var) in &root.data_vars {
        let values = host_array(name, &var.dims, var.shape.as_deref(), &var.data)?;
        let mut array = DataArray::new(var.dims.clone(), values)
            .with_context(|| format!("variable '{name}'"))?;
        for (key, val) in &var.attrs {
            array = array.with_attr(key.clone(), json_to_attr(val));
        }
        if !var.chunks.is_empty() {
            array = array
                .chunk(&var.chunks)
                .with_context(|| format!("chunking '{name}'"))?;
        }
        if let Some(units) = &var.units {
            array = array.with_units(Unit::new(units.clone()));
        }
        dataset
            .insert_var(name.clone(), array)
            .with_context(|| format!("adding variable '{name}'"))?;
    }

    for (name, coord) in &root.coords {
        let values = host_array(name, &coord.dims, coord.shape.as_deref(), &coord.values)?;
        let mut coordinate = Coordinate::new(coord.dims.clone(), values);
        for (key, val) in &coord.attrs {
            coordinate = coordinate.with_attr(key.clone(), json_to_attr(val));
        }
        dataset = dataset
            .with_coord(name.clone(), coordinate)
            .with_context(|| format!("coordinate '{name}'"))?;
    }

    Ok(dataset)
}

fn json_to_attr(val: &JsonValue) -> AttrValue {
    match val {
        JsonValue::String(s) => AttrValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttrValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                AttrValue::Float(f)
            } else {
                AttrValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => AttrValue::Bool(*b),
        JsonValue::Null => AttrValue::Null,
        other => AttrValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tidy tables (CSV / Parquet)
// ---------------------------------------------------------------------------

/// Column-oriented numeric table; one entry per row in every column.
#[derive(Debug, Default)]
struct Table {
    columns: Vec<(String, Vec<f64>)>,
    units: BTreeMap<String, String>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn push_rows(&mut self, name: &str, values: Vec<f64>) {
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, col)) => col.extend(values),
            None => self.columns.push((name.to_string(), values)),
        }
    }
}

/// Rebuild the dense grid from a tidy table. Each index column's sorted
/// distinct values become a coordinate; every other column becomes a data
/// variable over all index dimensions. Cells without a row stay NaN and a
/// repeated index row overwrites the earlier one. Column units land in the
/// `units` attr of the variable or coordinate.
fn table_to_dataset(table: Table, index: &[String]) -> Result<Dataset> {
    if index.is_empty() {
        bail!("tabular data needs at least one index column");
    }

    let mut labels: Vec<Vec<f64>> = Vec::with_capacity(index.len());
    let mut index_cols: Vec<&[f64]> = Vec::with_capacity(index.len());
    for dim in index {
        let col = table
            .column(dim)
            .with_context(|| format!("missing index column '{dim}'"))?;
        if col.iter().any(|v| v.is_nan()) {
            bail!("index column '{dim}' contains missing values");
        }
        let mut distinct = col.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        labels.push(distinct);
        index_cols.push(col);
    }

    let shape: Vec<usize> = labels.iter().map(Vec::len).collect();
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    let n_rows = index_cols.first().map_or(0, |c| c.len());
    let offsets: Vec<usize> = (0..n_rows)
        .map(|row| {
            index_cols
                .iter()
                .zip(&labels)
                .zip(&strides)
                .map(|((col, lab), stride)| {
                    // Labels are built from this column, so the search always hits.
                    let pos = lab
                        .binary_search_by(|label| label.total_cmp(&col[row]))
                        .unwrap_or_else(|p| p);
                    pos * stride
                })
                .sum::<usize>()
        })
        .collect();

    let mut dataset = Dataset::new();
    let cells: usize = shape.iter().product();
    for (name, values) in &table.columns {
        if index.contains(name) {
            continue;
        }
        let mut grid = vec![f64::NAN; cells];
        for (&offset, &v) in offsets.iter().zip(values) {
            grid[offset] = v;
        }
        let mut array = DataArray::new(index.to_vec(), HostArray::new(shape.clone(), grid)?)?;
        if let Some(units) = table.units.get(name) {
            array = array.with_attr("units", units.clone());
        }
        dataset.insert_var(name.clone(), array)?;
    }

    for (dim, lab) in index.iter().zip(labels) {
        let mut coord = Coordinate::index(dim.clone(), lab);
        if let Some(units) = table.units.get(dim) {
            coord = coord.with_attr("units", units.clone());
        }
        dataset = dataset.with_coord(dim.clone(), coord)?;
    }
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

/// Header row with column names, numeric cells; empty cells are NaN.
fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, cell) in record.iter().enumerate() {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse::<f64>().with_context(|| {
                    format!("Row {row_no}, {}: '{cell}' is not a number", headers[col_idx])
                })?
            };
            columns[col_idx].push(value);
        }
    }

    Ok(Table {
        columns: headers.into_iter().zip(columns).collect(),
        units: BTreeMap::new(),
    })
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Every column must be numeric (Float64/Float32/Int64/Int32).
fn read_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    let mut table = Table::default();
    for field in builder.schema().fields() {
        if let Some(units) = field.metadata().get("units") {
            table.units.insert(field.name().clone(), units.clone());
        }
    }

    let reader = builder.build().context("building parquet reader")?;
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        for (i, field) in schema.fields().iter().enumerate() {
            let values = column_to_f64(batch.column(i))
                .with_context(|| format!("column '{}'", field.name()))?;
            table.push_rows(field.name(), values);
        }
    }
    Ok(table)
}

fn column_to_f64(col: &Arc<dyn Array>) -> Result<Vec<f64>> {
    let values = match col.data_type() {
        DataType::Float64 => {
            let arr = downcast::<Float64Array>(col)?;
            arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
        }
        DataType::Float32 => {
            let arr = downcast::<Float32Array>(col)?;
            arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect()
        }
        DataType::Int64 => {
            let arr = downcast::<Int64Array>(col)?;
            arr.iter().map(|v| v.map_or(f64::NAN, |i| i as f64)).collect()
        }
        DataType::Int32 => {
            let arr = downcast::<Int32Array>(col)?;
            arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect()
        }
        other => bail!("expected a numeric column, got {other:?}"),
    };
    Ok(values)
}

fn downcast<T: Array + 'static>(col: &Arc<dyn Array>) -> Result<&T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array layout for {:?}", col.data_type()))
}
