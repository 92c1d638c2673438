use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::Float64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Surface air temperature in kelvin: warm tropics, cold poles, a diurnal
/// cycle over the 6-hourly time axis, and weather noise.
fn air_temperature(hour: f64, lat: f64, lon: f64, rng: &mut SimpleRng) -> f64 {
    let meridional = 300.0 - 0.55 * lat.abs();
    let diurnal = 3.0 * (2.0 * std::f64::consts::PI * (hour / 24.0 + lon / 360.0)).sin();
    meridional + diurnal + rng.gauss(0.0, 1.5)
}

fn main() -> Result<()> {
    env_logger::init();

    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "air_temperature.parquet".to_string());
    let mut rng = SimpleRng::new(42);

    // 6-hourly steps; lat 75 → 15 by 2.5; lon 200 → 330 by 2.5
    let times: Vec<f64> = (0..40).map(|i| i as f64 * 6.0).collect();
    let lats: Vec<f64> = (0..25).map(|i| 75.0 - i as f64 * 2.5).collect();
    let lons: Vec<f64> = (0..53).map(|i| 200.0 + i as f64 * 2.5).collect();

    let n_rows = times.len() * lats.len() * lons.len();
    let mut col_time = Vec::with_capacity(n_rows);
    let mut col_lat = Vec::with_capacity(n_rows);
    let mut col_lon = Vec::with_capacity(n_rows);
    let mut col_air = Vec::with_capacity(n_rows);

    for &t in &times {
        for &lat in &lats {
            for &lon in &lons {
                col_time.push(t);
                col_lat.push(lat);
                col_lon.push(lon);
                col_air.push(air_temperature(t, lat, lon, &mut rng));
            }
        }
    }

    let units = |u: &str| HashMap::from([("units".to_string(), u.to_string())]);
    let schema = Arc::new(Schema::new(vec![
        Field::new("time", DataType::Float64, false).with_metadata(units("hours since 2013-01-01")),
        Field::new("lat", DataType::Float64, false).with_metadata(units("degrees_north")),
        Field::new("lon", DataType::Float64, false).with_metadata(units("degrees_east")),
        Field::new("air", DataType::Float64, false).with_metadata(units("degK")),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Float64Array::from(col_time)),
            Arc::new(Float64Array::from(col_lat)),
            Arc::new(Float64Array::from(col_lon)),
            Arc::new(Float64Array::from(col_air)),
        ],
    )
    .context("building record batch")?;

    // Write Parquet
    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;

    println!(
        "Wrote air temperature ({} times × {} lats × {} lons) to {output_path}",
        times.len(),
        lats.len(),
        lons.len()
    );
    Ok(())
}
