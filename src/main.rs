use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::info;

use cupy_xarray::data::filter::{filter_by_attrs, parse_attr_value, AttrFilter};
use cupy_xarray::data::loader;
use cupy_xarray::{provider, CupyAccessor, Dataset, Unit};

const USAGE: &str = "usage: cupy-xarray <file> [--index dim,..] [--var NAME] \
                     [--attr key=value].. [--chunks dim=n,..] [--units UNIT]";

/// Command-line options.
#[derive(Debug, Default)]
struct Options {
    path: PathBuf,
    index: Vec<String>,
    var: Option<String>,
    /// Repeated `--attr` flags; values for the same key are alternatives.
    filters: AttrFilter,
    chunks: BTreeMap<String, usize>,
    units: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut opts = Options {
        index: vec!["time".into(), "lat".into(), "lon".into()],
        ..Default::default()
    };
    let mut path = None;
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().with_context(|| format!("{flag} needs a value"));
        match arg.as_str() {
            "--index" => {
                opts.index = value("--index")?.split(',').map(|s| s.trim().to_string()).collect()
            }
            "--var" => opts.var = Some(value("--var")?),
            "--units" => opts.units = Some(value("--units")?),
            "--attr" => {
                let pair = value("--attr")?;
                let (key, val) = pair
                    .split_once('=')
                    .with_context(|| format!("attribute filter '{pair}' is not key=value"))?;
                opts.filters
                    .entry(key.trim().to_string())
                    .or_default()
                    .insert(parse_attr_value(val));
            }
            "--chunks" => {
                for pair in value("--chunks")?.split(',') {
                    let (dim, size) = pair
                        .split_once('=')
                        .with_context(|| format!("chunk '{pair}' is not dim=size"))?;
                    let size = size
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("chunk size '{size}' is not a number"))?;
                    opts.chunks.insert(dim.trim().to_string(), size);
                }
            }
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ if path.is_none() => path = Some(PathBuf::from(&arg)),
            _ => bail!("unexpected argument {arg}\n{USAGE}"),
        }
    }
    opts.path = path.context(USAGE)?;
    Ok(opts)
}

fn describe(label: &str, ds: &Dataset) {
    println!("{label}: is_cupy={} has_cupy={}", ds.is_cupy(), ds.has_cupy());
    for (name, var) in ds.data_vars() {
        let layers: Vec<String> = var.data().layers().iter().map(ToString::to_string).collect();
        println!(
            "  {name:<12} {:<7} dims={:?} shape={:?} layers=[{}]",
            var.data().residency(),
            var.dims(),
            var.shape(),
            layers.join(", ")
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let opts = parse_args(std::env::args().skip(1))?;
    let mut ds = loader::load_file(&opts.path, &opts.index)
        .with_context(|| format!("loading {}", opts.path.display()))?;

    if let Some(var) = &opts.var {
        if !ds.data_vars().contains_key(var) {
            bail!("no data variable '{var}' in {}", opts.path.display());
        }
        ds = ds.select_vars(std::slice::from_ref(var));
    }
    if !opts.filters.is_empty() {
        ds = filter_by_attrs(&ds, &opts.filters);
        if ds.is_empty() {
            bail!("no data variable matches {:?}", opts.filters);
        }
        info!("{} variables match the attribute filter", ds.len());
    }
    if !opts.chunks.is_empty() {
        ds = ds.chunk(&opts.chunks)?;
    }
    if let Some(units) = &opts.units {
        ds = ds.with_units(&Unit::new(units.clone()));
    }

    let backend = provider()?;
    info!("device backend: {}", backend.name());

    describe("loaded", &ds);
    let on_device = ds.as_cupy_on(backend.as_ref())?;
    describe("as_cupy", &on_device);
    let on_host = on_device.as_numpy_on(backend.as_ref())?;
    describe("as_numpy", &on_host);

    if on_host.has_cupy() || on_host.coords() != ds.coords() {
        bail!("round trip did not restore the dataset");
    }
    println!("round trip ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cupy_xarray::AttrValue;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_chunks_and_units() {
        let opts = parse_args(args(&[
            "air.parquet",
            "--chunks",
            "lat=25, lon=25",
            "--units",
            "K",
        ]))
        .unwrap();
        assert_eq!(opts.path, PathBuf::from("air.parquet"));
        assert_eq!(opts.chunks.get("lat"), Some(&25));
        assert_eq!(opts.chunks.get("lon"), Some(&25));
        assert_eq!(opts.units.as_deref(), Some("K"));
        assert_eq!(opts.index, ["time", "lat", "lon"]);
    }

    #[test]
    fn collects_repeated_attr_filters() {
        let opts = parse_args(args(&[
            "air.json",
            "--attr",
            "units=degK",
            "--attr",
            "level=850",
            "--attr",
            "level = 500",
        ]))
        .unwrap();
        assert_eq!(opts.filters.len(), 2);
        assert!(opts.filters["units"].contains(&AttrValue::from("degK")));
        assert_eq!(
            opts.filters["level"].iter().cloned().collect::<Vec<_>>(),
            [AttrValue::Integer(500), AttrValue::Integer(850)]
        );
        assert!(parse_args(args(&["a.csv", "--attr", "units"])).is_err());
    }

    #[test]
    fn rejects_missing_path_and_bad_chunks() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["a.csv", "--chunks", "lat"])).is_err());
        assert!(parse_args(args(&["a.csv", "--bogus"])).is_err());
    }
}
