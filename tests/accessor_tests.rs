use std::collections::BTreeMap;

use cupy_xarray::{
    ArrayData, AttrValue, Coordinate, CupyAccessor, DataArray, Dataset, HostArray, Layer,
    Residency, Unit,
};

// ---------------------------------------------------------------------------
// Fixtures: a small air-temperature dataset in four wrappings
// ---------------------------------------------------------------------------

const TIME: usize = 4;
const LAT: usize = 5;
const LON: usize = 6;

fn air_ds() -> Dataset {
    let values: Vec<f64> = (0..TIME * LAT * LON)
        .map(|i| 240.0 + (i % 37) as f64 * 1.25)
        .collect();
    let air = DataArray::new(
        vec!["time", "lat", "lon"],
        HostArray::new(vec![TIME, LAT, LON], values).unwrap(),
    )
    .unwrap()
    .with_attr("long_name", "4xDaily Air temperature at sigma level 995")
    .with_attr("units", "degK")
    .with_attr("precision", 2_i64);

    Dataset::new()
        .with_var("air", air)
        .unwrap()
        .with_coord("time", Coordinate::index("time", vec![0.0, 6.0, 12.0, 18.0]))
        .unwrap()
        .with_coord("lat", Coordinate::index("lat", vec![75.0, 72.5, 70.0, 67.5, 65.0]))
        .unwrap()
        .with_coord(
            "lon",
            Coordinate::index("lon", vec![200.0, 202.5, 205.0, 207.5, 210.0, 212.5]),
        )
        .unwrap()
        .with_attr("Conventions", "COARDS")
}

fn chunks() -> BTreeMap<String, usize> {
    [("lat".to_string(), 2), ("lon".to_string(), 4)]
        .into_iter()
        .collect()
}

fn air_ds_chunked() -> Dataset {
    air_ds().chunk(&chunks()).unwrap()
}

fn air_ds_quantity() -> Dataset {
    air_ds().with_units(&Unit::new("degree_Kelvin"))
}

fn air_ds_quantity_chunked() -> Dataset {
    air_ds_chunked().with_units(&Unit::new("degree_Kelvin"))
}

fn air(ds: &Dataset) -> DataArray {
    ds.data_array("air").unwrap()
}

fn assert_same_labels(a: &DataArray, b: &DataArray) {
    assert_eq!(a.name(), b.name());
    assert_eq!(a.dims(), b.dims());
    assert_eq!(a.shape(), b.shape());
    assert_eq!(a.coords(), b.coords());
    assert_eq!(a.attrs(), b.attrs());
}

// ---------------------------------------------------------------------------
// Dataset / DataArray on plain host buffers
// ---------------------------------------------------------------------------

#[test]
fn dataset_accessor() {
    let ds = air_ds();
    assert!(!ds.is_cupy());

    let ds = ds.as_cupy().unwrap();
    assert!(ds.is_cupy());
    assert_eq!(ds.attrs().get("Conventions"), Some(&AttrValue::from("COARDS")));
    assert!(ds.coords().values().all(|c| !c.values.is_empty()));

    let ds = ds.as_numpy().unwrap();
    assert!(!ds.is_cupy());
    assert_eq!(ds, air_ds());
}

#[test]
fn data_array_accessor() {
    let da = air(&air_ds());
    assert!(!da.is_cupy());

    let da = da.as_cupy().unwrap();
    assert!(da.is_cupy());
    assert!(matches!(da.data(), ArrayData::Device(_)));

    let garr = da.get().unwrap();
    assert_eq!(garr.shape(), &[TIME, LAT, LON]);

    let da = da.as_numpy().unwrap();
    assert!(!da.is_cupy());
    assert_eq!(da, air(&air_ds()));
}

#[test]
fn as_cupy_is_a_no_op_on_device_data() {
    let once = air(&air_ds()).as_cupy().unwrap();
    let twice = once.as_cupy().unwrap();
    assert_eq!(once, twice);
}

// ---------------------------------------------------------------------------
// Chunk wrapper
// ---------------------------------------------------------------------------

#[test]
fn data_array_accessor_chunked() {
    let da = air(&air_ds_chunked());
    assert!(!da.is_cupy());

    let da = da.as_cupy().unwrap();
    assert!(da.is_cupy());
    match da.data() {
        ArrayData::Chunked(c) => {
            assert_eq!(c.chunks(), &[vec![4], vec![2, 2, 1], vec![4, 2]]);
            assert_eq!(c.num_blocks(), 6);
        }
        other => panic!("expected chunk wrapper, got {other:?}"),
    }

    let da = da.as_numpy().unwrap();
    assert!(!da.is_cupy());
    assert_eq!(da.data().layers(), vec![Layer::Chunked]);
    assert_eq!(da, air(&air_ds_chunked()));
}

// ---------------------------------------------------------------------------
// Unit wrapper
// ---------------------------------------------------------------------------

#[test]
fn data_array_accessor_quantity() {
    let da = air(&air_ds_quantity());
    assert!(!da.is_cupy());

    let da = da.as_cupy().unwrap();
    assert!(da.is_cupy());
    assert!(matches!(da.data(), ArrayData::Quantity(_)));
    assert_eq!(da.data().unit(), Some(&Unit::new("degree_Kelvin")));

    let da = da.as_numpy().unwrap();
    assert!(!da.is_cupy());
    assert!(matches!(da.data(), ArrayData::Quantity(_)));
    assert_same_labels(&da, &air(&air_ds_quantity()));
}

// ---------------------------------------------------------------------------
// Unit wrapper around chunk wrapper
// ---------------------------------------------------------------------------

#[test]
fn data_array_accessor_quantity_chunked() {
    let da = air(&air_ds_quantity_chunked());
    assert!(!da.is_cupy());
    assert_eq!(da.data().layers(), vec![Layer::Quantity, Layer::Chunked]);

    let da = da.as_cupy().unwrap();
    assert!(da.is_cupy());
    match da.data() {
        ArrayData::Quantity(q) => {
            assert!(matches!(q.magnitude(), ArrayData::Chunked(_)));
            assert_eq!(q.magnitude().residency(), Residency::Device);
        }
        other => panic!("expected quantity wrapper, got {other:?}"),
    }

    let da = da.as_numpy().unwrap();
    assert!(!da.is_cupy());
    match da.data() {
        ArrayData::Quantity(q) => assert!(matches!(q.magnitude(), ArrayData::Chunked(_))),
        other => panic!("expected quantity wrapper, got {other:?}"),
    }
    assert_eq!(da, air(&air_ds_quantity_chunked()));
}

#[test]
fn dataset_round_trip_keeps_every_wrapping() {
    for ds in [
        air_ds(),
        air_ds_chunked(),
        air_ds_quantity(),
        air_ds_quantity_chunked(),
    ] {
        let layers = ds.data_vars()["air"].data().layers();
        let on_device = ds.as_cupy().unwrap();
        assert!(on_device.is_cupy());
        assert_eq!(on_device.data_vars()["air"].data().layers(), layers);
        assert_eq!(on_device.coords(), ds.coords());

        let back = on_device.as_numpy().unwrap();
        assert_eq!(back, ds);
    }
}

// ---------------------------------------------------------------------------
// get()
// ---------------------------------------------------------------------------

#[test]
fn get_always_returns_a_plain_host_array() {
    let expected = air(&air_ds()).get().unwrap();
    for ds in [
        air_ds(),
        air_ds_chunked(),
        air_ds_quantity(),
        air_ds_quantity_chunked(),
    ] {
        let da = air(&ds);
        assert_eq!(da.get().unwrap(), expected);
        assert_eq!(da.as_cupy().unwrap().get().unwrap(), expected);
    }
}
