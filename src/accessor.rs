//! The `cupy` accessor: residency queries and host ⇄ device conversion for
//! [`DataArray`] and [`Dataset`].
//!
//! Conversion only ever replaces the innermost concrete buffer. Chunk and
//! unit layers, dimension names, coordinates and attributes come back
//! exactly as they went in.

use log::debug;

use crate::data::buffer::HostArray;
use crate::data::model::{DataArray, Dataset};
use crate::device::{self, DeviceBackend};
use crate::error::Result;

pub trait CupyAccessor: Sized {
    /// Whether the innermost buffer lives in device memory.
    fn is_cupy(&self) -> bool;

    fn as_cupy_on(&self, backend: &dyn DeviceBackend) -> Result<Self>;

    fn as_numpy_on(&self, backend: &dyn DeviceBackend) -> Result<Self>;

    /// Move to device memory using the registered provider.
    fn as_cupy(&self) -> Result<Self> {
        let backend = device::provider()?;
        self.as_cupy_on(backend.as_ref())
    }

    /// Move to host memory using the registered provider.
    fn as_numpy(&self) -> Result<Self> {
        let backend = device::provider()?;
        self.as_numpy_on(backend.as_ref())
    }
}

impl CupyAccessor for DataArray {
    fn is_cupy(&self) -> bool {
        self.data().is_device_resident()
    }

    fn as_cupy_on(&self, backend: &dyn DeviceBackend) -> Result<Self> {
        debug!(
            "as_cupy {:?} via {} (layers {:?})",
            self.name(),
            backend.name(),
            self.data().layers()
        );
        self.with_data(self.data().to_device(backend)?)
    }

    fn as_numpy_on(&self, backend: &dyn DeviceBackend) -> Result<Self> {
        debug!("as_numpy {:?} via {}", self.name(), backend.name());
        self.with_data(self.data().to_host(backend)?)
    }
}

impl DataArray {
    /// The bare buffer in host memory, with every wrapper stripped.
    pub fn get(&self) -> Result<HostArray> {
        let backend = device::provider()?;
        self.get_on(backend.as_ref())
    }

    pub fn get_on(&self, backend: &dyn DeviceBackend) -> Result<HostArray> {
        self.data().to_host_array(backend)
    }
}

/// A dataset counts as device-resident when every data variable is; an
/// empty dataset is vacuously so.
impl CupyAccessor for Dataset {
    fn is_cupy(&self) -> bool {
        self.data_vars().values().all(|var| var.is_cupy())
    }

    fn as_cupy_on(&self, backend: &dyn DeviceBackend) -> Result<Self> {
        self.map_vars(|var| var.as_cupy_on(backend))
    }

    fn as_numpy_on(&self, backend: &dyn DeviceBackend) -> Result<Self> {
        self.map_vars(|var| var.as_numpy_on(backend))
    }
}

impl Dataset {
    /// Whether any data variable lives in device memory.
    pub fn has_cupy(&self) -> bool {
        self.data_vars().values().any(|var| var.is_cupy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::buffer::{ArrayData, Layer, Unit};
    use crate::data::model::{AttrValue, Coordinate};
    use crate::device::{SimulatedDevice, UnavailableDevice};
    use crate::error::ResidencyError;

    fn temperature() -> DataArray {
        let values = vec![280.0, 281.5, 279.0, 290.0, 288.25, 287.0];
        let host = HostArray::new(vec![2, 3], values).unwrap();
        DataArray::new(vec!["lat", "lon"], host)
            .unwrap()
            .with_name("air")
            .with_coord("lat", Coordinate::index("lat", vec![10.0, 20.0]))
            .unwrap()
            .with_attr("long_name", "air temperature")
    }

    #[test]
    fn round_trip_restores_buffer_and_metadata() {
        let device = SimulatedDevice::new(0);
        let da = temperature();
        assert!(!da.is_cupy());

        let on_device = da.as_cupy_on(&device).unwrap();
        assert!(on_device.is_cupy());
        assert_eq!(on_device.dims(), da.dims());
        assert_eq!(on_device.coords(), da.coords());
        assert_eq!(
            on_device.attrs().get("long_name"),
            Some(&AttrValue::from("air temperature"))
        );

        let back = on_device.as_numpy_on(&device).unwrap();
        assert_eq!(back, da);
    }

    #[test]
    fn as_numpy_on_host_data_needs_no_device() {
        let da = temperature();
        assert_eq!(da.as_numpy_on(&UnavailableDevice).unwrap(), da);
    }

    #[test]
    fn transfer_failures_propagate() {
        let err = temperature().as_cupy_on(&UnavailableDevice).unwrap_err();
        assert!(matches!(err, ResidencyError::DeviceUnavailable { .. }));
    }

    #[test]
    fn get_unwraps_quantity_and_chunks() {
        let device = SimulatedDevice::new(0);
        let da = temperature();
        let mut chunks = std::collections::BTreeMap::new();
        chunks.insert("lon".to_string(), 2);
        let wrapped = da
            .with_units(Unit::new("K"))
            .chunk(&chunks)
            .unwrap()
            .as_cupy_on(&device)
            .unwrap();
        assert_eq!(wrapped.data().layers(), vec![Layer::Chunked, Layer::Quantity]);

        let host = wrapped.get_on(&device).unwrap();
        assert_eq!(host, da.get_on(&device).unwrap());
        assert_eq!(host.shape(), &[2, 3]);
    }

    #[test]
    fn dataset_residency_is_all_or_any() {
        let device = SimulatedDevice::new(0);
        let air = temperature();
        let on_device = air.as_cupy_on(&device).unwrap();
        let ds = Dataset::new()
            .with_var("air", air)
            .unwrap()
            .with_var("air_gpu", on_device)
            .unwrap();

        assert!(ds.has_cupy());
        assert!(!ds.is_cupy());

        let all = ds.as_cupy_on(&device).unwrap();
        assert!(all.is_cupy());
        assert_eq!(all.coords(), ds.coords());
        assert!(matches!(all.data_vars()["air"].data(), ArrayData::Device(_)));

        let none = all.as_numpy_on(&device).unwrap();
        assert!(!none.has_cupy());
    }

    #[test]
    fn empty_dataset_is_vacuously_on_device() {
        let ds = Dataset::new();
        assert!(ds.is_cupy());
        assert!(!ds.has_cupy());
    }
}
