//! Host ⇄ device residency for labeled arrays.
//!
//! A [`DataArray`] or [`Dataset`] keeps its buffer in an [`ArrayData`]: a
//! host or device array, optionally wrapped in chunk and unit layers. The
//! [`CupyAccessor`] trait moves the innermost buffer between host and device
//! memory and leaves everything around it untouched.
//!
//! ```no_run
//! use cupy_xarray::{CupyAccessor, DataArray, HostArray};
//!
//! # fn main() -> cupy_xarray::Result<()> {
//! let da = DataArray::new(vec!["x"], HostArray::from_vec(vec![1.0, 2.0, 3.0]))?;
//! let on_device = da.as_cupy()?;
//! assert!(on_device.is_cupy());
//! assert_eq!(on_device.get()?.values(), &[1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod data;
pub mod device;
pub mod error;

pub use accessor::CupyAccessor;
pub use config::Config;
pub use data::buffer::{
    ArrayData, ChunkedArray, DeviceArray, HostArray, Layer, Quantity, Residency, Unit, Wrapper,
};
pub use data::model::{AttrValue, Coordinate, DataArray, Dataset};
pub use device::{
    provider, register_provider, DeviceBackend, SimulatedDevice, TransferStats, UnavailableDevice,
};
pub use error::{ResidencyError, Result};
