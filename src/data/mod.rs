/// Data layer: labeled containers, buffers, loading, and filtering.
///
/// Architecture:
/// ```text
///  .json / .csv / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │   Dataset     │  data_vars: DataArray → ArrayData
///   └──────────────┘      (Host | Device | Chunked | Quantity)
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  attribute predicates → selected variables
///   └──────────┘
/// ```

pub mod buffer;
pub mod filter;
pub mod loader;
pub mod model;
