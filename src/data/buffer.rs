use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::device::DeviceBackend;
use crate::error::{ResidencyError, Result};

// ---------------------------------------------------------------------------
// Residency / Layer – what the accessor reports about a buffer
// ---------------------------------------------------------------------------

/// Where the innermost concrete buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    Host,
    Device,
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Residency::Host => f.pad("host"),
            Residency::Device => f.pad("device"),
        }
    }
}

/// One level of wrapping around a concrete buffer, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Chunked,
    Quantity,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Chunked => f.pad("chunked"),
            Layer::Quantity => f.pad("quantity"),
        }
    }
}

fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

// ---------------------------------------------------------------------------
// HostArray – ordinary process memory
// ---------------------------------------------------------------------------

/// A dense row-major `f64` array in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl HostArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(ResidencyError::ShapeMismatch(format!(
                "shape {shape:?} holds {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over `data`.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// DeviceArray – a handle into device memory
// ---------------------------------------------------------------------------

/// Backend-owned device memory. The payload is opaque to everything except
/// the backend that allocated it; it is released when the last handle drops.
pub struct DeviceAllocation {
    id: u64,
    backend: String,
    bytes: usize,
    payload: Box<dyn Any + Send + Sync>,
}

impl DeviceAllocation {
    pub fn new(
        id: u64,
        backend: impl Into<String>,
        bytes: usize,
        payload: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            id,
            backend: backend.into(),
            bytes,
            payload,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the backend that owns this allocation.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

/// A device-resident array: shape plus a shared handle to its allocation.
/// Cloning shares the allocation, it does not copy device memory.
#[derive(Debug, Clone)]
pub struct DeviceArray {
    shape: Vec<usize>,
    allocation: Arc<DeviceAllocation>,
}

impl DeviceArray {
    pub fn new(shape: Vec<usize>, allocation: DeviceAllocation) -> Self {
        Self {
            shape,
            allocation: Arc::new(allocation),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocation(&self) -> &DeviceAllocation {
        &self.allocation
    }
}

/// Two handles are equal when they point at the same allocation.
impl PartialEq for DeviceArray {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && Arc::ptr_eq(&self.allocation, &other.allocation)
    }
}

// ---------------------------------------------------------------------------
// Wrappers – chunked and unit-carrying layers
// ---------------------------------------------------------------------------

/// Capability shared by every wrapper layer: expose the wrapped buffer and
/// rebuild an identical wrapper around a replacement.
pub trait Wrapper {
    fn layer(&self) -> Layer;
    fn inner(&self) -> &ArrayData;
    fn rewrap(&self, inner: ArrayData) -> ArrayData;
}

/// Block-partitioned wrapper. `chunks[d]` lists the block extents along
/// dimension `d`; they always sum to the inner shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedArray {
    chunks: Vec<Vec<usize>>,
    inner: Box<ArrayData>,
}

impl ChunkedArray {
    pub fn new(inner: ArrayData, chunks: Vec<Vec<usize>>) -> Result<Self> {
        let shape = inner.shape();
        let tiles = chunks.len() == shape.len()
            && chunks
                .iter()
                .zip(shape)
                .all(|(c, &n)| c.iter().sum::<usize>() == n && c.iter().all(|&b| b > 0 || n == 0));
        if !tiles {
            return Err(ResidencyError::ChunkMismatch {
                chunks,
                shape: shape.to_vec(),
            });
        }
        Ok(Self {
            chunks,
            inner: Box::new(inner),
        })
    }

    /// Regular chunking: `sizes[d]` is the block extent along dimension `d`,
    /// `None` keeps the whole dimension in one block.
    pub fn with_block_sizes(inner: ArrayData, sizes: &[Option<usize>]) -> Result<Self> {
        let shape = inner.shape().to_vec();
        if sizes.len() != shape.len() {
            return Err(ResidencyError::ShapeMismatch(format!(
                "{} chunk sizes for a {}-d array",
                sizes.len(),
                shape.len()
            )));
        }
        let chunks = shape
            .iter()
            .zip(sizes)
            .map(|(&n, size)| regular_chunks(n, size.unwrap_or(n)))
            .collect();
        Self::new(inner, chunks)
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    pub fn num_blocks(&self) -> usize {
        self.chunks.iter().map(Vec::len).product()
    }

    /// Materialise the deferred array: drop the chunk layer.
    pub fn compute(&self) -> ArrayData {
        (*self.inner).clone()
    }
}

fn regular_chunks(extent: usize, size: usize) -> Vec<usize> {
    if extent == 0 {
        return vec![0];
    }
    let size = size.clamp(1, extent);
    let mut out = vec![size; extent / size];
    if extent % size != 0 {
        out.push(extent % size);
    }
    out
}

impl Wrapper for ChunkedArray {
    fn layer(&self) -> Layer {
        Layer::Chunked
    }

    fn inner(&self) -> &ArrayData {
        &self.inner
    }

    fn rewrap(&self, inner: ArrayData) -> ArrayData {
        ArrayData::Chunked(ChunkedArray {
            chunks: self.chunks.clone(),
            inner: Box::new(inner),
        })
    }
}

/// Physical unit attached to a quantity, kept as its symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Unit(String);

impl Unit {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn symbol(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit wrapper: a magnitude buffer paired with its unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    unit: Unit,
    magnitude: Box<ArrayData>,
}

impl Quantity {
    pub fn new(magnitude: ArrayData, unit: Unit) -> Self {
        Self {
            unit,
            magnitude: Box::new(magnitude),
        }
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn magnitude(&self) -> &ArrayData {
        &self.magnitude
    }
}

impl Wrapper for Quantity {
    fn layer(&self) -> Layer {
        Layer::Quantity
    }

    fn inner(&self) -> &ArrayData {
        &self.magnitude
    }

    fn rewrap(&self, inner: ArrayData) -> ArrayData {
        ArrayData::Quantity(Quantity::new(inner, self.unit.clone()))
    }
}

// ---------------------------------------------------------------------------
// ArrayData – the buffer slot of a labeled array
// ---------------------------------------------------------------------------

/// A concrete buffer, possibly wrapped in any stack of chunk/unit layers.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Host(HostArray),
    Device(DeviceArray),
    Chunked(ChunkedArray),
    Quantity(Quantity),
}

impl From<HostArray> for ArrayData {
    fn from(a: HostArray) -> Self {
        ArrayData::Host(a)
    }
}

impl From<DeviceArray> for ArrayData {
    fn from(a: DeviceArray) -> Self {
        ArrayData::Device(a)
    }
}

impl ArrayData {
    pub fn as_wrapper(&self) -> Option<&dyn Wrapper> {
        match self {
            ArrayData::Chunked(c) => Some(c),
            ArrayData::Quantity(q) => Some(q),
            ArrayData::Host(_) | ArrayData::Device(_) => None,
        }
    }

    /// The concrete buffer under all wrapper layers.
    pub fn innermost(&self) -> &ArrayData {
        let mut current = self;
        while let Some(w) = current.as_wrapper() {
            current = w.inner();
        }
        current
    }

    /// Wrapper layers from the outside in; empty for a bare buffer.
    pub fn layers(&self) -> Vec<Layer> {
        let mut out = Vec::new();
        let mut current = self;
        while let Some(w) = current.as_wrapper() {
            out.push(w.layer());
            current = w.inner();
        }
        out
    }

    pub fn shape(&self) -> &[usize] {
        match self.innermost() {
            ArrayData::Host(h) => h.shape(),
            ArrayData::Device(d) => d.shape(),
            ArrayData::Chunked(_) | ArrayData::Quantity(_) => unreachable!("innermost is concrete"),
        }
    }

    pub fn residency(&self) -> Residency {
        match self.innermost() {
            ArrayData::Device(_) => Residency::Device,
            _ => Residency::Host,
        }
    }

    pub fn is_device_resident(&self) -> bool {
        self.residency() == Residency::Device
    }

    /// The unit of the outermost quantity layer, if any.
    pub fn unit(&self) -> Option<&Unit> {
        let mut current = self;
        loop {
            match current {
                ArrayData::Quantity(q) => return Some(q.unit()),
                ArrayData::Chunked(c) => current = c.inner(),
                ArrayData::Host(_) | ArrayData::Device(_) => return None,
            }
        }
    }

    /// Replace the innermost buffer with `f(innermost)`, re-wrapping every
    /// layer exactly as it was.
    pub fn map_innermost<F>(&self, f: F) -> Result<ArrayData>
    where
        F: FnOnce(&ArrayData) -> Result<ArrayData>,
    {
        match self.as_wrapper() {
            Some(w) => Ok(w.rewrap(w.inner().map_innermost(f)?)),
            None => f(self),
        }
    }

    pub fn to_device(&self, backend: &dyn DeviceBackend) -> Result<ArrayData> {
        self.map_innermost(|leaf| match leaf {
            ArrayData::Host(h) => backend.upload(h).map(ArrayData::Device),
            other => Ok(other.clone()),
        })
    }

    pub fn to_host(&self, backend: &dyn DeviceBackend) -> Result<ArrayData> {
        self.map_innermost(|leaf| match leaf {
            ArrayData::Device(d) => backend.download(d).map(ArrayData::Host),
            other => Ok(other.clone()),
        })
    }

    /// Strip every wrapper and bring the buffer to host memory.
    pub fn to_host_array(&self, backend: &dyn DeviceBackend) -> Result<HostArray> {
        match self.innermost() {
            ArrayData::Host(h) => Ok(h.clone()),
            ArrayData::Device(d) => backend.download(d),
            ArrayData::Chunked(_) | ArrayData::Quantity(_) => unreachable!("innermost is concrete"),
        }
    }
}
