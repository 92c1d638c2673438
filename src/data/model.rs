use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ResidencyError, Result};

use super::buffer::{ArrayData, ChunkedArray, HostArray, Quantity, Unit};

// ---------------------------------------------------------------------------
// AttrValue – a single attribute value
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value (the `attrs` dict of a variable).
/// Attribute filters keep these in `BTreeSet`s, so `AttrValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Eq for AttrValue {}

impl PartialOrd for AttrValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttrValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use AttrValue::*;
        fn rank(v: &AttrValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl std::hash::Hash for AttrValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttrValue::String(s) => s.hash(state),
            AttrValue::Integer(i) => i.hash(state),
            AttrValue::Float(f) => f.to_bits().hash(state),
            AttrValue::Bool(b) => b.hash(state),
            AttrValue::Null => {}
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s}"),
            AttrValue::Integer(i) => write!(f, "{i}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Integer(i)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

pub type Attrs = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Coordinate – labels along one or more dimensions
// ---------------------------------------------------------------------------

/// Coordinate labels. Coordinates always live in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub dims: Vec<String>,
    pub values: HostArray,
    pub attrs: Attrs,
}

impl Coordinate {
    pub fn new(dims: Vec<String>, values: HostArray) -> Self {
        Self {
            dims,
            values,
            attrs: Attrs::new(),
        }
    }

    /// A one-dimensional index coordinate along `dim`.
    pub fn index(dim: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(vec![dim.into()], HostArray::from_vec(values))
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Same dims and labels; NaN labels match each other. Attributes are
    /// not compared.
    pub fn same_labels(&self, other: &Coordinate) -> bool {
        self.dims == other.dims
            && self.values.shape() == other.values.shape()
            && self
                .values
                .values()
                .iter()
                .zip(other.values.values())
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

// ---------------------------------------------------------------------------
// DataArray – one labeled array
// ---------------------------------------------------------------------------

/// A named, dimensioned buffer plus coordinates and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    name: Option<String>,
    dims: Vec<String>,
    data: ArrayData,
    coords: BTreeMap<String, Coordinate>,
    attrs: Attrs,
}

impl DataArray {
    /// `dims` names every axis of `data`, outermost first.
    pub fn new<S: Into<String>>(dims: Vec<S>, data: impl Into<ArrayData>) -> Result<Self> {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let data = data.into();
        check_rank(&dims, &data)?;
        Ok(Self {
            name: None,
            dims,
            data,
            coords: BTreeMap::new(),
            attrs: Attrs::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a coordinate. Its dims must be dims of this array with
    /// matching sizes.
    pub fn with_coord(mut self, name: impl Into<String>, coord: Coordinate) -> Result<Self> {
        let name = name.into();
        check_coord(&name, &coord, &self.sizes())?;
        self.coords.insert(name, coord);
        Ok(self)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Same labels and metadata around a different buffer.
    pub fn with_data(&self, data: ArrayData) -> Result<Self> {
        if data.shape() != self.data.shape() {
            return Err(ResidencyError::ShapeMismatch(format!(
                "replacement buffer has shape {:?}, array has {:?}",
                data.shape(),
                self.data.shape()
            )));
        }
        Ok(Self {
            data,
            ..self.clone()
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn coords(&self) -> &BTreeMap<String, Coordinate> {
        &self.coords
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Dimension name → length.
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        self.dims
            .iter()
            .cloned()
            .zip(self.shape().iter().copied())
            .collect()
    }

    /// Wrap the buffer in a chunk layer. `chunks` maps dimension names to
    /// block sizes; unlisted dimensions stay whole.
    pub fn chunk(&self, chunks: &BTreeMap<String, usize>) -> Result<Self> {
        if let Some(unknown) = chunks.keys().find(|d| !self.dims.contains(d)) {
            return Err(ResidencyError::ShapeMismatch(format!(
                "cannot chunk unknown dimension '{unknown}'"
            )));
        }
        let sizes: Vec<Option<usize>> = self.dims.iter().map(|d| chunks.get(d).copied()).collect();
        let chunked = ChunkedArray::with_block_sizes(self.data.clone(), &sizes)?;
        self.with_data(ArrayData::Chunked(chunked))
    }

    /// Wrap the buffer in a unit-carrying quantity layer.
    pub fn with_units(&self, unit: Unit) -> Self {
        Self {
            data: ArrayData::Quantity(Quantity::new(self.data.clone(), unit)),
            ..self.clone()
        }
    }

    pub(crate) fn take_coords(&mut self) -> BTreeMap<String, Coordinate> {
        std::mem::take(&mut self.coords)
    }
}

fn check_rank(dims: &[String], data: &ArrayData) -> Result<()> {
    if dims.len() != data.shape().len() {
        return Err(ResidencyError::ShapeMismatch(format!(
            "{} dimension names {dims:?} for a {}-d buffer",
            dims.len(),
            data.shape().len()
        )));
    }
    Ok(())
}

fn check_coord(name: &str, coord: &Coordinate, sizes: &BTreeMap<String, usize>) -> Result<()> {
    if coord.dims.len() != coord.values.ndim() {
        return Err(ResidencyError::ShapeMismatch(format!(
            "coordinate '{name}' has {} dims but {}-d values",
            coord.dims.len(),
            coord.values.ndim()
        )));
    }
    for (dim, &len) in coord.dims.iter().zip(coord.values.shape()) {
        match sizes.get(dim) {
            Some(&size) if size == len => {}
            Some(&size) => {
                return Err(ResidencyError::ShapeMismatch(format!(
                    "coordinate '{name}' has {len} labels along '{dim}' of size {size}"
                )))
            }
            None => {
                return Err(ResidencyError::ShapeMismatch(format!(
                    "coordinate '{name}' uses unknown dimension '{dim}'"
                )))
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dataset – a collection of labeled arrays sharing dimensions
// ---------------------------------------------------------------------------

/// Data variables keyed by name plus shared coordinates and attributes.
/// Member arrays hold no coordinates of their own; [`Dataset::data_array`]
/// attaches the shared ones on the way out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    data_vars: BTreeMap<String, DataArray>,
    coords: BTreeMap<String, Coordinate>,
    attrs: Attrs,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a data variable. Its dimension sizes must agree with
    /// the dataset's; its coordinates move into the shared set and must not
    /// relabel a shared coordinate of the same name.
    pub fn insert_var(&mut self, name: impl Into<String>, array: DataArray) -> Result<()> {
        let name = name.into();
        let sizes = self.sizes_without(Some(&name));
        for (dim, len) in array.sizes() {
            if let Some(&existing) = sizes.get(&dim) {
                if existing != len {
                    return Err(ResidencyError::ShapeMismatch(format!(
                        "variable '{name}' has '{dim}' of size {len}, dataset has {existing}"
                    )));
                }
            }
        }

        for (coord_name, coord) in array.coords() {
            if let Some(existing) = self.coords.get(coord_name) {
                if !existing.same_labels(coord) {
                    return Err(ResidencyError::ShapeMismatch(format!(
                        "variable '{name}' relabels coordinate '{coord_name}'"
                    )));
                }
            }
        }

        let mut array = array.with_name(name.clone());
        for (coord_name, coord) in array.take_coords() {
            self.coords.entry(coord_name).or_insert(coord);
        }
        self.data_vars.insert(name, array);
        Ok(())
    }

    pub fn with_var(mut self, name: impl Into<String>, array: DataArray) -> Result<Self> {
        self.insert_var(name, array)?;
        Ok(self)
    }

    pub fn with_coord(mut self, name: impl Into<String>, coord: Coordinate) -> Result<Self> {
        let name = name.into();
        check_coord(&name, &coord, &self.sizes())?;
        self.coords.insert(name, coord);
        Ok(self)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn data_vars(&self) -> &BTreeMap<String, DataArray> {
        &self.data_vars
    }

    pub fn coords(&self) -> &BTreeMap<String, Coordinate> {
        &self.coords
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn len(&self) -> usize {
        self.data_vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vars.is_empty()
    }

    /// Dimension name → length across all data variables and coordinates.
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        self.sizes_without(None)
    }

    fn sizes_without(&self, skip: Option<&str>) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for (name, var) in &self.data_vars {
            if Some(name.as_str()) != skip {
                sizes.extend(var.sizes());
            }
        }
        for coord in self.coords.values() {
            for (dim, &len) in coord.dims.iter().zip(coord.values.shape()) {
                sizes.entry(dim.clone()).or_insert(len);
            }
        }
        sizes
    }

    /// A data variable with every shared coordinate that fits its dims.
    pub fn data_array(&self, name: &str) -> Option<DataArray> {
        let var = self.data_vars.get(name)?;
        let mut out = var.clone();
        for (coord_name, coord) in &self.coords {
            if coord.dims.iter().all(|d| var.dims.contains(d)) {
                out.coords.insert(coord_name.clone(), coord.clone());
            }
        }
        Some(out)
    }

    /// Rebuild the dataset with `f` applied to each data variable; shared
    /// coordinates and attributes carry over.
    pub fn map_vars<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&DataArray) -> Result<DataArray>,
    {
        let data_vars = self
            .data_vars
            .iter()
            .map(|(name, var)| Ok((name.clone(), f(var)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            data_vars,
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        })
    }

    /// Chunk every data variable along the listed dimensions it has.
    pub fn chunk(&self, chunks: &BTreeMap<String, usize>) -> Result<Self> {
        self.map_vars(|var| {
            let own: BTreeMap<String, usize> = chunks
                .iter()
                .filter(|(dim, _)| var.dims.contains(dim))
                .map(|(dim, &size)| (dim.clone(), size))
                .collect();
            var.chunk(&own)
        })
    }

    /// Attach `unit` to every data variable.
    pub fn with_units(&self, unit: &Unit) -> Self {
        Self {
            data_vars: self
                .data_vars
                .iter()
                .map(|(name, var)| (name.clone(), var.with_units(unit.clone())))
                .collect(),
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        }
    }

    /// A dataset holding only the named variables and the coordinates they
    /// use.
    pub fn select_vars(&self, names: &[String]) -> Self {
        let data_vars: BTreeMap<String, DataArray> = self
            .data_vars
            .iter()
            .filter(|(name, _)| names.contains(name))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        let coords = self
            .coords
            .iter()
            .filter(|(_, c)| {
                c.dims
                    .iter()
                    .all(|d| data_vars.values().any(|v| v.dims.contains(d)))
            })
            .map(|(n, c)| (n.clone(), c.clone()))
            .collect();
        Self {
            data_vars,
            coords,
            attrs: self.attrs.clone(),
        }
    }
}
