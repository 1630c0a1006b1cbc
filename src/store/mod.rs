//! Hierarchical dataset store backed by an HDF5 file.
//!
//! Groups hold string attributes, child groups and datasets; datasets hold
//! one typed array (or scalar) plus their own string attributes. Attribute
//! and dataset types are the ones h5py writes for the same data, so any HDF5
//! reader can open the store. Writes go straight to the file; [`Store::flush`]
//! pushes them to disk.

pub mod path;
pub mod writer;

pub use path::GroupPath;
pub use writer::{Layout, WriteSummary, write_table};

use hdf5::types::{FixedAscii, TypeDescriptor, VarLenArray, VarLenAscii, VarLenUnicode};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::constants::attributes;
use crate::error::{Error, Result};
use crate::schema::Unit;
use crate::table::ColumnValues;

/// Shape of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataspace {
    Scalar,
    Simple(usize),
}

/// Typed payload of a dataset
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    /// Fixed-width ASCII, sized to the longest value
    FixedAscii(Vec<String>),
    /// One variable-length sequence per element
    VarLenFloat64(Vec<Vec<f64>>),
}

impl Data {
    pub fn len(&self) -> usize {
        match self {
            Data::Int64(v) => v.len(),
            Data::Float64(v) => v.len(),
            Data::FixedAscii(v) => v.len(),
            Data::VarLenFloat64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte width of a fixed-width text payload, at least one
    pub fn text_width(&self) -> Option<usize> {
        match self {
            Data::FixedAscii(v) => Some(v.iter().map(String::len).max().unwrap_or(0).max(1)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Data::Int64(_) => "int64",
            Data::Float64(_) => "float64",
            Data::FixedAscii(_) => "ascii",
            Data::VarLenFloat64(_) => "vlen<float64>",
        }
    }
}

impl From<&ColumnValues> for Data {
    fn from(values: &ColumnValues) -> Self {
        match values {
            ColumnValues::Integer(v) => Data::Int64(v.clone()),
            ColumnValues::Real(v) => Data::Float64(v.clone()),
            ColumnValues::Text(v) => Data::FixedAscii(v.clone()),
            ColumnValues::RealArray(v) => Data::VarLenFloat64(v.clone()),
        }
    }
}

/// In-memory width text goes through on its way to and from the file
const TEXT_BUFFER: usize = 256;
type TextBuffer = FixedAscii<TEXT_BUFFER>;

/// String attributes of a group or dataset
pub type Attributes = BTreeMap<String, String>;

/// A dataset's values and attributes, detached from the file
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dataspace: Dataspace,
    data: Data,
    attrs: Attributes,
}

impl Dataset {
    pub fn new(data: Data) -> Self {
        Self {
            dataspace: Dataspace::Simple(data.len()),
            data,
            attrs: Attributes::new(),
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            dataspace: Dataspace::Scalar,
            data: Data::Float64(vec![value]),
            attrs: Attributes::new(),
        }
    }

    /// Rebuild a dataset read from disk; the payload must match the dataspace
    fn from_parts(dataspace: Dataspace, data: Data, attrs: Attributes) -> std::result::Result<Self, String> {
        let expected = match dataspace {
            Dataspace::Scalar => 1,
            Dataspace::Simple(len) => len,
        };
        if data.len() != expected {
            return Err(format!(
                "dataspace holds {expected} elements but payload has {}",
                data.len()
            ));
        }
        Ok(Self {
            dataspace,
            data,
            attrs,
        })
    }

    /// Attach the unit attribute, or the no-unit sentinel
    pub fn with_unit(mut self, unit: Option<&Unit>) -> Self {
        let value = unit.map(Unit::canonical).unwrap_or(attributes::NO_UNIT);
        self.attrs
            .insert(attributes::UNIT.to_string(), value.to_string());
        self
    }

    pub fn dataspace(&self) -> Dataspace {
        self.dataspace
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn unit(&self) -> Option<&str> {
        self.attr(attributes::UNIT)
    }

    /// Value of a scalar dataset
    pub fn as_scalar(&self) -> Option<f64> {
        match (&self.dataspace, &self.data) {
            (Dataspace::Scalar, Data::Float64(v)) => v.first().copied(),
            _ => None,
        }
    }

    /// Decode the payload back into column values
    pub fn values(&self) -> ColumnValues {
        match &self.data {
            Data::Int64(v) => ColumnValues::Integer(v.clone()),
            Data::Float64(v) => ColumnValues::Real(v.clone()),
            Data::FixedAscii(v) => ColumnValues::Text(v.clone()),
            Data::VarLenFloat64(v) => ColumnValues::RealArray(v.clone()),
        }
    }
}

/// Attributes and datasets of one group, read into memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupContents {
    pub attrs: Attributes,
    pub datasets: BTreeMap<String, Dataset>,
}

impl GroupContents {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }
}

/// Handle to a group in an open store
#[derive(Debug, Clone)]
pub struct Group {
    inner: hdf5::Group,
}

impl Group {
    /// Full HDF5 path of the group, e.g. `/fe/fe_12`
    pub fn path(&self) -> String {
        self.inner.name()
    }

    pub fn attrs(&self) -> Result<Attributes> {
        read_attrs(&self.inner)
    }

    pub fn attr(&self, name: &str) -> Result<Option<String>> {
        if !has_attr(&self.inner, name)? {
            return Ok(None);
        }
        read_attr(&self.inner, name).map(Some)
    }

    /// Set a string attribute; an unchanged value is not rewritten
    pub fn set_attr(&self, name: &str, value: &str) -> Result<()> {
        if self.attr(name)?.as_deref() == Some(value) {
            return Ok(());
        }
        write_attr(&self.inner, name, value)
    }

    /// Append to a text attribute, creating it when absent
    pub fn append_attr(&self, name: &str, text: &str) -> Result<()> {
        let mut value = self.attr(name)?.unwrap_or_default();
        value.push_str(text);
        write_attr(&self.inner, name, &value)
    }

    /// Whether a child group or dataset uses this name
    pub fn contains(&self, name: &str) -> bool {
        self.inner.link_exists(name)
    }

    pub fn group(&self, name: &str) -> Result<Option<Group>> {
        if !self.contains(name) {
            return Ok(None);
        }
        Ok(self.inner.group(name).ok().map(|inner| Group { inner }))
    }

    /// Child groups, sorted by name
    pub fn groups(&self) -> Result<Vec<(String, Group)>> {
        let mut groups: Vec<(String, Group)> = self
            .inner
            .groups()?
            .into_iter()
            .map(|inner| (leaf_name(&inner.name()), Group { inner }))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(groups)
    }

    pub fn dataset(&self, name: &str) -> Result<Option<Dataset>> {
        if !self.contains(name) {
            return Ok(None);
        }
        match self.inner.dataset(name) {
            Ok(dataset) => read_dataset(&dataset).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Every dataset of the group, read into memory
    pub fn datasets(&self) -> Result<BTreeMap<String, Dataset>> {
        self.inner
            .datasets()?
            .iter()
            .map(|dataset| Ok((leaf_name(&dataset.name()), read_dataset(dataset)?)))
            .collect()
    }

    pub fn read(&self) -> Result<GroupContents> {
        Ok(GroupContents {
            attrs: self.attrs()?,
            datasets: self.datasets()?,
        })
    }

    /// Write a dataset unless the name is taken.
    ///
    /// Returns `false` without touching anything when a dataset of that name
    /// already exists; a child group of that name is a layout conflict.
    pub fn insert_dataset(&self, name: &str, dataset: &Dataset) -> Result<bool> {
        if self.contains(name) {
            if self.inner.dataset(name).is_err() {
                return Err(Error::store_layout(
                    self.child_path(name),
                    "a group already uses this name",
                ));
            }
            return Ok(false);
        }
        write_dataset(&self.inner, name, dataset)?;
        Ok(true)
    }

    /// Get or create a child group; the flag reports whether it was created
    pub fn child_group(&self, name: &str) -> Result<(Group, bool)> {
        if !self.contains(name) {
            let inner = self.inner.create_group(name)?;
            return Ok((Group { inner }, true));
        }
        match self.inner.group(name) {
            Ok(inner) => Ok((Group { inner }, false)),
            Err(_) => Err(Error::store_layout(
                self.child_path(name),
                "a dataset already uses this name",
            )),
        }
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}/{}", self.path().trim_end_matches('/'), name)
    }
}

fn leaf_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn has_attr(location: &hdf5::Location, name: &str) -> Result<bool> {
    Ok(location.attr_names()?.iter().any(|n| n == name))
}

fn read_attrs(location: &hdf5::Location) -> Result<Attributes> {
    location
        .attr_names()?
        .into_iter()
        .map(|name| {
            let value = read_attr(location, &name)?;
            Ok((name, value))
        })
        .collect()
}

fn read_attr(location: &hdf5::Location, name: &str) -> Result<String> {
    let attr = location.attr(name)?;
    match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode => Ok(attr.read_scalar::<VarLenUnicode>()?.as_str().to_string()),
        TypeDescriptor::VarLenAscii => Ok(attr.read_scalar::<VarLenAscii>()?.as_str().to_string()),
        other => Err(Error::store_layout(
            location.name(),
            format!("attribute '{name}' holds {other:?} rather than a string"),
        )),
    }
}

fn write_attr(location: &hdf5::Location, name: &str, value: &str) -> Result<()> {
    let value = to_varlen(value).map_err(|reason| {
        Error::store_layout(location.name(), format!("attribute '{name}': {reason}"))
    })?;
    let attr = if has_attr(location, name)? {
        location.attr(name)?
    } else {
        location.new_attr::<VarLenUnicode>().shape(()).create(name)?
    };
    attr.write_scalar(&value)?;
    Ok(())
}

fn to_varlen(text: &str) -> std::result::Result<VarLenUnicode, String> {
    text.parse::<VarLenUnicode>().map_err(|e| e.to_string())
}

fn write_dataset(group: &hdf5::Group, name: &str, dataset: &Dataset) -> Result<()> {
    let layout_error = |reason: String| Error::store_layout(format!("{}/{}", group.name(), name), reason);
    let handle = match (dataset.dataspace(), dataset.data()) {
        (Dataspace::Scalar, Data::Float64(values)) => {
            let value = values
                .first()
                .ok_or_else(|| layout_error("scalar dataset without a value".to_string()))?;
            let handle = group.new_dataset::<f64>().shape(()).create(name)?;
            handle.write_scalar(value)?;
            handle
        }
        (Dataspace::Scalar, data) => {
            return Err(layout_error(format!(
                "scalar {} datasets are not supported",
                data.type_name()
            )));
        }
        (Dataspace::Simple(_), Data::Int64(values)) => group
            .new_dataset_builder()
            .with_data(values.as_slice())
            .create(name)?,
        (Dataspace::Simple(_), Data::Float64(values)) => group
            .new_dataset_builder()
            .with_data(values.as_slice())
            .create(name)?,
        (Dataspace::Simple(len), Data::FixedAscii(values)) => {
            let width = dataset.data().text_width().unwrap_or(1);
            let values = values
                .iter()
                .map(|s| TextBuffer::from_ascii(s.as_bytes()).map_err(|e| format!("text '{s}': {e}")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(layout_error)?;
            let handle = group
                .new_dataset_builder()
                .empty_as(&TypeDescriptor::FixedAscii(width))
                .shape(len)
                .create(name)?;
            if !values.is_empty() {
                handle.write_raw(values.as_slice())?;
            }
            handle
        }
        (Dataspace::Simple(_), Data::VarLenFloat64(rows)) => {
            let rows: Vec<VarLenArray<f64>> = rows
                .iter()
                .map(|row| VarLenArray::from_slice(row))
                .collect();
            group
                .new_dataset_builder()
                .with_data(rows.as_slice())
                .create(name)?
        }
    };
    for (key, value) in dataset.attrs() {
        write_attr(&handle, key, value)?;
    }
    Ok(())
}

fn read_dataset(handle: &hdf5::Dataset) -> Result<Dataset> {
    let layout_error = |reason: String| Error::store_layout(handle.name(), reason);
    let dataspace = match handle.ndim() {
        0 => Dataspace::Scalar,
        1 => Dataspace::Simple(handle.size()),
        n => return Err(layout_error(format!("{n}-dimensional datasets are not supported"))),
    };
    let data = match handle.dtype()?.to_descriptor()? {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => Data::Int64(handle.read_raw::<i64>()?),
        TypeDescriptor::Float(_) => Data::Float64(handle.read_raw::<f64>()?),
        TypeDescriptor::FixedAscii(width) if width <= TEXT_BUFFER => Data::FixedAscii(
            handle
                .read_raw::<TextBuffer>()?
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        ),
        TypeDescriptor::VarLenArray(inner) if matches!(*inner, TypeDescriptor::Float(_)) => Data::VarLenFloat64(
            handle
                .read_raw::<VarLenArray<f64>>()?
                .iter()
                .map(|row| row.as_slice().to_vec())
                .collect(),
        ),
        other => return Err(layout_error(format!("unsupported dataset type {other:?}"))),
    };
    Dataset::from_parts(dataspace, data, read_attrs(handle)?).map_err(layout_error)
}

/// An open store file
#[derive(Debug)]
pub struct Store {
    file: hdf5::File,
    path: PathBuf,
}

impl Store {
    /// Open the store at `path` for writing, creating it (and its directory) if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let existed = path.exists();
        let file = hdf5::File::append(path).map_err(|e| Error::StoreFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if existed {
            info!("Opened store {}", path.display());
        } else {
            info!("Creating new store at {}", path.display());
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store without write access
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = hdf5::File::open(path).map_err(|e| Error::StoreFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> Result<Group> {
        Ok(Group {
            inner: self.file.group("/")?,
        })
    }

    pub fn group(&self, path: &GroupPath) -> Result<Option<Group>> {
        let mut group = self.root()?;
        for segment in path.segments() {
            match group.group(segment)? {
                Some(child) => group = child,
                None => return Ok(None),
            }
        }
        Ok(Some(group))
    }

    pub fn contains_group(&self, path: &GroupPath) -> bool {
        matches!(self.group(path), Ok(Some(_)))
    }

    /// Attributes and datasets of the group at `path`
    pub fn read_group(&self, path: &GroupPath) -> Result<GroupContents> {
        self.group(path)?
            .ok_or_else(|| Error::store_layout(path, "no such group"))?
            .read()
    }

    /// Look up a dataset by group path and name
    pub fn dataset(&self, path: &GroupPath, name: &str) -> Result<Option<Dataset>> {
        match self.group(path)? {
            Some(group) => group.dataset(name),
            None => Ok(None),
        }
    }

    /// Resolve a group, creating it and any missing parents.
    ///
    /// The flag reports whether the final group was created by this call.
    pub fn ensure_group(&mut self, path: &GroupPath) -> Result<(Group, bool)> {
        let mut group = self.root()?;
        let mut created = false;
        for segment in path.segments() {
            let (child, was_created) = group.child_group(segment)?;
            if was_created {
                debug!("Created group {}", path);
            }
            created = was_created;
            group = child;
        }
        Ok((group, created))
    }

    /// Every group below the root, depth first, with its path
    pub fn walk(&self) -> Result<Vec<(GroupPath, Group)>> {
        fn visit(path: &GroupPath, group: &Group, out: &mut Vec<(GroupPath, Group)>) -> Result<()> {
            for (name, child) in group.groups()? {
                let child_path = path.join(&name)?;
                out.push((child_path.clone(), child.clone()));
                visit(&child_path, &child, out)?;
            }
            Ok(())
        }
        let mut out = Vec::new();
        visit(&GroupPath::root(), &self.root()?, &mut out)?;
        Ok(out)
    }

    /// The whole tree read into memory, keyed by group path (root included)
    pub fn contents(&self) -> Result<BTreeMap<GroupPath, GroupContents>> {
        let mut contents = BTreeMap::new();
        contents.insert(GroupPath::root(), self.root()?.read()?);
        for (path, group) in self.walk()? {
            contents.insert(path, group.read()?);
        }
        Ok(contents)
    }

    /// Push pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.file.flush()?;
        debug!("Flushed {}", self.path.display());
        Ok(())
    }
}

/// A store shared between threads.
///
/// Every existence check and the writes that follow it happen under one lock.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.inner.lock().map_err(|_| Error::StoreLock)
    }

    /// Recover the store once no other handle is alive
    pub fn into_inner(self) -> Result<Store> {
        Arc::try_unwrap(self.inner)
            .map_err(|_| Error::Configuration {
                message: "store is still shared".to_string(),
            })?
            .into_inner()
            .map_err(|_| Error::StoreLock)
    }
}
