//! Writes post-processed tables into the store.
//!
//! Groups are created lazily and stamped with the release version and an
//! empty footer. Datasets are write-once: a name that already exists is
//! left alone, values and attributes included. Group attributes are the
//! only thing a later write may change.

use tracing::debug;

use super::{Data, Dataset, Group, GroupPath, Store};
use crate::constants::{attributes, columns, footer_block};
use crate::error::{Error, Result};
use crate::models::{Ion, SourceDescriptor};
use crate::table::{ColumnValues, Table, TableError};

/// How a table's rows and columns map onto groups and datasets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `<el>/<ion>/<category>`, one dataset per column named after the column
    IonColumns,
    /// Per row, `<el>/<category>` gets a scalar named after the source stem
    ElementScalar { value_column: String },
    /// Per row, `<el>/<el>_<stage>/<category>` gets a scalar named after the source stem
    IonScalar { value_column: String },
    /// Per row, `<el>/<el>_<stage>/<category>/<stem>` gets one array per listed column
    IonSeries { columns: Vec<String> },
}

/// What one write changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub groups_created: usize,
    pub datasets_written: usize,
    pub datasets_skipped: usize,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.groups_created += other.groups_created;
        self.datasets_written += other.datasets_written;
        self.datasets_skipped += other.datasets_skipped;
    }

    /// True when the write left the store as it was, apart from group stamps
    pub fn is_noop(&self) -> bool {
        self.groups_created == 0 && self.datasets_written == 0
    }

    fn record(&mut self, written: bool) {
        if written {
            self.datasets_written += 1;
        } else {
            self.datasets_skipped += 1;
        }
    }
}

/// Persist `table`, read from `source`, into `store`.
///
/// Nothing is flushed here; the caller decides when writes reach the disk.
pub fn write_table(store: &mut Store, table: &Table, source: &SourceDescriptor, layout: &Layout) -> Result<WriteSummary> {
    let writer = TableWriter {
        store,
        table,
        source,
    };
    let summary = match layout {
        Layout::IonColumns => writer.ion_columns(),
        Layout::ElementScalar { value_column } => writer.element_scalar(value_column),
        Layout::IonScalar { value_column } => writer.ion_scalar(value_column),
        Layout::IonSeries { columns } => writer.ion_series(columns),
    }?;
    debug!(
        "Wrote {}: {} groups created, {} datasets written, {} skipped",
        source, summary.groups_created, summary.datasets_written, summary.datasets_skipped
    );
    Ok(summary)
}

struct TableWriter<'a> {
    store: &'a mut Store,
    table: &'a Table,
    source: &'a SourceDescriptor,
}

impl TableWriter<'_> {
    fn values(&self, name: &str) -> Result<ColumnValues> {
        self.table
            .column_values(name)
            .map_err(|e| Error::from_table(self.source.id(), e))
    }

    fn mismatch(&self, column: &str, row: Option<usize>, reason: impl Into<String>) -> Error {
        Error::from_table(self.source.id(), TableError::cast(column, row, reason))
    }

    fn integers(&self, name: &str) -> Result<Vec<i64>> {
        match self.values(name)? {
            ColumnValues::Integer(v) => Ok(v),
            _ => Err(self.mismatch(name, None, "expected an integer column")),
        }
    }

    fn reals(&self, name: &str) -> Result<Vec<f64>> {
        match self.values(name)? {
            ColumnValues::Real(v) => Ok(v),
            _ => Err(self.mismatch(name, None, "expected a real column")),
        }
    }

    fn real_arrays(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        match self.values(name)? {
            ColumnValues::RealArray(v) => Ok(v),
            _ => Err(self.mismatch(name, None, "expected a real-array column")),
        }
    }

    /// Ion of every row, from the atomic number and ion columns
    fn row_ions(&self) -> Result<Vec<Ion>> {
        let atomic_numbers = self.integers(columns::ATOMIC_NUMBER)?;
        let stages = self.integers(columns::ION)?;
        atomic_numbers
            .iter()
            .zip(&stages)
            .enumerate()
            .map(|(row, (&z, &stage))| {
                let stage = u32::try_from(stage)
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or_else(|| {
                        self.mismatch(columns::ION, Some(row), format!("invalid ionization stage {stage}"))
                    })?;
                Ion::from_atomic_number(z, stage).ok_or_else(|| {
                    self.mismatch(
                        columns::ATOMIC_NUMBER,
                        Some(row),
                        format!("no element has atomic number {z}"),
                    )
                })
            })
            .collect()
    }

    /// Resolve a group, stamping version and empty footer on creation
    fn group(&mut self, path: &GroupPath, summary: &mut WriteSummary) -> Result<(Group, bool)> {
        let (group, created) = self.store.ensure_group(path)?;
        if created {
            group.set_attr(attributes::VERSION, self.table.version())?;
            group.set_attr(attributes::FOOTER, "")?;
            summary.groups_created += 1;
            debug!("Created group {}", path);
        }
        Ok((group, created))
    }

    /// Stamp `element` and `ion` on the ion's own group
    fn stamp_ion(&mut self, ion: &Ion) -> Result<()> {
        let (group, _) = self.store.ensure_group(&GroupPath::for_ion(ion)?)?;
        group.set_attr(attributes::ELEMENT, &ion.element)?;
        group.set_attr(attributes::ION, &ion.name())?;
        Ok(())
    }

    fn ion_columns(mut self) -> Result<WriteSummary> {
        let ion = self
            .source
            .ion()
            .cloned()
            .ok_or_else(|| Error::Configuration {
                message: format!("{} is not an ion source; column layout needs one", self.source),
            })?;
        let mut summary = WriteSummary::default();
        let path = GroupPath::for_ion_category(&ion, self.source.category())?;

        let mut datasets = Vec::with_capacity(self.table.schema().len());
        for spec in self.table.schema().columns() {
            let values = self.values(&spec.name)?;
            let dataset = Dataset::new(Data::from(&values)).with_unit(spec.unit.as_ref());
            datasets.push((spec.name.clone(), dataset));
        }

        let footer = self.table.footer().to_string();
        let (group, created) = self.group(&path, &mut summary)?;
        if created {
            group.set_attr(attributes::FOOTER, &footer)?;
        }
        for (name, dataset) in &datasets {
            summary.record(group.insert_dataset(name, dataset)?);
        }
        self.stamp_ion(&ion)?;
        Ok(summary)
    }

    /// One scalar per row into a shared group, with a labeled footer block per new dataset
    fn fan_out_scalars(&mut self, paths: Vec<GroupPath>, value_column: &str) -> Result<WriteSummary> {
        let values = self.reals(value_column)?;
        let unit = self.table.unit(value_column).cloned();
        let stem = self.source.stem().to_string();
        let block = footer_block(&stem, self.table.footer());

        let mut summary = WriteSummary::default();
        for (path, value) in paths.iter().zip(values) {
            let dataset = Dataset::scalar(value).with_unit(unit.as_ref());
            let (group, _) = self.group(path, &mut summary)?;
            let written = group.insert_dataset(&stem, &dataset)?;
            if written {
                group.append_attr(attributes::FOOTER, &block)?;
            }
            summary.record(written);
        }
        Ok(summary)
    }

    fn element_scalar(mut self, value_column: &str) -> Result<WriteSummary> {
        let symbols = match self.values(columns::ELEMENT)? {
            ColumnValues::Text(v) => v,
            _ => return Err(self.mismatch(columns::ELEMENT, None, "expected a text column")),
        };
        let category = self.source.category().to_string();
        let paths = symbols
            .iter()
            .enumerate()
            .map(|(row, symbol)| {
                let element = symbol.trim().to_lowercase();
                if element.is_empty() {
                    return Err(self.mismatch(columns::ELEMENT, Some(row), "blank element symbol"));
                }
                GroupPath::for_element(&element, &category)
            })
            .collect::<Result<Vec<_>>>()?;
        self.fan_out_scalars(paths, value_column)
    }

    fn ion_scalar(mut self, value_column: &str) -> Result<WriteSummary> {
        let ions = self.row_ions()?;
        let category = self.source.category().to_string();
        let paths = ions
            .iter()
            .map(|ion| GroupPath::for_ion_category(ion, &category))
            .collect::<Result<Vec<_>>>()?;
        let summary = self.fan_out_scalars(paths, value_column)?;
        for ion in &ions {
            self.stamp_ion(ion)?;
        }
        Ok(summary)
    }

    fn ion_series(mut self, series_columns: &[String]) -> Result<WriteSummary> {
        let ions = self.row_ions()?;
        let mut series = Vec::with_capacity(series_columns.len());
        for name in series_columns {
            let unit = self.table.unit(name).cloned();
            series.push((name.as_str(), unit, self.real_arrays(name)?));
        }
        let category = self.source.category().to_string();
        let stem = self.source.stem().to_string();
        let footer = self.table.footer().to_string();

        let mut summary = WriteSummary::default();
        for (row, ion) in ions.iter().enumerate() {
            let category_path = GroupPath::for_ion_category(ion, &category)?;
            self.group(&category_path, &mut summary)?;
            let (group, created) = self.group(&category_path.join(&stem)?, &mut summary)?;
            if created {
                group.set_attr(attributes::FOOTER, &footer)?;
                for (name, unit, values) in &series {
                    let dataset = Dataset::new(Data::Float64(values[row].clone())).with_unit(unit.as_ref());
                    summary.record(group.insert_dataset(name, &dataset)?);
                }
            } else {
                summary.datasets_skipped += series.len();
            }
            self.stamp_ion(ion)?;
        }
        Ok(summary)
    }
}
