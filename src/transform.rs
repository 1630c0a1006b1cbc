//! Post-processing applied to built tables before they are written.
//!
//! Every table is stamped with its provenance. A category may additionally
//! register a transform by tag; unregistered categories pass through as-is.
//! Transforms work on the in-memory table only and never touch the disk.

use polars::prelude::{col, lit};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::constants::{columns, element_symbol, meta};
use crate::models::SourceDescriptor;
use crate::table::{ColumnValues, Table, TableError};

/// A named, category-specific rewrite of a table
pub trait Transform: Send + Sync {
    fn apply(&self, table: Table) -> Result<Table, TableError>;
}

impl<F> Transform for F
where
    F: Fn(Table) -> Result<Table, TableError> + Send + Sync,
{
    fn apply(&self, table: Table) -> Result<Table, TableError> {
        self(table)
    }
}

/// Transforms looked up by category tag
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Box<dyn Transform>>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.transforms.keys().collect();
        tags.sort();
        f.debug_struct("TransformRegistry").field("tags", &tags).finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the transforms the built-in categories need
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("abundance", AbundanceTransform);
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, transform: impl Transform + 'static) {
        self.transforms.insert(tag.into(), Box::new(transform));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.transforms.contains_key(tag)
    }

    /// Apply the transform registered for `tag`, or return the table unchanged
    pub fn apply(&self, tag: &str, table: Table) -> Result<Table, TableError> {
        match self.transforms.get(tag) {
            Some(transform) => {
                debug!("Applying '{}' transform", tag);
                transform.apply(table)
            }
            None => Ok(table),
        }
    }
}

/// Record where a table came from in its metadata
pub fn stamp_provenance(table: &mut Table, source: &SourceDescriptor) {
    let provenance = &mut table.meta_mut().provenance;
    if let Some(ion) = source.ion() {
        provenance.insert(meta::ELEMENT.to_string(), ion.element.clone());
        provenance.insert(meta::ION.to_string(), ion.name());
    }
    provenance.insert(meta::SOURCE.to_string(), source.filename().to_string());
    provenance.insert(
        format!("{}_filename", source.category()),
        source.filename().to_string(),
    );
}

/// Stamp provenance, then run the category's registered transform
pub fn postprocess(table: Table, source: &SourceDescriptor, registry: &TransformRegistry) -> Result<Table, TableError> {
    let mut table = table;
    stamp_provenance(&mut table, source);
    registry.apply(source.category(), table)
}

/// Converts log abundances to linear values relative to hydrogen and fills
/// in blank element symbols from the atomic number.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbundanceTransform;

impl Transform for AbundanceTransform {
    fn apply(&self, mut table: Table) -> Result<Table, TableError> {
        if table.height() == 0 {
            return Ok(table);
        }

        let atomic_numbers = match table.column_values(columns::ATOMIC_NUMBER)? {
            ColumnValues::Integer(values) => values,
            _ => {
                return Err(TableError::cast(
                    columns::ATOMIC_NUMBER,
                    None,
                    "atomic numbers must be integers",
                ));
            }
        };

        let abundances = match table.column_values(columns::ABUNDANCE)? {
            ColumnValues::Real(values) => values,
            _ => {
                return Err(TableError::cast(
                    columns::ABUNDANCE,
                    None,
                    "abundances must be reals",
                ));
            }
        };
        let hydrogen = atomic_numbers
            .iter()
            .position(|&z| z == 1)
            .map(|row| abundances[row])
            .ok_or_else(|| {
                TableError::cast(columns::ABUNDANCE, None, "no hydrogen row to scale against")
            })?;
        table.apply_lazy(|frame| {
            frame.with_column(
                lit(10f64)
                    .pow(col(columns::ABUNDANCE) - lit(hydrogen))
                    .alias(columns::ABUNDANCE),
            )
        })?;

        if let ColumnValues::Text(symbols) = table.column_values(columns::ELEMENT)? {
            if symbols.iter().any(String::is_empty) {
                let repaired = symbols
                    .into_iter()
                    .zip(&atomic_numbers)
                    .enumerate()
                    .map(|(row, (symbol, &z))| {
                        if !symbol.is_empty() {
                            return Ok(symbol);
                        }
                        element_symbol(z).map(str::to_string).ok_or_else(|| {
                            TableError::cast(
                                columns::ELEMENT,
                                Some(row),
                                format!("no element has atomic number {z}"),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                debug!("Repaired blank element symbols from atomic numbers");
                table.replace_column(columns::ELEMENT, ColumnValues::Text(repaired))?;
            }
        }

        Ok(table)
    }
}
