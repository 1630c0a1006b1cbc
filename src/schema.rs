//! Column schemas, physical units and category specifications.
//!
//! A category bundles everything needed to ingest one kind of source file:
//! how its lines are decoded, what columns they produce, and how the
//! resulting table is laid out in the store.

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::columns;
use crate::decoder::{Decoder, FixedWidth, GridDecoder};
use crate::error::{Error, Result};
use crate::store::Layout;

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Variable-length sequence of reals per row
    RealArray,
}

impl ColumnType {
    /// Polars dtype of a column of this type
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Integer => DataType::Int64,
            ColumnType::Real => DataType::Float64,
            ColumnType::Text => DataType::String,
            ColumnType::RealArray => DataType::List(Box::new(DataType::Float64)),
        }
    }
}

/// Physical unit attached to a column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Dimensionless,
    Kelvin,
    InverseCentimeter,
    Other(String),
}

impl Unit {
    /// String form written to the store's `unit` attribute
    pub fn canonical(&self) -> &str {
        match self {
            Unit::Dimensionless => "",
            Unit::Kelvin => "K",
            Unit::InverseCentimeter => "1 / cm",
            Unit::Other(s) => s,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Dimensionless => f.write_str("dimensionless"),
            other => f.write_str(other.canonical()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub unit: Option<Unit>,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            unit: None,
            column_type,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }
}

/// Ordered column declarations of a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Configuration {
                message: "column schema must declare at least one column".to_string(),
            });
        }
        for (i, column) in columns.iter().enumerate() {
            if column.name.is_empty() || column.name.contains('/') {
                return Err(Error::Configuration {
                    message: format!("invalid column name '{}'", column.name),
                });
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Configuration {
                    message: format!("duplicate column name '{}'", column.name),
                });
            }
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Everything needed to ingest one category of source files
#[derive(Debug, Clone)]
pub struct CategorySpec {
    pub tag: String,
    pub schema: ColumnSchema,
    pub decoder: Decoder,
    pub layout: Layout,
}

impl CategorySpec {
    pub fn new(tag: impl Into<String>, schema: ColumnSchema, decoder: Decoder, layout: Layout) -> Self {
        Self {
            tag: tag.into(),
            schema,
            decoder,
            layout,
        }
    }
}

/// Built-in CHIANTI categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Elemental abundance sets, one file per set
    Abundance,
    /// Ionization equilibria on a temperature grid
    Ioneq,
    /// Ionization potentials
    Ip,
    /// Energy levels of a single ion
    Elvlc,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Abundance,
        Category::Ioneq,
        Category::Ip,
        Category::Elvlc,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Category::Abundance => "abundance",
            Category::Ioneq => "ioneq",
            Category::Ip => "ip",
            Category::Elvlc => "elvlc",
        }
    }

    /// File extension of sources in this category
    pub fn extension(&self) -> &'static str {
        match self {
            Category::Abundance => "abund",
            other => other.tag(),
        }
    }

    /// Per-ion categories live under `<element>/<ion>/` in the database
    pub fn is_per_ion(&self) -> bool {
        matches!(self, Category::Elvlc)
    }

    pub fn spec(&self) -> CategorySpec {
        let schema = ColumnSchema {
            columns: self.columns(),
        };
        CategorySpec::new(self.tag(), schema, self.decoder(), self.layout())
    }

    fn columns(&self) -> Vec<ColumnSpec> {
        use ColumnType::*;
        match self {
            Category::Abundance => vec![
                ColumnSpec::new(columns::ATOMIC_NUMBER, Integer),
                ColumnSpec::new(columns::ABUNDANCE, Real).with_unit(Unit::Dimensionless),
                ColumnSpec::new(columns::ELEMENT, Text),
            ],
            Category::Ioneq => vec![
                ColumnSpec::new(columns::ATOMIC_NUMBER, Integer),
                ColumnSpec::new(columns::ION, Integer),
                ColumnSpec::new(columns::TEMPERATURE, RealArray).with_unit(Unit::Kelvin),
                ColumnSpec::new(columns::IONIZATION_FRACTION, RealArray)
                    .with_unit(Unit::Dimensionless),
            ],
            Category::Ip => vec![
                ColumnSpec::new(columns::ATOMIC_NUMBER, Integer),
                ColumnSpec::new(columns::ION, Integer),
                ColumnSpec::new(columns::IONIZATION_POTENTIAL, Real)
                    .with_unit(Unit::InverseCentimeter),
            ],
            Category::Elvlc => vec![
                ColumnSpec::new("level index", Integer),
                ColumnSpec::new("configuration", Text),
                ColumnSpec::new("level label", Text),
                ColumnSpec::new("multiplicity", Integer),
                ColumnSpec::new("L label", Text),
                ColumnSpec::new("J", Real),
                ColumnSpec::new("E obs", Real).with_unit(Unit::InverseCentimeter),
                ColumnSpec::new("E th", Real).with_unit(Unit::InverseCentimeter),
            ],
        }
    }

    fn decoder(&self) -> Decoder {
        match self {
            // I3,F7.3,A5: the symbol field is blank in some sets
            Category::Abundance => Decoder::FixedWidth(FixedWidth::new([3, 7, 5])),
            Category::Ioneq => Decoder::Grid(GridDecoder::whitespace(2)),
            Category::Ip => Decoder::Whitespace,
            // I7,A30,A5,I5,A5,F5.1,F15.3,F15.3
            Category::Elvlc => {
                Decoder::FixedWidth(FixedWidth::new([7, 30, 5, 5, 5, 5, 15, 15]))
            }
        }
    }

    fn layout(&self) -> Layout {
        match self {
            Category::Abundance => Layout::ElementScalar {
                value_column: columns::ABUNDANCE.to_string(),
            },
            Category::Ioneq => Layout::IonSeries {
                columns: vec![
                    columns::TEMPERATURE.to_string(),
                    columns::IONIZATION_FRACTION.to_string(),
                ],
            },
            Category::Ip => Layout::IonScalar {
                value_column: columns::IONIZATION_POTENTIAL.to_string(),
            },
            Category::Elvlc => Layout::IonColumns,
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.tag() == s || c.extension() == s)
            .ok_or_else(|| Error::Configuration {
                message: format!(
                    "unknown category '{s}', expected one of: abundance, ioneq, ip, elvlc"
                ),
            })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
