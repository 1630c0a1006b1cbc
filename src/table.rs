//! Typed tables built from decoded rows.
//!
//! A [`Table`] is a polars `DataFrame` plus the column schema it was built
//! against (which carries the units) and table-level metadata: the source
//! footer, the data release version and provenance tags.

use polars::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::decoder::{DecodedSource, Token, parse_real};
use crate::schema::{ColumnSchema, ColumnSpec, ColumnType, Unit};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("line {line}: declared row width {expected} but decoded {found} fields")]
    RowWidth {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("column '{column}': {reason}")]
    Cast {
        column: String,
        row: Option<usize>,
        reason: String,
    },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl TableError {
    pub fn cast(column: impl Into<String>, row: Option<usize>, reason: impl Into<String>) -> Self {
        TableError::Cast {
            column: column.into(),
            row,
            reason: reason.into(),
        }
    }
}

/// Values of one column, outside of polars
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Text(Vec<String>),
    RealArray(Vec<Vec<f64>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Real(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
            ColumnValues::RealArray(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValues::Integer(_) => ColumnType::Integer,
            ColumnValues::Real(_) => ColumnType::Real,
            ColumnValues::Text(_) => ColumnType::Text,
            ColumnValues::RealArray(_) => ColumnType::RealArray,
        }
    }

    fn to_column(&self, name: &str) -> Column {
        let series = match self {
            ColumnValues::Integer(v) => Series::new(name.into(), v.as_slice()),
            ColumnValues::Real(v) => Series::new(name.into(), v.as_slice()),
            ColumnValues::Text(v) => Series::new(name.into(), v.as_slice()),
            ColumnValues::RealArray(rows) if rows.is_empty() => {
                Series::new_empty(name.into(), &DataType::List(Box::new(DataType::Float64)))
            }
            ColumnValues::RealArray(rows) => {
                let cells: Vec<Series> = rows
                    .iter()
                    .map(|values| Series::new(PlSmallStr::EMPTY, values.as_slice()))
                    .collect();
                Series::new(name.into(), cells)
            }
        };
        Column::from(series)
    }
}

/// Table-level metadata carried into the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMeta {
    pub footer: String,
    pub version: String,
    pub provenance: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
    schema: ColumnSchema,
    meta: TableMeta,
}

impl Table {
    /// Assemble a table from already typed columns, one per schema entry
    pub fn from_columns(schema: ColumnSchema, columns: Vec<ColumnValues>, meta: TableMeta) -> Result<Self, TableError> {
        if columns.len() != schema.len() {
            return Err(TableError::cast(
                schema.names().collect::<Vec<_>>().join(", "),
                None,
                format!("schema declares {} columns, got {}", schema.len(), columns.len()),
            ));
        }
        let height = columns.first().map(ColumnValues::len).unwrap_or(0);
        let mut frame_columns = Vec::with_capacity(columns.len());
        for (spec, values) in schema.columns().iter().zip(&columns) {
            check_column(spec, values, height)?;
            frame_columns.push(values.to_column(&spec.name));
        }
        let frame = DataFrame::new(frame_columns)?;
        Ok(Self {
            frame,
            schema,
            meta,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    pub fn footer(&self) -> &str {
        &self.meta.footer
    }

    pub fn version(&self) -> &str {
        &self.meta.version
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.schema.column(name).and_then(|c| c.unit.as_ref())
    }

    fn spec(&self, name: &str) -> Result<&ColumnSpec, TableError> {
        self.schema
            .column(name)
            .ok_or_else(|| TableError::cast(name, None, "no such column"))
    }

    /// Copy one column back out of the frame
    pub fn column_values(&self, name: &str) -> Result<ColumnValues, TableError> {
        let spec = self.spec(name)?;
        let series = self.frame.column(name)?.as_materialized_series();
        let values = match spec.column_type {
            ColumnType::Integer => ColumnValues::Integer(series.i64()?.into_no_null_iter().collect()),
            ColumnType::Real => ColumnValues::Real(series.f64()?.into_no_null_iter().collect()),
            ColumnType::Text => ColumnValues::Text(
                series
                    .str()?
                    .into_no_null_iter()
                    .map(str::to_string)
                    .collect(),
            ),
            ColumnType::RealArray => {
                let list = series.list()?;
                let mut rows = Vec::with_capacity(list.len());
                for cell in list.into_iter() {
                    let values = match cell {
                        Some(cell) => cell.f64()?.into_no_null_iter().collect(),
                        None => Vec::new(),
                    };
                    rows.push(values);
                }
                ColumnValues::RealArray(rows)
            }
        };
        Ok(values)
    }

    /// Swap in new values for a column, keeping its declared type and unit
    pub fn replace_column(&mut self, name: &str, values: ColumnValues) -> Result<(), TableError> {
        let spec = self.spec(name)?;
        check_column(spec, &values, self.height())?;
        let column = values.to_column(name);
        self.frame.with_column(column)?;
        Ok(())
    }
}

impl Table {
    /// Run a lazy query over the frame.
    ///
    /// The result must keep the row count and every schema column with its
    /// declared dtype; otherwise the table is left as it was.
    pub fn apply_lazy<F>(&mut self, query: F) -> Result<(), TableError>
    where
        F: FnOnce(LazyFrame) -> LazyFrame,
    {
        let frame = query(self.frame.clone().lazy()).collect()?;
        if frame.height() != self.height() {
            return Err(TableError::cast(
                self.schema.names().collect::<Vec<_>>().join(", "),
                None,
                format!("query changed the row count from {} to {}", self.height(), frame.height()),
            ));
        }
        for spec in self.schema.columns() {
            let dtype = frame.column(&spec.name)?.dtype();
            if *dtype != spec.column_type.dtype() {
                return Err(TableError::cast(
                    &spec.name,
                    None,
                    format!("query produced {dtype} for a {:?} column", spec.column_type),
                ));
            }
        }
        self.frame = frame.select(self.schema.names())?;
        Ok(())
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
            && self.meta == other.meta
            && self.frame.equals_missing(&other.frame)
    }
}

fn check_column(spec: &ColumnSpec, values: &ColumnValues, height: usize) -> Result<(), TableError> {
    if values.column_type() != spec.column_type {
        return Err(TableError::cast(
            &spec.name,
            None,
            format!(
                "declared {:?} but values are {:?}",
                spec.column_type,
                values.column_type()
            ),
        ));
    }
    if values.len() != height {
        return Err(TableError::cast(
            &spec.name,
            None,
            format!("column has {} rows, table has {}", values.len(), height),
        ));
    }
    Ok(())
}

/// Cast decoded rows into a typed table.
///
/// Shared tokens are spliced into every row first; any cast failure aborts
/// the whole build.
pub fn build_table(decoded: DecodedSource, schema: &ColumnSchema, version: &str) -> Result<Table, TableError> {
    let DecodedSource {
        rows,
        footer,
        mut shared,
    } = decoded;
    shared.sort_by_key(|(position, _)| *position);

    let mut cells: Vec<Vec<Token>> = (0..schema.len())
        .map(|_| Vec::with_capacity(rows.len()))
        .collect();

    for row in rows {
        let mut tokens = row.tokens;
        for (position, token) in &shared {
            tokens.insert((*position).min(tokens.len()), token.clone());
        }
        if tokens.len() != schema.len() {
            return Err(TableError::RowWidth {
                line: row.line,
                expected: schema.len(),
                found: tokens.len(),
            });
        }
        for (column, token) in cells.iter_mut().zip(tokens) {
            column.push(token);
        }
    }

    let columns = schema
        .columns()
        .iter()
        .zip(cells)
        .map(|(spec, tokens)| cast_column(spec, tokens))
        .collect::<Result<Vec<_>, _>>()?;

    let meta = TableMeta {
        footer,
        version: version.to_string(),
        provenance: BTreeMap::new(),
    };
    let table = Table::from_columns(schema.clone(), columns, meta)?;
    debug!(
        "Built table with {} rows and {} columns",
        table.height(),
        schema.len()
    );
    Ok(table)
}

fn cast_column(spec: &ColumnSpec, tokens: Vec<Token>) -> Result<ColumnValues, TableError> {
    let name = spec.name.as_str();
    let scalar = |row: usize, token: Token| match token {
        Token::Text(text) => Ok(text),
        Token::Reals(_) => Err(TableError::cast(
            name,
            Some(row),
            "expected a scalar field, found an array",
        )),
    };

    let values = match spec.column_type {
        ColumnType::Integer => ColumnValues::Integer(
            tokens
                .into_iter()
                .enumerate()
                .map(|(row, token)| {
                    let text = scalar(row, token)?;
                    text.trim().parse::<i64>().map_err(|e| {
                        TableError::cast(name, Some(row), format!("'{text}' is not an integer: {e}"))
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        ColumnType::Real => ColumnValues::Real(
            tokens
                .into_iter()
                .enumerate()
                .map(|(row, token)| {
                    let text = scalar(row, token)?;
                    parse_real(&text).ok_or_else(|| {
                        TableError::cast(name, Some(row), format!("'{text}' is not a real number"))
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        ColumnType::Text => ColumnValues::Text(
            tokens
                .into_iter()
                .enumerate()
                .map(|(row, token)| scalar(row, token).map(|t| t.trim().to_string()))
                .collect::<Result<_, _>>()?,
        ),
        ColumnType::RealArray => ColumnValues::RealArray(
            tokens
                .into_iter()
                .enumerate()
                .map(|(row, token)| match token {
                    Token::Reals(values) => Ok(values),
                    Token::Text(text) => Err(TableError::cast(
                        name,
                        Some(row),
                        format!("expected an array field, found '{text}'"),
                    )),
                })
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Decoder, GridDecoder, decode_source};
    use crate::schema::{Category, ColumnSpec};

    fn abundance_schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnSpec::new("atomic number", ColumnType::Integer),
            ColumnSpec::new("abundance relative to H", ColumnType::Real)
                .with_unit(Unit::Dimensionless),
            ColumnSpec::new("element", ColumnType::Text),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_whitespace_table() {
        let decoded = decode_source("1  7.300  h\n-1\ncomment\n".as_bytes(), &Decoder::Whitespace).unwrap();
        let table = build_table(decoded, &abundance_schema(), "9.0").unwrap();

        assert_eq!(table.height(), 1);
        assert_eq!(
            table.column_values("atomic number").unwrap(),
            ColumnValues::Integer(vec![1])
        );
        assert_eq!(
            table.column_values("abundance relative to H").unwrap(),
            ColumnValues::Real(vec![7.3])
        );
        assert_eq!(
            table.column_values("element").unwrap(),
            ColumnValues::Text(vec!["h".to_string()])
        );
        assert_eq!(table.footer(), "comment\n");
        assert_eq!(table.version(), "9.0");
        assert_eq!(table.unit("abundance relative to H"), Some(&Unit::Dimensionless));
        assert_eq!(table.unit("element"), None);
    }

    #[test]
    fn test_build_grid_table_merges_shared_grid() {
        let input = "3\n4.00  4.50  5.00\n 1  1 1.0e-2 5.0e-1 1.0e-2\n 2  1 2.0e-1 3.0e-1 4.0e-1\n-1\n";
        let spec = Category::Ioneq.spec();
        let decoded = decode_source(input.as_bytes(), &spec.decoder).unwrap();
        let table = build_table(decoded, &spec.schema, "9.0").unwrap();

        assert_eq!(table.height(), 2);
        let grid = vec![10f64.powf(4.0), 10f64.powf(4.5), 10f64.powf(5.0)];
        assert_eq!(
            table.column_values("temperature").unwrap(),
            ColumnValues::RealArray(vec![grid.clone(), grid])
        );
        assert_eq!(
            table.column_values("ionization fraction").unwrap(),
            ColumnValues::RealArray(vec![vec![0.01, 0.5, 0.01], vec![0.2, 0.3, 0.4]])
        );
        assert_eq!(table.unit("temperature"), Some(&Unit::Kelvin));
    }

    #[test]
    fn test_cast_failure_names_column_and_row() {
        let decoded = decode_source("1 7.3 h\nx 8.0 he\n-1\n".as_bytes(), &Decoder::Whitespace).unwrap();
        let err = build_table(decoded, &abundance_schema(), "9.0").unwrap_err();
        match err {
            TableError::Cast { column, row, .. } => {
                assert_eq!(column, "atomic number");
                assert_eq!(row, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_row_width_mismatch() {
        let decoded = decode_source("1 7.3 h\n2 8.0\n-1\n".as_bytes(), &Decoder::Whitespace).unwrap();
        let err = build_table(decoded, &abundance_schema(), "9.0").unwrap_err();
        assert!(matches!(
            err,
            TableError::RowWidth {
                line: 2,
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_shared_tokens_count_toward_row_width() {
        let schema = ColumnSchema::new(vec![
            ColumnSpec::new("z", ColumnType::Integer),
            ColumnSpec::new("ion", ColumnType::Integer),
            ColumnSpec::new("values", ColumnType::RealArray),
        ])
        .unwrap();
        let decoded = decode_source(
            "2\n4.0 5.0\n 1  1 0.1 0.2\n-1\n".as_bytes(),
            &Decoder::Grid(GridDecoder::whitespace(2)),
        )
        .unwrap();
        let err = build_table(decoded, &schema, "9.0").unwrap_err();
        assert!(matches!(err, TableError::RowWidth { found: 4, .. }));
    }

    #[test]
    fn test_array_token_in_scalar_column_is_mismatch() {
        let schema = ColumnSchema::new(vec![
            ColumnSpec::new("z", ColumnType::Integer),
            ColumnSpec::new("ion", ColumnType::Integer),
            ColumnSpec::new("grid", ColumnType::RealArray),
            ColumnSpec::new("values", ColumnType::Real),
        ])
        .unwrap();
        let decoded = decode_source(
            "2\n4.0 5.0\n 1  1 0.1 0.2\n-1\n".as_bytes(),
            &Decoder::Grid(GridDecoder::whitespace(2)),
        )
        .unwrap();
        let err = build_table(decoded, &schema, "9.0").unwrap_err();
        match err {
            TableError::Cast { column, row, .. } => {
                assert_eq!(column, "values");
                assert_eq!(row, Some(0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_data_section() {
        let spec = Category::Ioneq.spec();
        let decoded = decode_source("-1\nonly a footer\n".as_bytes(), &spec.decoder).unwrap();
        let table = build_table(decoded, &spec.schema, "9.0").unwrap();
        assert_eq!(table.height(), 0);
        assert_eq!(
            table.column_values("temperature").unwrap(),
            ColumnValues::RealArray(vec![])
        );
    }

    #[test]
    fn test_replace_column_checks_type_and_length() {
        let decoded = decode_source("1 7.3 h\n-1\n".as_bytes(), &Decoder::Whitespace).unwrap();
        let mut table = build_table(decoded, &abundance_schema(), "9.0").unwrap();

        table
            .replace_column("abundance relative to H", ColumnValues::Real(vec![1.0]))
            .unwrap();
        assert_eq!(
            table.column_values("abundance relative to H").unwrap(),
            ColumnValues::Real(vec![1.0])
        );

        assert!(table
            .replace_column("abundance relative to H", ColumnValues::Real(vec![1.0, 2.0]))
            .is_err());
        assert!(table
            .replace_column("element", ColumnValues::Integer(vec![1]))
            .is_err());
        assert!(table.replace_column("missing", ColumnValues::Real(vec![1.0])).is_err());
    }

    #[test]
    fn test_apply_lazy_keeps_schema() {
        let decoded = decode_source("1 7.3 h\n2 6.3 he\n-1\n".as_bytes(), &Decoder::Whitespace).unwrap();
        let mut table = build_table(decoded, &abundance_schema(), "9.0").unwrap();

        table
            .apply_lazy(|frame| frame.with_column(col("abundance relative to H") * lit(2.0)))
            .unwrap();
        assert_eq!(
            table.column_values("abundance relative to H").unwrap(),
            ColumnValues::Real(vec![14.6, 12.6])
        );

        let before = table.clone();
        assert!(table
            .apply_lazy(|frame| frame.with_column(col("element").cast(DataType::Int64)))
            .is_err());
        assert!(table
            .apply_lazy(|frame| frame.filter(col("atomic number").eq(lit(1i64))))
            .is_err());
        assert_eq!(table, before);
    }

    #[test]
    fn test_ragged_rows_keep_their_lengths() {
        let schema = ColumnSchema::new(vec![
            ColumnSpec::new("id", ColumnType::Integer),
            ColumnSpec::new("samples", ColumnType::RealArray),
        ])
        .unwrap();
        let ragged = vec![vec![1.0], vec![], vec![2.0, 3.0, 4.0]];
        let table = Table::from_columns(
            schema,
            vec![
                ColumnValues::Integer(vec![1, 2, 3]),
                ColumnValues::RealArray(ragged.clone()),
            ],
            TableMeta::default(),
        )
        .unwrap();
        assert_eq!(
            table.column_values("samples").unwrap(),
            ColumnValues::RealArray(ragged)
        );
    }
}
