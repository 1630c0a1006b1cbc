//! Line decoding for fixed-format CHIANTI source files.
//!
//! Every category picks one decoder variant at configuration time. The
//! variants share a single contract: given one raw line, its running index
//! within the data section and the state derived from earlier lines, produce
//! the tokens of a row (or nothing, for header lines).
//!
//! [`decode_source`] drives a decoder over a whole file, stops at the `-1`
//! terminator and keeps everything after it verbatim as the footer.

use std::io::{BufRead, Read};
use thiserror::Error;
use tracing::{debug, trace};

use crate::constants::TERMINATOR;

/// Decoded field, typed as far as the line format allows
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Reals(Vec<f64>),
}

impl Token {
    pub fn text(s: impl Into<String>) -> Self {
        Token::Text(s.into())
    }
}

/// Tokens of one data line, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based line number in the source file
    pub line: usize,
    pub tokens: Vec<Token>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct DecodeError {
    pub line: Option<usize>,
    pub reason: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            line: None,
            reason: reason.into(),
        }
    }

    fn at_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

/// Parse a real the way Fortran list-directed input does, accepting `D` exponents
pub fn parse_real(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if token.contains(['d', 'D']) {
        token.replace(['d', 'D'], "e").parse().ok()
    } else {
        token.parse().ok()
    }
}

/// Column widths of a fixed-format record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWidth {
    widths: Vec<usize>,
}

impl FixedWidth {
    pub fn new(widths: impl IntoIterator<Item = usize>) -> Self {
        Self {
            widths: widths.into_iter().collect(),
        }
    }

    /// `count` consecutive fields of the same width, like Fortran `6F6.2`
    pub fn repeated(count: usize, width: usize) -> Self {
        Self {
            widths: vec![width; count],
        }
    }

    /// Append the fields of `other` after these
    pub fn then(mut self, other: FixedWidth) -> Self {
        self.widths.extend(other.widths);
        self
    }

    pub fn field_count(&self) -> usize {
        self.widths.len()
    }

    pub fn record_width(&self) -> usize {
        self.widths.iter().sum()
    }

    /// Slice a line into one field per width, counting characters.
    ///
    /// Short lines yield empty trailing fields; text past the record is ignored.
    pub fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let offsets: Vec<usize> = line
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(line.len()))
            .collect();
        let char_count = offsets.len() - 1;

        let mut start = 0;
        self.widths
            .iter()
            .map(|width| {
                let from = start.min(char_count);
                let to = (start + width).min(char_count);
                start += width;
                &line[offsets[from]..offsets[to]]
            })
            .collect()
    }
}

/// How the grid decoder splits the fields of the temperature and data lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSplit {
    Whitespace,
    Fixed {
        leading_width: usize,
        grid_width: usize,
        value_width: usize,
    },
}

/// Decoder for files whose first line declares the width of every later line.
///
/// Line 0 holds the grid size N, line 1 the N grid points as log10 values,
/// and every following line `leading_fields` integers and N reals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridDecoder {
    pub leading_fields: usize,
    pub split: FieldSplit,
}

impl GridDecoder {
    pub fn whitespace(leading_fields: usize) -> Self {
        Self {
            leading_fields,
            split: FieldSplit::Whitespace,
        }
    }

    /// Fortran layout `(N F<grid>)` for the grid and `(k I<lead>, N E<value>)` for rows
    pub fn fixed(leading_fields: usize, leading_width: usize, grid_width: usize, value_width: usize) -> Self {
        Self {
            leading_fields,
            split: FieldSplit::Fixed {
                leading_width,
                grid_width,
                value_width,
            },
        }
    }

    fn derive_rules(&self, count: usize) -> GridRules {
        match self.split {
            FieldSplit::Whitespace => GridRules {
                count,
                grid: FieldRule::Whitespace(count),
                data: FieldRule::Whitespace(self.leading_fields + count),
            },
            FieldSplit::Fixed {
                leading_width,
                grid_width,
                value_width,
            } => GridRules {
                count,
                grid: FieldRule::Fixed(FixedWidth::repeated(count, grid_width)),
                data: FieldRule::Fixed(
                    FixedWidth::repeated(self.leading_fields, leading_width)
                        .then(FixedWidth::repeated(count, value_width)),
                ),
            },
        }
    }

    fn decode(&self, line: &str, index: usize, state: &mut DecoderState) -> Result<Option<Vec<Token>>, DecodeError> {
        match index {
            0 => {
                let first = line
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| DecodeError::new("missing grid size"))?;
                let count = first
                    .parse::<usize>()
                    .map_err(|_| DecodeError::new(format!("grid size '{first}' is not a count")))?;
                if count == 0 {
                    return Err(DecodeError::new("grid size must be positive"));
                }
                debug!("Grid decoder expects {} values per line", count);
                state.grid = Some(GridState {
                    rules: self.derive_rules(count),
                    position: self.leading_fields,
                    grid: None,
                });
                Ok(None)
            }
            1 => {
                let grid_state = state.grid_mut()?;
                let fields = grid_state.rules.grid.apply(line)?;
                let values = parse_reals(&fields, "grid")?;
                grid_state.grid = Some(values.into_iter().map(|v| 10f64.powf(v)).collect());
                Ok(None)
            }
            _ => {
                let grid_state = state.grid_mut()?;
                if grid_state.grid.is_none() {
                    return Err(DecodeError::new("data line before temperature grid"));
                }
                let fields = grid_state.rules.data.apply(line)?;
                let (leading, values) = fields.split_at(self.leading_fields);
                let mut tokens: Vec<Token> = leading.iter().map(|f| Token::text(f.trim())).collect();
                tokens.push(Token::Reals(parse_reals(values, "data")?));
                Ok(Some(tokens))
            }
        }
    }
}

fn parse_reals(fields: &[&str], what: &str) -> Result<Vec<f64>, DecodeError> {
    fields
        .iter()
        .map(|f| {
            parse_real(f).ok_or_else(|| DecodeError::new(format!("invalid {what} value '{}'", f.trim())))
        })
        .collect()
}

/// Field rule derived from the grid size
#[derive(Debug, Clone, PartialEq)]
enum FieldRule {
    /// Whitespace split that must produce exactly this many fields
    Whitespace(usize),
    Fixed(FixedWidth),
}

impl FieldRule {
    fn apply<'a>(&self, line: &'a str) -> Result<Vec<&'a str>, DecodeError> {
        match self {
            FieldRule::Whitespace(expected) => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() != *expected {
                    return Err(DecodeError::new(format!(
                        "declared row width {expected} but found {} fields",
                        fields.len()
                    )));
                }
                Ok(fields)
            }
            FieldRule::Fixed(fixed) => Ok(fixed.split(line)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GridRules {
    count: usize,
    grid: FieldRule,
    data: FieldRule,
}

#[derive(Debug, Clone, PartialEq)]
struct GridState {
    rules: GridRules,
    /// Schema position of the shared grid column
    position: usize,
    grid: Option<Vec<f64>>,
}

/// State carried from earlier lines of the same file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderState {
    grid: Option<GridState>,
}

impl DecoderState {
    fn grid_mut(&mut self) -> Result<&mut GridState, DecodeError> {
        self.grid
            .as_mut()
            .ok_or_else(|| DecodeError::new("grid size line was not decoded"))
    }

    /// Grid size declared on the first line, once read
    pub fn grid_size(&self) -> Option<usize> {
        self.grid.as_ref().map(|g| g.rules.count)
    }

    /// Row-invariant tokens and the schema position each belongs at
    pub fn shared_tokens(&self) -> Vec<(usize, Token)> {
        self.grid
            .as_ref()
            .and_then(|g| g.grid.as_ref().map(|grid| (g.position, Token::Reals(grid.clone()))))
            .into_iter()
            .collect()
    }
}

/// Line decoding strategy of a category
#[derive(Debug, Clone, PartialEq)]
pub enum Decoder {
    /// Fields separated by runs of whitespace
    Whitespace,
    /// Fields at fixed character positions
    FixedWidth(FixedWidth),
    /// Field count taken from a header line, with a shared grid line
    Grid(GridDecoder),
}

impl Decoder {
    /// Decode one line of the data section; header lines yield `None`
    pub fn decode(&self, line: &str, index: usize, state: &mut DecoderState) -> Result<Option<Vec<Token>>, DecodeError> {
        match self {
            Decoder::Whitespace => Ok(Some(line.split_whitespace().map(Token::text).collect())),
            Decoder::FixedWidth(fixed) => Ok(Some(
                fixed.split(line).into_iter().map(|f| Token::text(f.trim())).collect(),
            )),
            Decoder::Grid(grid) => grid.decode(line, index, state),
        }
    }
}

/// Data rows, footer and shared tokens of one source file
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSource {
    pub rows: Vec<Row>,
    pub footer: String,
    pub shared: Vec<(usize, Token)>,
}

/// Decode a whole source up to its terminator.
///
/// Blank lines in the data section are skipped and do not advance the index.
pub fn decode_source<R: BufRead>(mut reader: R, decoder: &Decoder) -> Result<DecodedSource, DecodeError> {
    let mut state = DecoderState::default();
    let mut rows = Vec::new();
    let mut buffer = String::new();
    let mut line_number = 0;
    let mut index = 0;

    loop {
        buffer.clear();
        let read = reader.read_line(&mut buffer).map_err(|e| {
            DecodeError::new(format!("read failed: {e}")).at_line(line_number + 1)
        })?;
        if read == 0 {
            return Err(DecodeError::new("missing terminator"));
        }
        line_number += 1;

        let line = buffer.trim_end_matches(['\n', '\r']);
        if line.trim() == TERMINATOR {
            break;
        }
        if line.trim().is_empty() {
            trace!("Skipping blank line {}", line_number);
            continue;
        }

        let decoded = decoder
            .decode(line, index, &mut state)
            .map_err(|e| e.at_line(line_number))?;
        index += 1;
        if let Some(tokens) = decoded {
            rows.push(Row {
                line: line_number,
                tokens,
            });
        }
    }

    let mut footer = String::new();
    reader
        .read_to_string(&mut footer)
        .map_err(|e| DecodeError::new(format!("read failed in footer: {e}")))?;

    debug!(
        "Decoded {} rows, terminator on line {}, {} footer bytes",
        rows.len(),
        line_number,
        footer.len()
    );

    Ok(DecodedSource {
        rows,
        footer,
        shared: state.shared_tokens(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .map(|t| match t {
                Token::Text(s) => s.as_str(),
                Token::Reals(_) => panic!("expected text token"),
            })
            .collect()
    }

    #[test]
    fn test_whitespace_decoder() {
        let mut state = DecoderState::default();
        let tokens = Decoder::Whitespace
            .decode("  1  7.300  h ", 0, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(texts(&tokens), vec!["1", "7.300", "h"]);
    }

    #[test]
    fn test_fixed_width_keeps_embedded_spaces() {
        let fixed = FixedWidth::new([3, 12, 4]);
        let mut state = DecoderState::default();
        let tokens = Decoder::FixedWidth(fixed)
            .decode("  73s2 3p6 3d   1.5", 0, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(texts(&tokens), vec!["7", "3s2 3p6 3d", "1.5"]);
    }

    #[test]
    fn test_fixed_width_short_line_pads_empty_fields() {
        let fixed = FixedWidth::new([3, 7, 5]);
        assert_eq!(fixed.split("  1  7.300"), vec!["  1", "  7.300", ""]);
        assert_eq!(fixed.split(""), vec!["", "", ""]);
        assert_eq!(fixed.record_width(), 15);
    }

    #[test]
    fn test_fixed_width_counts_characters() {
        let fixed = FixedWidth::new([2, 3]);
        assert_eq!(fixed.split("αβγδε"), vec!["αβ", "γδε"]);
    }

    #[test]
    fn test_repeated_fields() {
        let fixed = FixedWidth::repeated(2, 3).then(FixedWidth::repeated(3, 10));
        assert_eq!(fixed.field_count(), 5);
        assert_eq!(fixed.record_width(), 36);
    }

    #[test]
    fn test_parse_real_accepts_fortran_exponents() {
        assert_eq!(parse_real("1.0e-2"), Some(0.01));
        assert_eq!(parse_real(" 2.5D+01 "), Some(25.0));
        assert_eq!(parse_real("7.300"), Some(7.3));
        assert_eq!(parse_real(""), None);
        assert_eq!(parse_real("abc"), None);
    }

    #[test]
    fn test_grid_decoder_derives_rules() {
        let decoder = Decoder::Grid(GridDecoder::whitespace(2));
        let mut state = DecoderState::default();

        assert_eq!(decoder.decode("3", 0, &mut state).unwrap(), None);
        assert_eq!(state.grid_size(), Some(3));
        assert!(state.shared_tokens().is_empty());

        assert_eq!(decoder.decode("4.00  4.50  5.00", 1, &mut state).unwrap(), None);
        let shared = state.shared_tokens();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].0, 2);

        let tokens = decoder
            .decode(" 1  1 1.0e-2 5.0e-1 1.0e-2", 2, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(tokens[0], Token::text("1"));
        assert_eq!(tokens[1], Token::text("1"));
        assert_eq!(tokens[2], Token::Reals(vec![0.01, 0.5, 0.01]));
    }

    #[test]
    fn test_grid_decoder_rejects_width_mismatch() {
        let decoder = Decoder::Grid(GridDecoder::whitespace(2));
        let mut state = DecoderState::default();
        decoder.decode("3", 0, &mut state).unwrap();

        let err = decoder.decode("4.0 4.5", 1, &mut state).unwrap_err();
        assert!(err.reason.contains("declared row width 3"));

        decoder.decode("4.0 4.5 5.0", 1, &mut state).unwrap();
        let err = decoder.decode(" 1  1 0.1 0.2", 2, &mut state).unwrap_err();
        assert!(err.reason.contains("declared row width 5 but found 4"));
    }

    #[test]
    fn test_grid_decoder_fixed_split() {
        let decoder = Decoder::Grid(GridDecoder::fixed(2, 3, 6, 10));
        let mut state = DecoderState::default();
        decoder.decode("  2", 0, &mut state).unwrap();
        decoder.decode("  4.00  5.00", 1, &mut state).unwrap();
        let tokens = decoder
            .decode(" 26 12 1.000e-02-2.000e-01", 2, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(tokens[0], Token::text("26"));
        assert_eq!(tokens[1], Token::text("12"));
        assert_eq!(tokens[2], Token::Reals(vec![0.01, -0.2]));
    }

    #[test]
    fn test_grid_decoder_bad_header() {
        let decoder = Decoder::Grid(GridDecoder::whitespace(2));
        let mut state = DecoderState::default();
        assert!(decoder.decode("many", 0, &mut state).is_err());
        assert!(decoder.decode("0", 0, &mut state).is_err());

        let mut fresh = DecoderState::default();
        let err = decoder.decode("4.0 4.5", 1, &mut fresh).unwrap_err();
        assert!(err.reason.contains("grid size"));
    }

    #[test]
    fn test_decode_source_collects_footer_verbatim() {
        let input = "1  7.300  h\n\n2 10.930 he\n -1 \n comment one\n\ncomment two\n";
        let decoded = decode_source(input.as_bytes(), &Decoder::Whitespace).unwrap();
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded.rows[0].line, 1);
        assert_eq!(decoded.rows[1].line, 3);
        assert_eq!(decoded.footer, " comment one\n\ncomment two\n");
        assert!(decoded.shared.is_empty());
    }

    #[test]
    fn test_decode_source_requires_terminator() {
        let err = decode_source("1 2 3\n4 5 6\n".as_bytes(), &Decoder::Whitespace).unwrap_err();
        assert_eq!(err.reason, "missing terminator");
        assert_eq!(err.line, None);
    }

    #[test]
    fn test_decode_source_reports_line_numbers() {
        let input = "3\n4.0 4.5 5.0\n 1  1 0.1 0.2 0.3\n 1  2 0.1 0.2\n-1\n";
        let decoder = Decoder::Grid(GridDecoder::whitespace(2));
        let err = decode_source(input.as_bytes(), &decoder).unwrap_err();
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn test_decode_source_handles_crlf() {
        let decoded = decode_source("1 2\r\n-1\r\nnote\r\n".as_bytes(), &Decoder::Whitespace).unwrap();
        assert_eq!(decoded.rows[0].tokens, vec![Token::text("1"), Token::text("2")]);
        assert_eq!(decoded.footer, "note\r\n");
    }
}
