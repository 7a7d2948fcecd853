//! Per-column descriptive statistics
//!
//! Profiling materializes the whole table, classifies each column once into a
//! [`ColumnKind`], and then applies a small set of pure statistic functions:
//!
//! - every column gets missing and distinct counts;
//! - numeric columns get mean, median, sample standard deviation, min and max;
//! - textual columns, and any column with fewer than
//!   [`CATEGORICAL_UNIQUE_THRESHOLD`] distinct values, get a top-k frequency
//!   table.
//!
//! The last two are independent, so a low-cardinality integer column carries
//! both. Statistics that come out NaN or infinite are reported as `null`.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::execute::ensure_table;
use crate::normalize::{normalize, normalize_stat, Datum};
use crate::reader::{Frame, FrameColumn, Reader};
use crate::Result;

/// Number of entries kept in a frequency table.
pub const TOP_K: usize = 10;

/// Columns with fewer distinct values than this are treated as categorical.
pub const CATEGORICAL_UNIQUE_THRESHOLD: u64 = 50;

/// Type affinity derived from a declared column type, following SQLite's
/// affinity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            Affinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Affinity::Integer | Affinity::Real | Affinity::Numeric)
    }
}

/// Observed semantics of a column, computed once from its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every present value is an integer.
    Integer,
    /// Numeric, with at least one floating-point value.
    Real,
    /// Declared boolean with only 0/1 values, or native booleans.
    Boolean,
    /// Any text, or a mix of storage classes.
    Text,
    /// Only blobs.
    Blob,
    /// No present values; the declared affinity decides numeric-ness.
    Empty(Affinity),
}

impl ColumnKind {
    pub fn classify(values: &[Datum], declared_type: &str) -> Self {
        let (mut ints, mut reals, mut texts, mut blobs, mut bools) = (0usize, 0, 0, 0, 0);
        let mut only_zero_one = true;

        for value in values {
            match value {
                Datum::Null => {}
                Datum::Integer(v) => {
                    ints += 1;
                    only_zero_one &= *v == 0 || *v == 1;
                }
                Datum::Unsigned(_) => {
                    ints += 1;
                    only_zero_one = false;
                }
                Datum::Real(_) => reals += 1,
                Datum::Text(_) => texts += 1,
                Datum::Blob(_) => blobs += 1,
                Datum::Boolean(_) => bools += 1,
            }
        }

        let present = ints + reals + texts + blobs + bools;
        if present == 0 {
            return ColumnKind::Empty(Affinity::from_declared(declared_type));
        }
        if bools == present {
            return ColumnKind::Boolean;
        }
        if texts == 0 && blobs == 0 && bools == 0 {
            if reals > 0 {
                return ColumnKind::Real;
            }
            if only_zero_one && declared_type.to_uppercase().contains("BOOL") {
                return ColumnKind::Boolean;
            }
            return ColumnKind::Integer;
        }
        if blobs == present {
            return ColumnKind::Blob;
        }
        ColumnKind::Text
    }

    pub fn label(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::Blob => "blob",
            ColumnKind::Empty(_) => "null",
        }
    }

    pub fn is_numeric(self) -> bool {
        match self {
            ColumnKind::Integer | ColumnKind::Real => true,
            ColumnKind::Empty(affinity) => affinity.is_numeric(),
            _ => false,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, ColumnKind::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub mean: Value,
    pub median: Value,
    pub std_dev: Value,
    pub min: Value,
    pub max: Value,
}

/// Value → frequency pairs, most frequent first.
///
/// Serialized as a JSON object that keeps this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopValues(pub Vec<(String, u64)>);

impl Serialize for TopValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (value, count) in &self.0 {
            map.serialize_entry(value, count)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalStats {
    pub top_values: TopValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub type_label: String,
    pub missing_count: u64,
    pub missing_percent: f64,
    pub unique_count: u64,
    pub unique_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_stats: Option<NumericStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorical_stats: Option<CategoricalStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInsights {
    pub table_name: String,
    pub total_rows: u64,
    pub total_cols: u64,
    pub column_stats: Vec<ColumnProfile>,
}

/// Profile every column of a table.
pub fn profile<R: Reader + ?Sized>(reader: &R, table: &str) -> Result<TableInsights> {
    let table = ensure_table(reader, table)?;
    let frame = reader.materialize(&table)?;
    Ok(profile_frame(&frame))
}

/// Profile an already materialized table.
pub fn profile_frame(frame: &Frame) -> TableInsights {
    if frame.row_count == 0 {
        return TableInsights {
            table_name: frame.table_name.clone(),
            total_rows: 0,
            total_cols: 0,
            column_stats: Vec::new(),
        };
    }

    let column_stats = frame
        .columns
        .iter()
        .map(|column| profile_column(column, frame.row_count as u64))
        .collect();

    TableInsights {
        table_name: frame.table_name.clone(),
        total_rows: frame.row_count as u64,
        total_cols: frame.columns.len() as u64,
        column_stats,
    }
}

pub fn profile_column(column: &FrameColumn, total_rows: u64) -> ColumnProfile {
    let kind = ColumnKind::classify(&column.values, &column.declared_type);

    let missing_count = column.values.iter().filter(|v| v.is_null()).count() as u64;
    let frequencies = frequencies(&column.values, kind);
    let unique_count = frequencies.len() as u64;

    let numeric_stats = kind
        .is_numeric()
        .then(|| numeric_stats(&column.values, kind));

    let categorical_stats = (kind.is_textual() || unique_count < CATEGORICAL_UNIQUE_THRESHOLD)
        .then(|| CategoricalStats {
            top_values: top_values(frequencies, TOP_K),
        });

    ColumnProfile {
        name: column.name.clone(),
        type_label: kind.label().to_string(),
        missing_count,
        missing_percent: percent(missing_count, total_rows),
        unique_count,
        unique_percent: percent(unique_count, total_rows),
        numeric_stats,
        categorical_stats,
    }
}

/// `100 * part / total`, rounded to two decimals.
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * part as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}

// Distinctness key. Within a real column, integer and float cells compare
// numerically, so 3 and 3.0 are the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Integer(i64),
    Unsigned(u64),
    Real(u64),
    Boolean(bool),
    Text(String),
    Blob(Vec<u8>),
}

fn real_key(v: f64) -> ValueKey {
    // Fold -0.0 into 0.0 and every NaN payload into one.
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = if v.is_nan() { f64::NAN.to_bits() } else { v.to_bits() };
    ValueKey::Real(bits)
}

fn value_key(datum: &Datum, kind: ColumnKind) -> Option<ValueKey> {
    let key = match (datum, kind) {
        (Datum::Null, _) => return None,
        (Datum::Integer(v), ColumnKind::Real) => real_key(*v as f64),
        (Datum::Unsigned(v), ColumnKind::Real) => real_key(*v as f64),
        (Datum::Integer(v), _) => ValueKey::Integer(*v),
        (Datum::Unsigned(v), _) => ValueKey::Unsigned(*v),
        (Datum::Real(v), _) => real_key(*v),
        (Datum::Boolean(b), _) => ValueKey::Boolean(*b),
        (Datum::Text(s), _) => ValueKey::Text(s.clone()),
        (Datum::Blob(b), _) => ValueKey::Blob(b.clone()),
    };
    Some(key)
}

fn display_value(datum: &Datum, kind: ColumnKind) -> String {
    match (datum, kind) {
        (Datum::Integer(0), ColumnKind::Boolean) => "false".to_string(),
        (Datum::Integer(_), ColumnKind::Boolean) => "true".to_string(),
        _ => datum.render(),
    }
}

struct Frequency {
    display: String,
    count: u64,
    first_seen: usize,
}

fn frequencies(values: &[Datum], kind: ColumnKind) -> Vec<Frequency> {
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    let mut out: Vec<Frequency> = Vec::new();

    for (position, datum) in values.iter().enumerate() {
        let Some(key) = value_key(datum, kind) else {
            continue;
        };
        match index.get(&key) {
            Some(&slot) => out[slot].count += 1,
            None => {
                index.insert(key, out.len());
                out.push(Frequency {
                    display: display_value(datum, kind),
                    count: 1,
                    first_seen: position,
                });
            }
        }
    }

    out
}

/// Most frequent values first; ties keep first-appearance order. Distinct
/// values that render the same (`1` and `'1'` in an untyped column) share
/// one entry.
fn top_values(frequencies: Vec<Frequency>, k: usize) -> TopValues {
    let mut by_display: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Frequency> = Vec::with_capacity(frequencies.len());
    for frequency in frequencies {
        match by_display.get(&frequency.display) {
            Some(&slot) => {
                let entry = &mut merged[slot];
                entry.count += frequency.count;
                entry.first_seen = entry.first_seen.min(frequency.first_seen);
            }
            None => {
                by_display.insert(frequency.display.clone(), merged.len());
                merged.push(frequency);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.first_seen.cmp(&b.first_seen))
    });
    TopValues(
        merged
            .into_iter()
            .take(k)
            .map(|f| (f.display, f.count))
            .collect(),
    )
}

fn numeric_stats(values: &[Datum], kind: ColumnKind) -> NumericStats {
    let numbers: Vec<f64> = values.iter().filter_map(Datum::as_f64).collect();

    let (min, max) = if kind == ColumnKind::Integer {
        integer_extremes(values)
    } else {
        (
            normalize_stat(float_extreme(&numbers, Ordering::Less)),
            normalize_stat(float_extreme(&numbers, Ordering::Greater)),
        )
    };

    NumericStats {
        mean: normalize_stat(mean(&numbers)),
        median: normalize_stat(median(&numbers)),
        std_dev: normalize_stat(sample_std_dev(&numbers)),
        min,
        max,
    }
}

fn integer_extremes(values: &[Datum]) -> (Value, Value) {
    let ints = values.iter().filter_map(|v| match v {
        Datum::Integer(i) => Some(i128::from(*i)),
        Datum::Unsigned(u) => Some(i128::from(*u)),
        _ => None,
    });

    let (mut lo, mut hi): (Option<i128>, Option<i128>) = (None, None);
    for v in ints {
        lo = Some(lo.map_or(v, |cur| cur.min(v)));
        hi = Some(hi.map_or(v, |cur| cur.max(v)));
    }

    let to_value = |v: Option<i128>| match v {
        Some(v) => match i64::try_from(v) {
            Ok(i) => normalize(&Datum::Integer(i)),
            Err(_) => u64::try_from(v)
                .map(|u| normalize(&Datum::Unsigned(u)))
                .unwrap_or(Value::Null),
        },
        None => Value::Null,
    };
    (to_value(lo), to_value(hi))
}

fn float_extreme(values: &[f64], wanted: Ordering) -> Option<f64> {
    values
        .iter()
        .copied()
        .reduce(|acc, v| if v.total_cmp(&acc) == wanted { v } else { acc })
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample standard deviation (n - 1 denominator); undefined below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}
