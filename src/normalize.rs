//! Conversion of engine values into transport-safe JSON scalars
//!
//! Every value a reader produces is first captured as a [`Datum`], an owned,
//! engine-neutral cell. [`normalize`] then maps a datum onto exactly one of
//! four JSON shapes: `null`, a boolean, a finite number, or a string. NaN and
//! the infinities have no JSON encoding, so they become `null` along with SQL
//! `NULL`.

use serde_json::{Number, Value};

/// An owned value read from a data source.
///
/// Integer widths are folded into `Integer` (signed) or `Unsigned` on
/// construction, so `normalize` only ever sees these seven cases.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Numeric view of the datum, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Integer(v) => Some(*v as f64),
            Datum::Unsigned(v) => Some(*v as f64),
            Datum::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Display form used for frequency-table keys and prompt rendering.
    pub fn render(&self) -> String {
        match self {
            Datum::Null => "NULL".to_string(),
            Datum::Boolean(b) => b.to_string(),
            Datum::Integer(v) => v.to_string(),
            Datum::Unsigned(v) => v.to_string(),
            Datum::Real(v) => v.to_string(),
            Datum::Text(s) => s.clone(),
            Datum::Blob(bytes) => hex::encode(bytes),
        }
    }
}

// Every width that fits losslessly in an i64.
macro_rules! datum_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Datum {
            fn from(v: $t) -> Self {
                Datum::Integer(i64::from(v))
            }
        })*
    };
}

datum_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Datum::Integer(v),
            Err(_) => Datum::Unsigned(v),
        }
    }
}

impl From<f32> for Datum {
    fn from(v: f32) -> Self {
        Datum::Real(v as f64)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Real(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Boolean(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Blob(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Datum::Null)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::types::ValueRef<'_>> for Datum {
    fn from(v: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;

        match v {
            ValueRef::Null => Datum::Null,
            ValueRef::Integer(i) => Datum::Integer(i),
            ValueRef::Real(f) => Datum::Real(f),
            ValueRef::Text(bytes) => Datum::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Datum::Blob(bytes.to_vec()),
        }
    }
}

/// Convert a datum into its transport-safe JSON form.
///
/// Rules, in order: missing or non-finite values become `null`; booleans stay
/// booleans; integers of any width become JSON integers; finite floats become
/// JSON numbers; everything else becomes a string (blobs as lowercase hex).
pub fn normalize(datum: &Datum) -> Value {
    match datum {
        Datum::Null => Value::Null,
        Datum::Boolean(b) => Value::Bool(*b),
        Datum::Integer(v) => Value::Number((*v).into()),
        Datum::Unsigned(v) => Value::Number((*v).into()),
        Datum::Real(v) => normalize_f64(*v),
        Datum::Text(s) => Value::String(s.clone()),
        Datum::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

/// Finite floats become numbers, NaN and the infinities become `null`.
pub fn normalize_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Like [`normalize_f64`] for an optional statistic.
pub fn normalize_stat(value: Option<f64>) -> Value {
    value.map(normalize_f64).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(normalize(&Datum::Real(f64::NAN)), Value::Null);
        assert_eq!(normalize(&Datum::Real(f64::INFINITY)), Value::Null);
        assert_eq!(normalize(&Datum::Real(f64::NEG_INFINITY)), Value::Null);
        assert_eq!(normalize(&Datum::Null), Value::Null);
    }

    #[test]
    fn test_finite_float() {
        assert_eq!(normalize(&Datum::Real(2.5)), json!(2.5));
        assert_eq!(normalize(&Datum::from(1.5f32)), json!(1.5));
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(normalize(&Datum::from(-3i8)), json!(-3));
        assert_eq!(normalize(&Datum::from(40_000i32)), json!(40_000));
        assert_eq!(normalize(&Datum::from(255u8)), json!(255));
        assert_eq!(normalize(&Datum::from(u64::MAX)), json!(u64::MAX));
        assert_eq!(normalize(&Datum::from(i64::MIN)), json!(i64::MIN));
    }

    #[test]
    fn test_boolean_text_and_blob() {
        assert_eq!(normalize(&Datum::from(true)), json!(true));
        assert_eq!(normalize(&Datum::from("hello")), json!("hello"));
        assert_eq!(normalize(&Datum::from(vec![0xde, 0xad])), json!("dead"));
    }

    #[test]
    fn test_option_maps_to_null() {
        assert_eq!(Datum::from(None::<i32>), Datum::Null);
        assert_eq!(Datum::from(Some(7i32)), Datum::Integer(7));
    }

    #[test]
    fn test_normalized_values_always_serialize() {
        let values = [
            Datum::Null,
            Datum::Real(f64::NAN),
            Datum::Real(f64::INFINITY),
            Datum::Real(0.1),
            Datum::Integer(-1),
            Datum::Boolean(false),
            Datum::Text("x".into()),
            Datum::Blob(vec![1, 2, 3]),
        ];
        let normalized: Vec<Value> = values.iter().map(normalize).collect();
        let text = serde_json::to_string(&normalized).unwrap();
        assert!(!text.contains("NaN"));
        assert!(!text.contains("inf"));
    }

    #[test]
    fn test_render() {
        assert_eq!(Datum::Integer(30).render(), "30");
        assert_eq!(Datum::Real(2.5).render(), "2.5");
        assert_eq!(Datum::Blob(vec![0xff]).render(), "ff");
    }
}
