//! Column codecs for the binary copy channels.
//!
//! A [`ColumnCodec`] is resolved once per column from the column's declared
//! type name, before any row is read. The copy loop then dispatches on the
//! resolved codec instead of re-inspecting type names per value.
//!
//! Types without a binary codec (numeric, enums, arrays, domains, anything
//! unrecognised) resolve to [`ColumnCodec::Fallback`] and travel as text; the
//! destination casts them back with `CAST(... AS type)`.

use crate::value::Value;

/// The binary encoding used for one column of a copy stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnCodec {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    /// No binary codec; the column is staged and streamed as text.
    Fallback,
}

/// Lower-cases, trims and strips a trailing `(…)` modifier from a type name.
///
/// ```
/// use strata_db::codec::normalize_type_name;
///
/// assert_eq!(normalize_type_name("  VARCHAR(120) "), "varchar");
/// assert_eq!(normalize_type_name("Timestamp(3) With Time Zone"), "timestamp with time zone");
/// ```
pub fn normalize_type_name(type_name: &str) -> String {
    let lowered = type_name.trim().to_lowercase();
    match (lowered.find('('), lowered.find(')')) {
        (Some(open), Some(close)) if close > open => {
            let mut out = String::with_capacity(lowered.len());
            out.push_str(lowered[..open].trim_end());
            let rest = lowered[close + 1..].trim_start();
            if !rest.is_empty() {
                out.push(' ');
                out.push_str(rest);
            }
            out
        }
        _ => lowered,
    }
}

impl ColumnCodec {
    /// Resolves the codec for a declared column type.
    pub fn resolve(type_name: &str) -> Self {
        let normalized = normalize_type_name(type_name);
        if normalized.ends_with("[]") {
            return Self::Fallback;
        }
        match normalized.as_str() {
            "bool" | "boolean" => Self::Boolean,
            "int2" | "smallint" | "smallserial" | "serial2" => Self::SmallInt,
            "int" | "int4" | "integer" | "serial" | "serial4" => Self::Integer,
            "int8" | "bigint" | "bigserial" | "serial8" => Self::BigInt,
            "float4" | "real" => Self::Real,
            "float8" | "double precision" | "float" => Self::Double,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "citext" | "name" => Self::Text,
            "bytea" => Self::Bytes,
            "uuid" => Self::Uuid,
            "date" => Self::Date,
            "time" | "time without time zone" => Self::Time,
            "timestamp" | "timestamp without time zone" => Self::Timestamp,
            "timestamptz" | "timestamp with time zone" => Self::TimestampTz,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            _ => Self::Fallback,
        }
    }

    /// Returns `true` when values of this codec are streamed in binary form.
    pub const fn is_binary(self) -> bool {
        !matches!(self, Self::Fallback)
    }

    /// The codec actually used on the wire: fallback columns travel as text.
    pub const fn wire(self) -> Self {
        match self {
            Self::Fallback => Self::Text,
            other => other,
        }
    }

    /// The column type used for this codec inside a staging table.
    pub const fn staging_type(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Double => "double precision",
            Self::Text | Self::Fallback => "text",
            Self::Bytes => "bytea",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }

    /// Coerces a value into the shape this codec writes.
    ///
    /// `Null` always passes through; backends write it as a typed null.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when the value cannot be
    /// represented by this codec.
    pub fn encode(self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (Self::Boolean, v @ Value::Bool(_)) => Ok(v),
            (Self::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "t" | "true" | "1" => Ok(Value::Bool(true)),
                "f" | "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            (Self::SmallInt, Value::Int(i)) => i16::try_from(i)
                .map(Value::from)
                .map_err(|_| format!("{i} does not fit in smallint")),
            (Self::Integer, Value::Int(i)) => i32::try_from(i)
                .map(Value::from)
                .map_err(|_| format!("{i} does not fit in integer")),
            (Self::BigInt, v @ Value::Int(_)) => Ok(v),
            (Self::Real | Self::Double, v @ Value::Float(_)) => Ok(v),
            #[allow(clippy::cast_precision_loss)]
            (Self::Real | Self::Double, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (Self::Text | Self::Fallback, v @ Value::String(_)) => Ok(v),
            (Self::Text | Self::Fallback, Value::Bytes(b)) => Err(format!(
                "{} bytes of binary data cannot be written as text",
                b.len()
            )),
            (Self::Text | Self::Fallback, other) => Ok(Value::String(other.to_string())),
            (Self::Bytes, v @ Value::Bytes(_)) => Ok(v),
            (Self::Uuid, v @ Value::Uuid(_)) => Ok(v),
            (Self::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|e| format!("'{s}' is not a uuid: {e}")),
            (Self::Date, v @ Value::Date(_)) => Ok(v),
            (Self::Time, v @ Value::Time(_)) => Ok(v),
            (Self::Timestamp, v @ Value::DateTime(_)) => Ok(v),
            (Self::Timestamp, Value::DateTimeTz(dt)) => Ok(Value::DateTime(dt.naive_utc())),
            (Self::TimestampTz, v @ Value::DateTimeTz(_)) => Ok(v),
            (Self::TimestampTz, Value::DateTime(dt)) => Ok(Value::DateTimeTz(dt.and_utc())),
            (Self::Json | Self::Jsonb, v @ Value::Json(_)) => Ok(v),
            (Self::Json | Self::Jsonb, Value::String(s)) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| format!("invalid json: {e}")),
            (codec, other) => Err(format!(
                "a {} value cannot be written with the {} codec",
                other.kind(),
                codec.staging_type()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_common_types() {
        assert_eq!(ColumnCodec::resolve("INT"), ColumnCodec::Integer);
        assert_eq!(ColumnCodec::resolve("serial"), ColumnCodec::Integer);
        assert_eq!(ColumnCodec::resolve("bigserial"), ColumnCodec::BigInt);
        assert_eq!(ColumnCodec::resolve("varchar(255)"), ColumnCodec::Text);
        assert_eq!(ColumnCodec::resolve("character varying(10)"), ColumnCodec::Text);
        assert_eq!(ColumnCodec::resolve("double precision"), ColumnCodec::Double);
        assert_eq!(
            ColumnCodec::resolve("timestamp with time zone"),
            ColumnCodec::TimestampTz
        );
        assert_eq!(ColumnCodec::resolve("jsonb"), ColumnCodec::Jsonb);
    }

    #[test]
    fn test_resolve_fallback_types() {
        assert_eq!(ColumnCodec::resolve("numeric(10,2)"), ColumnCodec::Fallback);
        assert_eq!(ColumnCodec::resolve("user_status"), ColumnCodec::Fallback);
        assert_eq!(ColumnCodec::resolve("integer[]"), ColumnCodec::Fallback);
        assert!(!ColumnCodec::Fallback.is_binary());
        assert_eq!(ColumnCodec::Fallback.wire(), ColumnCodec::Text);
        assert_eq!(ColumnCodec::Fallback.staging_type(), "text");
    }

    #[test]
    fn test_staging_type_drops_serial() {
        assert_eq!(ColumnCodec::resolve("serial").staging_type(), "integer");
        assert_eq!(ColumnCodec::resolve("bigserial").staging_type(), "bigint");
    }

    #[test]
    fn test_encode_integer_ranges() {
        assert_eq!(ColumnCodec::Integer.encode(Value::Int(5)), Ok(Value::Int(5)));
        assert!(ColumnCodec::SmallInt.encode(Value::Int(40_000)).is_err());
        assert!(ColumnCodec::Integer.encode(Value::Int(i64::MAX)).is_err());
    }

    #[test]
    fn test_encode_null_passes_through() {
        assert_eq!(ColumnCodec::Uuid.encode(Value::Null), Ok(Value::Null));
        assert_eq!(ColumnCodec::Jsonb.encode(Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_encode_text_stringifies_scalars() {
        assert_eq!(
            ColumnCodec::Text.encode(Value::Int(12)),
            Ok(Value::from("12"))
        );
        assert!(ColumnCodec::Text.encode(Value::Bytes(vec![0])).is_err());
    }

    #[test]
    fn test_encode_json_from_string() {
        assert_eq!(
            ColumnCodec::Json.encode(Value::from("{\"a\":1}")),
            Ok(Value::Json(serde_json::json!({"a": 1})))
        );
        assert!(ColumnCodec::Json.encode(Value::from("{oops")).is_err());
    }

    #[test]
    fn test_encode_type_mismatch() {
        let err = ColumnCodec::Date.encode(Value::Bool(true)).unwrap_err();
        assert!(err.contains("bool"));
        assert!(err.contains("date"));
    }

    #[test]
    fn test_encode_bool_from_text() {
        assert_eq!(
            ColumnCodec::Boolean.encode(Value::from("t")),
            Ok(Value::Bool(true))
        );
        assert!(ColumnCodec::Boolean.encode(Value::from("maybe")).is_err());
    }
}
