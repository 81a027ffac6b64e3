//! Host value kinds and their provider type names.

use crate::codec::{normalize_type_name, ColumnCodec};

/// The Rust-side kind of a persisted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Json,
}

/// Maps host value kinds to provider type names and back.
pub trait TypeMapper: Send + Sync {
    /// The provider type name used to store `host`.
    fn type_name(&self, host: HostType) -> &'static str;

    /// The host kind a provider type reads into, if it has one.
    fn host_type(&self, type_name: &str) -> Option<HostType>;
}

/// PostgreSQL type names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypeMapper;

impl TypeMapper for PostgresTypeMapper {
    fn type_name(&self, host: HostType) -> &'static str {
        match host {
            HostType::Bool => "boolean",
            HostType::I16 => "smallint",
            HostType::I32 => "integer",
            HostType::I64 => "bigint",
            HostType::F32 => "real",
            HostType::F64 => "double precision",
            HostType::String => "text",
            HostType::Bytes => "bytea",
            HostType::Uuid => "uuid",
            HostType::Date => "date",
            HostType::Time => "time",
            HostType::DateTime => "timestamp",
            HostType::DateTimeTz => "timestamptz",
            HostType::Json => "jsonb",
        }
    }

    fn host_type(&self, type_name: &str) -> Option<HostType> {
        let host = match ColumnCodec::resolve(type_name) {
            ColumnCodec::Boolean => HostType::Bool,
            ColumnCodec::SmallInt => HostType::I16,
            ColumnCodec::Integer => HostType::I32,
            ColumnCodec::BigInt => HostType::I64,
            ColumnCodec::Real => HostType::F32,
            ColumnCodec::Double => HostType::F64,
            ColumnCodec::Text => HostType::String,
            ColumnCodec::Bytes => HostType::Bytes,
            ColumnCodec::Uuid => HostType::Uuid,
            ColumnCodec::Date => HostType::Date,
            ColumnCodec::Time => HostType::Time,
            ColumnCodec::Timestamp => HostType::DateTime,
            ColumnCodec::TimestampTz => HostType::DateTimeTz,
            ColumnCodec::Json | ColumnCodec::Jsonb => HostType::Json,
            ColumnCodec::Fallback => {
                return matches!(normalize_type_name(type_name).as_str(), "numeric" | "decimal")
                    .then_some(HostType::String);
            }
        };
        Some(host)
    }
}
