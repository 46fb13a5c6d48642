use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{EnumMapping, ZeroDatePolicy};
use crate::models::{ColumnDescriptor, DefaultKind, DefaultValue};

/// Logical column kinds the engine recognizes. Every introspected column is
/// classified into one of these; `Unknown` survives only until plan time,
/// where it aborts translation unless a user override maps the raw type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Decimal { precision: u32, scale: u32 },
    Float32,
    Float64,
    Bool,
    Char { length: u32 },
    Varchar { length: u32 },
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
    TimestampTz,
    Json,
    Enum { variants: Vec<String> },
    /// `binary` distinguishes BINARY(16) storage from CHAR(36) text form.
    Uuid { binary: bool },
    Unknown,
}

/// Classify a MySQL column from its catalog row. `data_type` is the bare
/// token (`int`), `column_type` the full text (`int(10) unsigned`).
pub fn parse_mysql_type(
    data_type: &str,
    column_type: &str,
    char_length: Option<u64>,
    numeric_precision: Option<u64>,
    numeric_scale: Option<u64>,
) -> LogicalKind {
    let data_type = data_type.to_lowercase();
    let column_type = column_type.to_lowercase();
    let unsigned = column_type.contains("unsigned");

    match data_type.as_str() {
        // TINYINT(1) is MySQL's boolean idiom.
        "tinyint" if column_type.starts_with("tinyint(1)") && !unsigned => LogicalKind::Bool,
        "tinyint" => {
            if unsigned {
                LogicalKind::UInt8
            } else {
                LogicalKind::Int8
            }
        }
        "smallint" => {
            if unsigned {
                LogicalKind::UInt16
            } else {
                LogicalKind::Int16
            }
        }
        "mediumint" | "int" | "integer" => {
            if unsigned {
                LogicalKind::UInt32
            } else {
                LogicalKind::Int32
            }
        }
        "bigint" => {
            if unsigned {
                LogicalKind::UInt64
            } else {
                LogicalKind::Int64
            }
        }
        "bit" => {
            if column_type.starts_with("bit(1)") {
                LogicalKind::Bool
            } else {
                LogicalKind::Bytes
            }
        }
        "decimal" | "numeric" => LogicalKind::Decimal {
            precision: numeric_precision.unwrap_or(10) as u32,
            scale: numeric_scale.unwrap_or(0) as u32,
        },
        "float" => LogicalKind::Float32,
        "double" | "real" => LogicalKind::Float64,
        "char" => match char_length {
            Some(36) => LogicalKind::Uuid { binary: false },
            len => LogicalKind::Char {
                length: len.unwrap_or(1) as u32,
            },
        },
        "varchar" => LogicalKind::Varchar {
            length: char_length.unwrap_or(255) as u32,
        },
        "tinytext" | "text" | "mediumtext" | "longtext" => LogicalKind::Text,
        "binary" if char_length == Some(16) => LogicalKind::Uuid { binary: true },
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            LogicalKind::Bytes
        }
        "date" => LogicalKind::Date,
        "time" => LogicalKind::Time,
        "datetime" => LogicalKind::DateTime,
        // MySQL TIMESTAMP is UTC-normalized on the wire.
        "timestamp" => LogicalKind::TimestampTz,
        "json" => LogicalKind::Json,
        "enum" => LogicalKind::Enum {
            variants: parse_enum_variants(&column_type),
        },
        // SET has no target counterpart; the comma-joined form is kept.
        "set" => LogicalKind::Text,
        "year" => LogicalKind::Int16,
        _ => LogicalKind::Unknown,
    }
}

/// Pull the variant list out of `enum('a','b','it''s')`.
pub fn parse_enum_variants(column_type: &str) -> Vec<String> {
    let inner = match column_type.find('(').zip(column_type.rfind(')')) {
        Some((start, end)) if end > start => &column_type[start + 1..end],
        _ => return Vec::new(),
    };

    let mut variants = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_quote => in_quote = true,
            '\'' if chars.peek() == Some(&'\'') => {
                // escaped quote inside a variant
                chars.next();
                current.push('\'');
            }
            '\'' => {
                in_quote = false;
                variants.push(std::mem::take(&mut current));
            }
            _ if in_quote => current.push(ch),
            _ => {}
        }
    }
    variants
}

/// Outcome of mapping one column to a target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    /// Ready-to-emit type token, e.g. `VARCHAR(255)`.
    Plain(String),
    /// VARCHAR plus a CHECK constraint over the variants.
    EnumVarchar { length: u32, variants: Vec<String> },
    /// Native `CREATE TYPE … AS ENUM`; the translator names the type.
    EnumNative { variants: Vec<String> },
    /// No mapping and no override; fatal at plan time.
    Unmapped,
}

/// Total mapping from source column descriptors to target type tokens.
/// User overrides are consulted before the built-in table, keyed by the
/// lowercased raw source type (full text first, then the bare token).
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    overrides: HashMap<String, String>,
    enum_mapping: EnumMapping,
    zero_date: ZeroDatePolicy,
}

impl TypeMapper {
    pub fn new(
        overrides: HashMap<String, String>,
        enum_mapping: EnumMapping,
        zero_date: ZeroDatePolicy,
    ) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        TypeMapper {
            overrides,
            enum_mapping,
            zero_date,
        }
    }

    fn lookup_override(&self, raw_type: &str) -> Option<&str> {
        let raw = raw_type.to_lowercase();
        if let Some(target) = self.overrides.get(&raw) {
            return Some(target);
        }
        let base = raw.split('(').next().unwrap_or(&raw).trim();
        self.overrides.get(base).map(String::as_str)
    }

    pub fn target_type(&self, column: &ColumnDescriptor) -> TargetType {
        if let Some(target) = self.lookup_override(&column.raw_type) {
            return TargetType::Plain(target.to_uppercase());
        }

        match &column.kind {
            LogicalKind::Int8 | LogicalKind::Int16 | LogicalKind::UInt8 => {
                TargetType::Plain("SMALLINT".into())
            }
            LogicalKind::Int32 | LogicalKind::UInt16 => TargetType::Plain("INTEGER".into()),
            LogicalKind::Int64 | LogicalKind::UInt32 => TargetType::Plain("BIGINT".into()),
            // No unsigned 64-bit target type; NUMERIC holds the full range.
            LogicalKind::UInt64 => TargetType::Plain("NUMERIC(20,0)".into()),
            LogicalKind::Decimal { precision, scale } => {
                TargetType::Plain(format!("DECIMAL({},{})", precision, scale))
            }
            LogicalKind::Float32 => TargetType::Plain("REAL".into()),
            LogicalKind::Float64 => TargetType::Plain("DOUBLE PRECISION".into()),
            LogicalKind::Bool => TargetType::Plain("BOOLEAN".into()),
            LogicalKind::Char { length } => TargetType::Plain(format!("CHAR({})", length)),
            LogicalKind::Varchar { length } => TargetType::Plain(format!("VARCHAR({})", length)),
            LogicalKind::Text => TargetType::Plain("TEXT".into()),
            LogicalKind::Bytes => TargetType::Plain("BYTEA".into()),
            LogicalKind::Date => TargetType::Plain("DATE".into()),
            LogicalKind::Time => TargetType::Plain("TIME".into()),
            LogicalKind::DateTime => TargetType::Plain("TIMESTAMP".into()),
            LogicalKind::TimestampTz => TargetType::Plain("TIMESTAMPTZ".into()),
            LogicalKind::Json => TargetType::Plain("JSONB".into()),
            LogicalKind::Uuid { .. } => TargetType::Plain("UUID".into()),
            LogicalKind::Enum { variants } => match self.enum_mapping {
                EnumMapping::Varchar => {
                    let length = variants.iter().map(|v| v.len()).max().unwrap_or(1).max(1);
                    TargetType::EnumVarchar {
                        length: length as u32,
                        variants: variants.clone(),
                    }
                }
                EnumMapping::Native => TargetType::EnumNative {
                    variants: variants.clone(),
                },
            },
            LogicalKind::Unknown => TargetType::Unmapped,
        }
    }

    /// Rewrite a source default expression for the target dialect. Returns
    /// the target clause (if any) and a warning when the default had to be
    /// dropped or substituted.
    pub fn rewrite_default(
        &self,
        column: &ColumnDescriptor,
        default: &DefaultValue,
    ) -> (Option<String>, Option<String>) {
        match default.kind {
            DefaultKind::EngineFunction => {
                let upper = default.expr.to_uppercase();
                if upper.contains("CURRENT_TIMESTAMP") || upper.contains("NOW") {
                    (Some("CURRENT_TIMESTAMP".to_string()), None)
                } else {
                    (
                        None,
                        Some(format!(
                            "column {}: dropped untranslatable default {}",
                            column.name, default.expr
                        )),
                    )
                }
            }
            DefaultKind::Literal => self.rewrite_literal_default(column, &default.expr),
        }
    }

    fn rewrite_literal_default(
        &self,
        column: &ColumnDescriptor,
        expr: &str,
    ) -> (Option<String>, Option<String>) {
        if expr.starts_with("0000-00-00") {
            return match self.zero_date {
                ZeroDatePolicy::Null => (
                    None,
                    Some(format!(
                        "column {}: zero date default translated to NULL",
                        column.name
                    )),
                ),
                ZeroDatePolicy::Epoch => {
                    let epoch = match column.kind {
                        LogicalKind::Date => "'1970-01-01'",
                        _ => "'1970-01-01 00:00:00'",
                    };
                    (Some(epoch.to_string()), None)
                }
            };
        }

        if column.kind == LogicalKind::Bool {
            return match expr {
                "1" | "b'1'" => (Some("TRUE".to_string()), None),
                "0" | "b'0'" => (Some("FALSE".to_string()), None),
                _ => (None, None),
            };
        }

        if expr.parse::<f64>().is_ok() {
            return (Some(expr.to_string()), None);
        }

        // String literal, re-quoted for the target.
        (Some(format!("'{}'", expr.replace('\'', "''"))), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(kind: LogicalKind, raw_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "c".into(),
            kind,
            raw_type: raw_type.into(),
            nullable: true,
            default: None,
            identity: false,
            ordinal: 0,
            comment: None,
        }
    }

    fn plain(mapper: &TypeMapper, kind: LogicalKind, raw: &str) -> String {
        match mapper.target_type(&column(kind, raw)) {
            TargetType::Plain(t) => t,
            other => panic!("expected plain mapping, got {:?}", other),
        }
    }

    #[test]
    fn parses_integer_family() {
        assert_eq!(parse_mysql_type("tinyint", "tinyint(4)", None, None, None), LogicalKind::Int8);
        assert_eq!(parse_mysql_type("tinyint", "tinyint(1)", None, None, None), LogicalKind::Bool);
        assert_eq!(
            parse_mysql_type("tinyint", "tinyint(3) unsigned", None, None, None),
            LogicalKind::UInt8
        );
        assert_eq!(parse_mysql_type("smallint", "smallint(6)", None, None, None), LogicalKind::Int16);
        assert_eq!(parse_mysql_type("mediumint", "mediumint(9)", None, None, None), LogicalKind::Int32);
        assert_eq!(parse_mysql_type("int", "int(11)", None, None, None), LogicalKind::Int32);
        assert_eq!(
            parse_mysql_type("int", "int(10) unsigned", None, None, None),
            LogicalKind::UInt32
        );
        assert_eq!(parse_mysql_type("bigint", "bigint(20)", None, None, None), LogicalKind::Int64);
        assert_eq!(
            parse_mysql_type("bigint", "bigint(20) unsigned", None, None, None),
            LogicalKind::UInt64
        );
    }

    #[test]
    fn parses_text_binary_and_temporal() {
        assert_eq!(
            parse_mysql_type("varchar", "varchar(255)", Some(255), None, None),
            LogicalKind::Varchar { length: 255 }
        );
        assert_eq!(
            parse_mysql_type("char", "char(10)", Some(10), None, None),
            LogicalKind::Char { length: 10 }
        );
        assert_eq!(
            parse_mysql_type("char", "char(36)", Some(36), None, None),
            LogicalKind::Uuid { binary: false }
        );
        assert_eq!(
            parse_mysql_type("binary", "binary(16)", Some(16), None, None),
            LogicalKind::Uuid { binary: true }
        );
        assert_eq!(parse_mysql_type("longtext", "longtext", None, None, None), LogicalKind::Text);
        assert_eq!(parse_mysql_type("blob", "blob", None, None, None), LogicalKind::Bytes);
        assert_eq!(parse_mysql_type("datetime", "datetime", None, None, None), LogicalKind::DateTime);
        assert_eq!(
            parse_mysql_type("timestamp", "timestamp", None, None, None),
            LogicalKind::TimestampTz
        );
        assert_eq!(
            parse_mysql_type("decimal", "decimal(10,2)", None, Some(10), Some(2)),
            LogicalKind::Decimal { precision: 10, scale: 2 }
        );
        assert_eq!(parse_mysql_type("geometry", "geometry", None, None, None), LogicalKind::Unknown);
    }

    #[test]
    fn parses_enum_variants() {
        assert_eq!(
            parse_enum_variants("enum('a','b','c')"),
            vec!["a", "b", "c"]
        );
        assert_eq!(parse_enum_variants("enum('it''s','plain')"), vec!["it's", "plain"]);
        assert!(parse_enum_variants("enum()").is_empty());
    }

    #[test]
    fn maps_every_kind_to_a_target_token() {
        let mapper = TypeMapper::default();
        assert_eq!(plain(&mapper, LogicalKind::Int8, "tinyint(4)"), "SMALLINT");
        assert_eq!(plain(&mapper, LogicalKind::Int16, "smallint(6)"), "SMALLINT");
        assert_eq!(plain(&mapper, LogicalKind::Int32, "int(11)"), "INTEGER");
        assert_eq!(plain(&mapper, LogicalKind::Int64, "bigint(20)"), "BIGINT");
        assert_eq!(plain(&mapper, LogicalKind::UInt32, "int unsigned"), "BIGINT");
        assert_eq!(plain(&mapper, LogicalKind::UInt64, "bigint unsigned"), "NUMERIC(20,0)");
        assert_eq!(
            plain(&mapper, LogicalKind::Decimal { precision: 12, scale: 3 }, "decimal(12,3)"),
            "DECIMAL(12,3)"
        );
        assert_eq!(plain(&mapper, LogicalKind::Float32, "float"), "REAL");
        assert_eq!(plain(&mapper, LogicalKind::Float64, "double"), "DOUBLE PRECISION");
        assert_eq!(plain(&mapper, LogicalKind::Bool, "tinyint(1)"), "BOOLEAN");
        assert_eq!(plain(&mapper, LogicalKind::Char { length: 2 }, "char(2)"), "CHAR(2)");
        assert_eq!(
            plain(&mapper, LogicalKind::Varchar { length: 255 }, "varchar(255)"),
            "VARCHAR(255)"
        );
        assert_eq!(plain(&mapper, LogicalKind::Text, "longtext"), "TEXT");
        assert_eq!(plain(&mapper, LogicalKind::Bytes, "blob"), "BYTEA");
        assert_eq!(plain(&mapper, LogicalKind::Date, "date"), "DATE");
        assert_eq!(plain(&mapper, LogicalKind::Time, "time"), "TIME");
        assert_eq!(plain(&mapper, LogicalKind::DateTime, "datetime"), "TIMESTAMP");
        assert_eq!(plain(&mapper, LogicalKind::TimestampTz, "timestamp"), "TIMESTAMPTZ");
        assert_eq!(plain(&mapper, LogicalKind::Json, "json"), "JSONB");
        assert_eq!(plain(&mapper, LogicalKind::Uuid { binary: false }, "char(36)"), "UUID");
    }

    #[test]
    fn enum_maps_to_sized_varchar_by_default() {
        let mapper = TypeMapper::default();
        let kind = LogicalKind::Enum {
            variants: vec!["a".into(), "pending".into(), "ok".into()],
        };
        match mapper.target_type(&column(kind, "enum('a','pending','ok')")) {
            TargetType::EnumVarchar { length, variants } => {
                assert_eq!(length, 7);
                assert_eq!(variants.len(), 3);
            }
            other => panic!("unexpected mapping {:?}", other),
        }
    }

    #[test]
    fn override_beats_defaults_and_policy() {
        let overrides = HashMap::from([("enum".to_string(), "varchar(32)".to_string())]);
        let mapper = TypeMapper::new(overrides, EnumMapping::Varchar, ZeroDatePolicy::Null);
        let kind = LogicalKind::Enum { variants: vec!["a".into()] };
        assert_eq!(
            mapper.target_type(&column(kind, "enum('a')")),
            TargetType::Plain("VARCHAR(32)".into())
        );
    }

    #[test]
    fn override_rescues_unknown_type() {
        let overrides = HashMap::from([("geometry".to_string(), "text".to_string())]);
        let mapper = TypeMapper::new(overrides, EnumMapping::Varchar, ZeroDatePolicy::Null);
        assert_eq!(
            mapper.target_type(&column(LogicalKind::Unknown, "geometry")),
            TargetType::Plain("TEXT".into())
        );
        assert_eq!(
            TypeMapper::default().target_type(&column(LogicalKind::Unknown, "geometry")),
            TargetType::Unmapped
        );
    }

    #[test]
    fn rewrites_current_timestamp_default() {
        let mapper = TypeMapper::default();
        let col = column(LogicalKind::DateTime, "datetime");
        let default = DefaultValue {
            expr: "CURRENT_TIMESTAMP".into(),
            kind: DefaultKind::EngineFunction,
        };
        let (clause, warning) = mapper.rewrite_default(&col, &default);
        assert_eq!(clause.as_deref(), Some("CURRENT_TIMESTAMP"));
        assert!(warning.is_none());
    }

    #[test]
    fn zero_date_default_becomes_null_and_warns() {
        let mapper = TypeMapper::default();
        let col = column(LogicalKind::DateTime, "datetime");
        let default = DefaultValue {
            expr: "0000-00-00 00:00:00".into(),
            kind: DefaultKind::Literal,
        };
        let (clause, warning) = mapper.rewrite_default(&col, &default);
        assert!(clause.is_none());
        assert!(warning.is_some());
    }

    #[test]
    fn zero_date_default_epoch_policy() {
        let mapper = TypeMapper::new(HashMap::new(), EnumMapping::Varchar, ZeroDatePolicy::Epoch);
        let col = column(LogicalKind::Date, "date");
        let default = DefaultValue {
            expr: "0000-00-00".into(),
            kind: DefaultKind::Literal,
        };
        let (clause, warning) = mapper.rewrite_default(&col, &default);
        assert_eq!(clause.as_deref(), Some("'1970-01-01'"));
        assert!(warning.is_none());
    }

    #[test]
    fn literal_defaults_requote_for_target() {
        let mapper = TypeMapper::default();
        let col = column(LogicalKind::Varchar { length: 10 }, "varchar(10)");
        let default = DefaultValue { expr: "it's".into(), kind: DefaultKind::Literal };
        let (clause, _) = mapper.rewrite_default(&col, &default);
        assert_eq!(clause.as_deref(), Some("'it''s'"));

        let num = DefaultValue { expr: "42".into(), kind: DefaultKind::Literal };
        let col = column(LogicalKind::Int32, "int(11)");
        let (clause, _) = mapper.rewrite_default(&col, &num);
        assert_eq!(clause.as_deref(), Some("42"));

        let bool_col = column(LogicalKind::Bool, "tinyint(1)");
        let on = DefaultValue { expr: "1".into(), kind: DefaultKind::Literal };
        let (clause, _) = mapper.rewrite_default(&bool_col, &on);
        assert_eq!(clause.as_deref(), Some("TRUE"));
    }
}
