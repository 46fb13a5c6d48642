use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::MySqlRow;
use sqlx::Row;
use uuid::Uuid;

use crate::config::ZeroDatePolicy;
use crate::models::ColumnDescriptor;
use crate::type_map::LogicalKind;
use crate::value::{RowValues, SqlValue};

/// Decode one source row into neutral values, directed by the column kinds
/// so the writer can bind every parameter natively.
pub fn decode_row(
    row: &MySqlRow,
    columns: &[ColumnDescriptor],
    zero_date: ZeroDatePolicy,
) -> Result<RowValues, String> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        values.push(decode_value(row, idx, column, zero_date)?);
    }
    Ok(values)
}

fn decode_value(
    row: &MySqlRow,
    idx: usize,
    column: &ColumnDescriptor,
    zero_date: ZeroDatePolicy,
) -> Result<SqlValue, String> {
    use sqlx::ValueRef;

    if let Ok(val_ref) = row.try_get_raw(idx) {
        if val_ref.is_null() {
            return Ok(SqlValue::Null);
        }
    }

    let value = match &column.kind {
        LogicalKind::Bool => row
            .try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .or_else(|_| row.try_get::<i8, _>(idx).map(|v| SqlValue::Bool(v != 0)))
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::Int8 | LogicalKind::Int16 | LogicalKind::Int32 | LogicalKind::Int64 => row
            .try_get::<i64, _>(idx)
            .map(SqlValue::Int)
            .or_else(|_| row.try_get::<i32, _>(idx).map(|v| SqlValue::Int(v as i64)))
            .or_else(|_| row.try_get::<i16, _>(idx).map(|v| SqlValue::Int(v as i64)))
            .or_else(|_| row.try_get::<i8, _>(idx).map(|v| SqlValue::Int(v as i64)))
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::UInt8 | LogicalKind::UInt16 | LogicalKind::UInt32 | LogicalKind::UInt64 => {
            row.try_get::<u64, _>(idx)
                .map(SqlValue::UInt)
                .or_else(|_| row.try_get::<u32, _>(idx).map(|v| SqlValue::UInt(v as u64)))
                .map_err(|e| decode_err(column, e))?
        }
        LogicalKind::Decimal { .. } => row
            .try_get::<Decimal, _>(idx)
            .map(SqlValue::Decimal)
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::Float32 => row
            .try_get::<f32, _>(idx)
            .map(|v| SqlValue::Float(v as f64))
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::Float64 => row
            .try_get::<f64, _>(idx)
            .map(SqlValue::Float)
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::Char { .. }
        | LogicalKind::Varchar { .. }
        | LogicalKind::Text
        | LogicalKind::Enum { .. } => SqlValue::Text(read_text(row, idx)),
        LogicalKind::Bytes | LogicalKind::Unknown => row
            .try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Bytes)
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::Date => match row.try_get::<NaiveDate, _>(idx) {
            Ok(v) => SqlValue::Date(v),
            // Zero dates have no chrono form; the policy value stands in.
            Err(_) => zero_date_value(column, zero_date, LogicalKind::Date),
        },
        LogicalKind::Time => row
            .try_get::<NaiveTime, _>(idx)
            .map(SqlValue::Time)
            .map_err(|e| decode_err(column, e))?,
        LogicalKind::DateTime => match row.try_get::<NaiveDateTime, _>(idx) {
            Ok(v) => SqlValue::DateTime(v),
            Err(_) => zero_date_value(column, zero_date, LogicalKind::DateTime),
        },
        LogicalKind::TimestampTz => match row.try_get::<DateTime<Utc>, _>(idx) {
            Ok(v) => SqlValue::TimestampTz(v),
            Err(_) => zero_date_value(column, zero_date, LogicalKind::TimestampTz),
        },
        LogicalKind::Uuid { binary: false } => {
            let text = read_text(row, idx);
            let parsed = Uuid::parse_str(text.trim())
                .map_err(|e| format!("column {}: invalid UUID text '{}': {}", column.name, text, e))?;
            SqlValue::Uuid(parsed)
        }
        LogicalKind::Uuid { binary: true } => {
            let bytes = row
                .try_get::<Vec<u8>, _>(idx)
                .map_err(|e| decode_err(column, e))?;
            let parsed = Uuid::from_slice(&bytes)
                .map_err(|e| format!("column {}: invalid UUID bytes: {}", column.name, e))?;
            SqlValue::Uuid(parsed)
        }
        LogicalKind::Json => row
            .try_get::<serde_json::Value, _>(idx)
            .map(SqlValue::Json)
            .map_err(|e| decode_err(column, e))?,
    };

    Ok(value)
}

fn read_text(row: &MySqlRow, idx: usize) -> String {
    row.try_get::<String, _>(idx).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

fn zero_date_value(
    column: &ColumnDescriptor,
    policy: ZeroDatePolicy,
    kind: LogicalKind,
) -> SqlValue {
    match policy {
        ZeroDatePolicy::Null => {
            log::warn!(
                "column {}: zero date translated to NULL",
                column.name
            );
            SqlValue::Null
        }
        ZeroDatePolicy::Epoch => match kind {
            LogicalKind::Date => SqlValue::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
            LogicalKind::TimestampTz => {
                SqlValue::TimestampTz(Utc.timestamp_opt(0, 0).unwrap())
            }
            _ => SqlValue::DateTime(
                NaiveDate::from_ymd_opt(1970, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            ),
        },
    }
}

fn decode_err(column: &ColumnDescriptor, err: sqlx::Error) -> String {
    format!("column {}: {}", column.name, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(kind: LogicalKind) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "c".into(),
            kind,
            raw_type: String::new(),
            nullable: true,
            default: None,
            identity: false,
            ordinal: 0,
            comment: None,
        }
    }

    #[test]
    fn zero_date_policy_null_yields_null() {
        let value = zero_date_value(
            &column(LogicalKind::DateTime),
            ZeroDatePolicy::Null,
            LogicalKind::DateTime,
        );
        assert!(value.is_null());
    }

    #[test]
    fn zero_date_policy_epoch_yields_epoch() {
        match zero_date_value(
            &column(LogicalKind::Date),
            ZeroDatePolicy::Epoch,
            LogicalKind::Date,
        ) {
            SqlValue::Date(d) => assert_eq!(d, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
            other => panic!("unexpected value {:?}", other),
        }
        match zero_date_value(
            &column(LogicalKind::TimestampTz),
            ZeroDatePolicy::Epoch,
            LogicalKind::TimestampTz,
        ) {
            SqlValue::TimestampTz(ts) => assert_eq!(ts.timestamp(), 0),
            other => panic!("unexpected value {:?}", other),
        }
    }
}
