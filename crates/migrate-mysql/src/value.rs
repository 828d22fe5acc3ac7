//! `SqlValue` → `mysql_async::Value`.

use chrono::{Datelike, Timelike};
use migrate_core::SqlValue;
use mysql_async::Value;

/// MySQL value wrapper for positional binding.
#[derive(Debug, Clone, PartialEq)]
pub struct MySqlValue(pub Value);

impl MySqlValue {
    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<&SqlValue> for MySqlValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => MySqlValue(Value::NULL),
            // TINYINT(1)
            SqlValue::Bool(b) => MySqlValue(Value::Int(i64::from(*b))),
            SqlValue::Int(i) => MySqlValue(Value::Int(*i)),
            SqlValue::UInt(u) => MySqlValue(Value::UInt(*u)),
            SqlValue::Float(f) => MySqlValue(Value::Double(*f)),
            SqlValue::Text(s) => MySqlValue(Value::Bytes(s.clone().into_bytes())),
            SqlValue::Timestamp(ts) => MySqlValue(Value::Date(
                ts.year() as u16,
                ts.month() as u8,
                ts.day() as u8,
                ts.hour() as u8,
                ts.minute() as u8,
                ts.second() as u8,
                ts.nanosecond() / 1000, // MySQL uses microseconds
            )),
        }
    }
}

pub(crate) fn bind_row(values: &[SqlValue]) -> Vec<Value> {
    values
        .iter()
        .map(|v| MySqlValue::from(v).into_inner())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scalar_conversion() {
        assert_eq!(MySqlValue::from(&SqlValue::Null).0, Value::NULL);
        assert_eq!(MySqlValue::from(&SqlValue::Bool(true)).0, Value::Int(1));
        assert_eq!(
            MySqlValue::from(&SqlValue::Text("08123".to_string())).0,
            Value::Bytes(b"08123".to_vec())
        );
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(10, 30, 5, 250)
            .unwrap();
        assert_eq!(
            MySqlValue::from(&SqlValue::Timestamp(ts)).0,
            Value::Date(2024, 3, 1, 10, 30, 5, 250)
        );
    }
}
