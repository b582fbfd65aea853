//! Unit tests for sluice-rdbc types module

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sluice_rdbc::types::Value;

#[test]
fn test_value_null() {
    let v = Value::Null;
    assert!(v.is_null());
    assert_eq!(v.as_str(), None);
    assert_eq!(v.as_i64(), None);
    assert_eq!(v.as_f64(), None);
    assert_eq!(v.as_bool(), None);
    assert_eq!(v.as_string(), None);
}

#[test]
fn test_value_integer_types() {
    assert_eq!(Value::Int8(42).as_i64(), Some(42));
    assert_eq!(Value::Int16(-100).as_i64(), Some(-100));
    assert_eq!(Value::Int32(1_000_000).as_i64(), Some(1_000_000));
    assert_eq!(
        Value::Int64(9_000_000_000_000).as_i64(),
        Some(9_000_000_000_000)
    );
}

#[test]
fn test_value_decimal_conversions() {
    let d: Decimal = "12.75".parse().unwrap();
    let v = Value::Decimal(d);

    assert_eq!(v.as_i64(), Some(12));
    assert_eq!(v.as_f64(), Some(12.75));
    assert!(v.is_numeric());
    assert_eq!(v.as_string(), Some("12.75".to_string()));
}

#[test]
fn test_value_as_bool_only_for_bool_and_ints() {
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::Int32(0).as_bool(), Some(false));
    assert_eq!(Value::Int64(7).as_bool(), Some(true));
    assert_eq!(Value::String("true".into()).as_bool(), None);
}

#[test]
fn test_value_bytes() {
    let v = Value::Bytes(vec![0x68, 0x69]);
    assert_eq!(v.as_bytes(), Some(&[0x68u8, 0x69][..]));
    assert_eq!(v.as_string(), Some("hi".to_string()));
}

#[test]
fn test_value_temporal_display() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert_eq!(Value::Date(date).to_string(), "2024-03-01");

    let dt = date.and_hms_opt(10, 20, 30).unwrap();
    assert_eq!(Value::DateTime(dt).to_string(), "2024-03-01 10:20:30");

    let tz = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap();
    assert_eq!(
        Value::DateTimeTz(tz).to_string(),
        "2024-03-01T10:20:30+00:00"
    );
}

#[test]
fn test_value_from_option() {
    let some: Value = Some(5i64).into();
    let none: Value = Option::<i64>::None.into();
    assert_eq!(some, Value::Int64(5));
    assert!(none.is_null());
}

#[test]
fn test_value_type_names() {
    assert_eq!(Value::Null.type_name(), "NULL");
    assert_eq!(Value::Int64(1).type_name(), "BIGINT");
    assert_eq!(Value::String(String::new()).type_name(), "VARCHAR");
}
