//! Value marshaling onto statement parameters
//!
//! [`MarshalConfig::marshal`] is total: every `(SqlType, Value)` pair maps
//! to a bindable [`Value`]. Values that cannot be represented for their
//! declared type bind as `NULL` and are logged at `debug`.
//!
//! Integer types are widened one step so unsigned source columns fit:
//! TINYINT binds as a 16-bit integer, SMALLINT as 32-bit, INTEGER as
//! 64-bit and BIGINT as an arbitrary-precision decimal.
//!
//! Date and time strings are read as wall-clock values in a fixed UTC
//! offset chosen once at startup.

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sluice_rdbc::Value;
use tracing::debug;

use crate::sql_type::SqlType;

/// Prefix of the all-zero date sentinel some sources emit
const ZERO_DATE: &str = "0000-00-00";

/// Marshaling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalConfig {
    /// Offset date/time strings without an explicit zone are read in
    pub utc_offset: FixedOffset,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self::local()
    }
}

impl MarshalConfig {
    /// Use the local system offset at the time of the call
    pub fn local() -> Self {
        Self {
            utc_offset: Local::now().offset().fix(),
        }
    }

    /// Use an explicit offset
    pub fn with_offset(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    /// Marshal `value` for a parameter declared as `sql_type`
    pub fn marshal(&self, sql_type: SqlType, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        let marshaled = match sql_type {
            SqlType::Bit | SqlType::Boolean => to_bool(value).map(Value::Bool),
            t if t.is_text() => value.as_string().map(Value::String),
            SqlType::TinyInt => to_integer(value)
                .and_then(|n| i16::try_from(n).ok())
                .map(Value::Int16),
            SqlType::SmallInt => to_integer(value)
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int32),
            SqlType::Integer => to_integer(value).map(Value::Int64),
            SqlType::BigInt => to_big_integer(value).map(Value::Decimal),
            SqlType::Decimal | SqlType::Numeric => to_numeric(value),
            SqlType::Real => to_float(value).map(|f| Value::Float32(f as f32)),
            SqlType::Float | SqlType::Double => to_float(value).map(Value::Float64),
            t if t.is_binary() => match value {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::Bytes(latin1(s))),
                _ => None,
            },
            SqlType::Clob | SqlType::NClob => match value {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::String(s.clone())),
                _ => None,
            },
            SqlType::Date => self.date_param(value),
            SqlType::Time | SqlType::TimeWithTimezone => self.time_param(value),
            SqlType::Timestamp => self.timestamp_param(value),
            SqlType::TimestampWithTimezone => self.timestamp_tz_param(value),
            _ => Some(value.clone()),
        };

        marshaled.unwrap_or_else(|| {
            debug!(
                sql_type = %sql_type,
                value_type = value.type_name(),
                "Value not representable for column type, binding NULL"
            );
            Value::Null
        })
    }

    fn date_param(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Date(d) => Some(Value::Date(*d)),
            Value::DateTime(dt) => Some(Value::Date(dt.date())),
            Value::DateTimeTz(dt) => Some(Value::Date(self.local_of(dt).date())),
            Value::String(s) if s.starts_with(ZERO_DATE) => Some(Value::String(s.clone())),
            Value::String(s) => self.parse_local(s).map(|dt| Value::Date(dt.date())),
            _ => None,
        }
    }

    fn time_param(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Time(t) => Some(Value::Time(*t)),
            Value::DateTime(dt) => Some(Value::Time(dt.time())),
            Value::DateTimeTz(dt) => Some(Value::Time(self.local_of(dt).time())),
            Value::String(s) if s.starts_with(ZERO_DATE) => Some(Value::String(s.clone())),
            Value::String(s) => self.parse_local(s).map(|dt| Value::Time(dt.time())),
            _ => None,
        }
    }

    fn timestamp_param(&self, value: &Value) -> Option<Value> {
        match value {
            Value::DateTime(dt) => Some(Value::DateTime(*dt)),
            Value::Date(d) => Some(Value::DateTime(d.and_time(NaiveTime::MIN))),
            Value::DateTimeTz(dt) => Some(Value::DateTime(self.local_of(dt))),
            Value::String(s) if s.starts_with(ZERO_DATE) => Some(Value::String(s.clone())),
            Value::String(s) => self.parse_local(s).map(Value::DateTime),
            _ => None,
        }
    }

    fn timestamp_tz_param(&self, value: &Value) -> Option<Value> {
        match value {
            Value::DateTimeTz(dt) => Some(Value::DateTimeTz(*dt)),
            Value::String(s) if s.starts_with(ZERO_DATE) => Some(Value::String(s.clone())),
            other => match self.timestamp_param(other)? {
                Value::DateTime(local) => self.utc_of(local).map(Value::DateTimeTz),
                _ => None,
            },
        }
    }

    fn local_of(&self, dt: &DateTime<Utc>) -> NaiveDateTime {
        dt.with_timezone(&self.utc_offset).naive_local()
    }

    fn utc_of(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.utc_offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Parse a date, time or date-time string into configured-offset wall
    /// clock time. Strings with an explicit offset are converted.
    pub fn parse_local(&self, raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let normalized = if raw.contains('-') {
            if raw.contains(':') {
                raw.replacen(' ', "T", 1)
            } else {
                raw.to_string()
            }
        } else if raw.contains(':') {
            format!("1970-01-01T{}", raw)
        } else {
            return None;
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
            return Some(dt.with_timezone(&self.utc_offset).naive_local());
        }
        if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Some(dt.with_timezone(&self.utc_offset).naive_local());
        }

        const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
        for format in FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, format) {
                return Some(dt);
            }
        }

        NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => value.as_bool(),
        Value::Float32(f) => Some(f.trunc() != 0.0),
        Value::Float64(f) => Some(f.trunc() != 0.0),
        Value::Decimal(d) => Some(!d.trunc().is_zero()),
        Value::String(s) => Some(s != "0"),
        _ => None,
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other if other.is_numeric() => other.as_i64(),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

fn to_big_integer(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int8(n) => Some(Decimal::from(*n)),
        Value::Int16(n) => Some(Decimal::from(*n)),
        Value::Int32(n) => Some(Decimal::from(*n)),
        Value::Int64(n) => Some(Decimal::from(*n)),
        Value::Decimal(d) => Some(*d),
        Value::Float32(f) => parse_decimal(&f.to_string()),
        Value::Float64(f) => parse_decimal(&f.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn to_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::Decimal(d) => Some(Value::Decimal(*d)),
        Value::Int8(n) => Some(Value::Int32(i32::from(*n))),
        Value::Int16(n) => Some(Value::Int32(i32::from(*n))),
        Value::Int32(n) => Some(Value::Int32(*n)),
        Value::Int64(n) => Some(Value::Int64(*n)),
        Value::Float32(f) => Decimal::from_f32_retain(*f).map(Value::Decimal),
        Value::Float64(f) => Decimal::from_f64_retain(*f).map(Value::Decimal),
        other => other
            .as_string()
            .and_then(|s| parse_decimal(&s))
            .map(Value::Decimal),
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Decimal(d) => d.to_f64(),
        other if other.is_numeric() => other.as_f64(),
        _ => None,
    }
}

/// Encode text as ISO-8859-1; characters outside Latin-1 become `?`
fn latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Parse a `+HH:MM` / `-HH:MM` / `Z` offset
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => (rest.get(..2)?, rest.get(2..)?),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc8() -> MarshalConfig {
        MarshalConfig::with_offset(FixedOffset::east_opt(8 * 3600).unwrap())
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    // ==================== Numeric Tests ====================

    #[test]
    fn test_tinyint_widens_to_int16() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::TinyInt, &Value::Int64(200)), Value::Int16(200));
        assert_eq!(
            m.marshal(SqlType::TinyInt, &Value::String("17".into())),
            Value::Int16(17)
        );
        assert_eq!(m.marshal(SqlType::TinyInt, &Value::Int64(70_000)), Value::Null);
    }

    #[test]
    fn test_smallint_and_integer_widen() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::SmallInt, &Value::Int64(65_535)), Value::Int32(65_535));
        assert_eq!(
            m.marshal(SqlType::Integer, &Value::Int64(4_294_967_295)),
            Value::Int64(4_294_967_295)
        );
        assert_eq!(m.marshal(SqlType::Integer, &Value::String("x".into())), Value::Null);
    }

    #[test]
    fn test_bigint_binds_as_decimal() {
        let m = utc8();
        let max = Decimal::from(u64::MAX);
        assert_eq!(m.marshal(SqlType::BigInt, &Value::Decimal(max)), Value::Decimal(max));
        assert_eq!(
            m.marshal(SqlType::BigInt, &Value::String("18446744073709551615".into())),
            Value::Decimal(max)
        );
        assert_eq!(m.marshal(SqlType::BigInt, &Value::Int64(3)), Value::Decimal(Decimal::from(3)));
    }

    #[test]
    fn test_decimal_variants() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::Decimal, &Value::Int16(4)), Value::Int32(4));
        assert_eq!(m.marshal(SqlType::Numeric, &Value::Int64(9)), Value::Int64(9));
        assert_eq!(
            m.marshal(SqlType::Decimal, &Value::String("12.50".into())),
            Value::Decimal("12.50".parse().unwrap())
        );
        assert_eq!(
            m.marshal(SqlType::Decimal, &Value::String("1.5e3".into())),
            Value::Decimal(Decimal::from(1500))
        );
        assert_eq!(
            m.marshal(SqlType::Decimal, &Value::Float64(0.5)),
            Value::Decimal("0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_float_types() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::Real, &Value::Int64(2)), Value::Float32(2.0));
        assert_eq!(m.marshal(SqlType::Double, &Value::String("2.25".into())), Value::Float64(2.25));
    }

    // ==================== Bool and Text Tests ====================

    #[test]
    fn test_bit_boolean() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::Bit, &Value::Int64(1)), Value::Bool(true));
        assert_eq!(m.marshal(SqlType::Bit, &Value::Float64(0.7)), Value::Bool(false));
        assert_eq!(m.marshal(SqlType::Boolean, &Value::String("0".into())), Value::Bool(false));
        assert_eq!(m.marshal(SqlType::Boolean, &Value::String("no".into())), Value::Bool(true));
        assert_eq!(m.marshal(SqlType::Bit, &Value::Bytes(vec![1])), Value::Null);
    }

    #[test]
    fn test_text_stringifies() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::VarChar, &Value::Int64(5)), Value::String("5".into()));
        assert_eq!(m.marshal(SqlType::NChar, &Value::Null), Value::Null);
    }

    #[test]
    fn test_binary_latin1() {
        let m = utc8();
        assert_eq!(
            m.marshal(SqlType::VarBinary, &Value::String("é€".into())),
            Value::Bytes(vec![0xE9, b'?'])
        );
        assert_eq!(m.marshal(SqlType::Clob, &Value::String("t".into())), Value::String("t".into()));
    }

    // ==================== Temporal Tests ====================

    #[test]
    fn test_timestamp_strings() {
        let m = utc8();
        assert_eq!(
            m.marshal(SqlType::Timestamp, &Value::String("2024-05-01 10:11:12".into())),
            Value::DateTime(dt("2024-05-01 10:11:12"))
        );
        // explicit offset converted into the configured one
        assert_eq!(
            m.marshal(SqlType::Timestamp, &Value::String("2024-05-01T00:00:00Z".into())),
            Value::DateTime(dt("2024-05-01 08:00:00"))
        );
        assert_eq!(
            m.marshal(SqlType::Timestamp, &Value::String("2024-05-01".into())),
            Value::DateTime(dt("2024-05-01 00:00:00"))
        );
    }

    #[test]
    fn test_zero_date_sentinel_passes_through() {
        let m = utc8();
        let zero = Value::String("0000-00-00 00:00:00".into());
        assert_eq!(m.marshal(SqlType::Timestamp, &zero), zero);
        assert_eq!(m.marshal(SqlType::Date, &Value::String("0000-00-00".into())), Value::String("0000-00-00".into()));
        assert_eq!(m.marshal(SqlType::Time, &zero), zero);
    }

    #[test]
    fn test_time_only_string_is_anchored() {
        let m = utc8();
        match m.marshal(SqlType::Time, &Value::String("13:45:01".into())) {
            Value::Time(t) => assert_eq!((t.hour(), t.minute(), t.second()), (13, 45, 1)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            m.parse_local("13:45"),
            Some(dt("1970-01-01 13:45:00"))
        );
    }

    #[test]
    fn test_unparsable_temporal_is_null() {
        let m = utc8();
        assert_eq!(m.marshal(SqlType::Date, &Value::String("yesterday".into())), Value::Null);
        assert_eq!(m.marshal(SqlType::Time, &Value::Int64(3)), Value::Null);
    }

    #[test]
    fn test_timestamp_with_timezone() {
        let m = utc8();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap();
        assert_eq!(
            m.marshal(
                SqlType::TimestampWithTimezone,
                &Value::String("2024-05-01 10:00:00".into())
            ),
            Value::DateTimeTz(expected)
        );
    }

    #[test]
    fn test_other_tags_pass_through() {
        let m = utc8();
        let v = Value::String("{\"a\":1}".into());
        assert_eq!(m.marshal(SqlType::Other(1111), &v), v);
        assert_eq!(m.marshal(SqlType::Vendor, &Value::Int64(1)), Value::Int64(1));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+08:00"), FixedOffset::east_opt(8 * 3600));
        assert_eq!(parse_utc_offset("-0530"), FixedOffset::east_opt(-(5 * 3600 + 30 * 60)));
        assert_eq!(parse_utc_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_utc_offset("08:00"), None);
        assert_eq!(parse_utc_offset("+08:75"), None);
    }

    #[test]
    fn test_parse_utc_offset_rejects_malformed_input() {
        // four bytes, but byte 2 falls inside a multi-byte character
        assert_eq!(parse_utc_offset("+1é1"), None);
        assert_eq!(parse_utc_offset("+9999999"), None);
        assert_eq!(parse_utc_offset("-24:00"), None);
        assert_eq!(parse_utc_offset("+"), None);
        assert_eq!(parse_utc_offset("+23:59"), FixedOffset::east_opt(23 * 3600 + 59 * 60));
    }
}
