//! Standard SQL type tags carried on every change-event column
//!
//! Codes follow the JDBC `java.sql.Types` numbering used by log-decoding
//! clients. Unknown codes round-trip through [`SqlType::Other`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL type tag of a column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum SqlType {
    /// BIT
    Bit,
    /// TINYINT
    TinyInt,
    /// SMALLINT
    SmallInt,
    /// INTEGER
    Integer,
    /// BIGINT
    BigInt,
    /// FLOAT
    Float,
    /// REAL
    Real,
    /// DOUBLE
    Double,
    /// NUMERIC
    Numeric,
    /// DECIMAL
    Decimal,
    /// CHAR
    Char,
    /// VARCHAR
    VarChar,
    /// LONGVARCHAR
    LongVarChar,
    /// NCHAR
    NChar,
    /// NVARCHAR
    NVarChar,
    /// LONGNVARCHAR
    LongNVarChar,
    /// DATE
    Date,
    /// TIME
    Time,
    /// TIMESTAMP
    Timestamp,
    /// TIME_WITH_TIMEZONE
    TimeWithTimezone,
    /// TIMESTAMP_WITH_TIMEZONE
    TimestampWithTimezone,
    /// BINARY
    Binary,
    /// VARBINARY
    VarBinary,
    /// LONGVARBINARY
    LongVarBinary,
    /// BLOB
    Blob,
    /// CLOB
    Clob,
    /// NCLOB
    NClob,
    /// BOOLEAN
    Boolean,
    /// NULL
    Null,
    /// OTHER (vendor specific, 1111)
    #[default]
    Vendor,
    /// Any code not listed above
    Other(i32),
}

impl SqlType {
    /// The numeric type code
    pub const fn code(self) -> i32 {
        match self {
            Self::Bit => -7,
            Self::TinyInt => -6,
            Self::SmallInt => 5,
            Self::Integer => 4,
            Self::BigInt => -5,
            Self::Float => 6,
            Self::Real => 7,
            Self::Double => 8,
            Self::Numeric => 2,
            Self::Decimal => 3,
            Self::Char => 1,
            Self::VarChar => 12,
            Self::LongVarChar => -1,
            Self::NChar => -15,
            Self::NVarChar => -9,
            Self::LongNVarChar => -16,
            Self::Date => 91,
            Self::Time => 92,
            Self::Timestamp => 93,
            Self::TimeWithTimezone => 2013,
            Self::TimestampWithTimezone => 2014,
            Self::Binary => -2,
            Self::VarBinary => -3,
            Self::LongVarBinary => -4,
            Self::Blob => 2004,
            Self::Clob => 2005,
            Self::NClob => 2011,
            Self::Boolean => 16,
            Self::Null => 0,
            Self::Vendor => 1111,
            Self::Other(code) => code,
        }
    }

    /// Resolve a numeric type code
    pub const fn from_code(code: i32) -> Self {
        match code {
            -7 => Self::Bit,
            -6 => Self::TinyInt,
            5 => Self::SmallInt,
            4 => Self::Integer,
            -5 => Self::BigInt,
            6 => Self::Float,
            7 => Self::Real,
            8 => Self::Double,
            2 => Self::Numeric,
            3 => Self::Decimal,
            1 => Self::Char,
            12 => Self::VarChar,
            -1 => Self::LongVarChar,
            -15 => Self::NChar,
            -9 => Self::NVarChar,
            -16 => Self::LongNVarChar,
            91 => Self::Date,
            92 => Self::Time,
            93 => Self::Timestamp,
            2013 => Self::TimeWithTimezone,
            2014 => Self::TimestampWithTimezone,
            -2 => Self::Binary,
            -3 => Self::VarBinary,
            -4 => Self::LongVarBinary,
            2004 => Self::Blob,
            2005 => Self::Clob,
            2011 => Self::NClob,
            16 => Self::Boolean,
            0 => Self::Null,
            1111 => Self::Vendor,
            other => Self::Other(other),
        }
    }

    /// Character types bound as text
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::LongVarChar
                | Self::NChar
                | Self::NVarChar
                | Self::LongNVarChar
        )
    }

    /// Binary types bound as bytes
    pub const fn is_binary(self) -> bool {
        matches!(
            self,
            Self::Binary | Self::VarBinary | Self::LongVarBinary | Self::Blob
        )
    }

    /// Date and time types
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date
                | Self::Time
                | Self::Timestamp
                | Self::TimeWithTimezone
                | Self::TimestampWithTimezone
        )
    }
}

impl From<i32> for SqlType {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<SqlType> for i32 {
    fn from(t: SqlType) -> Self {
        t.code()
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "OTHER({})", code),
            Self::Vendor => write!(f, "OTHER"),
            Self::TimeWithTimezone => write!(f, "TIME_WITH_TIMEZONE"),
            Self::TimestampWithTimezone => write!(f, "TIMESTAMP_WITH_TIMEZONE"),
            other => f.write_str(&format!("{:?}", other).to_ascii_uppercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in [-7, -6, 5, 4, -5, 6, 7, 8, 2, 3, 1, 12, 91, 92, 93, 2004, 16, 0] {
            assert_eq!(SqlType::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let t = SqlType::from_code(2003);
        assert_eq!(t, SqlType::Other(2003));
        assert_eq!(t.code(), 2003);
    }

    #[test]
    fn test_serde_uses_numeric_code() {
        let json = serde_json::to_string(&SqlType::TinyInt).unwrap();
        assert_eq!(json, "-6");
        let back: SqlType = serde_json::from_str("93").unwrap();
        assert_eq!(back, SqlType::Timestamp);
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlType::VarChar.to_string(), "VARCHAR");
        assert_eq!(SqlType::Other(42).to_string(), "OTHER(42)");
    }
}
