use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::DbError;

pub type TypeOptions = Map<String, Value>;

const MAX_NUMERIC_PRECISION: i64 = 1000;
const MAX_CHAR_LENGTH: i64 = 10_485_760;
const MAX_TIME_PRECISION: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    CharacterVarying,
    Character,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    Jsonb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Boolean,
    Number,
    String,
    Temporal,
    Interval,
    Uuid,
    Json,
}

impl ColumnType {
    /// Parses a type name, accepting the usual Postgres aliases.
    pub fn parse(name: &str) -> Result<Self, DbError> {
        let normalized = name.trim().to_ascii_lowercase();
        let ty = match normalized.as_str() {
            "boolean" | "bool" => ColumnType::Boolean,
            "smallint" | "int2" => ColumnType::SmallInt,
            "integer" | "int" | "int4" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "real" | "float4" => ColumnType::Real,
            "double precision" | "float8" => ColumnType::DoublePrecision,
            "numeric" | "decimal" => ColumnType::Numeric,
            "text" => ColumnType::Text,
            "character varying" | "varchar" => ColumnType::CharacterVarying,
            "character" | "char" | "bpchar" => ColumnType::Character,
            "date" => ColumnType::Date,
            "time" | "time without time zone" => ColumnType::Time,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::TimestampTz,
            "interval" => ColumnType::Interval,
            "uuid" => ColumnType::Uuid,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            _ => return Err(DbError::InvalidType(name.to_string())),
        };
        Ok(ty)
    }

    /// Canonical name, as `format_type` prints it.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Real => "real",
            ColumnType::DoublePrecision => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::CharacterVarying => "character varying",
            ColumnType::Character => "character",
            ColumnType::Date => "date",
            ColumnType::Time => "time without time zone",
            ColumnType::Timestamp => "timestamp without time zone",
            ColumnType::TimestampTz => "timestamp with time zone",
            ColumnType::Interval => "interval",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }

    fn category(&self) -> Category {
        match self {
            ColumnType::Boolean => Category::Boolean,
            ColumnType::SmallInt
            | ColumnType::Integer
            | ColumnType::BigInt
            | ColumnType::Real
            | ColumnType::DoublePrecision
            | ColumnType::Numeric => Category::Number,
            ColumnType::Text | ColumnType::CharacterVarying | ColumnType::Character => {
                Category::String
            }
            ColumnType::Date
            | ColumnType::Time
            | ColumnType::Timestamp
            | ColumnType::TimestampTz => Category::Temporal,
            ColumnType::Interval => Category::Interval,
            ColumnType::Uuid => Category::Uuid,
            ColumnType::Json | ColumnType::Jsonb => Category::Json,
        }
    }

    /// Option keys this type takes.
    pub fn option_keys(&self) -> &'static [&'static str] {
        match self {
            ColumnType::Numeric => &["precision", "scale"],
            ColumnType::CharacterVarying | ColumnType::Character => &["length"],
            ColumnType::Time
            | ColumnType::Timestamp
            | ColumnType::TimestampTz
            | ColumnType::Interval => &["precision"],
            _ => &[],
        }
    }

    /// Checks type options. Keys the type does not take yield
    /// `UnknownTypeOption`, values out of range yield `InvalidTypeOption`.
    pub fn validate_options(&self, options: &TypeOptions) -> Result<(), DbError> {
        let keys = self.option_keys();
        if let Some(unknown) = options.keys().find(|k| !keys.contains(&k.as_str())) {
            return Err(DbError::UnknownTypeOption(unknown.clone()));
        }
        let invalid = || DbError::InvalidTypeOption(Value::Object(options.clone()).to_string());
        let int_option = |key: &str| -> Result<Option<i64>, DbError> {
            match options.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => value.as_i64().map(Some).ok_or_else(invalid),
            }
        };
        match self {
            ColumnType::Numeric => {
                let precision = int_option("precision")?;
                let scale = int_option("scale")?;
                match (precision, scale) {
                    (None, Some(_)) => return Err(invalid()),
                    (Some(p), _) if !(1..=MAX_NUMERIC_PRECISION).contains(&p) => {
                        return Err(invalid())
                    }
                    (Some(p), Some(s)) if s < 0 || s > p => return Err(invalid()),
                    _ => {}
                }
            }
            ColumnType::CharacterVarying | ColumnType::Character => {
                if let Some(length) = int_option("length")? {
                    if !(1..=MAX_CHAR_LENGTH).contains(&length) {
                        return Err(invalid());
                    }
                }
            }
            ColumnType::Time
            | ColumnType::Timestamp
            | ColumnType::TimestampTz
            | ColumnType::Interval => {
                if let Some(precision) = int_option("precision")? {
                    if !(0..=MAX_TIME_PRECISION).contains(&precision) {
                        return Err(invalid());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Renders the type with its options as SQL, e.g. `numeric(10, 2)`.
    /// Options must have been validated.
    pub fn to_sql(&self, options: Option<&TypeOptions>) -> String {
        let get = |key: &str| options.and_then(|o| o.get(key)).and_then(Value::as_i64);
        match self {
            ColumnType::Numeric => match (get("precision"), get("scale")) {
                (Some(p), Some(s)) => format!("numeric({}, {})", p, s),
                (Some(p), None) => format!("numeric({})", p),
                _ => "numeric".to_string(),
            },
            ColumnType::CharacterVarying | ColumnType::Character => match get("length") {
                Some(length) => format!("{}({})", self.name(), length),
                None => self.name().to_string(),
            },
            ColumnType::Time => time_sql("time", get("precision"), " without time zone"),
            ColumnType::Timestamp => time_sql("timestamp", get("precision"), " without time zone"),
            ColumnType::TimestampTz => time_sql("timestamp", get("precision"), " with time zone"),
            ColumnType::Interval => time_sql("interval", get("precision"), ""),
            _ => self.name().to_string(),
        }
    }

    /// Decodes Postgres `atttypmod` into type options.
    pub fn options_from_typmod(&self, typmod: i32) -> Option<TypeOptions> {
        if typmod < 0 {
            return None;
        }
        let mut options = TypeOptions::new();
        match self {
            ColumnType::Numeric => {
                let packed = typmod - 4;
                options.insert("precision".into(), ((packed >> 16) & 0xffff).into());
                options.insert("scale".into(), (packed & 0xffff).into());
            }
            ColumnType::CharacterVarying | ColumnType::Character => {
                options.insert("length".into(), (typmod - 4).into());
            }
            ColumnType::Time | ColumnType::Timestamp | ColumnType::TimestampTz => {
                options.insert("precision".into(), typmod.into());
            }
            ColumnType::Interval => {
                // The low half is the precision, 0xffff when only fields are restricted.
                let precision = typmod & 0xffff;
                if precision == 0xffff {
                    return None;
                }
                options.insert("precision".into(), precision.into());
            }
            _ => return None,
        }
        Some(options)
    }

    /// Whether a value of `self` can be cast to `target`.
    pub fn can_cast_to(&self, target: ColumnType) -> bool {
        use Category::*;
        match (self.category(), target.category()) {
            (a, b) if a == b => true,
            (_, String) | (String, _) => true,
            (Boolean, Number) | (Number, Boolean) => {
                matches!(self, ColumnType::Integer | ColumnType::Boolean)
                    && matches!(target, ColumnType::Integer | ColumnType::Boolean)
            }
            _ => false,
        }
    }

    /// Whether `literal` is a valid value of this type with these options.
    pub fn accepts_literal(&self, literal: &str, options: Option<&TypeOptions>) -> bool {
        let text = literal.trim();
        match self {
            ColumnType::Boolean => matches!(
                text.to_ascii_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n" | "on" | "off" | "1" | "0"
            ),
            ColumnType::SmallInt => text.parse::<i16>().is_ok(),
            ColumnType::Integer => text.parse::<i32>().is_ok(),
            ColumnType::BigInt => text.parse::<i64>().is_ok(),
            ColumnType::Real | ColumnType::DoublePrecision => text.parse::<f64>().is_ok(),
            ColumnType::Numeric => numeric_fits(text, options),
            ColumnType::Text => true,
            ColumnType::CharacterVarying | ColumnType::Character => {
                let limit = options
                    .and_then(|o| o.get("length"))
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::MAX);
                (literal.chars().count() as i64) <= limit
            }
            ColumnType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
            ColumnType::Time => {
                NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok()
                    || NaiveTime::parse_from_str(text, "%H:%M").is_ok()
            }
            ColumnType::Timestamp => {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
                    || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }
            ColumnType::TimestampTz => {
                DateTime::parse_from_rfc3339(text).is_ok()
                    || DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z").is_ok()
            }
            ColumnType::Interval => interval_fits(text),
            ColumnType::Uuid => Uuid::parse_str(text).is_ok(),
            ColumnType::Json | ColumnType::Jsonb => serde_json::from_str::<Value>(text).is_ok(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn time_sql(base: &str, precision: Option<i64>, suffix: &str) -> String {
    match precision {
        Some(p) => format!("{}({}){}", base, p, suffix),
        None => format!("{}{}", base, suffix),
    }
}

fn numeric_fits(text: &str, options: Option<&TypeOptions>) -> bool {
    if text.parse::<f64>().is_err() {
        return false;
    }
    let precision = options.and_then(|o| o.get("precision")).and_then(Value::as_i64);
    let Some(precision) = precision else {
        return true;
    };
    let scale = options
        .and_then(|o| o.get("scale"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let digits = text.trim_start_matches(['-', '+']);
    let integral = digits
        .split('.')
        .next()
        .unwrap_or("")
        .trim_start_matches('0')
        .len() as i64;
    integral <= precision - scale
}

// Accepts `<n> <unit>` pairs, e.g. `1 day 2 hours`.
fn interval_fits(text: &str) -> bool {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.is_empty() || parts.len() % 2 != 0 {
        return false;
    }
    parts.chunks(2).all(|pair| {
        pair[0].parse::<f64>().is_ok()
            && matches!(
                pair[1].trim_end_matches('s'),
                "microsecond" | "millisecond" | "second" | "minute" | "hour" | "day" | "week"
                    | "month" | "year"
            )
    })
}
