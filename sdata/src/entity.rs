//! Entity descriptors and wire coercion.
//!
//! Every entity kind publishes a static table of [`Field`]s: its wire name,
//! wire type, whether the client may write it, and typed accessors. The
//! materializer and the payload builders work exclusively off that table.
//!
//! ```
//! use sdata::entity::{Entity, Field};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Account {
//!     name: String,
//!     employees: Option<i32>,
//! }
//!
//! impl Entity for Account {
//!     const KIND: &'static str = "Account";
//!
//!     fn fields() -> &'static [Field<Self>] {
//!         static FIELDS: OnceLock<Vec<Field<Account>>> = OnceLock::new();
//!         FIELDS.get_or_init(|| {
//!             vec![
//!                 Field::new("AccountName", |a: &Account| &a.name, |a: &mut Account| &mut a.name),
//!                 Field::new("Employees", |a: &Account| &a.employees, |a: &mut Account| &mut a.employees),
//!             ]
//!         })
//!     }
//! }
//!
//! assert_eq!(Account::fields().len(), 2);
//! ```

use crate::error::{SDataError, SDataResult};
use crate::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt;

/// Declared wire type of a field; selects the coercion applied on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Text,
    Boolean,
    Int32,
    Int64,
    Float,
    DateTime,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Text => "text",
            WireType::Boolean => "boolean",
            WireType::Int32 => "int32",
            WireType::Int64 => "int64",
            WireType::Float => "float",
            WireType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// A Rust type that can back an entity field.
pub trait FieldValue: Sized + Send + Sync + 'static {
    const WIRE_TYPE: WireType;

    fn to_value(&self) -> Value;

    /// Converts an already-coerced value; `None` means the value does not fit.
    fn from_value(value: Value) -> Option<Self>;
}

impl FieldValue for String {
    const WIRE_TYPE: WireType = WireType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldValue for bool {
    const WIRE_TYPE: WireType = WireType::Boolean;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldValue for i32 {
    const WIRE_TYPE: WireType = WireType::Int32;

    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(i) => i32::try_from(i).ok(),
            _ => None,
        }
    }
}

impl FieldValue for i64 {
    const WIRE_TYPE: WireType = WireType::Int64;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl FieldValue for f64 {
    const WIRE_TYPE: WireType = WireType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }
}

impl FieldValue for DateTime<Utc> {
    const WIRE_TYPE: WireType = WireType::DateTime;

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const WIRE_TYPE: WireType = T::WIRE_TYPE;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldValue::to_value)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

type Getter<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;
type Setter<E> = Box<dyn Fn(&mut E, Value) -> bool + Send + Sync>;

/// One row of an entity kind's descriptor table.
pub struct Field<E> {
    name: &'static str,
    wire_type: WireType,
    writable: bool,
    relationship: bool,
    get: Getter<E>,
    set: Setter<E>,
}

impl<E: 'static> Field<E> {
    pub fn new<T, G, M>(name: &'static str, get: G, get_mut: M) -> Self
    where
        T: FieldValue,
        G: Fn(&E) -> &T + Send + Sync + 'static,
        M: Fn(&mut E) -> &mut T + Send + Sync + 'static,
    {
        Self {
            name,
            wire_type: T::WIRE_TYPE,
            writable: true,
            relationship: false,
            get: Box::new(move |entity: &E| get(entity).to_value()),
            set: Box::new(move |entity: &mut E, value: Value| match T::from_value(value) {
                Some(v) => {
                    *get_mut(entity) = v;
                    true
                }
                None => false,
            }),
        }
    }

    /// Server-maintained field: materialized on read, never sent on write.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Reference to a related resource: neither materialized nor sent.
    pub fn relationship(mut self) -> Self {
        self.relationship = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn is_writable(&self) -> bool {
        self.writable && !self.relationship
    }

    pub fn is_relationship(&self) -> bool {
        self.relationship
    }

    pub fn get(&self, entity: &E) -> Value {
        (self.get)(entity)
    }

    /// Coerces a raw wire value and stores it on the entity.
    pub fn set_from_wire(&self, entity: &mut E, raw: &serde_json::Value) -> SDataResult<()> {
        let value = coerce(self.wire_type, raw).ok_or_else(|| self.format_error(raw))?;
        if (self.set)(entity, value) {
            Ok(())
        } else {
            Err(self.format_error(raw))
        }
    }

    fn format_error(&self, raw: &serde_json::Value) -> SDataError {
        SDataError::Format {
            field: self.name.to_string(),
            raw: raw.to_string(),
            expected: self.wire_type.to_string(),
        }
    }
}

/// A resource type the client can query and persist.
pub trait Entity: Default + Send + Sync + 'static {
    /// Entity kind name, as registered in the catalog.
    const KIND: &'static str;

    fn fields() -> &'static [Field<Self>];

    /// Current field values, keyed by wire name.
    fn to_record(&self) -> Record {
        Self::fields()
            .iter()
            .filter(|field| !field.is_relationship())
            .map(|field| (field.name().to_string(), field.get(self)))
            .collect()
    }
}

/// Applies the coercion rules for `wire_type` to a raw payload value.
///
/// Returns `None` when the raw value cannot be represented exactly.
pub fn coerce(wire_type: WireType, raw: &serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Some(Value::Null);
    }
    match wire_type {
        WireType::Text => Some(Value::Text(match raw {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })),
        WireType::Boolean => match raw {
            Json::Bool(b) => Some(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(1) => Some(Value::Bool(true)),
                Some(0) => Some(Value::Bool(false)),
                _ => None,
            },
            Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Some(Value::Bool(true)),
                "0" | "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        WireType::Int32 => coerce_integer(raw)
            .filter(|i| i32::try_from(*i).is_ok())
            .map(Value::Int),
        WireType::Int64 => coerce_integer(raw).map(Value::Int),
        WireType::Float => match raw {
            Json::Number(n) => n.as_f64().map(Value::Float),
            Json::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            _ => None,
        },
        WireType::DateTime => match raw {
            Json::String(s) => parse_datetime(s).map(Value::DateTime),
            _ => None,
        },
    }
}

const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn coerce_integer(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) if n.is_f64() => n
            .as_f64()
            // i64::MAX as f64 rounds up to 2^63, which is out of range.
            .filter(|f| f.fract() == 0.0 && *f >= -I64_BOUND && *f < I64_BOUND)
            .map(|f| f as i64),
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Parses the date/time spellings SData servers emit.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Some(body) = text
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        // Offset suffixes like "+0100" only affect display; the millis are UTC.
        let millis = body
            .split(|c| c == '+' || c == '-')
            .find(|part| !part.is_empty())
            .and_then(|digits| digits.parse::<i64>().ok())
            .map(|ms| if body.starts_with('-') { -ms } else { ms })?;
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
