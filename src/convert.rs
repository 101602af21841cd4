//! Conversion of raw wire values into declared target shapes.
//!
//! Conversion is total: `null` input always comes back as `null`, and any value
//! that cannot be coerced into its target is returned unchanged.

use crate::response::ApiResponse;
use crate::time::Time;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Reconstruction routine of a user type
pub type ReconstructFn = dyn Fn(&Value) -> Value + Send + Sync;

/// A user type's own reconstruction routine.
#[derive(Clone)]
pub struct Custom {
    name: String,
    reconstruct: Arc<ReconstructFn>,
}

impl Custom {
    /// Wrap an arbitrary reconstruction function
    pub fn new<F>(name: impl Into<String>, reconstruct: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Custom {
            name: name.into(),
            reconstruct: Arc::new(reconstruct),
        }
    }

    /// Reconstruct through a serde model: the value is deserialized into `T` and
    /// serialized back, which fills defaults and drops unknown fields. Values
    /// that do not fit `T` pass through untouched.
    pub fn serde<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Custom::new(std::any::type_name::<T>(), |data| {
            serde_json::from_value::<T>(data.clone())
                .and_then(|model| serde_json::to_value(model))
                .unwrap_or_else(|_| data.clone())
        })
    }

    /// Name of the reconstructed type
    pub fn name(&self) -> &str {
        &self.name
    }

    fn construct(&self, data: &Value) -> Value {
        (self.reconstruct)(data)
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Custom").field(&self.name).finish()
    }
}

/// Desired output shape of a conversion
#[derive(Debug, Clone)]
pub enum Target {
    Boolean,
    Integer,
    Number,
    String,
    Date,
    /// Opaque binary payload, kept as received
    Blob,
    /// Generic object, kept as received
    Object,
    List(Box<Target>),
    /// Key target, value target
    Map(Box<Target>, Box<Target>),
    Custom(Custom),
    /// Unspecified target, pass-through
    Any,
}

impl Target {
    /// `ListOf(item)`
    pub fn list(item: Target) -> Self {
        Target::List(Box::new(item))
    }

    /// `MapOf(key, value)`
    pub fn map(key: Target, value: Target) -> Self {
        Target::Map(Box::new(key), Box::new(value))
    }

    /// Custom target built from a serde model
    pub fn model<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Target::Custom(Custom::serde::<T>())
    }
}

/// Convert `data` into `target`.
pub fn convert(data: &Value, target: &Target) -> Value {
    if data.is_null() {
        return Value::Null;
    }

    let converted = match target {
        Target::Boolean => Some(Value::Bool(to_bool(data))),
        Target::Integer => to_integer(data),
        Target::Number => to_number(data),
        Target::String => Some(Value::String(display_string(data))),
        Target::Date => Time::parse(data).map(|t| Value::String(t.to_rfc3339())),
        Target::Blob | Target::Object | Target::Any => None,
        Target::Custom(custom) => Some(custom.construct(data)),
        Target::List(item) => match data {
            Value::Array(items) => Some(Value::Array(
                items.iter().map(|v| convert(v, item)).collect(),
            )),
            _ => None,
        },
        Target::Map(key, value) => match data {
            Value::Object(entries) => {
                let mut result = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = key_string(convert(&Value::String(k.clone()), key));
                    result.insert(key, convert(v, value));
                }
                Some(Value::Object(result))
            }
            _ => None,
        },
    };

    converted.unwrap_or_else(|| data.clone())
}

/// Convert a possibly absent value; absence is preserved.
pub fn convert_option(data: Option<&Value>, target: &Target) -> Option<Value> {
    data.map(|v| convert(v, target))
}

/// Convert every element of an array, or every member of an object, into `item`.
pub fn construct_from_object(data: &Value, item: &Target) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.iter().map(|v| convert(v, item)).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), convert(v, item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Deserialize a response body into `target`.
///
/// Returns `None` for 204 responses and when no target is requested. The parsed
/// body is used unless it is absent or an empty object, in which case the raw
/// text is used instead.
pub fn deserialize(response: &ApiResponse, target: Option<&Target>) -> Option<Value> {
    let target = target?;
    if response.status == 204 {
        return None;
    }

    let data = match &response.body {
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(body) => Some(body.clone()),
        None => None,
    };
    let data = match data {
        Some(body) => body,
        None if !response.text.is_empty() => Value::String(response.text.clone()),
        None => return None,
    };

    Some(convert(&data, target))
}

fn to_bool(data: &Value) -> bool {
    match data {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => {
            if s.eq_ignore_ascii_case("false") {
                false
            } else {
                !s.is_empty()
            }
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_integer(data: &Value) -> Option<Value> {
    match data {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(Value::Number(n.clone()))
            } else {
                let f = n.as_f64()?.trunc();
                if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(Value::from(f as i64))
                } else {
                    None
                }
            }
        }
        Value::String(s) => parse_int_prefix(s).map(Value::from),
        _ => None,
    }
}

fn to_number(data: &Value) -> Option<Value> {
    match data {
        Value::Number(_) => Some(data.clone()),
        Value::String(s) => parse_float_prefix(s)
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

/// Base-10 integer parse of the longest leading run of digits
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let n: i64 = digits[..end].parse().ok()?;
    Some(if negative { -n } else { n })
}

/// Float parse of the longest leading decimal literal
fn parse_float_prefix(s: &str) -> Option<f64> {
    static FLOAT_PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let re = FLOAT_PREFIX
        .get_or_init(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").ok())
        .as_ref()?;
    let m = re.find(s.trim_start())?;
    m.as_str().parse().ok()
}

/// Display form of a value: arrays comma-joined, objects as JSON text
pub(crate) fn display_string(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(display_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => data.to_string(),
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => display_string(&other),
    }
}
