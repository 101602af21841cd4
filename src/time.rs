use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::ops::Deref;

/// Timestamp wrapper used for date conversion targets.
///
/// The backend sends dates either as strings (RFC 3339, `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DD`), as unix seconds, or as a `{unix, us}` object. All of them are
/// accepted; serialization always produces an RFC 3339 UTC string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(pub DateTime<Utc>);

/// Object form of a timestamp
#[derive(Debug, Deserialize)]
struct TimeObject {
    /// Unix timestamp in seconds
    unix: i64,
    /// Microseconds component
    #[serde(default)]
    us: i64,
}

impl Time {
    /// Create a new Time from a DateTime
    pub fn new(dt: DateTime<Utc>) -> Self {
        Time(dt)
    }

    /// Create a Time from unix timestamp and microseconds
    pub fn from_unix(unix: i64, usec: i64) -> Option<Self> {
        let nanos = u32::try_from(usec.checked_mul(1000)?).ok()?;
        Utc.timestamp_opt(unix, nanos).single().map(Time)
    }

    /// Parse a date string in any of the accepted textual forms
    pub fn parse_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Time(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(Time(naive.and_utc()));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Time(naive.and_utc()));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Time(naive.and_utc()))
    }

    /// Parse a wire value; `None` when the value is not a recognizable date
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Time::parse_str(s),
            Value::Number(n) => {
                if let Some(secs) = n.as_i64() {
                    Time::from_unix(secs, 0)
                } else {
                    let f = n.as_f64()?;
                    let secs = f.trunc() as i64;
                    let usec = ((f - f.trunc()) * 1_000_000.0).round() as i64;
                    Time::from_unix(secs, usec)
                }
            }
            Value::Object(_) => {
                let obj: TimeObject = serde_json::from_value(value.clone()).ok()?;
                Time::from_unix(obj.unix, obj.us)
            }
            _ => None,
        }
    }

    /// Get the unix timestamp in seconds
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get the microseconds component
    pub fn usec(&self) -> i64 {
        (self.0.timestamp_subsec_nanos() / 1000) as i64
    }

    /// RFC 3339 representation used on the wire
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl Deref for Time {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        Time(dt)
    }
}

impl From<Time> for DateTime<Utc> {
    fn from(t: Time) -> Self {
        t.0
    }
}

impl Serialize for Time {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Time {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Time::parse(&value).ok_or_else(|| D::Error::custom(format!("invalid time value: {}", value)))
    }
}
