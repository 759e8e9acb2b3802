use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::domain::{Location, LocationId, UserId};

/// Timestamp layout used by the statistics feed (`yyyy-MM-dd'T'HH:mm:ss.SSSZ`).
pub const STATISTICS_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: i64,
    pub name: String,
}

impl From<LocationRecord> for Location {
    fn from(value: LocationRecord) -> Self {
        Location::new(value.id, value.name)
    }
}

/// Decodes the `/web/allLocations` payload. The top level must be an array;
/// entries missing `id` or `name` are skipped rather than failing the batch.
pub fn decode_location_list(value: Value) -> Result<Vec<Location>, serde_json::Error> {
    let entries: Vec<Value> = serde_json::from_value(value)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<LocationRecord>(entry).ok())
        .map(Location::from)
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocationRecord {
    pub location_id: i64,
    pub location_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocationResponse {
    #[serde(default)]
    pub current_location: Option<Value>,
}

impl CurrentLocationResponse {
    /// `null`, a missing key, or an incomplete record all mean "not checked in".
    pub fn into_location(self) -> Option<Location> {
        let record: CurrentLocationRecord = serde_json::from_value(self.current_location?).ok()?;
        Some(Location::new(record.location_id, record.location_name))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSessionRequest {
    pub location: LocationId,
    #[serde(serialize_with = "serialize_iso8601")]
    pub checkin_timestamp: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_iso8601"
    )]
    pub checkout_timestamp: Option<DateTime<Utc>>,
}

fn serialize_iso8601<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn serialize_optional_iso8601<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serialize_iso8601(value, s),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub location_name: String,
    #[serde(with = "statistics_timestamp")]
    pub checkin_timestamp: DateTime<Utc>,
    #[serde(default, with = "statistics_timestamp::optional")]
    pub checkout_timestamp: Option<DateTime<Utc>>,
}

impl Statistic {
    /// Worked time, or `None` while the session is still open.
    pub fn duration(&self) -> Option<Duration> {
        self.checkout_timestamp
            .map(|checkout| checkout - self.checkin_timestamp)
    }
}

pub mod statistics_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::STATISTICS_TIMESTAMP_FORMAT;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_str(raw, STATISTICS_TIMESTAMP_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(STATISTICS_TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod optional {
        use chrono::{DateTime, Utc};
        use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let Some(raw) = Option::<String>::deserialize(d)? else {
                return Ok(None);
            };
            super::parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerLocationRecord {
    location_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRecord {
    user_id: i64,
    name: String,
    #[serde(default)]
    current_location: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
}

/// Decodes `/web/all-user-current-location`. Entries without `userId`/`name`
/// are dropped; a malformed `currentLocation` reads as "no location".
pub fn decode_worker_list(value: Value) -> Result<Vec<Worker>, serde_json::Error> {
    let entries: Vec<Value> = serde_json::from_value(value)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<WorkerRecord>(entry).ok())
        .map(|record| Worker {
            user_id: UserId(record.user_id),
            name: record.name,
            location_name: record
                .current_location
                .and_then(|loc| serde_json::from_value::<WorkerLocationRecord>(loc).ok())
                .map(|loc| loc.location_name),
        })
        .collect())
}
