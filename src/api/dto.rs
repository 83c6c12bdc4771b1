use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::db::models::{RoomWithAggregates, SensorStatus, SensorWithLastReading};

pub const MIN_UPDATE_INTERVAL_SECS: i64 = 30;
pub const MAX_UPDATE_INTERVAL_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /api/sensors`. Fields are optional at the serde layer so a
/// missing field yields the API's own 400, not a deserialization rejection.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewSensor {
    pub name: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub sensor_type: Option<String>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
}

#[derive(Debug)]
pub struct SensorInsert {
    pub name: String,
    pub location: String,
    pub sensor_type: String,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl NewSensor {
    pub fn validate(self) -> Result<SensorInsert, String> {
        let name = non_empty(self.name)?;
        let location = non_empty(self.location)?;
        let sensor_type = non_empty(self.sensor_type)?;
        let min_temp = self.min_temp.ok_or(MISSING_FIELDS)?;
        let max_temp = self.max_temp.ok_or(MISSING_FIELDS)?;
        check_bounds(min_temp, max_temp)?;
        Ok(SensorInsert {
            name,
            location,
            sensor_type,
            min_temp,
            max_temp,
        })
    }
}

/// Body of `PUT /api/sensors/{id}`: a partial update. Bounds are checked only
/// when both ends are sent; pre-existing rows are not assumed to satisfy the
/// invariant.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub sensor_type: Option<String>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub status: Option<SensorStatus>,
}

impl SensorUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.min_temp, self.max_temp) {
            check_bounds(min, max)?;
        }
        Ok(())
    }
}

/// Body of `POST /api/rooms`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: Option<String>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
}

#[derive(Debug)]
pub struct RoomInsert {
    pub name: String,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl NewRoom {
    pub fn validate(self) -> Result<RoomInsert, String> {
        let name = non_empty(self.name)?;
        let min_temp = self.min_temp.ok_or(MISSING_FIELDS)?;
        let max_temp = self.max_temp.ok_or(MISSING_FIELDS)?;
        check_bounds(min_temp, max_temp)?;
        Ok(RoomInsert {
            name,
            min_temp,
            max_temp,
        })
    }
}

/// Parsed body of `POST /api/readings`. Taken from a raw JSON value so a
/// non-numeric `sensorId` or `temperature` is a 400, not a 422.
#[derive(Debug, PartialEq)]
pub struct ReadingInsert {
    pub sensor_id: i64,
    pub temperature: f64,
}

impl ReadingInsert {
    pub fn parse(body: &Value) -> Result<Self, String> {
        let sensor_id = body
            .get("sensorId")
            .and_then(Value::as_i64)
            .ok_or("sensorId must be a number")?;
        let temperature = body
            .get("temperature")
            .and_then(Value::as_f64)
            .ok_or("temperature must be a number")?;
        Ok(Self {
            sensor_id,
            temperature,
        })
    }
}

/// Validate the partial body of `PUT /api/settings` and return the fields the
/// client actually sent (also the payload of the `settings_updated` event).
pub fn validate_general_settings(body: &Value) -> Result<Map<String, Value>, String> {
    let fields = body
        .as_object()
        .ok_or("Settings must be a JSON object")?
        .clone();

    if let Some(interval) = fields.get("updateInterval") {
        let valid = interval
            .as_i64()
            .is_some_and(|v| (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&v));
        if !valid {
            return Err(format!(
                "Update interval must be between {MIN_UPDATE_INTERVAL_SECS} and {MAX_UPDATE_INTERVAL_SECS} seconds"
            ));
        }
    }

    Ok(fields)
}

/// Body of `PUT /api/settings/db`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewDbSettings {
    pub db_host: Option<String>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_pass: Option<String>,
}

#[derive(Debug)]
pub struct DbSettingsInsert {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl NewDbSettings {
    pub fn validate(self) -> Result<DbSettingsInsert, String> {
        let missing = "Missing required database fields";
        let host = self.db_host.filter(|s| !s.trim().is_empty()).ok_or(missing)?;
        let database = self.db_name.filter(|s| !s.trim().is_empty()).ok_or(missing)?;
        let user = self.db_user.filter(|s| !s.trim().is_empty()).ok_or(missing)?;
        Ok(DbSettingsInsert {
            host,
            database,
            user,
            password: self.db_pass.unwrap_or_default(),
        })
    }
}

const MISSING_FIELDS: &str = "Missing required fields";

fn non_empty(field: Option<String>) -> Result<String, String> {
    field
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| MISSING_FIELDS.to_owned())
}

fn check_bounds(min: f64, max: f64) -> Result<(), String> {
    if min >= max {
        return Err("Minimum temperature must be less than maximum temperature".to_owned());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorDto {
    pub id: i64,
    pub name: String,
    pub location: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub min_temp: f64,
    pub max_temp: f64,
    pub status: SensorStatus,
    pub last_reading: Option<f64>,
    pub last_reading_time: Option<DateTime<Utc>>,
}

impl From<SensorWithLastReading> for SensorDto {
    fn from(s: SensorWithLastReading) -> Self {
        Self {
            id: s.id,
            name: s.name,
            location: s.location,
            sensor_type: s.sensor_type,
            min_temp: s.min_temp,
            max_temp: s.max_temp,
            status: s.status,
            last_reading: s.last_reading,
            last_reading_time: s.last_reading_time,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub id: i64,
    pub name: String,
    pub min_temp: f64,
    pub max_temp: f64,
    /// Names of sensors whose `location` equals this room's name.
    pub sensors: Vec<String>,
    pub reading_count: i64,
    /// All-time average across the room's sensors, one decimal place.
    pub avg_temperature: Option<f64>,
}

impl From<RoomWithAggregates> for RoomDto {
    fn from(r: RoomWithAggregates) -> Self {
        Self {
            id: r.id,
            name: r.name,
            min_temp: r.min_temp,
            max_temp: r.max_temp,
            sensors: r.sensors,
            reading_count: r.reading_count,
            avg_temperature: r.avg_temperature.map(|t| (t * 10.0).round() / 10.0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingPointDto {
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the dashboard feed: a room and its last-24 h readings,
/// oldest first. Rooms with no matching sensors have an empty list.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoomFeedDto {
    pub name: String,
    pub readings: Vec<ReadingPointDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
