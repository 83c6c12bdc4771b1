use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Mirrors the `sensor_status` Postgres enum.
///
/// `active` is the default on creation; `inactive`/`error` are set manually or
/// derived from the most recent reading by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "sensor_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Active,
    Inactive,
    Error,
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorStatus::Active => "active",
            SensorStatus::Inactive => "inactive",
            SensorStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A sensor row joined with its single most recent reading (nullable when the
/// sensor has no readings yet). Ties on the maximum timestamp are broken
/// arbitrarily by the query.
#[derive(Debug, Clone, FromRow)]
pub struct SensorWithLastReading {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub sensor_type: String,
    pub min_temp: f64,
    pub max_temp: f64,
    pub status: SensorStatus,
    pub last_reading: Option<f64>,
    pub last_reading_time: Option<DateTime<Utc>>,
}

/// A room row with its read-time aggregates: sensor names matched by
/// `sensors.location = rooms.name`, plus all-time reading count and average.
#[derive(Debug, Clone, FromRow)]
pub struct RoomWithAggregates {
    pub id: i64,
    pub name: String,
    pub min_temp: f64,
    pub max_temp: f64,
    pub sensors: Vec<String>,
    pub reading_count: i64,
    pub avg_temperature: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Reading {
    pub id: i64,
    pub sensor_id: i64,
    pub temperature: f64,
    pub inserted_at: DateTime<Utc>,
}
