use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use utoipa::OpenApi;

use super::{
    dto::{
        CreatedResponse, MessageResponse, NewDbSettings, NewRoom, NewSensor, ReadingInsert,
        ReadingPointDto, RoomDto, RoomFeedDto, SensorDto, SensorUpdate,
    },
    errors::ApiError,
};
use crate::config::DbSettings;
use crate::db::models::{Reading, RoomWithAggregates, SensorStatus, SensorWithLastReading};
use crate::hub::{DbSettingsUpdated, Event, ReadingUpdated, RoomAdded, SensorAdded};
use crate::state::AppState;

/// Fixed key of the single logical settings row.
const SETTINGS_KEY: &str = "settings";

/// Retention horizon of the dashboard feed and per-sensor reading queries.
const FEED_WINDOW_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Every sensor joined with its single most recent reading. Ties on the
/// maximum timestamp are broken arbitrarily.
#[utoipa::path(
    get,
    path = "/api/sensors",
    responses(
        (status = 200, description = "All sensors with their latest reading", body = Vec<SensorDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn list_sensors(State(state): State<AppState>) -> Result<Json<Vec<SensorDto>>, ApiError> {
    let pool = state.db.pool().await;
    let rows: Vec<SensorWithLastReading> = sqlx::query_as(
        r#"
        SELECT s.id, s.name, s.location, s.sensor_type, s.min_temp, s.max_temp, s.status,
               r.temperature AS last_reading,
               r.inserted_at AS last_reading_time
        FROM sensors s
        LEFT JOIN LATERAL (
            SELECT temperature, inserted_at
            FROM readings
            WHERE sensor_id = s.id
            ORDER BY inserted_at DESC
            LIMIT 1
        ) r ON TRUE
        ORDER BY s.id
        "#,
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Create a sensor and notify connected viewers. The `sensor_added` event is
/// emitted only after the row is persisted.
#[utoipa::path(
    post,
    path = "/api/sensors",
    request_body = NewSensor,
    responses(
        (status = 201, description = "Sensor created", body = CreatedResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn create_sensor(
    State(state): State<AppState>,
    Json(body): Json<NewSensor>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let sensor = body.validate().map_err(ApiError::Validation)?;

    let pool = state.db.pool().await;
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO sensors (name, location, sensor_type, min_temp, max_temp) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(&sensor.name)
    .bind(&sensor.location)
    .bind(&sensor.sensor_type)
    .bind(sensor.min_temp)
    .bind(sensor.max_temp)
    .fetch_one(&pool)
    .await?;

    state.hub.publish(&Event::SensorAdded(SensorAdded {
        id,
        name: sensor.name,
        location: sensor.location,
        sensor_type: sensor.sensor_type,
        min_temp: sensor.min_temp,
        max_temp: sensor.max_temp,
    }));

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id,
            message: "Sensor added successfully".into(),
        }),
    ))
}

/// Partially update a sensor.
#[utoipa::path(
    put,
    path = "/api/sensors/{id}",
    params(("id" = i64, Path, description = "Sensor id")),
    request_body = SensorUpdate,
    responses(
        (status = 200, description = "Sensor updated", body = MessageResponse),
        (status = 400, description = "Invalid fields"),
        (status = 404, description = "Unknown sensor"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "sensors"
)]
pub async fn update_sensor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SensorUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    body.validate().map_err(ApiError::Validation)?;

    let pool = state.db.pool().await;
    let result = sqlx::query(
        "UPDATE sensors SET \
            name = COALESCE($2, name), \
            location = COALESCE($3, location), \
            sensor_type = COALESCE($4, sensor_type), \
            min_temp = COALESCE($5, min_temp), \
            max_temp = COALESCE($6, max_temp), \
            status = COALESCE($7, status) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(&body.name)
    .bind(&body.location)
    .bind(&body.sensor_type)
    .bind(body.min_temp)
    .bind(body.max_temp)
    .bind(body.status)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Sensor not found".into()));
    }

    Ok(Json(MessageResponse {
        message: "Sensor updated successfully".into(),
    }))
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Every room with its sensor-name set (matched by `sensors.location =
/// rooms.name`) and all-time reading count and average temperature.
#[utoipa::path(
    get,
    path = "/api/rooms",
    responses(
        (status = 200, description = "All rooms with aggregates", body = Vec<RoomDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "rooms"
)]
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<RoomDto>>, ApiError> {
    let pool = state.db.pool().await;
    let rows: Vec<RoomWithAggregates> = sqlx::query_as(
        r#"
        SELECT r.id, r.name, r.min_temp, r.max_temp,
               COALESCE(ARRAY_AGG(DISTINCT s.name) FILTER (WHERE s.name IS NOT NULL), '{}') AS sensors,
               COUNT(DISTINCT rd.id) AS reading_count,
               AVG(rd.temperature) AS avg_temperature
        FROM rooms r
        LEFT JOIN sensors s ON s.location = r.name
        LEFT JOIN readings rd ON rd.sensor_id = s.id
        GROUP BY r.id
        ORDER BY r.id
        "#,
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Create a room and notify connected viewers (`room_added`, emitted only
/// after the row is persisted).
#[utoipa::path(
    post,
    path = "/api/rooms",
    request_body = NewRoom,
    responses(
        (status = 201, description = "Room created", body = CreatedResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "rooms"
)]
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<NewRoom>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let room = body.validate().map_err(ApiError::Validation)?;

    let pool = state.db.pool().await;
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO rooms (name, min_temp, max_temp) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&room.name)
    .bind(room.min_temp)
    .bind(room.max_temp)
    .fetch_one(&pool)
    .await?;

    state.hub.publish(&Event::RoomAdded(RoomAdded {
        id,
        name: room.name,
        min_temp: room.min_temp,
        max_temp: room.max_temp,
    }));

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id,
            message: "Room added successfully".into(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Dashboard feed: for every room, the readings of its location-matched
/// sensors from the last 24 hours, oldest first. The serialized response is
/// cached in a single 60-second slot, so repeated calls within the window
/// return a byte-identical snapshot.
#[utoipa::path(
    get,
    path = "/api/readings",
    responses(
        (status = 200, description = "Per-room readings for the last 24 hours", body = Vec<RoomFeedDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_readings_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    if let Some(body) = state.feed_cache.get().await {
        return json_bytes_response(&body);
    }

    let pool = state.db.pool().await;
    let room_names: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT name FROM rooms ORDER BY name")
        .fetch_all(&pool)
        .await?;

    let cutoff = Utc::now() - Duration::hours(FEED_WINDOW_HOURS);
    let rows: Vec<(String, f64, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT s.location, r.temperature, r.inserted_at \
         FROM readings r \
         JOIN sensors s ON s.id = r.sensor_id \
         WHERE r.inserted_at >= $1 \
         ORDER BY r.inserted_at ASC",
    )
    .bind(cutoff)
    .fetch_all(&pool)
    .await?;

    let mut feed: Vec<RoomFeedDto> = room_names
        .into_iter()
        .map(|(name,)| RoomFeedDto {
            name,
            readings: Vec::new(),
        })
        .collect();
    for (location, temperature, inserted_at) in rows {
        // Readings whose sensor location matches no room are not part of the feed.
        if let Some(room) = feed.iter_mut().find(|r| r.name == location) {
            room.readings.push(ReadingPointDto {
                temperature,
                timestamp: inserted_at,
            });
        }
    }

    let body = Arc::new(serde_json::to_vec(&feed).map_err(|e| ApiError::Internal(e.to_string()))?);
    state.feed_cache.put(body.clone()).await;
    json_bytes_response(&body)
}

/// Readings of one sensor from the last 24 hours, oldest first. Unknown
/// sensors yield an empty array.
#[utoipa::path(
    get,
    path = "/api/readings/{sensor_id}",
    params(("sensor_id" = i64, Path, description = "Sensor id")),
    responses(
        (status = 200, description = "Readings for one sensor", body = Vec<ReadingPointDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_sensor_readings(
    State(state): State<AppState>,
    Path(sensor_id): Path<i64>,
) -> Result<Json<Vec<ReadingPointDto>>, ApiError> {
    let pool = state.db.pool().await;
    let cutoff = Utc::now() - Duration::hours(FEED_WINDOW_HOURS);
    let rows: Vec<(f64, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT temperature, inserted_at FROM readings \
         WHERE sensor_id = $1 AND inserted_at >= $2 \
         ORDER BY inserted_at ASC",
    )
    .bind(sensor_id)
    .bind(cutoff)
    .fetch_all(&pool)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(temperature, timestamp)| ReadingPointDto {
                temperature,
                timestamp,
            })
            .collect(),
    ))
}

/// Record one reading and notify viewers (`reading_updated`).
#[utoipa::path(
    post,
    path = "/api/readings",
    responses(
        (status = 201, description = "Reading recorded", body = CreatedResponse),
        (status = 400, description = "Non-numeric sensorId or temperature"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn create_reading(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let reading = ReadingInsert::parse(&body).map_err(ApiError::Validation)?;

    let pool = state.db.pool().await;
    let row: Reading = sqlx::query_as(
        "INSERT INTO readings (sensor_id, temperature) VALUES ($1, $2) \
         RETURNING id, sensor_id, temperature, inserted_at",
    )
    .bind(reading.sensor_id)
    .bind(reading.temperature)
    .fetch_one(&pool)
    .await?;

    state.hub.publish(&Event::ReadingUpdated(ReadingUpdated {
        id: row.id,
        sensor_id: row.sensor_id,
        temperature: row.temperature,
        timestamp: row.inserted_at,
    }));

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id: row.id,
            message: "Reading recorded successfully".into(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The persisted settings blob, or the hardcoded defaults plus the current
/// connection's host/database/user. The password is never included.
#[utoipa::path(
    get,
    path = "/api/settings",
    responses(
        (status = 200, description = "Current settings"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "settings"
)]
pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pool = state.db.pool().await;
    let row: Option<(Value,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
        .bind(SETTINGS_KEY)
        .fetch_optional(&pool)
        .await?;

    match row {
        Some((value,)) => Ok(Json(value)),
        None => {
            let db = state.db.settings().await;
            Ok(Json(json!({
                "updateInterval": 60,
                "tempUnit": "C",
                "dbHost": db.host,
                "dbName": db.database,
                "dbUser": db.user,
            })))
        }
    }
}

/// Merge partial general settings into the persisted blob and notify viewers.
/// The `settings_updated` event carries exactly the fields that were sent.
#[utoipa::path(
    put,
    path = "/api/settings",
    responses(
        (status = 200, description = "Settings updated", body = MessageResponse),
        (status = 400, description = "Update interval out of range"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    let sent = super::dto::validate_general_settings(&body).map_err(ApiError::Validation)?;

    let pool = state.db.pool().await;
    let current: Option<(Value,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
        .bind(SETTINGS_KEY)
        .fetch_optional(&pool)
        .await?;

    let mut merged = match current {
        Some((Value::Object(map),)) => map,
        _ => serde_json::Map::new(),
    };
    for (key, value) in sent.clone() {
        merged.insert(key, value);
    }

    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now()) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(SETTINGS_KEY)
    .bind(Value::Object(merged))
    .execute(&pool)
    .await?;

    state.hub.publish(&Event::SettingsUpdated(sent));

    Ok(Json(MessageResponse {
        message: "Settings updated successfully".into(),
    }))
}

/// Switch the database connection. A candidate pool is opened and must pass a
/// liveness query before it replaces the current one; on failure the previous
/// pool stays authoritative and a 500 is returned.
#[utoipa::path(
    put,
    path = "/api/settings/db",
    request_body = NewDbSettings,
    responses(
        (status = 200, description = "Connection switched", body = MessageResponse),
        (status = 400, description = "Missing database fields"),
        (status = 500, description = "Liveness check failed"),
    ),
    tag = "settings"
)]
pub async fn update_db_settings(
    State(state): State<AppState>,
    Json(body): Json<NewDbSettings>,
) -> Result<Json<MessageResponse>, ApiError> {
    let update = body.validate().map_err(ApiError::Validation)?;

    let current = state.db.settings().await;
    let settings = DbSettings {
        host: update.host,
        port: current.port,
        user: update.user,
        password: update.password,
        database: update.database,
    };

    state
        .db
        .switch(settings.clone())
        .await
        .map_err(ApiError::Liveness)?;

    state.hub.publish(&Event::DbSettingsUpdated(DbSettingsUpdated {
        db_host: settings.host,
        db_name: settings.database,
        db_user: settings.user,
    }));

    Ok(Json(MessageResponse {
        message: "Database settings updated successfully".into(),
    }))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy")),
    tag = "system"
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn json_bytes_response(body: &Arc<Vec<u8>>) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.as_ref().clone()))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_sensors,
        create_sensor,
        update_sensor,
        list_rooms,
        create_room,
        get_readings_feed,
        get_sensor_readings,
        create_reading,
        get_settings,
        update_settings,
        update_db_settings,
        health,
    ),
    components(schemas(
        SensorDto,
        RoomDto,
        RoomFeedDto,
        ReadingPointDto,
        NewSensor,
        SensorUpdate,
        NewRoom,
        NewDbSettings,
        CreatedResponse,
        MessageResponse,
        SensorStatus,
    )),
    tags(
        (name = "sensors",  description = "Sensor endpoints"),
        (name = "rooms",    description = "Room endpoints"),
        (name = "readings", description = "Reading endpoints"),
        (name = "settings", description = "Settings endpoints"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Home Monitor API",
        version = "0.1.0",
        description = "REST API for the home temperature-monitoring dashboard"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use sqlx::PgPool;

    use crate::api::router;
    use crate::config::{Config, DbSettings};
    use crate::db::Db;
    use crate::state::AppState;

    fn test_config() -> Config {
        Config {
            server_host: "127.0.0.1".into(),
            server_port: 0,
            db: DbSettings {
                host: "localhost".into(),
                port: 5432,
                user: "postgres".into(),
                password: String::new(),
                database: "home_monitor_test".into(),
            },
            pool_max_connections: 5,
            feed_cache_ttl_secs: 60,
            rate_limit_burst: 100,
            rate_limit_replenish_secs: 9,
            rate_limit_disabled: true,
        }
    }

    fn test_state(pool: PgPool) -> AppState {
        let config = test_config();
        let db = Db::new(pool, config.db.clone(), config.pool_max_connections);
        AppState::new(db, config)
    }

    fn test_server(state: AppState) -> TestServer {
        TestServer::new(router(state)).unwrap()
    }

    async fn insert_sensor(pool: &PgPool, name: &str, location: &str) -> i64 {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO sensors (name, location, sensor_type, min_temp, max_temp) \
             VALUES ($1, $2, 'temperature', 15.0, 30.0) RETURNING id",
        )
        .bind(name)
        .bind(location)
        .fetch_one(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_reading_hours_ago(pool: &PgPool, sensor_id: i64, temperature: f64, hours: i32) {
        sqlx::query(
            "INSERT INTO readings (sensor_id, temperature, inserted_at) \
             VALUES ($1, $2, now() - make_interval(hours => $3))",
        )
        .bind(sensor_id)
        .bind(temperature)
        .bind(hours)
        .execute(pool)
        .await
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Sensors
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn create_sensor_returns_id_and_is_listed(pool: PgPool) {
        let server = test_server(test_state(pool));

        let resp = server
            .post("/api/sensors")
            .json(&json!({
                "name": "Crib sensor",
                "location": "Nursery",
                "type": "temperature",
                "minTemp": 18,
                "maxTemp": 25
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let created: Value = resp.json();
        let id = created["id"].as_i64().unwrap();

        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], id);
        assert_eq!(list[0]["name"], "Crib sensor");
        assert_eq!(list[0]["location"], "Nursery");
        assert_eq!(list[0]["status"], "active");
        assert!(list[0]["lastReading"].is_null());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_sensor_missing_fields_is_rejected(pool: PgPool) {
        let server = test_server(test_state(pool));

        let resp = server
            .post("/api/sensors")
            .json(&json!({ "name": "Crib sensor", "minTemp": 18, "maxTemp": 25 }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["error"], "Missing required fields");

        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert!(list.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_sensor_inverted_bounds_persists_nothing(pool: PgPool) {
        let server = test_server(test_state(pool));

        let resp = server
            .post("/api/sensors")
            .json(&json!({
                "name": "Crib sensor",
                "location": "Nursery",
                "type": "temperature",
                "minTemp": 25,
                "maxTemp": 18
            }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);

        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert!(list.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_sensors_joins_most_recent_reading(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, id, 19.5, 2).await;
        insert_reading_hours_ago(&pool, id, 21.0, 1).await;

        let server = test_server(test_state(pool));
        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["lastReading"], 21.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_sensor_applies_partial_changes(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        let server = test_server(test_state(pool));

        let resp = server
            .put(&format!("/api/sensors/{id}"))
            .json(&json!({ "name": "Window sensor", "status": "inactive" }))
            .await;
        resp.assert_status_ok();

        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert_eq!(list[0]["name"], "Window sensor");
        assert_eq!(list[0]["status"], "inactive");
        // Untouched fields keep their values.
        assert_eq!(list[0]["location"], "Nursery");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_sensor_rejects_inverted_bounds(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        let server = test_server(test_state(pool));

        let resp = server
            .put(&format!("/api/sensors/{id}"))
            .json(&json!({ "minTemp": 25, "maxTemp": 18 }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);

        let list: Vec<Value> = server.get("/api/sensors").await.json();
        assert_eq!(list[0]["minTemp"], 15.0);
        assert_eq!(list[0]["maxTemp"], 30.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_unknown_sensor_is_404(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server
            .put("/api/sensors/999")
            .json(&json!({ "name": "Ghost" }))
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn room_members_are_matched_by_location_string(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, id, 20.0, 2).await;
        insert_reading_hours_ago(&pool, id, 22.0, 1).await;

        let server = test_server(test_state(pool));
        server
            .post("/api/rooms")
            .json(&json!({ "name": "Nursery", "minTemp": 18, "maxTemp": 25 }))
            .await
            .assert_status(StatusCode::CREATED);

        let rooms: Vec<Value> = server.get("/api/rooms").await.json();
        assert_eq!(rooms.len(), 1);
        let nursery = &rooms[0];
        assert_eq!(nursery["name"], "Nursery");
        assert_eq!(nursery["sensors"], json!(["Crib sensor"]));
        assert_eq!(nursery["readingCount"], 2);
        assert_eq!(nursery["avgTemperature"], 21.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn room_with_no_matching_sensors_has_empty_aggregates(pool: PgPool) {
        let server = test_server(test_state(pool));
        server
            .post("/api/rooms")
            .json(&json!({ "name": "Attic", "minTemp": 5, "maxTemp": 35 }))
            .await
            .assert_status(StatusCode::CREATED);

        let rooms: Vec<Value> = server.get("/api/rooms").await.json();
        assert_eq!(rooms[0]["sensors"], json!([]));
        assert_eq!(rooms[0]["readingCount"], 0);
        assert!(rooms[0]["avgTemperature"].is_null());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_room_inverted_bounds_persists_nothing(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server
            .post("/api/rooms")
            .json(&json!({ "name": "Nursery", "minTemp": 25, "maxTemp": 18 }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);

        let rooms: Vec<Value> = server.get("/api/rooms").await.json();
        assert!(rooms.is_empty());
    }

    // -----------------------------------------------------------------------
    // Readings feed
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn feed_groups_readings_by_room(pool: PgPool) {
        let nursery_sensor = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, nursery_sensor, 20.0, 3).await;
        insert_reading_hours_ago(&pool, nursery_sensor, 21.0, 1).await;
        sqlx::query("INSERT INTO rooms (name, min_temp, max_temp) VALUES ('Nursery', 18, 25), ('Attic', 5, 35)")
            .execute(&pool)
            .await
            .unwrap();

        let server = test_server(test_state(pool));
        let feed: Vec<Value> = server.get("/api/readings").await.json();
        assert_eq!(feed.len(), 2);

        let nursery = feed.iter().find(|r| r["name"] == "Nursery").unwrap();
        let temps: Vec<f64> = nursery["readings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["temperature"].as_f64().unwrap())
            .collect();
        assert_eq!(temps, vec![20.0, 21.0]); // oldest first

        let attic = feed.iter().find(|r| r["name"] == "Attic").unwrap();
        assert_eq!(attic["readings"], json!([]));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn feed_excludes_readings_older_than_24_hours(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, id, 19.0, 25).await;
        insert_reading_hours_ago(&pool, id, 21.0, 1).await;
        sqlx::query("INSERT INTO rooms (name, min_temp, max_temp) VALUES ('Nursery', 18, 25)")
            .execute(&pool)
            .await
            .unwrap();

        let server = test_server(test_state(pool));
        let feed: Vec<Value> = server.get("/api/readings").await.json();
        let readings = feed[0]["readings"].as_array().unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0]["temperature"], 21.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn feed_is_served_from_cache_within_the_ttl(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, id, 21.0, 1).await;
        sqlx::query("INSERT INTO rooms (name, min_temp, max_temp) VALUES ('Nursery', 18, 25)")
            .execute(&pool)
            .await
            .unwrap();

        let server = test_server(test_state(pool.clone()));
        let first = server.get("/api/readings").await.text();

        // New data does not appear until the cache slot expires.
        insert_reading_hours_ago(&pool, id, 23.0, 0).await;
        let second = server.get("/api/readings").await.text();
        assert_eq!(first, second);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn sensor_readings_endpoint_returns_recent_only(pool: PgPool) {
        let id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        insert_reading_hours_ago(&pool, id, 18.0, 30).await;
        insert_reading_hours_ago(&pool, id, 20.5, 2).await;

        let server = test_server(test_state(pool));
        let readings: Vec<Value> = server.get(&format!("/api/readings/{id}")).await.json();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0]["temperature"], 20.5);

        let empty: Vec<Value> = server.get("/api/readings/999").await.json();
        assert!(empty.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_reading_rejects_non_numeric_payload(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server
            .post("/api/readings")
            .json(&json!({ "sensorId": "invalid", "temperature": "not a number" }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn settings_default_reports_connection_without_password(pool: PgPool) {
        let server = test_server(test_state(pool));
        let settings: Value = server.get("/api/settings").await.json();
        assert_eq!(settings["updateInterval"], 60);
        assert_eq!(settings["tempUnit"], "C");
        assert_eq!(settings["dbHost"], "localhost");
        assert_eq!(settings["dbUser"], "postgres");
        assert!(settings.get("dbPass").is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn settings_updates_merge_into_the_stored_blob(pool: PgPool) {
        let server = test_server(test_state(pool));

        server
            .put("/api/settings")
            .json(&json!({ "updateInterval": 120 }))
            .await
            .assert_status_ok();
        server
            .put("/api/settings")
            .json(&json!({ "tempUnit": "F" }))
            .await
            .assert_status_ok();

        let settings: Value = server.get("/api/settings").await.json();
        assert_eq!(settings["updateInterval"], 120);
        assert_eq!(settings["tempUnit"], "F");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn settings_upsert_is_idempotent(pool: PgPool) {
        let server = test_server(test_state(pool));
        for _ in 0..2 {
            server
                .put("/api/settings")
                .json(&json!({ "updateInterval": 300 }))
                .await
                .assert_status_ok();
        }
        let settings: Value = server.get("/api/settings").await.json();
        assert_eq!(settings["updateInterval"], 300);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn out_of_range_interval_leaves_settings_untouched(pool: PgPool) {
        let server = test_server(test_state(pool));

        let resp = server
            .put("/api/settings")
            .json(&json!({ "updateInterval": 10 }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);

        // Still the defaults: nothing was stored.
        let settings: Value = server.get("/api/settings").await.json();
        assert_eq!(settings["updateInterval"], 60);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn db_settings_require_all_fields(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server
            .put("/api/settings/db")
            .json(&json!({ "dbHost": "db.local" }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn failed_liveness_check_keeps_previous_connection(pool: PgPool) {
        let server = test_server(test_state(pool));

        let resp = server
            .put("/api/settings/db")
            .json(&json!({
                "dbHost": "unreachable.invalid",
                "dbName": "nowhere",
                "dbUser": "nobody",
                "dbPass": "irrelevant"
            }))
            .await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

        // The previous configuration is still reported (and still serves reads).
        let settings: Value = server.get("/api/settings").await.json();
        assert_eq!(settings["dbHost"], "localhost");
        assert_eq!(settings["dbUser"], "postgres");
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn creation_emits_exactly_one_event_with_matching_id(pool: PgPool) {
        let state = test_state(pool);
        let mut viewer = state.hub.subscribe();
        let server = test_server(state);

        let resp = server
            .post("/api/sensors")
            .json(&json!({
                "name": "Crib sensor",
                "location": "Nursery",
                "type": "temperature",
                "minTemp": 18,
                "maxTemp": 25
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let created: Value = resp.json();

        let event: Value = serde_json::from_str(&viewer.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "sensor_added");
        assert_eq!(event["data"]["id"], created["id"]);
        assert!(viewer.try_recv().is_err()); // exactly one
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn disconnected_viewer_is_skipped_but_others_still_receive(pool: PgPool) {
        let state = test_state(pool);
        let gone = state.hub.subscribe();
        let mut alive = state.hub.subscribe();
        drop(gone);
        let server = test_server(state);

        server
            .post("/api/rooms")
            .json(&json!({ "name": "Nursery", "minTemp": 18, "maxTemp": 25 }))
            .await
            .assert_status(StatusCode::CREATED);

        let event: Value = serde_json::from_str(&alive.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "room_added");
        assert_eq!(event["data"]["name"], "Nursery");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reading_creation_notifies_viewers(pool: PgPool) {
        let sensor_id = insert_sensor(&pool, "Crib sensor", "Nursery").await;
        let state = test_state(pool);
        let mut viewer = state.hub.subscribe();
        let server = test_server(state);

        let resp = server
            .post("/api/readings")
            .json(&json!({ "sensorId": sensor_id, "temperature": 21.5 }))
            .await;
        resp.assert_status(StatusCode::CREATED);

        let event: Value = serde_json::from_str(&viewer.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "reading_updated");
        assert_eq!(event["data"]["sensorId"], sensor_id);
        assert_eq!(event["data"]["temperature"], 21.5);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn websocket_viewer_receives_fanout(pool: PgPool) {
        let state = test_state(pool);
        let server = TestServer::builder()
            .http_transport()
            .build(router(state))
            .unwrap();

        let mut ws = server.get_websocket("/ws").await.into_websocket().await;
        // Give the upgrade callback a moment to register the viewer.
        tokio::time::sleep(Duration::from_millis(100)).await;

        server
            .post("/api/rooms")
            .json(&json!({ "name": "Nursery", "minTemp": 18, "maxTemp": 25 }))
            .await
            .assert_status(StatusCode::CREATED);

        let text = tokio::time::timeout(Duration::from_secs(5), ws.receive_text())
            .await
            .expect("no event within 5s");
        let event: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(event["type"], "room_added");
    }

    // -----------------------------------------------------------------------
    // Rate limiting & system endpoints
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn api_routes_are_rate_limited_when_enabled(pool: PgPool) {
        let mut config = test_config();
        config.rate_limit_disabled = false;
        config.rate_limit_burst = 2;
        config.rate_limit_replenish_secs = 3600;
        let db = Db::new(pool, config.db.clone(), config.pool_max_connections);
        let server = test_server(AppState::new(db, config));

        server.get("/api/sensors").await.assert_status_ok();
        server.get("/api/sensors").await.assert_status_ok();
        server
            .get("/api/sensors")
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);

        // Health stays outside the limited surface.
        server.get("/health").await.assert_status_ok();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn health_returns_ok(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn openapi_spec_is_served(pool: PgPool) {
        let server = test_server(test_state(pool));
        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Home Monitor API");
    }
}
