use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use shop_thermostat_common::{
    commands::parse_temperature, BrokerSettings, OperatorCommand, OverrideMode, Schedule,
    SensorId, SystemSettings, ZoneId, ZoneLimits,
};

use crate::host::{ControlRequest, Snapshot};

#[derive(Clone)]
pub struct ApiState {
    pub commands: mpsc::Sender<ControlRequest>,
    pub snapshot: watch::Receiver<Snapshot>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsUpdate {
    ssid: String,
    #[serde(default)]
    password: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/zones/{zone}/override", post(handle_set_override))
        .route("/api/zones/{zone}/target", post(handle_set_target))
        .route("/api/zones/{zone}/hysteresis", post(handle_set_hysteresis))
        .route("/api/zones/{zone}/enabled", post(handle_set_enabled))
        .route("/api/zones/{zone}/reset", post(handle_reset_runaway))
        .route("/api/network/fallback", post(handle_force_fallback))
        .route("/api/network/credentials", post(handle_set_credentials))
        .route("/api/network/broker", put(handle_configure_broker))
        .route("/api/sensors/{sensor}/calibration", post(handle_set_calibration))
        .route("/api/system", put(handle_update_system))
        .route("/api/day-rollover", post(handle_day_rollover))
        .route(
            "/api/schedule",
            get(handle_get_schedule).put(handle_put_schedule),
        )
        .with_state(state)
}

async fn handle_get_status(State(state): State<ApiState>) -> Response {
    let status = state.snapshot.borrow().status.clone();
    Json(status).into_response()
}

async fn handle_set_override(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let zone = match zone.parse::<ZoneId>() {
        Ok(zone) => zone,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let Some(value) = params.get("mode") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'mode' parameter");
    };
    let mode = match value.parse::<OverrideMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    status_reply(submit(&state, OperatorCommand::SetOverride { zone, mode }).await)
}

async fn handle_set_target(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let zone = match zone.parse::<ZoneId>() {
        Ok(zone) => zone,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target_c) = parse_temperature(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let limits = ZoneLimits::for_zone(zone);
    if !limits.contains_target(target_c) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!(
                "Target outside {} range ({:.1}-{:.1})",
                zone.as_str(),
                limits.min_target_c,
                limits.max_target_c
            ),
        );
    }

    status_reply(submit(&state, OperatorCommand::SetTarget { zone, target_c }).await)
}

async fn handle_set_hysteresis(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let zone = match zone.parse::<ZoneId>() {
        Ok(zone) => zone,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(hysteresis_c) = parse_temperature(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid hysteresis value");
    };

    status_reply(submit(&state, OperatorCommand::SetHysteresis { zone, hysteresis_c }).await)
}

async fn handle_set_enabled(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let zone = match zone.parse::<ZoneId>() {
        Ok(zone) => zone,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(enabled) = value.parse::<bool>() else {
        return error_response(StatusCode::BAD_REQUEST, "Use 'true' or 'false'");
    };

    status_reply(submit(&state, OperatorCommand::SetEnabled { zone, enabled }).await)
}

async fn handle_reset_runaway(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
) -> Response {
    let zone = match zone.parse::<ZoneId>() {
        Ok(zone) => zone,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    status_reply(submit(&state, OperatorCommand::ResetThermalRunaway(zone)).await)
}

async fn handle_force_fallback(State(state): State<ApiState>) -> Response {
    status_reply(submit(&state, OperatorCommand::ForceLocalFallback).await)
}

async fn handle_set_credentials(
    State(state): State<ApiState>,
    Json(update): Json<CredentialsUpdate>,
) -> Response {
    let command = OperatorCommand::ProvisionCredentials {
        ssid: update.ssid,
        password: update.password,
    };
    status_reply(submit(&state, command).await)
}

async fn handle_configure_broker(
    State(state): State<ApiState>,
    Json(settings): Json<BrokerSettings>,
) -> Response {
    status_reply(submit(&state, OperatorCommand::ConfigureBroker(settings)).await)
}

async fn handle_set_calibration(
    State(state): State<ApiState>,
    Path(sensor): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let sensor = match sensor.parse::<SensorId>() {
        Ok(sensor) => sensor,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(offset_c) = parse_temperature(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid calibration offset");
    };

    status_reply(submit(&state, OperatorCommand::SetCalibration { sensor, offset_c }).await)
}

async fn handle_update_system(
    State(state): State<ApiState>,
    Json(settings): Json<SystemSettings>,
) -> Response {
    if let Some(timezone) = &settings.timezone {
        if timezone.trim().parse::<Tz>().is_err() {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Unknown timezone '{timezone}'"),
            );
        }
    }
    status_reply(submit(&state, OperatorCommand::UpdateSystem(settings)).await)
}

async fn handle_day_rollover(State(state): State<ApiState>) -> Response {
    status_reply(submit(&state, OperatorCommand::DayRollover).await)
}

async fn handle_get_schedule(State(state): State<ApiState>) -> Response {
    let schedule = state.snapshot.borrow().schedule.clone();
    Json(schedule).into_response()
}

async fn handle_put_schedule(
    State(state): State<ApiState>,
    Json(schedule): Json<Schedule>,
) -> Response {
    match submit(&state, OperatorCommand::ReplaceSchedule(schedule)).await {
        Ok(snapshot) => Json(snapshot.schedule).into_response(),
        Err(response) => response,
    }
}

async fn submit(state: &ApiState, command: OperatorCommand) -> Result<Snapshot, Response> {
    let (reply, response) = oneshot::channel();
    if state
        .commands
        .send(ControlRequest { command, reply })
        .await
        .is_err()
    {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Control loop is not running",
        ));
    }

    match response.await {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(err)) => Err(error_response(StatusCode::BAD_REQUEST, &err.to_string())),
        Err(_) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Control loop dropped the request",
        )),
    }
}

fn status_reply(result: Result<Snapshot, Response>) -> Response {
    match result {
        Ok(snapshot) => Json(snapshot.status).into_response(),
        Err(response) => response,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use shop_thermostat_common::{Device, RuntimeConfig};

    use super::*;
    use crate::sim::SimulatedPlant;

    /// Stands in for the control loop: applies each request to a real device
    /// and records what it saw.
    fn spawn_device_loop() -> (ApiState, tokio::task::JoinHandle<Vec<OperatorCommand>>) {
        let mut device = Device::new(
            SimulatedPlant::default(),
            RuntimeConfig::default(),
            Schedule::default(),
            0,
        );
        let (commands, mut requests) = mpsc::channel::<ControlRequest>(4);
        let (_snapshot_tx, snapshot) = watch::channel(Snapshot::capture(&device, 0));

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(request) = requests.recv().await {
                seen.push(request.command.clone());
                let result = device
                    .apply_command(request.command, 1_000)
                    .map(|_| Snapshot::capture(&device, 1_000));
                let _ = request.reply.send(result);
            }
            seen
        });

        (ApiState { commands, snapshot }, handle)
    }

    fn query(key: &str, value: &str) -> Query<HashMap<String, String>> {
        Query(HashMap::from([(key.to_string(), value.to_string())]))
    }

    #[tokio::test]
    async fn override_is_forwarded_to_the_control_loop() {
        let (state, handle) = spawn_device_loop();

        let response = handle_set_override(
            State(state.clone()),
            Path("air".to_string()),
            query("mode", "on"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        drop(state);
        let seen = handle.await.unwrap();
        assert_eq!(
            seen,
            vec![OperatorCommand::SetOverride {
                zone: ZoneId::Air,
                mode: OverrideMode::ForceOn
            }]
        );
    }

    #[tokio::test]
    async fn bad_zone_and_out_of_range_target_never_reach_the_loop() {
        let (state, handle) = spawn_device_loop();

        let response = handle_reset_runaway(State(state.clone()), Path("attic".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle_set_target(
            State(state.clone()),
            Path("floor".to_string()),
            query("value", "40"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_set_override(
            State(state.clone()),
            Path("floor".to_string()),
            query("mode", "boost"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        drop(state);
        assert!(handle.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_credentials_are_rejected_by_the_device() {
        let (state, handle) = spawn_device_loop();

        let response = handle_set_credentials(
            State(state.clone()),
            Json(CredentialsUpdate {
                ssid: "shop".to_string(),
                password: "short".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        drop(state);
        assert_eq!(handle.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_routes_reach_the_device() {
        let (state, handle) = spawn_device_loop();

        let response = handle_set_hysteresis(
            State(state.clone()),
            Path("floor".to_string()),
            query("value", "1.5"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = handle_set_calibration(
            State(state.clone()),
            Path("water_out".to_string()),
            query("value", "-0.5"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = handle_configure_broker(
            State(state.clone()),
            Json(BrokerSettings {
                enabled: true,
                host: String::new(),
                port: 1883,
                user: String::new(),
                password: None,
                base_topic: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_update_system(
            State(state.clone()),
            Json(SystemSettings {
                min_cycle_ms: Some(120_000),
                ..SystemSettings::default()
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        drop(state);
        let seen = handle.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen[1],
            OperatorCommand::SetCalibration {
                sensor: SensorId::WaterOut,
                offset_c: -0.5
            }
        );
    }

    #[tokio::test]
    async fn unknown_sensor_and_timezone_never_reach_the_loop() {
        let (state, handle) = spawn_device_loop();

        let response = handle_set_calibration(
            State(state.clone()),
            Path("attic".to_string()),
            query("value", "1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle_update_system(
            State(state.clone()),
            Json(SystemSettings {
                timezone: Some("Mars/Olympus".to_string()),
                ..SystemSettings::default()
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        drop(state);
        assert!(handle.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_loop_answers_service_unavailable() {
        let (state, handle) = spawn_device_loop();
        handle.abort();
        let _ = handle.await;

        let response = handle_day_rollover(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
