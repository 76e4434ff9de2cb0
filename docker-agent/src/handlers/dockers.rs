use std::fmt::Display;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use serde_derive::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::options::CreateContainerRequest;
use crate::ports;

use super::AgentState;

/// The envelope of every response: business errors are reported in-band with
/// `error_code = 1`, never through the HTTP status.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Envelope<T> {
    pub error_code: u8,
    pub msg: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            error_code: 0,
            msg: String::new(),
            data,
        }
    }

    pub fn failed(error: impl Display, data: T) -> Self {
        let msg = error.to_string();
        warn!("request failed: {}", msg);
        Self {
            error_code: 1,
            msg,
            data,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct IdData {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct StatusData {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct FreePorts {
    pub port_list: Vec<u16>,
}

#[derive(Deserialize, Debug)]
pub struct ImageLoadRequest {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize, Debug)]
pub struct PortQuery {
    num: Option<String>,
}

fn empty() -> Map<String, Value> {
    Map::new()
}

pub async fn create(
    State(state): State<AgentState>,
    payload: Result<Json<CreateContainerRequest>, JsonRejection>,
) -> Json<Envelope<IdData>> {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return Json(Envelope::failed(rejection.body_text(), IdData::default())),
    };
    debug!("received create request: {:?}", request);

    Json(match state.lifecycle.create(&request).await {
        Ok(id) => Envelope::ok(IdData { id }),
        Err(e) => Envelope::failed(e, IdData::default()),
    })
}

pub async fn delete(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> Json<Envelope<Map<String, Value>>> {
    Json(match state.lifecycle.delete(&id).await {
        Ok(()) => Envelope::ok(empty()),
        Err(e) => Envelope::failed(e, empty()),
    })
}

pub async fn status(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> Json<Envelope<StatusData>> {
    Json(match state.lifecycle.get_status(&id).await {
        Ok(status) => Envelope::ok(StatusData { status }),
        Err(e) => Envelope::failed(e, StatusData::default()),
    })
}

pub async fn stop(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> Json<Envelope<Map<String, Value>>> {
    Json(match state.lifecycle.stop(&id).await {
        Ok(()) => Envelope::ok(empty()),
        Err(e) => Envelope::failed(e, empty()),
    })
}

pub async fn load_image(
    State(state): State<AgentState>,
    payload: Result<Json<ImageLoadRequest>, JsonRejection>,
) -> Json<Envelope<IdData>> {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return Json(Envelope::failed(rejection.body_text(), IdData::default())),
    };

    Json(match state.images.submit(&request.path) {
        Ok(id) => Envelope::ok(IdData { id }),
        Err(e) => Envelope::failed(e, IdData::default()),
    })
}

pub async fn image_status(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> Json<Envelope<StatusData>> {
    let status = state.images.get_status(&id);

    Json(Envelope::ok(StatusData {
        status: status.to_string(),
    }))
}

pub async fn free_ports(
    query: Result<Query<PortQuery>, QueryRejection>,
) -> Json<Envelope<FreePorts>> {
    let num = match query {
        Ok(Query(PortQuery { num: None })) => Ok(1),
        Ok(Query(PortQuery { num: Some(num) })) => num
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid port count '{}': {}", num, e)),
        Err(rejection) => Err(rejection.body_text()),
    };

    let ports = match num {
        Ok(num) => tokio::task::spawn_blocking(move || ports::allocate(num))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string())),
        Err(e) => Err(e),
    };

    Json(match ports {
        Ok(port_list) => Envelope::ok(FreePorts { port_list }),
        Err(e) => Envelope::failed(e, FreePorts::default()),
    })
}
